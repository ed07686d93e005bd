use super::dedupe::dedupe;
use super::jobs::{self, JobStatus};
use super::validate::{partition, ValidationContext};
use super::{EntityKind, ErrorCode, PipelineError, RowError};
use crate::config::PipelineLimits;
use crate::pipeline::writer;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub job_id: String,
    pub total_records: usize,
    /// Rows accepted into a committed write, superseded and already-present
    /// rows included.
    pub success_count: usize,
    /// Rows the writer actually created.
    pub inserted_count: usize,
    pub error_count: usize,
    pub status: JobStatus,
}

/// Checks the ceilings that reject a submission before any job exists.
/// Returns the serialized payload size.
pub fn preflight(data: &[Value], limits: &PipelineLimits) -> Result<usize, PipelineError> {
    if data.len() > limits.max_batch_size {
        return Err(PipelineError::BatchTooLarge {
            count: data.len(),
            max: limits.max_batch_size,
        });
    }
    let bytes = serde_json::to_vec(data)?.len();
    if bytes > limits.max_payload_bytes {
        return Err(PipelineError::PayloadTooLarge {
            bytes,
            max: limits.max_payload_bytes,
        });
    }
    Ok(bytes)
}

pub fn owned_habit_ids(conn: &Connection, owner_id: &str) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT id FROM habits WHERE user_id = ?")?;
    let ids = stmt
        .query_map([owner_id], |r| r.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(ids)
}

pub fn run_import(
    conn: &mut Connection,
    owner_id: &str,
    kind: EntityKind,
    data: &[Value],
    limits: &PipelineLimits,
) -> Result<ImportOutcome, PipelineError> {
    let payload_bytes = preflight(data, limits)?;
    let total_records = data.len();
    let job_id = jobs::create_job(conn, owner_id, kind, total_records, payload_bytes)?;
    let span = tracing::info_span!("batch_import", %job_id, entity_kind = kind.as_str());
    let _enter = span.enter();

    let owned = match kind {
        EntityKind::Checkin => match owned_habit_ids(conn, owner_id) {
            Ok(ids) => Some(ids),
            Err(e) => return Err(abandon_job(conn, &job_id, total_records, 0, e)),
        },
        _ => None,
    };
    let ctx = ValidationContext {
        owned_habit_ids: owned.as_ref(),
    };
    let (accepted, mut errors) = partition(data, kind, &ctx);

    let mut success_count = 0;
    let mut inserted_count = 0;
    if !accepted.is_empty() {
        let accepted_count = accepted.len();
        let deduped = dedupe(accepted);
        tracing::debug!(
            accepted = accepted_count,
            superseded = deduped.superseded.len(),
            "deduplicated batch"
        );
        let records: Vec<_> = deduped.survivors.into_iter().map(|a| a.record).collect();

        match writer::write_records(conn, owner_id, limits.tx_timeout, &records) {
            Ok(affected) => {
                success_count = accepted_count;
                inserted_count = affected;
            }
            Err(e) => {
                let code = ErrorCode::for_transaction_failure(&e);
                tracing::warn!(error = %e, code = code.as_str(), "batch write aborted");
                errors = every_row_failed(data, code, &e.to_string());
            }
        }
    }

    let error_count = total_records - success_count;
    if let Err(e) = jobs::record_errors(conn, &job_id, &errors) {
        return Err(abandon_job(conn, &job_id, total_records, success_count, e));
    }
    let status = jobs::finalize_job(conn, &job_id, total_records, success_count)?;

    tracing::info!(
        total = total_records,
        accepted = success_count,
        inserted = inserted_count,
        errors = error_count,
        status = status.as_str(),
        "batch import finished"
    );

    Ok(ImportOutcome {
        job_id,
        total_records,
        success_count,
        inserted_count,
        error_count,
        status,
    })
}

/// Bookkeeping failed after the job row exists. The job is still moved to a
/// terminal state before the original error is returned.
fn abandon_job(
    conn: &Connection,
    job_id: &str,
    total_records: usize,
    success_count: usize,
    cause: rusqlite::Error,
) -> PipelineError {
    tracing::error!(error = %cause, "batch import bookkeeping failed");
    if let Err(e) = jobs::finalize_job(conn, job_id, total_records, success_count) {
        tracing::error!(error = %e, "could not finalize abandoned job");
    }
    cause.into()
}

/// After an aborted write nothing from the batch committed, so every input
/// row is reported with the failure's code.
fn every_row_failed(data: &[Value], code: ErrorCode, message: &str) -> Vec<RowError> {
    data.iter()
        .enumerate()
        .map(|(i, raw)| RowError::new(i + 1, raw, code, message))
        .collect()
}
