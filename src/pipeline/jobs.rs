use super::{EntityKind, ErrorCode, RowError};
use crate::db;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

/// Errors returned alongside a polled job.
pub const RECENT_ERRORS_LIMIT: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    fn from_db(raw: &str) -> Self {
        match raw {
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Processing,
        }
    }

    /// Terminal status for a finished batch.
    pub fn terminal(total_records: usize, error_count: usize) -> Self {
        if error_count == total_records {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    pub id: String,
    pub user_id: String,
    pub entity_type: String,
    pub status: JobStatus,
    pub total_records: i64,
    pub success_count: i64,
    pub error_count: i64,
    pub progress_percent: i64,
    pub file_size_bytes: i64,
    pub created_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobErrorEntry {
    pub id: String,
    pub row_number: i64,
    pub record_data: serde_json::Value,
    pub error_message: String,
    pub error_code: ErrorCode,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    #[serde(flatten)]
    pub job: BatchJob,
    pub errors: Vec<JobErrorEntry>,
}

pub fn create_job(
    conn: &Connection,
    owner_id: &str,
    kind: EntityKind,
    total_records: usize,
    payload_bytes: usize,
) -> rusqlite::Result<String> {
    let job_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO batch_import_jobs(
            id, user_id, entity_type, status, total_records, file_size_bytes, created_at
         )
         VALUES(?, ?, ?, 'processing', ?, ?, ?)",
        (
            &job_id,
            owner_id,
            kind.as_str(),
            total_records as i64,
            payload_bytes as i64,
            db::now_timestamp(),
        ),
    )?;
    Ok(job_id)
}

/// Moves a processing job to its terminal state. A job is finalized at most
/// once; later calls leave it untouched.
pub fn finalize_job(
    conn: &Connection,
    job_id: &str,
    total_records: usize,
    success_count: usize,
) -> rusqlite::Result<JobStatus> {
    let error_count = total_records.saturating_sub(success_count);
    let status = JobStatus::terminal(total_records, error_count);
    conn.execute(
        "UPDATE batch_import_jobs
         SET status = ?, success_count = ?, error_count = ?, progress_percent = 100,
             completed_at = ?
         WHERE id = ? AND status = 'processing'",
        (
            status.as_str(),
            success_count as i64,
            error_count as i64,
            db::now_timestamp(),
            job_id,
        ),
    )?;
    Ok(status)
}

/// Persists a job's rejected rows in one write.
pub fn record_errors(conn: &Connection, job_id: &str, errors: &[RowError]) -> rusqlite::Result<()> {
    if errors.is_empty() {
        return Ok(());
    }
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO batch_import_errors(
                id, job_id, row_number, record_data, error_message, error_code, created_at
             )
             VALUES(?, ?, ?, ?, ?, ?, ?)",
        )?;
        let now = db::now_timestamp();
        for e in errors {
            stmt.execute((
                Uuid::new_v4().to_string(),
                job_id,
                e.row_number as i64,
                e.record_data.to_string(),
                &e.error_message,
                e.error_code.as_str(),
                &now,
            ))?;
        }
    }
    tx.commit()
}

/// Owner-scoped poll. A job owned by someone else reads as absent.
pub fn job_status(
    conn: &Connection,
    job_id: &str,
    owner_id: &str,
) -> rusqlite::Result<Option<JobStatusView>> {
    let job = conn
        .query_row(
            "SELECT id, user_id, entity_type, status, total_records, success_count,
                    error_count, progress_percent, file_size_bytes, created_at, completed_at
             FROM batch_import_jobs
             WHERE id = ? AND user_id = ?",
            (job_id, owner_id),
            |r| {
                let status: String = r.get(3)?;
                Ok(BatchJob {
                    id: r.get(0)?,
                    user_id: r.get(1)?,
                    entity_type: r.get(2)?,
                    status: JobStatus::from_db(&status),
                    total_records: r.get(4)?,
                    success_count: r.get(5)?,
                    error_count: r.get(6)?,
                    progress_percent: r.get(7)?,
                    file_size_bytes: r.get(8)?,
                    created_at: r.get(9)?,
                    completed_at: r.get(10)?,
                })
            },
        )
        .optional()?;
    let Some(job) = job else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT id, row_number, record_data, error_message, error_code, created_at
         FROM batch_import_errors
         WHERE job_id = ?
         ORDER BY created_at DESC, row_number ASC
         LIMIT ?",
    )?;
    let errors = stmt
        .query_map((job_id, RECENT_ERRORS_LIMIT), |r| {
            let record_data: String = r.get(2)?;
            let code: Option<String> = r.get(4)?;
            Ok(JobErrorEntry {
                id: r.get(0)?,
                row_number: r.get(1)?,
                record_data: serde_json::from_str(&record_data)
                    .unwrap_or(serde_json::Value::String(record_data)),
                error_message: r.get(3)?,
                error_code: code
                    .as_deref()
                    .map(ErrorCode::from_db)
                    .unwrap_or(ErrorCode::Unknown),
                created_at: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(JobStatusView { job, errors }))
}
