use crate::ipc::error::{err, ok, pipeline_err};
use crate::ipc::helpers::{require_owner, require_str};
use crate::ipc::types::{AppState, Request};
use crate::pipeline::{import, jobs, EntityKind};
use serde_json::json;

fn handle_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let limits = state.config.limits;
    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let owner_id = match require_owner(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let Some(kind) = req
        .params
        .get("entityType")
        .or_else(|| req.params.get("entityKind"))
        .and_then(|v| v.as_str())
        .and_then(EntityKind::parse)
    else {
        return err(
            &req.id,
            "bad_params",
            "Invalid batch entity type",
            Some(json!({ "allowed": ["habit", "checkin", "tag"] })),
        );
    };
    let Some(data) = req.params.get("data").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "Batch payload must be an array", None);
    };

    match import::run_import(conn, &owner_id, kind, data, &limits) {
        Ok(outcome) => ok(&req.id, json!(outcome)),
        Err(e) => {
            tracing::warn!(error = %e, entity_kind = kind.as_str(), "batch import rejected");
            pipeline_err(&req.id, &e)
        }
    }
}

fn handle_job_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let owner_id = match require_owner(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let job_id = match require_str(req, "jobId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match jobs::job_status(conn, &job_id, &owner_id) {
        Ok(Some(view)) => ok(&req.id, json!(view)),
        Ok(None) => err(
            &req.id,
            "not_found",
            "batch import job not found",
            Some(json!({ "jobId": job_id })),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "batchImport.import" => Some(handle_import(state, req)),
        "batchImport.jobStatus" => Some(handle_job_status(state, req)),
        _ => None,
    }
}
