use crate::ipc::error::{err, ok, pipeline_err};
use crate::ipc::helpers::{require_owner, require_str};
use crate::ipc::types::{AppState, Request};
use crate::pipeline::toggle::{self, habit_owned_by};
use crate::pipeline::validate::{parse_calendar_date, parse_number, parse_strict_date};
use crate::pipeline::{writer, CheckinRecord};
use chrono::Utc;
use rusqlite::{Connection, Row};
use serde_json::json;

const LIST_DEFAULT_LIMIT: i64 = 30;
const LIST_MAX_LIMIT: i64 = 365;

fn checkin_json(row: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let habit_id: String = row.get(1)?;
    let checkin_date: String = row.get(2)?;
    let notes: Option<String> = row.get(3)?;
    let mood_rating: Option<i64> = row.get(4)?;
    let duration_minutes: Option<i64> = row.get(5)?;
    let created_at: String = row.get(6)?;
    Ok(json!({
        "id": id,
        "habitId": habit_id,
        "checkinDate": checkin_date,
        "notes": notes,
        "moodRating": mood_rating,
        "durationMinutes": duration_minutes,
        "createdAt": created_at
    }))
}

/// Resolves owner + habit params and confirms ownership.
fn owned_habit(conn: &Connection, req: &Request) -> Result<(String, String), serde_json::Value> {
    let owner_id = require_owner(req)?;
    let habit_id = require_str(req, "habitId")?;
    match habit_owned_by(conn, &habit_id, &owner_id) {
        Ok(true) => Ok((owner_id, habit_id)),
        Ok(false) => Err(err(
            &req.id,
            "not_found",
            "Habit not found",
            Some(json!({ "habitId": habit_id })),
        )),
        Err(e) => Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    }
}

fn handle_batch_toggle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let limits = state.config.limits;
    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let owner_id = match require_owner(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let habit_id = match require_str(req, "habitId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(updates) = req.params.get("updates").and_then(|v| v.as_array()) else {
        return ok(&req.id, json!([]));
    };

    match toggle::run_batch_toggle(conn, &owner_id, &habit_id, updates, &limits) {
        Ok(results) => ok(&req.id, json!(results)),
        Err(e) => pipeline_err(&req.id, &e),
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let timeout = state.config.limits.tx_timeout;
    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (owner_id, habit_id) = match owned_habit(conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let raw_date = req
        .params
        .get("checkinDate")
        .or_else(|| req.params.get("date"))
        .filter(|v| !v.is_null());
    let date = match raw_date {
        None => Utc::now().date_naive(),
        Some(v) => match parse_strict_date(v) {
            Some(d) => d,
            None => return err(&req.id, "bad_params", "Invalid checkin date", None),
        },
    };

    let record = CheckinRecord {
        habit_id,
        date,
        notes: req
            .params
            .get("notes")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        mood_rating: req.params.get("moodRating").and_then(parse_number),
        duration_minutes: req.params.get("durationMinutes").and_then(parse_number),
    };

    let created = match writer::with_owner_transaction(conn, &owner_id, timeout, |tx, _| {
        writer::insert_checkin(tx, &owner_id, &record)
    }) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
    };

    // Insert-if-absent: an existing checkin for the day is returned as is.
    let row = conn.query_row(
        "SELECT id, habit_id, checkin_date, notes, mood_rating, duration_minutes, created_at
         FROM habit_checkins WHERE habit_id = ? AND checkin_date = ?",
        (&record.habit_id, record.date.format("%Y-%m-%d").to_string()),
        checkin_json,
    );
    match row {
        Ok(checkin) => ok(
            &req.id,
            json!({ "checkin": checkin, "created": created > 0 }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_list_by_habit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (_, habit_id) = match owned_habit(conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let limit = req
        .params
        .get("limit")
        .and_then(|v| v.as_i64())
        .unwrap_or(LIST_DEFAULT_LIMIT)
        .clamp(1, LIST_MAX_LIMIT);

    let mut stmt = match conn.prepare(
        "SELECT id, habit_id, checkin_date, notes, mood_rating, duration_minutes, created_at
         FROM habit_checkins
         WHERE habit_id = ?
         ORDER BY checkin_date DESC
         LIMIT ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&habit_id, limit), checkin_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(checkins) => ok(&req.id, json!({ "checkins": checkins })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_delete_by_habit_and_date(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (owner_id, habit_id) = match owned_habit(conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(date) = req
        .params
        .get("date")
        .and_then(|v| v.as_str())
        .and_then(parse_calendar_date)
    else {
        return err(
            &req.id,
            "bad_params",
            "date must be in YYYY-MM-DD format",
            None,
        );
    };

    match conn.execute(
        "DELETE FROM habit_checkins WHERE habit_id = ? AND user_id = ? AND checkin_date = ?",
        (&habit_id, &owner_id, date.format("%Y-%m-%d").to_string()),
    ) {
        Ok(deleted) => ok(
            &req.id,
            json!({ "message": "Checkin deleted successfully", "deletedCount": deleted }),
        ),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "checkins.batchToggle" => Some(handle_batch_toggle(state, req)),
        "checkins.create" => Some(handle_create(state, req)),
        "checkins.listByHabit" => Some(handle_list_by_habit(state, req)),
        "checkins.deleteByHabitAndDate" => Some(handle_delete_by_habit_and_date(state, req)),
        _ => None,
    }
}
