use crate::ipc::error::{err, ok};
use crate::ipc::helpers::require_owner;
use crate::ipc::types::{AppState, Request};
use crate::pipeline::validate::validate;
use crate::pipeline::{writer, EntityKind, NormalizedRecord};
use serde_json::json;

fn handle_habits_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let owner_id = match require_owner(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT
           h.id,
           h.name,
           h.description,
           h.type,
           h.color,
           h.priority,
           h.created_at,
           (SELECT COUNT(*) FROM habit_checkins c WHERE c.habit_id = h.id) AS checkin_count
         FROM habits h
         WHERE h.user_id = ?
         ORDER BY h.priority DESC, h.created_at, h.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&owner_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let description: Option<String> = row.get(2)?;
            let habit_type: String = row.get(3)?;
            let color: String = row.get(4)?;
            let priority: i64 = row.get(5)?;
            let created_at: String = row.get(6)?;
            let checkin_count: i64 = row.get(7)?;
            Ok(json!({
                "id": id,
                "name": name,
                "description": description,
                "type": habit_type,
                "color": color,
                "priority": priority,
                "createdAt": created_at,
                "checkinCount": checkin_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(habits) => ok(&req.id, json!({ "habits": habits })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_habits_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let timeout = state.config.limits.tx_timeout;
    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let owner_id = match require_owner(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    // Same normalization as an imported row.
    let habit = match validate(&req.params, 1, EntityKind::Habit, &Default::default()) {
        Ok(NormalizedRecord::Habit(h)) => h,
        Ok(_) => return err(&req.id, "bad_params", "expected a habit", None),
        Err(e) => return err(&req.id, "bad_params", e.error_message, None),
    };

    let res = writer::with_owner_transaction(conn, &owner_id, timeout, |tx, _| {
        writer::insert_habit(tx, &owner_id, &habit)?;
        tx.query_row(
            "SELECT id, created_at FROM habits WHERE rowid = last_insert_rowid()",
            [],
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
        )
    });

    match res {
        Ok((habit_id, created_at)) => ok(
            &req.id,
            json!({
                "habitId": habit_id,
                "name": habit.name,
                "type": habit.habit_type,
                "color": habit.color,
                "priority": habit.priority,
                "createdAt": created_at
            }),
        ),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "habits.list" => Some(handle_habits_list(state, req)),
        "habits.create" => Some(handle_habits_create(state, req)),
        _ => None,
    }
}
