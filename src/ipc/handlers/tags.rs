use crate::ipc::error::{err, ok};
use crate::ipc::helpers::require_owner;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_tags_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let owner_id = match require_owner(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    // Tags are shared rows; a caller sees the ones they created (audit log)
    // plus the ones attached to their habits.
    let mut stmt = match conn.prepare(
        "SELECT
           t.id,
           t.name,
           t.slug,
           t.color,
           EXISTS(
             SELECT 1 FROM audit_log a
             WHERE a.table_name = 'tags' AND a.operation = 'INSERT'
               AND a.record_id = t.id AND a.user_id = ?1
           ) AS is_owned
         FROM tags t
         WHERE t.id IN (
             SELECT a.record_id FROM audit_log a
             WHERE a.table_name = 'tags' AND a.operation = 'INSERT' AND a.user_id = ?1
             UNION
             SELECT ht.tag_id FROM habit_tags ht
             JOIN habits h ON h.id = ht.habit_id
             WHERE h.user_id = ?1
         )
         ORDER BY t.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&owner_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let slug: String = row.get(2)?;
            let color: String = row.get(3)?;
            let is_owned: bool = row.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "slug": slug,
                "color": color,
                "isOwned": is_owned
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(tags) => ok(&req.id, json!({ "tags": tags })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tags.list" => Some(handle_tags_list(state, req)),
        _ => None,
    }
}
