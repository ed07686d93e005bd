use super::dedupe::{dedupe_toggles, drop_unchanged, DayToggle};
use super::validate::{parse_calendar_date, parse_completed};
use super::PipelineError;
use crate::config::PipelineLimits;
use crate::pipeline::writer;
use chrono::NaiveDate;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

/// Outcome for one submitted toggle, reported in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToggleResult {
    pub date: String,
    pub completed: bool,
    pub ok: bool,
}

pub fn habit_owned_by(conn: &Connection, habit_id: &str, owner_id: &str) -> rusqlite::Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM habits WHERE id = ? AND user_id = ?",
            (habit_id, owner_id),
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn completed_days(
    conn: &Connection,
    habit_id: &str,
    days: &[NaiveDate],
) -> rusqlite::Result<HashSet<NaiveDate>> {
    if days.is_empty() {
        return Ok(HashSet::new());
    }
    let placeholders = vec!["?"; days.len()].join(",");
    let sql = format!(
        "SELECT checkin_date FROM habit_checkins WHERE habit_id = ? AND checkin_date IN ({})",
        placeholders
    );
    let mut bind: Vec<SqlValue> = Vec::with_capacity(days.len() + 1);
    bind.push(SqlValue::Text(habit_id.to_string()));
    for d in days {
        bind.push(SqlValue::Text(d.format("%Y-%m-%d").to_string()));
    }

    let mut stmt = conn.prepare(&sql)?;
    let stored = stmt
        .query_map(params_from_iter(bind), |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(stored
        .iter()
        .filter_map(|s| parse_calendar_date(s))
        .collect())
}

pub fn run_batch_toggle(
    conn: &mut Connection,
    owner_id: &str,
    habit_id: &str,
    updates: &[Value],
    limits: &PipelineLimits,
) -> Result<Vec<ToggleResult>, PipelineError> {
    if updates.len() > limits.max_batch_size {
        return Err(PipelineError::BatchTooLarge {
            count: updates.len(),
            max: limits.max_batch_size,
        });
    }

    let mut results = Vec::with_capacity(updates.len());
    let mut toggles = Vec::new();
    for (i, update) in updates.iter().enumerate() {
        let date = update
            .get("date")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let Some(completed) = update.get("completed").and_then(parse_completed) else {
            results.push(ToggleResult { date, completed: false, ok: false });
            continue;
        };
        let Some(day) = parse_calendar_date(&date) else {
            results.push(ToggleResult { date, completed, ok: false });
            continue;
        };
        results.push(ToggleResult { date, completed, ok: true });
        toggles.push(DayToggle {
            row_number: i + 1,
            date: day,
            completed,
        });
    }

    if toggles.is_empty() {
        return Ok(results);
    }

    if !habit_owned_by(conn, habit_id, owner_id)? {
        tracing::debug!(habit_id, "batch toggle against missing or foreign habit");
        fail_rows(&mut results, &toggles);
        return Ok(results);
    }

    let deduped = dedupe_toggles(toggles.clone());
    let days: Vec<NaiveDate> = deduped.survivors.iter().map(|t| t.date).collect();
    let committed = completed_days(conn, habit_id, &days)?;
    let (changed, unchanged) = drop_unchanged(deduped.survivors, &committed);

    if changed.is_empty() {
        return Ok(results);
    }

    match writer::write_toggles(conn, owner_id, habit_id, limits.tx_timeout, &changed) {
        Ok(affected) => {
            tracing::info!(
                habit_id,
                requested = updates.len(),
                superseded = deduped.superseded.len(),
                unchanged,
                affected,
                "batch toggle applied"
            );
        }
        Err(e) => {
            tracing::warn!(habit_id, error = %e, "batch toggle aborted");
            // No-op days never reached the transaction and stay ok.
            let written: HashSet<NaiveDate> = changed.iter().map(|t| t.date).collect();
            fail_rows(
                &mut results,
                toggles.iter().filter(|t| written.contains(&t.date)),
            );
        }
    }
    Ok(results)
}

/// Marks the given validated rows as failed.
fn fail_rows<'a>(
    results: &mut [ToggleResult],
    toggles: impl IntoIterator<Item = &'a DayToggle>,
) {
    for t in toggles {
        results[t.row_number - 1].ok = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use serde_json::json;
    use std::time::Duration;

    const OWNER: &str = "user-a";
    const HABIT: &str = "3f0c1a52-8d4e-4b7a-9c21-5e6f7a8b9c0d";

    fn setup() -> Connection {
        let conn = db::open_in_memory().expect("open db");
        conn.execute(
            "INSERT INTO habits(id, user_id, name, created_at) VALUES(?, ?, 'Run', 'now')",
            (HABIT, OWNER),
        )
        .expect("seed habit");
        conn
    }

    fn stored_days(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT checkin_date FROM habit_checkins ORDER BY checkin_date")
            .expect("prepare");
        stmt.query_map([], |r| r.get(0))
            .expect("query")
            .collect::<Result<Vec<_>, _>>()
            .expect("rows")
    }

    #[test]
    fn invalid_rows_fail_alone_in_input_order() {
        let mut conn = setup();
        let updates = vec![
            json!({ "date": "invalid-date", "completed": true }),
            json!({ "date": "2024-01-15", "completed": "true" }),
            json!({ "date": "2024-01-16", "completed": "maybe" }),
        ];
        let out = run_batch_toggle(&mut conn, OWNER, HABIT, &updates, &Default::default())
            .expect("toggle");
        assert_eq!(
            out,
            vec![
                ToggleResult { date: "invalid-date".into(), completed: true, ok: false },
                ToggleResult { date: "2024-01-15".into(), completed: true, ok: true },
                ToggleResult { date: "2024-01-16".into(), completed: false, ok: false },
            ]
        );
        assert_eq!(stored_days(&conn), vec!["2024-01-15".to_string()]);
    }

    #[test]
    fn later_toggle_for_same_day_wins() {
        let mut conn = setup();
        run_batch_toggle(
            &mut conn,
            OWNER,
            HABIT,
            &[json!({ "date": "2024-01-15", "completed": true })],
            &Default::default(),
        )
        .expect("seed day");

        let out = run_batch_toggle(
            &mut conn,
            OWNER,
            HABIT,
            &[
                json!({ "date": "2024-01-15", "completed": true }),
                json!({ "date": "2024-01-15", "completed": false }),
            ],
            &Default::default(),
        )
        .expect("toggle");
        assert!(out.iter().all(|r| r.ok));
        assert!(stored_days(&conn).is_empty());
    }

    #[test]
    fn foreign_habit_fails_every_row_and_writes_nothing() {
        let mut conn = setup();
        let out = run_batch_toggle(
            &mut conn,
            "user-b",
            HABIT,
            &[json!({ "date": "2024-01-15", "completed": true })],
            &Default::default(),
        )
        .expect("toggle");
        assert_eq!(
            out,
            vec![ToggleResult { date: "2024-01-15".into(), completed: true, ok: false }]
        );
        assert!(stored_days(&conn).is_empty());
    }

    #[test]
    fn resubmission_stays_ok_and_aborted_write_fails_valid_rows() {
        let mut conn = setup();
        let updates = vec![json!({ "date": "2024-01-15", "completed": true })];
        for _ in 0..2 {
            let out = run_batch_toggle(&mut conn, OWNER, HABIT, &updates, &Default::default())
                .expect("toggle");
            assert!(out[0].ok);
        }
        assert_eq!(stored_days(&conn).len(), 1);

        let limits = PipelineLimits {
            tx_timeout: Duration::ZERO,
            ..Default::default()
        };
        let out = run_batch_toggle(
            &mut conn,
            OWNER,
            HABIT,
            &[
                json!({ "date": "2024-01-15", "completed": false }),
                json!({ "date": "bad", "completed": false }),
            ],
            &limits,
        )
        .expect("toggle");
        assert!(out.iter().all(|r| !r.ok));
        assert_eq!(stored_days(&conn).len(), 1);
    }

    #[test]
    fn aborted_write_keeps_unchanged_days_ok() {
        let mut conn = setup();
        run_batch_toggle(
            &mut conn,
            OWNER,
            HABIT,
            &[json!({ "date": "2024-01-15", "completed": true })],
            &Default::default(),
        )
        .expect("seed day");

        let limits = PipelineLimits {
            tx_timeout: Duration::ZERO,
            ..Default::default()
        };
        let out = run_batch_toggle(
            &mut conn,
            OWNER,
            HABIT,
            &[
                json!({ "date": "2024-01-15", "completed": true }),
                json!({ "date": "2024-01-16", "completed": false }),
                json!({ "date": "2024-01-16", "completed": true }),
            ],
            &limits,
        )
        .expect("toggle");
        assert_eq!(
            out,
            vec![
                ToggleResult { date: "2024-01-15".into(), completed: true, ok: true },
                ToggleResult { date: "2024-01-16".into(), completed: false, ok: false },
                ToggleResult { date: "2024-01-16".into(), completed: true, ok: false },
            ]
        );
        assert_eq!(stored_days(&conn), vec!["2024-01-15".to_string()]);
    }

    #[test]
    fn too_many_updates_rejected_up_front() {
        let mut conn = setup();
        let updates: Vec<Value> = (0..1001)
            .map(|_| json!({ "date": "2024-01-15", "completed": true }))
            .collect();
        let err = run_batch_toggle(&mut conn, OWNER, HABIT, &updates, &Default::default())
            .expect_err("too many");
        assert!(matches!(err, PipelineError::BatchTooLarge { .. }));
    }
}
