use super::dedupe::DayToggle;
use super::{CheckinRecord, HabitRecord, NormalizedRecord, TagRecord};
use crate::db;
use rusqlite::{ffi, Connection, Transaction, TransactionBehavior};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// VM instructions between deadline checks while a statement runs.
const PROGRESS_CHECK_OPS: i32 = 1000;
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Deadline(Instant::now() + timeout)
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.0
    }

    /// Fails with SQLITE_INTERRUPT once the deadline has passed.
    pub fn check(&self) -> rusqlite::Result<()> {
        if self.expired() {
            return Err(rusqlite::Error::SqliteFailure(
                ffi::Error::new(ffi::SQLITE_INTERRUPT),
                Some("transaction timeout exceeded".to_string()),
            ));
        }
        Ok(())
    }
}

/// Runs `body` inside one IMMEDIATE transaction owned by `owner_id`.
///
/// The owner context is set before anything else and cleared before commit.
/// Any error rolls the whole transaction back. A statement still running at
/// the deadline is interrupted.
pub fn with_owner_transaction<T>(
    conn: &mut Connection,
    owner_id: &str,
    timeout: Duration,
    body: impl FnOnce(&Transaction<'_>, &Deadline) -> rusqlite::Result<T>,
) -> rusqlite::Result<T> {
    let deadline = Deadline::after(timeout);
    conn.busy_timeout(timeout)?;
    let result = run_guarded(conn, owner_id, &deadline, body);
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    result
}

fn run_guarded<T>(
    conn: &mut Connection,
    owner_id: &str,
    deadline: &Deadline,
    body: impl FnOnce(&Transaction<'_>, &Deadline) -> rusqlite::Result<T>,
) -> rusqlite::Result<T> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let guard = *deadline;
    tx.progress_handler(PROGRESS_CHECK_OPS, Some(move || guard.expired()));

    let outcome = (|| -> rusqlite::Result<T> {
        db::set_session_owner(&tx, owner_id)?;
        deadline.check()?;
        let value = body(&tx, deadline)?;
        db::clear_session_owner(&tx)?;
        Ok(value)
    })();

    tx.progress_handler(0, None::<fn() -> bool>);
    match outcome {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        // Dropping the transaction rolls it back.
        Err(e) => Err(e),
    }
}

/// Inserts deduplicated import records. Returns rows actually created;
/// collisions on a natural key are already-satisfied no-ops.
pub fn write_records(
    conn: &mut Connection,
    owner_id: &str,
    timeout: Duration,
    records: &[NormalizedRecord],
) -> rusqlite::Result<usize> {
    with_owner_transaction(conn, owner_id, timeout, |tx, deadline| {
        let mut affected = 0;
        for record in records {
            deadline.check()?;
            affected += match record {
                NormalizedRecord::Habit(h) => insert_habit(tx, owner_id, h)?,
                NormalizedRecord::Checkin(c) => insert_checkin(tx, owner_id, c)?,
                NormalizedRecord::Tag(t) => insert_tag(tx, t)?,
            };
        }
        Ok(affected)
    })
}

/// Applies calendar toggles for one habit: completed days are inserted if
/// absent, cleared days are deleted if present.
pub fn write_toggles(
    conn: &mut Connection,
    owner_id: &str,
    habit_id: &str,
    timeout: Duration,
    toggles: &[DayToggle],
) -> rusqlite::Result<usize> {
    with_owner_transaction(conn, owner_id, timeout, |tx, deadline| {
        let mut insert = tx.prepare(
            "INSERT INTO habit_checkins(id, habit_id, user_id, checkin_date, created_at)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(habit_id, checkin_date) DO NOTHING",
        )?;
        let mut delete = tx.prepare(
            "DELETE FROM habit_checkins
             WHERE habit_id = ? AND user_id = ? AND checkin_date = ?",
        )?;

        let now = db::now_timestamp();
        let mut affected = 0;
        for t in toggles {
            deadline.check()?;
            let date = t.date.format("%Y-%m-%d").to_string();
            affected += if t.completed {
                insert.execute((
                    Uuid::new_v4().to_string(),
                    habit_id,
                    owner_id,
                    &date,
                    &now,
                ))?
            } else {
                delete.execute((habit_id, owner_id, &date))?
            };
        }
        Ok(affected)
    })
}

pub fn insert_habit(tx: &Connection, owner_id: &str, h: &HabitRecord) -> rusqlite::Result<usize> {
    tx.prepare_cached(
        "INSERT INTO habits(id, user_id, name, description, type, color, priority, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
    )?
    .execute((
        Uuid::new_v4().to_string(),
        owner_id,
        &h.name,
        &h.description,
        &h.habit_type,
        &h.color,
        h.priority,
        db::now_timestamp(),
    ))
}

pub fn insert_checkin(
    tx: &Connection,
    owner_id: &str,
    c: &CheckinRecord,
) -> rusqlite::Result<usize> {
    tx.prepare_cached(
        "INSERT INTO habit_checkins(
            id, habit_id, user_id, checkin_date, notes, mood_rating, duration_minutes, created_at
         )
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(habit_id, checkin_date) DO NOTHING",
    )?
    .execute((
        Uuid::new_v4().to_string(),
        &c.habit_id,
        owner_id,
        c.date.format("%Y-%m-%d").to_string(),
        &c.notes,
        c.mood_rating,
        c.duration_minutes,
        db::now_timestamp(),
    ))
}

fn insert_tag(tx: &Connection, t: &TagRecord) -> rusqlite::Result<usize> {
    tx.prepare_cached(
        "INSERT INTO tags(id, name, slug, color, created_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT DO NOTHING",
    )?
    .execute((
        Uuid::new_v4().to_string(),
        &t.name,
        &t.slug,
        &t.color,
        db::now_timestamp(),
    ))
}
