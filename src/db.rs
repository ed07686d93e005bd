use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "habitd.sqlite3";

/// Session key read by the owner guard and audit triggers.
pub const SESSION_OWNER_KEY: &str = "app.user_id";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS habits(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            type TEXT NOT NULL DEFAULT 'good',
            color TEXT NOT NULL DEFAULT '#6366f1',
            priority INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_habits_user ON habits(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS habit_checkins(
            id TEXT PRIMARY KEY,
            habit_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            checkin_date TEXT NOT NULL,
            notes TEXT,
            mood_rating INTEGER,
            duration_minutes INTEGER,
            created_at TEXT NOT NULL,
            FOREIGN KEY(habit_id) REFERENCES habits(id) ON DELETE CASCADE,
            UNIQUE(habit_id, checkin_date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_habit_checkins_user ON habit_checkins(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tags(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            color TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS habit_tags(
            id TEXT PRIMARY KEY,
            habit_id TEXT NOT NULL,
            tag_id TEXT NOT NULL,
            FOREIGN KEY(habit_id) REFERENCES habits(id) ON DELETE CASCADE,
            FOREIGN KEY(tag_id) REFERENCES tags(id) ON DELETE CASCADE,
            UNIQUE(habit_id, tag_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS batch_import_jobs(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            status TEXT NOT NULL,
            total_records INTEGER NOT NULL,
            success_count INTEGER NOT NULL DEFAULT 0,
            error_count INTEGER NOT NULL DEFAULT 0,
            progress_percent INTEGER NOT NULL DEFAULT 0,
            file_size_bytes INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            completed_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_batch_import_jobs_user ON batch_import_jobs(user_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS batch_import_errors(
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL,
            row_number INTEGER NOT NULL,
            record_data TEXT NOT NULL,
            error_message TEXT NOT NULL,
            error_code TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(job_id) REFERENCES batch_import_jobs(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_batch_import_errors_job ON batch_import_errors(job_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS audit_log(
            id TEXT PRIMARY KEY,
            table_name TEXT NOT NULL,
            operation TEXT NOT NULL,
            record_id TEXT,
            user_id TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_log_table_user ON audit_log(table_name, user_id)",
        [],
    )?;

    // Rows here live only inside a write transaction (see set_session_owner).
    conn.execute(
        "CREATE TABLE IF NOT EXISTS session_context(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;
    // A crashed process could have left a committed context behind.
    conn.execute("DELETE FROM session_context", [])?;

    install_triggers(conn)?;
    Ok(())
}

fn install_triggers(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "CREATE TRIGGER IF NOT EXISTS trg_habits_owner_guard
         BEFORE INSERT ON habits
         WHEN EXISTS (
             SELECT 1 FROM session_context s
             WHERE s.key = 'app.user_id' AND s.value <> NEW.user_id
         )
         BEGIN
             SELECT RAISE(ABORT, 'row owner does not match session owner');
         END;

         CREATE TRIGGER IF NOT EXISTS trg_habit_checkins_owner_guard
         BEFORE INSERT ON habit_checkins
         WHEN EXISTS (
             SELECT 1 FROM session_context s
             WHERE s.key = 'app.user_id'
               AND (
                   s.value <> NEW.user_id
                   OR NOT EXISTS (
                       SELECT 1 FROM habits h
                       WHERE h.id = NEW.habit_id AND h.user_id = s.value
                   )
               )
         )
         BEGIN
             SELECT RAISE(ABORT, 'row owner does not match session owner');
         END;",
    )?;

    for table in ["habits", "habit_checkins", "tags"] {
        let sql = format!(
            "CREATE TRIGGER IF NOT EXISTS trg_{table}_audit_insert
             AFTER INSERT ON {table}
             WHEN EXISTS (SELECT 1 FROM session_context WHERE key = 'app.user_id')
             BEGIN
                 INSERT INTO audit_log(id, table_name, operation, record_id, user_id, created_at)
                 VALUES(
                     lower(hex(randomblob(16))),
                     '{table}',
                     'INSERT',
                     NEW.id,
                     (SELECT value FROM session_context WHERE key = 'app.user_id'),
                     strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 );
             END;"
        );
        conn.execute_batch(&sql)?;
    }
    Ok(())
}

/// Transaction-local owner context. Must be the first statement of a write
/// transaction and cleared again before commit.
pub fn set_session_owner(conn: &Connection, owner_id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO session_context(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (SESSION_OWNER_KEY, owner_id),
    )?;
    Ok(())
}

pub fn clear_session_owner(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM session_context WHERE key = ?",
        [SESSION_OWNER_KEY],
    )?;
    Ok(())
}

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
