//! Bulk mutation pipeline: validate every row, collapse duplicates, commit the
//! survivors in one owner-scoped transaction, and attribute each outcome back
//! to its 1-based input row.

pub mod dedupe;
pub mod error;
pub mod import;
pub mod jobs;
pub mod toggle;
pub mod validate;
pub mod writer;

use chrono::NaiveDate;
use serde::Serialize;

pub use error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Habit,
    Checkin,
    Tag,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Habit => "habit",
            EntityKind::Checkin => "checkin",
            EntityKind::Tag => "tag",
        }
    }

    /// Accepts singular and plural spellings.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "habit" | "habits" => Some(EntityKind::Habit),
            "checkin" | "checkins" => Some(EntityKind::Checkin),
            "tag" | "tags" => Some(EntityKind::Tag),
            _ => None,
        }
    }
}

/// Closed classification attached to every rejected row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Validation,
    HabitNotFound,
    NotFound,
    Timeout,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Validation => "VALIDATION",
            ErrorCode::HabitNotFound => "HABIT_NOT_FOUND",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw {
            "VALIDATION" => ErrorCode::Validation,
            "HABIT_NOT_FOUND" => ErrorCode::HabitNotFound,
            "NOT_FOUND" => ErrorCode::NotFound,
            "TIMEOUT" => ErrorCode::Timeout,
            _ => ErrorCode::Unknown,
        }
    }

    /// Classifies a failed write transaction.
    pub fn for_transaction_failure(e: &rusqlite::Error) -> Self {
        use rusqlite::ffi::ErrorCode as Sqlite;
        if let rusqlite::Error::SqliteFailure(inner, _) = e {
            if matches!(
                inner.code,
                Sqlite::OperationInterrupted | Sqlite::DatabaseBusy | Sqlite::DatabaseLocked
            ) {
                return ErrorCode::Timeout;
            }
        }
        if e.to_string().to_ascii_lowercase().contains("timeout") {
            return ErrorCode::Timeout;
        }
        ErrorCode::Unknown
    }
}

/// One rejected input row. `row_number` is the 1-based position in the
/// submitted array and is never recomputed after filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub row_number: usize,
    pub record_data: serde_json::Value,
    pub error_message: String,
    pub error_code: ErrorCode,
}

impl RowError {
    pub fn new(
        row_number: usize,
        record: &serde_json::Value,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            row_number,
            record_data: record.clone(),
            error_message: message.into(),
            error_code: code,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HabitRecord {
    pub name: String,
    pub description: Option<String>,
    pub habit_type: String,
    pub color: String,
    pub priority: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckinRecord {
    pub habit_id: String,
    pub date: NaiveDate,
    pub notes: Option<String>,
    pub mood_rating: Option<i64>,
    pub duration_minutes: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TagRecord {
    pub name: String,
    pub slug: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedRecord {
    Habit(HabitRecord),
    Checkin(CheckinRecord),
    Tag(TagRecord),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LogicalKey {
    Checkin { habit_id: String, date: NaiveDate },
    Tag { slug: String },
}

impl NormalizedRecord {
    /// Habits have no natural key: every row is independent.
    pub fn logical_key(&self) -> Option<LogicalKey> {
        match self {
            NormalizedRecord::Habit(_) => None,
            NormalizedRecord::Checkin(c) => Some(LogicalKey::Checkin {
                habit_id: c.habit_id.clone(),
                date: c.date,
            }),
            NormalizedRecord::Tag(t) => Some(LogicalKey::Tag {
                slug: t.slug.clone(),
            }),
        }
    }
}

/// A validated row still tagged with its input position.
#[derive(Debug, Clone, PartialEq)]
pub struct Accepted {
    pub row_number: usize,
    pub record: NormalizedRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_kind_accepts_singular_and_plural() {
        assert_eq!(EntityKind::parse("habit"), Some(EntityKind::Habit));
        assert_eq!(EntityKind::parse("checkins"), Some(EntityKind::Checkin));
        assert_eq!(EntityKind::parse("tags"), Some(EntityKind::Tag));
        assert_eq!(EntityKind::parse("Habit"), None);
        assert_eq!(EntityKind::parse("reminder"), None);
    }
}
