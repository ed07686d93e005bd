use super::{
    Accepted, CheckinRecord, EntityKind, ErrorCode, HabitRecord, NormalizedRecord, RowError,
    TagRecord,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use std::collections::HashSet;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

const DEFAULT_HABIT_COLOR: &str = "#6366f1";
const DEFAULT_TAG_COLOR: &str = "#gray";

/// Read-only facts gathered once per batch before validation starts.
#[derive(Debug, Default)]
pub struct ValidationContext<'a> {
    /// Habit ids owned by the submitting user; only consulted for checkins.
    pub owned_habit_ids: Option<&'a HashSet<String>>,
}

pub fn validate(
    raw: &Value,
    row_number: usize,
    kind: EntityKind,
    ctx: &ValidationContext<'_>,
) -> Result<NormalizedRecord, RowError> {
    match kind {
        EntityKind::Habit => validate_habit(raw, row_number).map(NormalizedRecord::Habit),
        EntityKind::Checkin => {
            validate_checkin(raw, row_number, ctx).map(NormalizedRecord::Checkin)
        }
        EntityKind::Tag => validate_tag(raw, row_number).map(NormalizedRecord::Tag),
    }
}

/// Runs the validator over a whole batch. Row numbers are assigned here, from
/// the submitted order, and travel with each record from then on.
pub fn partition(
    records: &[Value],
    kind: EntityKind,
    ctx: &ValidationContext<'_>,
) -> (Vec<Accepted>, Vec<RowError>) {
    let mut accepted = Vec::with_capacity(records.len());
    let mut errors = Vec::new();
    for (i, raw) in records.iter().enumerate() {
        let row_number = i + 1;
        match validate(raw, row_number, kind, ctx) {
            Ok(record) => accepted.push(Accepted { row_number, record }),
            Err(e) => errors.push(e),
        }
    }
    (accepted, errors)
}

fn validate_habit(raw: &Value, row_number: usize) -> Result<HabitRecord, RowError> {
    let name = trimmed_str(raw, "name");
    if name.is_empty() {
        return Err(RowError::new(
            row_number,
            raw,
            ErrorCode::Validation,
            "Habit name is required",
        ));
    }

    let habit_type = match raw.get("type").and_then(|v| v.as_str()) {
        Some("bad") => "bad",
        _ => "good",
    };

    Ok(HabitRecord {
        name,
        description: opt_string(raw, "description"),
        habit_type: habit_type.to_string(),
        color: opt_string(raw, "color").unwrap_or_else(|| DEFAULT_HABIT_COLOR.to_string()),
        priority: raw.get("priority").and_then(parse_number).unwrap_or(0),
    })
}

fn validate_checkin(
    raw: &Value,
    row_number: usize,
    ctx: &ValidationContext<'_>,
) -> Result<CheckinRecord, RowError> {
    let habit_id = raw.get("habitId").and_then(|v| v.as_str()).unwrap_or("");
    let owned = ctx
        .owned_habit_ids
        .map(|ids| ids.contains(habit_id))
        .unwrap_or(false);
    if habit_id.is_empty() || !is_uuid_shape(habit_id) || !owned {
        return Err(RowError::new(
            row_number,
            raw,
            ErrorCode::HabitNotFound,
            "Habit not found or does not belong to user",
        ));
    }

    let Some(date) = raw.get("checkinDate").and_then(parse_strict_date) else {
        return Err(RowError::new(
            row_number,
            raw,
            ErrorCode::Validation,
            "Invalid checkin date",
        ));
    };

    Ok(CheckinRecord {
        habit_id: habit_id.to_string(),
        date,
        notes: opt_string(raw, "notes"),
        mood_rating: raw.get("moodRating").and_then(parse_number),
        duration_minutes: raw.get("durationMinutes").and_then(parse_number),
    })
}

fn validate_tag(raw: &Value, row_number: usize) -> Result<TagRecord, RowError> {
    let name = trimmed_str(raw, "name");
    if name.is_empty() {
        return Err(RowError::new(
            row_number,
            raw,
            ErrorCode::Validation,
            "Tag name is required",
        ));
    }

    let from_input = raw
        .get("slug")
        .and_then(|v| v.as_str())
        .map(slugify)
        .unwrap_or_default();
    let slug = if !from_input.is_empty() {
        from_input
    } else {
        let from_name = slugify(&name);
        if from_name.is_empty() {
            "tag".to_string()
        } else {
            from_name
        }
    };

    Ok(TagRecord {
        name,
        slug,
        color: opt_string(raw, "color").unwrap_or_else(|| DEFAULT_TAG_COLOR.to_string()),
    })
}

fn trimmed_str(raw: &Value, key: &str) -> String {
    raw.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn opt_string(raw: &Value, key: &str) -> Option<String> {
    raw.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

/// Numbers and numeric strings, truncated toward zero. Anything non-finite or
/// non-numeric is `None` so optional fields fall back instead of failing the row.
pub fn parse_number(value: &Value) -> Option<i64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.trim().is_empty() => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    if !parsed.is_finite() {
        return None;
    }
    Some(parsed.trunc() as i64)
}

/// `YYYY-MM-DD` that names a real calendar day.
pub fn parse_calendar_date(s: &str) -> Option<NaiveDate> {
    let b = s.as_bytes();
    let shaped = b.len() == 10
        && b[4] == b'-'
        && b[7] == b'-'
        && b.iter()
            .enumerate()
            .all(|(i, c)| i == 4 || i == 7 || c.is_ascii_digit());
    if !shaped {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// A calendar date or an RFC 3339 timestamp (its UTC day).
pub fn parse_strict_date(value: &Value) -> Option<NaiveDate> {
    let s = value.as_str()?.trim();
    if let Some(d) = parse_calendar_date(s) {
        return Some(d);
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).date_naive())
}

/// Toggle `completed` flag: booleans, "true"/"false", or 1/0.
pub fn parse_completed(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s == "true" => Some(true),
        Value::String(s) if s == "false" => Some(false),
        Value::Number(n) if n.as_f64() == Some(1.0) => Some(true),
        Value::Number(n) if n.as_f64() == Some(0.0) => Some(false),
        _ => None,
    }
}

/// Hyphenated UUID, versions 1-5, RFC 4122 variant.
pub fn is_uuid_shape(s: &str) -> bool {
    if s.len() != 36 {
        return false;
    }
    match Uuid::try_parse(s) {
        Ok(u) => {
            matches!(u.get_version_num(), 1..=5) && u.get_variant() == uuid::Variant::RFC4122
        }
        Err(_) => false,
    }
}

pub fn slugify(value: &str) -> String {
    let folded: String = value
        .trim()
        .to_lowercase()
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace() || *c == '-')
        .collect();

    let mut out = String::with_capacity(folded.len());
    for ch in folded.chars() {
        let ch = if ch.is_whitespace() { '-' } else { ch };
        if ch == '-' && out.ends_with('-') {
            continue;
        }
        out.push(ch);
    }
    out.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const HABIT_A: &str = "3f0c1a52-8d4e-4b7a-9c21-5e6f7a8b9c0d";

    #[test]
    fn habit_requires_trimmed_name() {
        let err = validate(&json!({ "name": "   " }), 3, EntityKind::Habit, &Default::default())
            .expect_err("blank name");
        assert_eq!(err.row_number, 3);
        assert_eq!(err.error_code, ErrorCode::Validation);
        assert_eq!(err.error_message, "Habit name is required");
        assert_eq!(err.record_data, json!({ "name": "   " }));
    }

    #[test]
    fn habit_coerces_optional_fields() {
        let rec = validate(
            &json!({ "name": " Read ", "type": "bad", "priority": "7.9" }),
            1,
            EntityKind::Habit,
            &Default::default(),
        )
        .expect("valid habit");
        let NormalizedRecord::Habit(h) = rec else {
            panic!("expected habit");
        };
        assert_eq!(h.name, "Read");
        assert_eq!(h.habit_type, "bad");
        assert_eq!(h.priority, 7);
        assert_eq!(h.color, "#6366f1");

        let rec = validate(
            &json!({ "name": "Walk", "type": "meh", "priority": "lots" }),
            1,
            EntityKind::Habit,
            &Default::default(),
        )
        .expect("bad priority falls back");
        let NormalizedRecord::Habit(h) = rec else {
            panic!("expected habit");
        };
        assert_eq!(h.habit_type, "good");
        assert_eq!(h.priority, 0);
    }

    #[test]
    fn checkin_requires_owned_uuid_habit() {
        let owned: HashSet<String> = [HABIT_A.to_string()].into_iter().collect();
        let ctx = ValidationContext {
            owned_habit_ids: Some(&owned),
        };

        let unowned = validate(
            &json!({ "habitId": "9f0c1a52-8d4e-4b7a-9c21-5e6f7a8b9c0d", "checkinDate": "2024-01-15" }),
            1,
            EntityKind::Checkin,
            &ctx,
        )
        .expect_err("not owned");
        assert_eq!(unowned.error_code, ErrorCode::HabitNotFound);

        let not_uuid = validate(
            &json!({ "habitId": "habit-1", "checkinDate": "2024-01-15" }),
            2,
            EntityKind::Checkin,
            &ctx,
        )
        .expect_err("not a uuid");
        assert_eq!(not_uuid.error_code, ErrorCode::HabitNotFound);

        let bad_date = validate(
            &json!({ "habitId": HABIT_A, "checkinDate": "2024-02-30" }),
            3,
            EntityKind::Checkin,
            &ctx,
        )
        .expect_err("impossible date");
        assert_eq!(bad_date.error_code, ErrorCode::Validation);
        assert_eq!(bad_date.error_message, "Invalid checkin date");

        let ok = validate(
            &json!({
                "habitId": HABIT_A,
                "checkinDate": "2024-01-15T23:30:00-02:00",
                "moodRating": 4,
                "durationMinutes": "abc"
            }),
            4,
            EntityKind::Checkin,
            &ctx,
        )
        .expect("valid checkin");
        let NormalizedRecord::Checkin(c) = ok else {
            panic!("expected checkin");
        };
        assert_eq!(c.date, NaiveDate::from_ymd_opt(2024, 1, 16).expect("date"));
        assert_eq!(c.mood_rating, Some(4));
        assert_eq!(c.duration_minutes, None);
    }

    #[test]
    fn tag_slug_prefers_input_then_name_then_fallback() {
        let tag = |raw: Value| match validate(&raw, 1, EntityKind::Tag, &Default::default()) {
            Ok(NormalizedRecord::Tag(t)) => t,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(tag(json!({ "name": "Deep Work", "slug": "Focus Time" })).slug, "focus-time");
        assert_eq!(tag(json!({ "name": "Café  Crème!" })).slug, "cafe-creme");
        assert_eq!(tag(json!({ "name": "!!!" })).slug, "tag");
        assert_eq!(tag(json!({ "name": "x" })).color, "#gray");

        let err = validate(&json!("not an object"), 5, EntityKind::Tag, &Default::default())
            .expect_err("non-object");
        assert_eq!(err.error_message, "Tag name is required");
    }

    #[test]
    fn partition_keeps_original_row_numbers() {
        let rows = vec![json!({ "name": "a" }), json!({}), json!({ "name": "c" })];
        let (accepted, errors) = partition(&rows, EntityKind::Habit, &Default::default());
        let accepted_rows: Vec<usize> = accepted.iter().map(|a| a.row_number).collect();
        assert_eq!(accepted_rows, vec![1, 3]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].row_number, 2);
    }

    #[test]
    fn completed_and_numbers_coerce_like_form_input() {
        assert_eq!(parse_completed(&json!("true")), Some(true));
        assert_eq!(parse_completed(&json!(0)), Some(false));
        assert_eq!(parse_completed(&json!(2)), None);
        assert_eq!(parse_completed(&json!("yes")), None);
        assert_eq!(parse_number(&json!("-3.7")), Some(-3));
        assert_eq!(parse_number(&json!("inf")), None);
        assert_eq!(parse_number(&json!("")), None);
        assert_eq!(parse_calendar_date("2024-1-15"), None);
        assert!(parse_calendar_date("2024-02-29").is_some());
    }
}
