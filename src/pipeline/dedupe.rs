use super::Accepted;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

#[derive(Debug, Clone, PartialEq)]
pub struct Deduped<T> {
    /// One entry per logical key (plus every keyless item), holding the last
    /// submitted value at the position its key was first seen.
    pub survivors: Vec<T>,
    /// Items replaced by a later item with the same key. Not errors.
    pub superseded: Vec<T>,
}

/// Last-writer-wins collapse over items sharing a key. Items with no key are
/// all kept.
pub fn last_write_wins<T, K>(items: Vec<T>, key_of: impl Fn(&T) -> Option<K>) -> Deduped<T>
where
    K: Eq + Hash,
{
    let mut survivors: Vec<T> = Vec::with_capacity(items.len());
    let mut superseded = Vec::new();
    let mut slot_by_key: HashMap<K, usize> = HashMap::new();

    for item in items {
        let Some(key) = key_of(&item) else {
            survivors.push(item);
            continue;
        };
        match slot_by_key.get(&key) {
            Some(&slot) => {
                let older = std::mem::replace(&mut survivors[slot], item);
                superseded.push(older);
            }
            None => {
                slot_by_key.insert(key, survivors.len());
                survivors.push(item);
            }
        }
    }

    Deduped {
        survivors,
        superseded,
    }
}

pub fn dedupe(records: Vec<Accepted>) -> Deduped<Accepted> {
    last_write_wins(records, |a| a.record.logical_key())
}

/// One requested calendar toggle for a single habit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayToggle {
    pub row_number: usize,
    pub date: NaiveDate,
    pub completed: bool,
}

pub fn dedupe_toggles(toggles: Vec<DayToggle>) -> Deduped<DayToggle> {
    last_write_wins(toggles, |t| Some(t.date))
}

/// Drops toggles that would not change the committed state of their day.
pub fn drop_unchanged(
    toggles: Vec<DayToggle>,
    completed_days: &HashSet<NaiveDate>,
) -> (Vec<DayToggle>, usize) {
    let before = toggles.len();
    let changed: Vec<DayToggle> = toggles
        .into_iter()
        .filter(|t| t.completed != completed_days.contains(&t.date))
        .collect();
    let dropped = before - changed.len();
    (changed, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{CheckinRecord, HabitRecord, NormalizedRecord, TagRecord};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).expect("date")
    }

    fn checkin(row: usize, habit: &str, d: u32, notes: &str) -> Accepted {
        Accepted {
            row_number: row,
            record: NormalizedRecord::Checkin(CheckinRecord {
                habit_id: habit.to_string(),
                date: day(d),
                notes: Some(notes.to_string()),
                mood_rating: None,
                duration_minutes: None,
            }),
        }
    }

    #[test]
    fn later_checkin_wins_same_habit_and_day() {
        let out = dedupe(vec![
            checkin(1, "h1", 15, "first"),
            checkin(2, "h1", 16, "other day"),
            checkin(3, "h1", 15, "second"),
            checkin(4, "h2", 15, "other habit"),
        ]);

        let rows: Vec<usize> = out.survivors.iter().map(|a| a.row_number).collect();
        assert_eq!(rows, vec![3, 2, 4]);
        assert_eq!(out.superseded.len(), 1);
        assert_eq!(out.superseded[0].row_number, 1);
    }

    #[test]
    fn habits_are_never_collapsed_but_tags_collapse_on_slug() {
        let habit = |row| Accepted {
            row_number: row,
            record: NormalizedRecord::Habit(HabitRecord {
                name: "Same".into(),
                description: None,
                habit_type: "good".into(),
                color: "#6366f1".into(),
                priority: 0,
            }),
        };
        assert_eq!(dedupe(vec![habit(1), habit(2)]).survivors.len(), 2);

        let tag = |row, name: &str| Accepted {
            row_number: row,
            record: NormalizedRecord::Tag(TagRecord {
                name: name.into(),
                slug: "focus".into(),
                color: "#gray".into(),
            }),
        };
        let out = dedupe(vec![tag(1, "Focus"), tag(2, "FOCUS")]);
        assert_eq!(out.survivors.len(), 1);
        assert_eq!(out.survivors[0].row_number, 2);
    }

    #[test]
    fn toggles_collapse_then_noops_drop() {
        let out = dedupe_toggles(vec![
            DayToggle { row_number: 1, date: day(15), completed: true },
            DayToggle { row_number: 2, date: day(15), completed: false },
            DayToggle { row_number: 3, date: day(16), completed: true },
        ]);
        assert_eq!(out.survivors.len(), 2);
        assert_eq!(out.survivors[0].completed, false);

        let committed: HashSet<NaiveDate> = [day(16)].into_iter().collect();
        let (changed, dropped) = drop_unchanged(out.survivors, &committed);
        assert_eq!(dropped, 2);
        assert!(changed.is_empty());
    }
}
