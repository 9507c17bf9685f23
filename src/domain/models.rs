use crate::domain::clock::{next_occurrence, parse_clock, DayOfWeek};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

fn default_sound() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}

/// Notification preferences shared by both event variants. Flattened into
/// the event blobs, so the persisted shape stays `notifyBefore`,
/// `soundEnabled` etc. alongside the other event fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReminderPrefs {
    pub notify: bool,
    #[serde(default)]
    pub notify_before: u32,
    #[serde(default = "default_sound")]
    pub sound: String,
    #[serde(default = "default_true")]
    pub sound_enabled: bool,
}

impl Default for ReminderPrefs {
    fn default() -> Self {
        Self {
            notify: true,
            notify_before: 0,
            sound: default_sound(),
            sound_enabled: true,
        }
    }
}

/// A weekly-repeating timetable block tied to a single weekday. Multi-day
/// recurrence is stored as one event per weekday sharing a title.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecurringEvent {
    #[serde(default)]
    pub id: String,
    pub day: DayOfWeek,
    pub start: String,
    pub end: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(flatten)]
    pub prefs: ReminderPrefs,
}

impl RecurringEvent {
    pub fn validate(&self) -> Result<(), InfraError> {
        validate_non_empty(&self.id, "event.id")?;
        validate_non_empty(&self.title, "event.title")?;
        parse_clock(&self.start)?;
        parse_clock(&self.end)?;
        Ok(())
    }
}

/// A one-shot event. `end_date` and `notify_at` are frozen when the event is
/// created and never recomputed, so reopening the app days later does not
/// slide the reminder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TemporaryEvent {
    pub id: String,
    pub day: DayOfWeek,
    pub start: String,
    pub end: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(flatten)]
    pub prefs: ReminderPrefs,
    pub end_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_at: Option<DateTime<Utc>>,
}

impl TemporaryEvent {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.end_date <= now
    }
}

/// Caller-supplied fields of a temporary event before its absolute instants
/// are derived.
#[derive(Debug, Clone)]
pub struct TemporaryEventDraft {
    pub day: DayOfWeek,
    pub start: String,
    pub end: String,
    pub title: String,
    pub color: Option<String>,
    pub prefs: ReminderPrefs,
}

impl TemporaryEventDraft {
    /// Derives the frozen expiry and fire instants relative to `now`.
    ///
    /// The reminder anchors on the next occurrence of the *start* time with
    /// the lead subtracted; the expiry on the next occurrence of the *end*
    /// time. A reminder that would land past the expiry (the start already
    /// rolled into next week while the end is still upcoming) is dropped.
    pub fn freeze(
        self,
        id: String,
        now: DateTime<Utc>,
    ) -> Result<TemporaryEvent, InfraError> {
        validate_non_empty(&self.title, "event.title")?;
        let start_minutes = parse_clock(&self.start)?;
        let end_minutes = parse_clock(&self.end)?;

        let end_date = next_occurrence(self.day, end_minutes, now);
        let notify_at = if self.prefs.notify {
            let fire_at = next_occurrence(self.day, start_minutes, now)
                - Duration::minutes(self.prefs.notify_before as i64);
            (fire_at <= end_date).then_some(fire_at)
        } else {
            None
        };

        Ok(TemporaryEvent {
            id,
            day: self.day,
            start: self.start,
            end: self.end,
            title: self.title,
            color: self.color,
            prefs: self.prefs,
            end_date,
            notify_at,
        })
    }
}

/// Load-time garbage collection: keeps only temporary events whose expiry is
/// still in the future.
pub fn retain_live(events: Vec<TemporaryEvent>, now: DateTime<Utc>) -> Vec<TemporaryEvent> {
    events
        .into_iter()
        .filter(|event| !event.is_expired(now))
        .collect()
}

/// A reusable schedule of seed events. Applying a template replaces the
/// recurring set with copies carrying fresh ids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    pub events: Vec<RecurringEvent>,
}

impl Template {
    pub fn validate(&self) -> Result<(), InfraError> {
        validate_non_empty(&self.id, "template.id")?;
        validate_non_empty(&self.name, "template.name")?;
        for event in &self.events {
            validate_non_empty(&event.title, "template.events[].title")?;
            parse_clock(&event.start)?;
            parse_clock(&event.end)?;
        }
        Ok(())
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), InfraError> {
    if value.trim().is_empty() {
        return Err(InfraError::InvalidConfig(format!(
            "{field_name} must not be empty"
        )));
    }
    Ok(())
}
