//! Daily time-of-day reminders: persisted custom/preset records plus the
//! built-in key-check and hydration reminders.

pub mod builtin;
pub mod scheduler;
pub mod time;
pub mod timers;

use serde::{Deserialize, Serialize};

use crate::notify::Severity;
use crate::storage::StorageError;

pub use builtin::BuiltinReminders;
pub use scheduler::ReminderScheduler;
pub use time::{next_occurrence, Clock, Period, SystemClock, TimeOfDay};
pub use timers::TimerRegistry;

pub type ReminderId = u64;

pub const DEFAULT_ICON: &str = "notifications";

/// One persisted reminder. Field names match the stored JSON list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderRecord {
    pub id: ReminderId,
    pub title: String,
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: Severity,
    pub time: TimeOfDay,
    #[serde(default = "default_icon")]
    pub icon: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_icon() -> String {
    DEFAULT_ICON.to_string()
}

fn default_active() -> bool {
    true
}

/// A reminder before it has an id.
#[derive(Debug, Clone, PartialEq)]
pub struct ReminderDraft {
    pub title: String,
    pub message: String,
    pub kind: Severity,
    pub time: TimeOfDay,
    pub icon: Option<String>,
}

impl ReminderDraft {
    pub fn new(title: impl Into<String>, message: impl Into<String>, time: TimeOfDay) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            kind: Severity::Info,
            time,
            icon: None,
        }
    }

    pub fn with_kind(mut self, kind: Severity) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    fn validate(&self) -> Result<(), ReminderError> {
        if self.title.trim().is_empty() {
            return Err(ReminderError::MissingField("title"));
        }
        if self.message.trim().is_empty() {
            return Err(ReminderError::MissingField("message"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Vitamins,
    Laundry,
    Groceries,
}

impl Preset {
    pub fn draft(&self) -> ReminderDraft {
        match self {
            Preset::Vitamins => ReminderDraft::new(
                "Take Vitamins",
                "Time to take your daily vitamins!",
                TimeOfDay::new_unchecked(9, 0),
            )
            .with_icon("medication"),
            Preset::Laundry => ReminderDraft::new(
                "Laundry Time",
                "Time to do your laundry",
                TimeOfDay::new_unchecked(10, 0),
            )
            .with_icon("local_laundry_service"),
            Preset::Groceries => ReminderDraft::new(
                "Groceries Shopping",
                "Time to buy groceries",
                TimeOfDay::new_unchecked(11, 0),
            )
            .with_icon("shopping_cart"),
        }
    }
}

#[derive(Debug)]
pub enum ReminderError {
    InvalidTime(String),
    MissingField(&'static str),
    NotFound(ReminderId),
    Storage(StorageError),
    Serialize(serde_json::Error),
}

impl std::fmt::Display for ReminderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReminderError::InvalidTime(s) => write!(f, "invalid time: {s}"),
            ReminderError::MissingField(field) => write!(f, "missing field: {field}"),
            ReminderError::NotFound(id) => write!(f, "reminder {id} not found"),
            ReminderError::Storage(e) => write!(f, "{e}"),
            ReminderError::Serialize(e) => write!(f, "reminder serialization failed: {e}"),
        }
    }
}

impl From<StorageError> for ReminderError {
    fn from(e: StorageError) -> Self {
        ReminderError::Storage(e)
    }
}

impl From<serde_json::Error> for ReminderError {
    fn from(e: serde_json::Error) -> Self {
        ReminderError::Serialize(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_json_shape() {
        let record = ReminderRecord {
            id: 1_700_000_000_000,
            title: "Take Vitamins".into(),
            message: "Time to take your daily vitamins!".into(),
            kind: Severity::Info,
            time: TimeOfDay::new_unchecked(9, 0),
            icon: "medication".into(),
            active: true,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "info");
        assert_eq!(value["time"], "09:00");
        assert_eq!(value["id"], 1_700_000_000_000u64);
    }

    #[test]
    fn test_record_tolerates_extra_and_missing_fields() {
        let record: ReminderRecord = serde_json::from_str(
            r#"{"id":5,"title":"Gym","message":"Time for: Gym","type":"warning",
                "time":"07:30","displayTime":"7:30 AM"}"#,
        )
        .unwrap();
        assert_eq!(record.kind, Severity::Warning);
        assert_eq!(record.icon, DEFAULT_ICON);
        assert!(record.active);
    }

    #[test]
    fn test_presets() {
        let vitamins = Preset::Vitamins.draft();
        assert_eq!(vitamins.title, "Take Vitamins");
        assert_eq!(vitamins.time.to_string(), "09:00");
        assert_eq!(Preset::Laundry.draft().time.to_string(), "10:00");
        assert_eq!(Preset::Groceries.draft().icon.as_deref(), Some("shopping_cart"));
    }

    #[test]
    fn test_draft_requires_title_and_message() {
        let time = TimeOfDay::new_unchecked(9, 0);
        assert!(matches!(
            ReminderDraft::new(" ", "m", time).validate(),
            Err(ReminderError::MissingField("title"))
        ));
        assert!(ReminderDraft::new("t", "m", time).validate().is_ok());
    }
}
