//! Wall-clock time of day, 12-hour conversion and next-occurrence math.

use std::str::FromStr;

use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use super::ReminderError;

/// `HH:MM`, 24-hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "AM")]
    Am,
    #[serde(rename = "PM")]
    Pm,
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Period::Am => write!(f, "AM"),
            Period::Pm => write!(f, "PM"),
        }
    }
}

impl FromStr for Period {
    type Err = ReminderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AM" => Ok(Period::Am),
            "PM" => Ok(Period::Pm),
            other => Err(ReminderError::InvalidTime(format!("period {other:?}"))),
        }
    }
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> Result<Self, ReminderError> {
        if hour > 23 || minute > 59 {
            return Err(ReminderError::InvalidTime(format!("{hour}:{minute:02}")));
        }
        Ok(Self { hour, minute })
    }

    /// For compile-time constants; out-of-range input is clamped.
    pub const fn new_unchecked(hour: u8, minute: u8) -> Self {
        Self {
            hour: if hour > 23 { 23 } else { hour },
            minute: if minute > 59 { 59 } else { minute },
        }
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    pub fn from_12h(hour: u8, minute: u8, period: Period) -> Result<Self, ReminderError> {
        if !(1..=12).contains(&hour) || minute > 59 {
            return Err(ReminderError::InvalidTime(format!("{hour}:{minute:02} {period}")));
        }
        let hour24 = match (period, hour) {
            (Period::Am, 12) => 0,
            (Period::Am, h) => h,
            (Period::Pm, 12) => 12,
            (Period::Pm, h) => h + 12,
        };
        Self::new(hour24, minute)
    }

    /// Parses `h:mm` (hour 1–12) plus a separate AM/PM marker.
    pub fn parse_12h(time: &str, period: &str) -> Result<Self, ReminderError> {
        let period: Period = period.parse()?;
        let (hour, minute) = split_hh_mm(time)?;
        Self::from_12h(hour, minute, period)
    }

    pub fn to_12h(&self) -> (u8, u8, Period) {
        let period = if self.hour >= 12 { Period::Pm } else { Period::Am };
        let hour = match self.hour % 12 {
            0 => 12,
            h => h,
        };
        (hour, self.minute, period)
    }

    /// `9:05 PM`
    pub fn display_12h(&self) -> String {
        let (hour, minute, period) = self.to_12h();
        format!("{hour}:{minute:02} {period}")
    }

    pub fn as_naive(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(u32::from(self.hour), u32::from(self.minute), 0)
            .unwrap_or(NaiveTime::MIN)
    }
}

fn split_hh_mm(s: &str) -> Result<(u8, u8), ReminderError> {
    let invalid = || ReminderError::InvalidTime(s.to_string());
    let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return Err(invalid());
    }
    if !h.bytes().chain(m.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let hour = h.parse().map_err(|_| invalid())?;
    let minute = m.parse().map_err(|_| invalid())?;
    Ok((hour, minute))
}

impl FromStr for TimeOfDay {
    type Err = ReminderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hour, minute) = split_hh_mm(s)?;
        Self::new(hour, minute)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = ReminderError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

impl std::fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Local wall clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Today at `at` if that is strictly after `now`, otherwise tomorrow.
pub fn next_occurrence(now: NaiveDateTime, at: TimeOfDay) -> NaiveDateTime {
    let today = now.date().and_time(at.as_naive());
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

/// Wall-clock gap as a timer delay; zero when `target` is already past.
pub fn delay_until(now: NaiveDateTime, target: NaiveDateTime) -> std::time::Duration {
    (target - now).to_std().unwrap_or_default()
}
