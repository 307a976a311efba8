use chrono::{Datelike, NaiveDateTime, NaiveTime, TimeDelta, Weekday};

use crate::model::Slot;

/// Why a candidate slot was rejected. Each variant renders as the message
/// shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleViolation {
    /// Raised at the HTTP boundary when required fields are absent.
    MissingFields(&'static str),
    /// Raised at the HTTP boundary when a timestamp fails to parse.
    BadTimestamp,
    EndNotAfterStart,
    TooShort { minimum_minutes: i64 },
    EndsAfterClose { close: NaiveTime },
    InPast,
    Weekend,
}

impl std::fmt::Display for RuleViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleViolation::MissingFields(what) => write!(f, "{what}"),
            RuleViolation::BadTimestamp => {
                write!(f, "invalid date, expected YYYY-MM-DD HH:MM:SS")
            }
            RuleViolation::EndNotAfterStart => write!(f, "end must be after start"),
            RuleViolation::TooShort { minimum_minutes } => {
                write!(f, "minimum booking duration is {minimum_minutes} minutes")
            }
            RuleViolation::EndsAfterClose { close } => {
                write!(f, "bookings must end by {}", close.format("%H:%M"))
            }
            RuleViolation::InPast => write!(f, "cannot book in the past"),
            RuleViolation::Weekend => write!(f, "bookings are limited to weekdays"),
        }
    }
}

/// The booking rule set, one value for the whole deployment. The permissive
/// configuration (`latest_end: None`, `weekdays_only: false`) reproduces the
/// single-room deployment's behavior; the default is the multi-room one.
#[derive(Debug, Clone)]
pub struct BookingPolicy {
    pub min_duration_minutes: i64,
    /// Latest allowed end time-of-day. None disables the closing rule.
    pub latest_end: Option<NaiveTime>,
    pub weekdays_only: bool,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            min_duration_minutes: 60,
            latest_end: NaiveTime::from_hms_opt(19, 0, 0),
            weekdays_only: true,
        }
    }
}

impl BookingPolicy {
    pub fn permissive() -> Self {
        Self {
            min_duration_minutes: 60,
            latest_end: None,
            weekdays_only: false,
        }
    }

    /// Check a candidate slot against the rule set, fail-fast in documented
    /// order: chronology, minimum duration, closing time, not-in-the-past,
    /// weekday. Applies to every caller — roles never bypass policy.
    pub fn validate(&self, slot: &Slot, now: NaiveDateTime) -> Result<(), RuleViolation> {
        if slot.start >= slot.end {
            return Err(RuleViolation::EndNotAfterStart);
        }
        if slot.duration() < TimeDelta::minutes(self.min_duration_minutes) {
            return Err(RuleViolation::TooShort {
                minimum_minutes: self.min_duration_minutes,
            });
        }
        if let Some(close) = self.latest_end {
            // A closing time also rules out crossing midnight: the booking
            // must end on the day it starts.
            if slot.end.date() != slot.start.date() || slot.end.time() > close {
                return Err(RuleViolation::EndsAfterClose { close });
            }
        }
        if slot.start <= now {
            return Err(RuleViolation::InPast);
        }
        if self.weekdays_only
            && matches!(slot.start.weekday(), Weekday::Sat | Weekday::Sun)
        {
            return Err(RuleViolation::Weekend);
        }
        Ok(())
    }
}
