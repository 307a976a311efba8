use ulid::Ulid;

use super::policy::RuleViolation;

#[derive(Debug)]
pub enum EngineError {
    /// A booking policy rule was violated.
    Validation(RuleViolation),
    /// Non-policy input defect (missing name, zero capacity, ...).
    Invalid(&'static str),
    /// The requested slot overlaps the given reservation.
    Conflict(Ulid),
    EmailTaken,
    Forbidden(&'static str),
    NotFound(Ulid),
    LimitExceeded(&'static str),
    Wal(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(v) => write!(f, "{v}"),
            EngineError::Invalid(msg) => write!(f, "{msg}"),
            EngineError::Conflict(_) => write!(f, "this time slot is already booked"),
            EngineError::EmailTaken => write!(f, "email already in use"),
            EngineError::Forbidden(msg) => write!(f, "{msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Wal(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
