use ulid::Ulid;

use crate::model::Span;
use crate::timefmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    MissingFields(Vec<&'static str>),
    InvalidTimestamp(String),
    DegenerateInterval,
    StartInPast,
    InvertedInterval,
    TooShort,
    BuildingNotFound(Ulid),
    FloorNotFound(u32),
    SlotNotFound(u32),
    SlotOverlap { existing: Span },
    InvalidIndex { index: i64, len: usize },
    ReservationNotFound(Ulid),
    NotBought(Ulid),
    AlreadyBought(Ulid),
    FloorAlreadyBought(u32),
    AlreadyExists(Ulid),
    InvalidLayout(String),
    LimitExceeded(&'static str),
    PersistenceFailure(String),
}

impl EngineError {
    /// Stable machine-readable name of the rejection.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::MissingFields(_) => "MissingFields",
            EngineError::InvalidTimestamp(_) => "InvalidTimestamp",
            EngineError::DegenerateInterval => "DegenerateInterval",
            EngineError::StartInPast => "StartInPast",
            EngineError::InvertedInterval => "InvertedInterval",
            EngineError::TooShort => "TooShort",
            EngineError::BuildingNotFound(_) => "BuildingNotFound",
            EngineError::FloorNotFound(_) => "FloorNotFound",
            EngineError::SlotNotFound(_) => "SlotNotFound",
            EngineError::SlotOverlap { .. } => "SlotOverlap",
            EngineError::InvalidIndex { .. } => "InvalidIndex",
            EngineError::ReservationNotFound(_) => "ReservationNotFound",
            EngineError::NotBought(_) => "NotBought",
            EngineError::AlreadyBought(_) => "AlreadyBought",
            EngineError::FloorAlreadyBought(_) => "FloorAlreadyBought",
            EngineError::AlreadyExists(_) => "AlreadyExists",
            EngineError::InvalidLayout(_) => "InvalidLayout",
            EngineError::LimitExceeded(_) => "LimitExceeded",
            EngineError::PersistenceFailure(_) => "PersistenceFailure",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::MissingFields(fields) => {
                write!(f, "all fields are required; missing: {}", fields.join(", "))
            }
            EngineError::InvalidTimestamp(msg) => write!(f, "{msg}"),
            EngineError::DegenerateInterval => {
                write!(f, "start time and end time cannot be the same")
            }
            EngineError::StartInPast => write!(f, "start time cannot be before the current time"),
            EngineError::InvertedInterval => write!(f, "end time cannot be before start time"),
            EngineError::TooShort => write!(f, "reservation must be at least 1 hour long"),
            EngineError::BuildingNotFound(id) => write!(f, "building not found: {id}"),
            EngineError::FloorNotFound(n) => write!(f, "floor not found: {n}"),
            EngineError::SlotNotFound(n) => write!(f, "slot not found: {n}"),
            EngineError::SlotOverlap { existing } => write!(
                f,
                "slot already reserved between {} and {}",
                timefmt::human(existing.start),
                timefmt::human(existing.end)
            ),
            EngineError::InvalidIndex { index, len } => {
                write!(f, "invalid reservation index {index} (slot has {len})")
            }
            EngineError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::NotBought(id) => write!(f, "building not bought: {id}"),
            EngineError::AlreadyBought(id) => write!(f, "building already bought: {id}"),
            EngineError::FloorAlreadyBought(n) => write!(f, "floor already bought: {n}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidLayout(msg) => write!(f, "invalid layout: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::PersistenceFailure(e) => write!(f, "persistence failure: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
