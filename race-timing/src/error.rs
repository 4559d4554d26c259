//! Error taxonomy shared by the registry, ledger and state machine.

use std::io;

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::race::{Operation, Phase};

/// Outcome of a rejected state machine operation.
///
/// Every variant is distinguishable so the manual and streaming producers
/// can react differently (user-facing message vs. severity-keyed log).
#[derive(Debug, Error)]
pub enum RaceError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no athlete matches {reference}")]
    AthleteNotFound { reference: String },

    #[error("athlete #{num} already has a recorded arrival ({net_seconds:.3}s)")]
    DuplicateArrival { num: u32, net_seconds: f64 },

    #[error(transparent)]
    RaceLogic(#[from] RaceLogicError),

    #[error("'{operation}' is not permitted while the race is {phase}")]
    NotPermitted { operation: Operation, phase: Phase },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("import failed: {0}")]
    Import(#[from] ImportError),
}

impl RaceError {
    pub fn is_not_permitted(&self) -> bool {
        matches!(self, RaceError::NotPermitted { .. })
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RaceLogicError {
    #[error("start time has not been set")]
    NoStartTime,

    #[error("arrival at {arrival} precedes the start at {start}")]
    ArrivalBeforeStart {
        arrival: NaiveDateTime,
        start: NaiveDateTime,
    },

    #[error("no athletes registered")]
    NoAthletes,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("ledger I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("ledger snapshot is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("ledger lock poisoned")]
    Poisoned,

    #[error("athlete #{0} does not exist in the ledger")]
    UnknownAthlete(u32),

    #[error("stored value for '{key}' is unreadable: {value}")]
    CorruptState { key: String, value: String },
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Field-level rejection of an athlete record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid athlete number '{0}': must be a positive integer")]
    InvalidNumber(String),

    #[error("field '{0}' cannot be empty")]
    MissingField(&'static str),

    #[error("invalid sex '{0}': use 'M' or 'F'")]
    InvalidSex(String),

    #[error("invalid birth date '{0}': use dd/mm/yyyy")]
    InvalidBirthDate(String),

    #[error("birth date {birth} is after the event date {event}")]
    BornAfterEvent { birth: String, event: String },

    #[error("athlete number {0} appears more than once in the file")]
    DuplicateNumber(u32),
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("invalid CSV header, missing required columns: {}", .missing.join(", "))]
    InvalidHeader { missing: Vec<String> },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("cannot read import file: {0}")]
    Io(#[from] io::Error),
}

/// Failure of the bridge connection. Never reaches the state machine.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot connect to bridge at {addr}: {source}")]
    Connect { addr: String, source: io::Error },

    #[error("error receiving from bridge: {0}")]
    Receive(io::Error),

    #[error("bridge closed the connection")]
    Closed,
}
