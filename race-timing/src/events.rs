//! Domain events emitted by the state machine and the ingestion pipeline.
//!
//! Components receive an [`EventSink`] at construction instead of logging
//! through a process-wide logger. [`TracingSink`] forwards to `tracing`,
//! a crossbeam `Sender<RaceEvent>` forwards to another thread, and
//! [`MemorySink`] keeps events around for assertions.

use std::fmt;
use std::sync::Mutex;

use chrono::NaiveDateTime;
use crossbeam_channel::Sender;
use tracing::{error, info, warn};

use crate::clock::format_elapsed;
use crate::error::RaceError;
use crate::race::{ArrivalReceipt, Phase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Where an arrival attempt came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Manual,
    Rfid { antenna: u32, tag: String },
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Manual => f.write_str("manual"),
            Source::Rfid { antenna, .. } => write!(f, "RFID antenna {antenna}"),
        }
    }
}

/// Coarse classification of a rejected arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectKind {
    InvalidInput,
    AthleteNotFound,
    AlreadyRegistered,
    NotPermitted,
    Unexpected,
}

impl RejectKind {
    pub fn of(err: &RaceError) -> Self {
        match err {
            RaceError::InvalidInput(_) => RejectKind::InvalidInput,
            RaceError::AthleteNotFound { .. } => RejectKind::AthleteNotFound,
            RaceError::DuplicateArrival { .. } => RejectKind::AlreadyRegistered,
            RaceError::NotPermitted { .. } => RejectKind::NotPermitted,
            RaceError::RaceLogic(_) | RaceError::Storage(_) | RaceError::Import(_) => {
                RejectKind::Unexpected
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RaceEvent {
    PhaseChanged {
        from: Phase,
        to: Phase,
    },
    StartSet {
        start: NaiveDateTime,
        adjusted: bool,
    },
    /// The start moved while arrivals computed against the old start exist.
    StartMovedUnderArrivals {
        previous: NaiveDateTime,
        start: NaiveDateTime,
        arrivals: usize,
    },
    ArrivalAccepted {
        receipt: ArrivalReceipt,
        source: Source,
    },
    ArrivalRejected {
        source: Source,
        reference: String,
        kind: RejectKind,
        message: String,
    },
    MalformedReading {
        line: String,
        reason: String,
    },
    AthletesImported {
        loaded: usize,
        rejected: usize,
    },
    AthleteUpdated {
        num: u32,
    },
    OperationRefused {
        message: String,
    },
}

impl RaceEvent {
    pub fn severity(&self) -> Severity {
        match self {
            RaceEvent::PhaseChanged { to: Phase::Finished, .. } => Severity::Warning,
            RaceEvent::PhaseChanged { .. }
            | RaceEvent::StartSet { .. }
            | RaceEvent::AthleteUpdated { .. }
            | RaceEvent::ArrivalAccepted { .. } => Severity::Info,
            RaceEvent::StartMovedUnderArrivals { .. }
            | RaceEvent::MalformedReading { .. }
            | RaceEvent::OperationRefused { .. } => Severity::Warning,
            RaceEvent::AthletesImported { rejected, .. } => {
                if *rejected > 0 {
                    Severity::Warning
                } else {
                    Severity::Info
                }
            }
            RaceEvent::ArrivalRejected { source, kind, .. } => match (source, kind) {
                (Source::Manual, _) => Severity::Warning,
                (Source::Rfid { .. }, RejectKind::AthleteNotFound | RejectKind::InvalidInput) => {
                    Severity::Error
                }
                (Source::Rfid { .. }, RejectKind::AlreadyRegistered | RejectKind::NotPermitted) => {
                    Severity::Warning
                }
                (Source::Rfid { .. }, RejectKind::Unexpected) => Severity::Critical,
            },
        }
    }
}

impl fmt::Display for RaceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaceEvent::PhaseChanged { from, to } => write!(f, "race phase {from} -> {to}"),
            RaceEvent::StartSet { start, adjusted } => {
                let verb = if *adjusted { "adjusted" } else { "set" };
                write!(f, "start time {verb} to {}", start.format("%H:%M:%S%.3f"))
            }
            RaceEvent::StartMovedUnderArrivals {
                previous,
                start,
                arrivals,
            } => write!(
                f,
                "start moved from {} to {} with {arrivals} arrival(s) already timed against the old start",
                previous.format("%H:%M:%S%.3f"),
                start.format("%H:%M:%S%.3f"),
            ),
            RaceEvent::ArrivalAccepted { receipt, source } => match source {
                Source::Manual => write!(
                    f,
                    "arrival registered for athlete #{} ({}) in {}",
                    receipt.num,
                    receipt.name,
                    format_elapsed(receipt.net_seconds)
                ),
                Source::Rfid { antenna, tag } => write!(
                    f,
                    "[RFID antenna {antenna}] arrival registered for athlete #{} ({}) with tag {tag} in {}",
                    receipt.num,
                    receipt.name,
                    format_elapsed(receipt.net_seconds)
                ),
            },
            RaceEvent::ArrivalRejected {
                source,
                reference,
                kind,
                message,
            } => match (source, kind) {
                (Source::Rfid { antenna, tag }, RejectKind::AthleteNotFound) => write!(
                    f,
                    "[RFID antenna {antenna}] tag \"{tag}\" read, but no athlete matches it"
                ),
                (Source::Rfid { antenna, tag }, RejectKind::Unexpected) => write!(
                    f,
                    "[RFID antenna {antenna}] unexpected error processing tag {tag}: {message}"
                ),
                (Source::Rfid { antenna, .. }, _) => write!(f, "[RFID antenna {antenna}] {message}"),
                (Source::Manual, _) => write!(f, "arrival for {reference} rejected: {message}"),
            },
            RaceEvent::MalformedReading { line, reason } => {
                write!(f, "ignored reading in unexpected format {line:?}: {reason}")
            }
            RaceEvent::AthletesImported { loaded, rejected } => {
                write!(f, "import finished: {loaded} athlete(s) loaded, {rejected} row(s) rejected")
            }
            RaceEvent::AthleteUpdated { num } => write!(f, "athlete #{num} updated"),
            RaceEvent::OperationRefused { message } => f.write_str(message),
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: RaceEvent);
}

/// Logs each event through `tracing` at a level matching its severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: RaceEvent) {
        let (antenna, tag) = match &event {
            RaceEvent::ArrivalAccepted {
                source: Source::Rfid { antenna, tag },
                ..
            }
            | RaceEvent::ArrivalRejected {
                source: Source::Rfid { antenna, tag },
                ..
            } => (Some(*antenna), Some(tag.as_str())),
            _ => (None, None),
        };

        match event.severity() {
            Severity::Info => info!(?antenna, ?tag, "{event}"),
            Severity::Warning => warn!(?antenna, ?tag, "{event}"),
            Severity::Error => error!(?antenna, ?tag, "{event}"),
            Severity::Critical => error!(severity = "critical", ?antenna, ?tag, "{event}"),
        }
    }
}

impl EventSink for Sender<RaceEvent> {
    fn emit(&self, event: RaceEvent) {
        // A dropped receiver just means nobody is watching anymore.
        let _ = self.send(event);
    }
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<RaceEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RaceEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn take(&self) -> Vec<RaceEvent> {
        match self.events.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: RaceEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RaceLogicError;

    fn rfid() -> Source {
        Source::Rfid {
            antenna: 2,
            tag: "E200".into(),
        }
    }

    fn rejected(source: Source, err: &RaceError) -> RaceEvent {
        RaceEvent::ArrivalRejected {
            source,
            reference: "tag E200".into(),
            kind: RejectKind::of(err),
            message: err.to_string(),
        }
    }

    #[test]
    fn streaming_rejections_are_graded() {
        let unknown = RaceError::AthleteNotFound {
            reference: "tag E200".into(),
        };
        let duplicate = RaceError::DuplicateArrival {
            num: 7,
            net_seconds: 12.0,
        };
        let unexpected = RaceError::RaceLogic(RaceLogicError::NoStartTime);

        assert_eq!(rejected(rfid(), &unknown).severity(), Severity::Error);
        assert_eq!(rejected(rfid(), &duplicate).severity(), Severity::Warning);
        assert_eq!(rejected(rfid(), &unexpected).severity(), Severity::Critical);
        assert_eq!(rejected(Source::Manual, &unexpected).severity(), Severity::Warning);
    }

    #[test]
    fn rfid_messages_carry_antenna_and_tag() {
        let unknown = RaceError::AthleteNotFound {
            reference: "tag E200".into(),
        };
        let text = rejected(rfid(), &unknown).to_string();
        assert!(text.contains("antenna 2"), "{text}");
        assert!(text.contains("E200"), "{text}");
    }

    #[test]
    fn channel_sink_forwards() {
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.emit(RaceEvent::OperationRefused {
            message: "nope".into(),
        });
        assert_eq!(
            rx.try_recv().unwrap(),
            RaceEvent::OperationRefused {
                message: "nope".into()
            }
        );
    }
}
