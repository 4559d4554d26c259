//! Wall-clock access and time formatting.

use std::sync::Mutex;

use chrono::{Duration, Local, NaiveDateTime, NaiveTime};

use crate::error::RaceError;

/// Source of "now" for arrival timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall clock, naive like the timestamps stored in the ledger.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Clock that only moves when told to. Used by tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Parses an operator-entered start time of the form `HH:MM:SS.mmm`.
pub fn parse_start_time(raw: &str) -> Result<NaiveTime, RaceError> {
    let trimmed = raw.trim();
    let invalid = || RaceError::InvalidInput(format!("invalid time '{trimmed}', use HH:MM:SS.mmm"));

    let Some((_, fraction)) = trimmed.split_once('.') else {
        return Err(invalid());
    };
    if fraction.is_empty() || fraction.len() > 6 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    NaiveTime::parse_from_str(trimmed, "%H:%M:%S%.f").map_err(|_| invalid())
}

/// ISO-8601 rendering used for ledger values.
pub fn to_iso(at: NaiveDateTime) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

pub fn from_iso(raw: &str) -> Option<NaiveDateTime> {
    raw.trim().parse::<NaiveDateTime>().ok()
}

/// Elapsed seconds between two instants, with microsecond precision.
pub fn elapsed_seconds(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    let delta = to - from;
    match delta.num_microseconds() {
        Some(micros) => micros as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}

/// Renders a duration in seconds as `HH:MM:SS.mmm`.
pub fn format_elapsed(seconds: f64) -> String {
    let sign = if seconds < 0.0 { "-" } else { "" };
    let total_millis = (seconds.abs() * 1000.0).round() as u64;
    let hours = total_millis / 3_600_000;
    let minutes = (total_millis / 60_000) % 60;
    let secs = (total_millis / 1000) % 60;
    let millis = total_millis % 1000;
    format!("{sign}{hours:02}:{minutes:02}:{secs:02}.{millis:03}")
}
