use std::path::PathBuf;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use clap::{Parser, ValueHint};

use crate::link::RECEIVE_TIMEOUT;
use crate::runtime::{POLL_INTERVAL, QUEUE_CAPACITY, RaceConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Race timing console", long_about = None)]
pub struct Cli {
    /// Event date (YYYY-MM-DD), used for ages and the start instant. Defaults to today.
    #[arg(long)]
    pub event_date: Option<NaiveDate>,

    /// JSON file mirroring the ledger. Without it the race lives in memory only.
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub ledger: Option<PathBuf>,

    /// RFID bridge to connect to on startup, e.g. 192.168.0.20:9999
    #[arg(long, value_hint = ValueHint::Hostname)]
    pub bridge: Option<String>,

    /// Interval between reading-queue drains, in milliseconds.
    #[arg(long, default_value_t = POLL_INTERVAL.as_millis() as u64)]
    pub poll_interval_ms: u64,

    /// Capacity of the reading queue.
    #[arg(long, default_value_t = QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// CSV with `tag,num` columns mapping RFID tags to athlete numbers.
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub tags: Option<PathBuf>,
}

impl Cli {
    pub fn race_config(&self) -> RaceConfig {
        RaceConfig {
            event_date: self
                .event_date
                .unwrap_or_else(|| Local::now().date_naive()),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            queue_capacity: self.queue_capacity.max(1),
            receive_timeout: RECEIVE_TIMEOUT,
        }
    }
}
