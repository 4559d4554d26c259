//! Race timing for running events.
//!
//! Athletes are registered before the race, the operator sets the start
//! time, and finishes are recorded either by typing an athlete number or by
//! RFID readings streamed from the bridge process. Net times, standings and
//! podiums are derived from the ledger.
//!
//! # Architecture
//!
//! - **Main thread**: runs the console, parses operator commands
//! - **Worker thread**: owns the [`race::RaceMachine`] and answers requests
//! - **Bridge link thread**: reads the bridge socket and fills the reading
//!   queue, which the worker drains on a fixed poll interval
//!
//! Domain outcomes are reported as [`events::RaceEvent`] values through an
//! injected [`events::EventSink`] rather than through a global logger.
//!
//! # Modules
//!
//! - [`athlete`]: athlete records and validation
//! - [`clock`]: time sources and time formatting
//! - [`ledger`]: persistence contract and the in-memory/JSON ledger
//! - [`race`]: the race state machine
//! - [`import`]: CSV import of athletes
//! - [`ingest`]: line reassembly, reading parsing, the reading queue
//! - [`link`]: TCP client for the RFID bridge
//! - [`results`]: standings and podium groups
//! - [`runtime`]: worker thread and request handle
//! - [`protocol`]: console command parsing
//! - [`cli`]: command-line arguments of the `crono` binary

pub mod athlete;
pub mod cli;
pub mod clock;
pub mod error;
pub mod events;
pub mod import;
pub mod ingest;
pub mod ledger;
pub mod link;
pub mod protocol;
pub mod race;
pub mod results;
pub mod runtime;
