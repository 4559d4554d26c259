//! Bridge between an RFID reader and the race timing console.
//!
//! The reader device emits one tag per line. The bridge turns each line into
//! a [`reading::TagRead`] and forwards it to every connected TCP client as
//! `tag_id,antenna\n`.
//!
//! - [`cli`] parses the command line and builds the reader configuration.
//! - [`reader`] owns the device on a background task, reconnecting after
//!   failures, or replays scripted reads in mock mode.
//! - [`server`] accepts clients and fans reads out over a Tokio `broadcast`
//!   channel, counting reads per antenna.
//! - [`reading`] holds the line formats and async line helpers.

pub mod cli;
pub mod reader;
pub mod reading;
pub mod server;
