//! Console command parsing for the operator shell.
//!
//! Commands are case-insensitive and most have a one-letter alias. A line
//! holding nothing but a number is an arrival, which is what operators type
//! most of the time at the finish line.

use std::path::PathBuf;

use anyhow::{Result, anyhow};

use crate::athlete::AthleteField;
use crate::race::ResetScope;

pub const HELP: &str = "\
Commands (case-insensitive, alias in brackets):
  START <HH:MM:SS.mmm>  [st]  start the race at the given time
  ADJUST <HH:MM:SS.mmm> [aj]  move the start time of a running race
  ARRIVE <num>          [a]   register an arrival (a bare number works too)
  FINISH                [f]   close the race to further arrivals
  RESET [ALL]           [r]   clear start and arrivals (ALL also drops athletes)
  IMPORT <file.csv>     [i]   load athletes from a CSV file
  SHOW <num>            [sh]  show an athlete's registration and time
  EDIT <num> <field> <value>
                        [ed]  correct nome, sexo, nascimento, categoria or modalidade
  STATUS                [s]   show phase, start time and bridge link
  RESULTS               [res] list finishers by net time
  PODIUM                [p]   show podium groups
  CONNECT <host:port>   [c]   connect to the RFID bridge
  DISCONNECT            [d]   drop the RFID bridge connection
  HELP                  [h]   show this text
  EXIT                  [e]   leave the console";

#[derive(Debug, PartialEq)]
pub enum ConsoleCommand {
    Start { time: String },
    Adjust { time: String },
    Arrive { input: String },
    Finish,
    Reset { scope: ResetScope },
    Import { path: PathBuf },
    Show { input: String },
    Edit { input: String, field: AthleteField, value: String },
    Status,
    Results,
    Podium,
    Connect { addr: String },
    Disconnect,
    Help,
    Exit,
}

impl ConsoleCommand {
    /// Parses a line of operator input into a command.
    pub fn parse(line: &str) -> Result<Self> {
        let trimmed = line.trim();
        let parts: Vec<&str> = trimmed.split_whitespace().collect();
        let Some(first) = parts.first() else {
            return Err(anyhow!("empty command"));
        };

        if first.chars().all(|c| c.is_ascii_digit()) {
            return match parts.len() {
                1 => Ok(ConsoleCommand::Arrive {
                    input: first.to_string(),
                }),
                _ => Err(anyhow!("type one athlete number per line")),
            };
        }

        let cmd = first.to_uppercase();
        let normalized_cmd = match cmd.as_str() {
            "ST" => "START",
            "AJ" => "ADJUST",
            "A" => "ARRIVE",
            "F" => "FINISH",
            "R" => "RESET",
            "I" => "IMPORT",
            "SH" => "SHOW",
            "ED" => "EDIT",
            "S" => "STATUS",
            "RES" => "RESULTS",
            "P" => "PODIUM",
            "C" => "CONNECT",
            "D" => "DISCONNECT",
            "H" => "HELP",
            "E" | "QUIT" => "EXIT",
            other => other,
        };

        match normalized_cmd {
            "FINISH" if parts.len() == 1 => return Ok(ConsoleCommand::Finish),
            "STATUS" if parts.len() == 1 => return Ok(ConsoleCommand::Status),
            "RESULTS" if parts.len() == 1 => return Ok(ConsoleCommand::Results),
            "PODIUM" if parts.len() == 1 => return Ok(ConsoleCommand::Podium),
            "DISCONNECT" if parts.len() == 1 => return Ok(ConsoleCommand::Disconnect),
            "HELP" => return Ok(ConsoleCommand::Help),
            "EXIT" => return Ok(ConsoleCommand::Exit),
            _ => {}
        }

        // Everything after the command word, for paths with spaces.
        let rest = trimmed[first.len()..].trim();

        match (normalized_cmd, parts.len()) {
            ("START", 2) => Ok(ConsoleCommand::Start {
                time: parts[1].to_string(),
            }),
            ("ADJUST", 2) => Ok(ConsoleCommand::Adjust {
                time: parts[1].to_string(),
            }),
            ("ARRIVE", 2) => Ok(ConsoleCommand::Arrive {
                input: parts[1].to_string(),
            }),
            ("RESET", 1) => Ok(ConsoleCommand::Reset {
                scope: ResetScope::KeepAthletes,
            }),
            ("RESET", 2) if parts[1].eq_ignore_ascii_case("ALL") => Ok(ConsoleCommand::Reset {
                scope: ResetScope::Everything,
            }),
            ("IMPORT", n) if n >= 2 => Ok(ConsoleCommand::Import {
                path: PathBuf::from(rest),
            }),
            ("SHOW", 2) => Ok(ConsoleCommand::Show {
                input: parts[1].to_string(),
            }),
            ("EDIT", n) if n >= 4 => {
                let field = parts[2].parse::<AthleteField>()?;
                let value = rest[parts[1].len()..].trim_start()[parts[2].len()..].trim();
                Ok(ConsoleCommand::Edit {
                    input: parts[1].to_string(),
                    field,
                    value: value.to_string(),
                })
            }
            ("CONNECT", 2) => Ok(ConsoleCommand::Connect {
                addr: parts[1].to_string(),
            }),
            ("START", _) => Err(anyhow!("START requires exactly one argument: START <HH:MM:SS.mmm>")),
            ("ADJUST", _) => Err(anyhow!("ADJUST requires exactly one argument: ADJUST <HH:MM:SS.mmm>")),
            ("ARRIVE", _) => Err(anyhow!("ARRIVE requires exactly one argument: ARRIVE <num>")),
            ("RESET", _) => Err(anyhow!("usage: RESET or RESET ALL")),
            ("IMPORT", _) => Err(anyhow!("IMPORT requires a file path: IMPORT <file.csv>")),
            ("SHOW", _) => Err(anyhow!("SHOW requires exactly one argument: SHOW <num>")),
            ("EDIT", _) => Err(anyhow!("usage: EDIT <num> <field> <value>")),
            ("CONNECT", _) => Err(anyhow!("CONNECT requires exactly one argument: CONNECT <host:port>")),
            ("FINISH" | "STATUS" | "RESULTS" | "PODIUM" | "DISCONNECT", _) => {
                Err(anyhow!("{normalized_cmd} takes no arguments"))
            }
            _ => Err(anyhow!("invalid command '{first}'. Type HELP for the command list")),
        }
    }

    /// Destructive commands the shell confirms before running.
    pub fn needs_confirmation(&self) -> bool {
        matches!(self, ConsoleCommand::Finish | ConsoleCommand::Reset { .. })
    }
}
