//! Operator console for timing a race.
//!
//! ```bash
//! cargo run --bin crono -- --event-date 2025-06-15 --ledger race.json --bridge 127.0.0.1:9999
//! ```

use std::fs::File;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use race_timing::athlete::Athlete;
use race_timing::cli::Cli;
use race_timing::clock::{SystemClock, format_elapsed};
use race_timing::events::TracingSink;
use race_timing::ingest::{NumericTags, TagResolver, TagTable};
use race_timing::ledger::{Ledger, MemoryLedger, SortKey};
use race_timing::protocol::{ConsoleCommand, HELP};
use race_timing::race::RaceMachine;
use race_timing::results::{podium_report, standings};
use race_timing::runtime::{RaceHandle, RaceServices, spawn_race};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = cli.race_config();

    let ledger: Arc<dyn Ledger> = match &cli.ledger {
        Some(path) => Arc::new(
            MemoryLedger::open(path)
                .with_context(|| format!("failed to open ledger {}", path.display()))?,
        ),
        None => Arc::new(MemoryLedger::new()),
    };
    let resolver: Arc<dyn TagResolver> = match &cli.tags {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("failed to open tag table {}", path.display()))?;
            let table = TagTable::from_csv(file).context("failed to load tag table")?;
            info!(tags = table.len(), "tag table loaded");
            Arc::new(table)
        }
        None => Arc::new(NumericTags),
    };

    let events = Arc::new(TracingSink);
    let machine = RaceMachine::new(ledger, config.event_date, events.clone())?;
    info!(
        event_date = %config.event_date,
        phase = %machine.phase(),
        "race loaded"
    );
    let handle = spawn_race(
        machine,
        config,
        RaceServices {
            resolver,
            clock: Arc::new(SystemClock),
            events,
        },
    )?;

    if let Some(addr) = &cli.bridge {
        if let Err(err) = handle.connect(addr) {
            warn!("could not connect to bridge: {err:#}");
        }
    }

    println!("Race console ready. Type HELP (or h) for commands, or just an athlete number.");
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        prompt("> ")?;
        let Some(line) = lines.next() else { break };
        let line = line.context("failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }

        let command = match ConsoleCommand::parse(&line) {
            Ok(command) => command,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };
        if command.needs_confirmation() {
            prompt("Are you sure? [y/N] ")?;
            let answer = lines.next().transpose()?.unwrap_or_default();
            if !matches!(answer.trim(), "y" | "Y" | "yes" | "YES") {
                println!("cancelled");
                continue;
            }
        }
        if command == ConsoleCommand::Exit {
            break;
        }
        if let Err(err) = execute(&handle, command) {
            println!("error: {err:#}");
        }
    }

    handle.shutdown()
}

fn prompt(text: &str) -> Result<()> {
    print!("{text}");
    io::stdout().flush().context("failed to flush stdout")
}

fn execute(handle: &RaceHandle, command: ConsoleCommand) -> Result<()> {
    match command {
        ConsoleCommand::Start { time } => {
            let start = handle.start(&time)?;
            println!("race started at {}", start.format("%H:%M:%S%.3f"));
        }
        ConsoleCommand::Adjust { time } => {
            let start = handle.adjust_start(&time)?;
            println!("start adjusted to {}", start.format("%H:%M:%S%.3f"));
        }
        ConsoleCommand::Arrive { input } => {
            let receipt = handle.arrive(&input)?;
            println!(
                "#{} {} {}",
                receipt.num,
                receipt.name,
                format_elapsed(receipt.net_seconds)
            );
        }
        ConsoleCommand::Finish => {
            handle.finish()?;
            println!("race finished");
        }
        ConsoleCommand::Reset { scope } => {
            handle.reset(scope)?;
            println!("race reset");
        }
        ConsoleCommand::Import { path } => {
            let report = handle.import(path)?;
            println!("{} athlete(s) loaded", report.loaded());
            for row in &report.errors {
                println!("  {row}");
            }
        }
        ConsoleCommand::Show { input } => print_athlete(&handle.find_athlete(&input)?),
        ConsoleCommand::Edit {
            input,
            field,
            value,
        } => {
            let athlete = handle.edit_athlete(&input, field, &value)?;
            println!("athlete #{} updated", athlete.num);
            print_athlete(&athlete);
        }
        ConsoleCommand::Status => {
            let status = handle.status()?;
            let start = status
                .start
                .map(|start| start.format("%H:%M:%S%.3f").to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("event date : {}", status.event_date);
            println!("phase      : {}", status.phase);
            println!("start      : {start}");
            println!("finished   : {}/{}", status.finished, status.athletes);
            println!("queued     : {}", status.queued);
            match status.bridge {
                Some(addr) => println!("bridge     : {addr} ({})", status.link),
                None => println!("bridge     : {}", status.link),
            }
        }
        ConsoleCommand::Results => {
            let athletes = handle.athletes(SortKey::NetTime)?;
            for (place, athlete) in standings(&athletes).iter().enumerate() {
                println!(
                    "{:>4}. #{:<5} {:<30} {} {:>3} {:<8} {}",
                    place + 1,
                    athlete.num,
                    athlete.name,
                    athlete.sex,
                    athlete.age,
                    athlete.category,
                    athlete.net_seconds().map(format_elapsed).unwrap_or_default()
                );
            }
        }
        ConsoleCommand::Podium => {
            let athletes = handle.athletes(SortKey::NetTime)?;
            for group in podium_report(&athletes) {
                println!("{}", group.title);
                for (place, athlete) in group.entries.iter().enumerate() {
                    println!(
                        "  {}. #{} {} ({} anos) {}",
                        place + 1,
                        athlete.num,
                        athlete.name,
                        athlete.age,
                        athlete.net_seconds().map(format_elapsed).unwrap_or_default()
                    );
                }
            }
        }
        ConsoleCommand::Connect { addr } => {
            handle.connect(&addr)?;
            println!("connected to {addr}");
        }
        ConsoleCommand::Disconnect => {
            handle.disconnect()?;
            println!("bridge disconnected");
        }
        ConsoleCommand::Help => println!("{HELP}"),
        ConsoleCommand::Exit => {}
    }
    Ok(())
}

fn print_athlete(athlete: &Athlete) {
    println!("#{} {}", athlete.num, athlete.name);
    println!("  sexo       : {}", athlete.sex);
    println!(
        "  nascimento : {} ({} anos)",
        athlete.birth_date.format("%d/%m/%Y"),
        athlete.age
    );
    println!("  categoria  : {}", athlete.category);
    println!("  modalidade : {}", athlete.modality);
    match athlete.net_seconds() {
        Some(net) => println!("  tempo      : {}", format_elapsed(net)),
        None => println!("  tempo      : -"),
    }
}
