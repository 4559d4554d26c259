//! Worker runtime for the race console.
//!
//! One worker thread owns the [`RaceMachine`]. Everything else talks to it
//! through channels:
//!
//! - **Operator requests** arrive from [`RaceHandle`] and are answered on a
//!   per-request reply channel, so the manual producer stays synchronous.
//! - **RFID readings** are pushed into a bounded queue by the bridge link
//!   thread. The worker drains that queue every poll interval.
//!
//! Keeping the machine on a single thread means no operation ever observes
//! a half-applied arrival or phase change.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime};
use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{error, info, warn};

use crate::athlete::{Athlete, AthleteDraft, AthleteField};
use crate::clock::Clock;
use crate::error::{ImportError, RaceError, TransportError};
use crate::events::EventSink;
use crate::import::ImportReport;
use crate::ingest::{ReadingConsumer, ReadingProducer, ReadingQueue, TagResolver, drain};
use crate::ledger::SortKey;
use crate::link::{BridgeLink, LinkStatus, RECEIVE_TIMEOUT};
use crate::race::{ArrivalReceipt, Phase, RaceMachine, ResetScope};

/// Default interval between reading-queue drains.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default capacity of the reading queue.
pub const QUEUE_CAPACITY: usize = 1024;

/// Resolved settings for a race session.
#[derive(Debug, Clone)]
pub struct RaceConfig {
    pub event_date: NaiveDate,
    pub poll_interval: Duration,
    pub queue_capacity: usize,
    pub receive_timeout: Duration,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            event_date: Local::now().date_naive(),
            poll_interval: POLL_INTERVAL,
            queue_capacity: QUEUE_CAPACITY,
            receive_timeout: RECEIVE_TIMEOUT,
        }
    }
}

/// Collaborators the worker needs besides the machine.
pub struct RaceServices {
    pub resolver: Arc<dyn TagResolver>,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<dyn EventSink>,
}

/// Snapshot returned by [`RaceHandle::status`].
#[derive(Debug, Clone, PartialEq)]
pub struct RaceStatus {
    pub phase: Phase,
    pub event_date: NaiveDate,
    pub start: Option<NaiveDateTime>,
    pub athletes: usize,
    pub finished: usize,
    pub queued: usize,
    pub bridge: Option<String>,
    pub link: LinkStatus,
}

type Reply<T> = Sender<Result<T, RaceError>>;

enum Request {
    Start { time: String, respond_to: Reply<NaiveDateTime> },
    Adjust { time: String, respond_to: Reply<NaiveDateTime> },
    Arrive { input: String, at: NaiveDateTime, respond_to: Reply<ArrivalReceipt> },
    Finish { respond_to: Reply<()> },
    Reset { scope: ResetScope, respond_to: Reply<()> },
    Import { path: PathBuf, respond_to: Reply<ImportReport> },
    SaveAthlete { draft: AthleteDraft, respond_to: Reply<Athlete> },
    FindAthlete { input: String, respond_to: Reply<Athlete> },
    EditAthlete {
        input: String,
        field: AthleteField,
        value: String,
        respond_to: Reply<Athlete>,
    },
    Athletes { sort: SortKey, respond_to: Reply<Vec<Athlete>> },
    Status { respond_to: Reply<RaceStatus> },
    Connect { addr: String, respond_to: Sender<Result<(), TransportError>> },
    Disconnect { respond_to: Sender<()> },
    Shutdown,
}

/// Handle for sending requests to the race worker.
pub struct RaceHandle {
    request_tx: Sender<Request>,
    producer: ReadingProducer,
    clock: Arc<dyn Clock>,
    worker: Option<JoinHandle<()>>,
}

impl RaceHandle {
    fn call<T>(&self, what: &str, build: impl FnOnce(Sender<T>) -> Request) -> Result<T> {
        let (resp_tx, resp_rx) = unbounded();
        self.request_tx
            .send(build(resp_tx))
            .with_context(|| format!("failed to send {what} request"))?;
        resp_rx
            .recv()
            .with_context(|| format!("{what} response channel closed"))
    }

    pub fn start(&self, time: &str) -> Result<NaiveDateTime> {
        let time = time.to_string();
        Ok(self.call("start", |respond_to| Request::Start { time, respond_to })??)
    }

    pub fn adjust_start(&self, time: &str) -> Result<NaiveDateTime> {
        let time = time.to_string();
        Ok(self.call("adjust", |respond_to| Request::Adjust { time, respond_to })??)
    }

    /// Registers a manual arrival, stamped with the time of this call.
    pub fn arrive(&self, input: &str) -> Result<ArrivalReceipt, RaceError> {
        let at = self.clock.now();
        let input = input.to_string();
        self.call("arrive", |respond_to| Request::Arrive {
            input,
            at,
            respond_to,
        })
        .unwrap_or_else(|err| Err(RaceError::InvalidInput(format!("race worker unavailable: {err}"))))
    }

    pub fn finish(&self) -> Result<()> {
        Ok(self.call("finish", |respond_to| Request::Finish { respond_to })??)
    }

    pub fn reset(&self, scope: ResetScope) -> Result<()> {
        Ok(self.call("reset", |respond_to| Request::Reset { scope, respond_to })??)
    }

    pub fn import(&self, path: impl Into<PathBuf>) -> Result<ImportReport> {
        let path = path.into();
        Ok(self.call("import", |respond_to| Request::Import { path, respond_to })??)
    }

    pub fn save_athlete(&self, draft: AthleteDraft) -> Result<Athlete> {
        Ok(self.call("save athlete", |respond_to| Request::SaveAthlete { draft, respond_to })??)
    }

    pub fn find_athlete(&self, input: &str) -> Result<Athlete> {
        let input = input.to_string();
        Ok(self.call("find athlete", |respond_to| Request::FindAthlete { input, respond_to })??)
    }

    /// Changes one registration field of athlete `input`, in any phase.
    pub fn edit_athlete(&self, input: &str, field: AthleteField, value: &str) -> Result<Athlete> {
        let input = input.to_string();
        let value = value.to_string();
        Ok(self.call("edit athlete", |respond_to| Request::EditAthlete {
            input,
            field,
            value,
            respond_to,
        })??)
    }

    pub fn athletes(&self, sort: SortKey) -> Result<Vec<Athlete>> {
        Ok(self.call("athletes", |respond_to| Request::Athletes { sort, respond_to })??)
    }

    pub fn status(&self) -> Result<RaceStatus> {
        Ok(self.call("status", |respond_to| Request::Status { respond_to })??)
    }

    pub fn connect(&self, addr: &str) -> Result<()> {
        let addr = addr.to_string();
        Ok(self.call("connect", |respond_to| Request::Connect { addr, respond_to })??)
    }

    pub fn disconnect(&self) -> Result<()> {
        self.call("disconnect", |respond_to| Request::Disconnect { respond_to })
    }

    /// Producer side of the reading queue, for feeding readings directly.
    pub fn readings(&self) -> ReadingProducer {
        self.producer.clone()
    }

    /// Stops the worker after it drains what is already queued.
    pub fn shutdown(mut self) -> Result<()> {
        self.request_tx
            .send(Request::Shutdown)
            .context("failed to send shutdown")?;
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| anyhow::anyhow!("race worker panicked"))?;
        }
        Ok(())
    }
}

/// Moves `machine` onto a worker thread and returns a handle to it.
pub fn spawn_race(
    machine: RaceMachine,
    config: RaceConfig,
    services: RaceServices,
) -> Result<RaceHandle> {
    let (request_tx, request_rx) = unbounded();
    let (producer, consumer) = ReadingQueue::bounded(config.queue_capacity);
    let clock = services.clock.clone();

    let worker = Worker {
        machine,
        config,
        services,
        request_rx,
        producer: producer.clone(),
        consumer,
        link: None,
    };
    let join = thread::Builder::new()
        .name("race-worker".into())
        .spawn(move || worker.run())
        .context("failed to spawn race worker")?;

    Ok(RaceHandle {
        request_tx,
        producer,
        clock,
        worker: Some(join),
    })
}

struct Worker {
    machine: RaceMachine,
    config: RaceConfig,
    services: RaceServices,
    request_rx: Receiver<Request>,
    producer: ReadingProducer,
    consumer: ReadingConsumer,
    link: Option<BridgeLink>,
}

impl Worker {
    fn run(mut self) {
        info!(phase = %self.machine.phase(), "race worker started");
        let poll = self.config.poll_interval;
        let mut last_drain = Instant::now();
        loop {
            let timeout = poll
                .checked_sub(last_drain.elapsed())
                .unwrap_or(Duration::from_secs(0));

            crossbeam_channel::select! {
                recv(self.request_rx) -> req => {
                    match req {
                        Ok(req) => {
                            if !self.handle_request(req) {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
                default(timeout) => {}
            }

            if last_drain.elapsed() >= poll {
                self.drain_readings();
                last_drain = Instant::now();
            }
        }

        if let Some(mut link) = self.link.take() {
            link.stop();
        }
        self.drain_readings();
        info!("race worker stopped");
    }

    fn drain_readings(&mut self) {
        drain(
            &mut self.machine,
            &self.consumer,
            self.services.resolver.as_ref(),
            self.services.clock.as_ref(),
        );
    }

    /// Returns `false` once shutdown was requested.
    fn handle_request(&mut self, req: Request) -> bool {
        match req {
            Request::Start { time, respond_to } => {
                let _ = respond_to.send(self.machine.start(&time));
            }
            Request::Adjust { time, respond_to } => {
                let _ = respond_to.send(self.machine.adjust_start(&time));
            }
            Request::Arrive {
                input,
                at,
                respond_to,
            } => {
                // Readings that came in first are timed first.
                self.drain_readings();
                let _ = respond_to.send(self.machine.register_manual(&input, at));
            }
            Request::Finish { respond_to } => {
                self.drain_readings();
                let _ = respond_to.send(self.machine.finish());
            }
            Request::Reset { scope, respond_to } => {
                let _ = respond_to.send(self.machine.reset(scope));
            }
            Request::Import { path, respond_to } => {
                let _ = respond_to.send(self.import(path));
            }
            Request::SaveAthlete { draft, respond_to } => {
                let _ = respond_to.send(self.machine.save_athlete(&draft));
            }
            Request::FindAthlete { input, respond_to } => {
                let _ = respond_to.send(self.machine.find_athlete(&input));
            }
            Request::EditAthlete {
                input,
                field,
                value,
                respond_to,
            } => {
                let _ = respond_to.send(self.machine.edit_field(&input, field, &value));
            }
            Request::Athletes { sort, respond_to } => {
                let athletes = self
                    .machine
                    .ledger()
                    .list_athletes(sort, false)
                    .map_err(RaceError::from);
                let _ = respond_to.send(athletes);
            }
            Request::Status { respond_to } => {
                let _ = respond_to.send(self.status());
            }
            Request::Connect { addr, respond_to } => {
                let _ = respond_to.send(self.connect(&addr));
            }
            Request::Disconnect { respond_to } => {
                if let Some(mut link) = self.link.take() {
                    link.stop();
                }
                let _ = respond_to.send(());
            }
            Request::Shutdown => return false,
        }
        true
    }

    fn import(&mut self, path: PathBuf) -> Result<ImportReport, RaceError> {
        let file = File::open(&path).map_err(ImportError::from)?;
        let report = self.machine.import_csv(file)?;
        for row in &report.errors {
            warn!(path = %path.display(), "{row}");
        }
        Ok(report)
    }

    fn connect(&mut self, addr: &str) -> Result<(), TransportError> {
        if let Some(mut previous) = self.link.take() {
            previous.stop();
        }
        match BridgeLink::start(
            addr,
            self.producer.clone(),
            self.services.events.clone(),
            self.config.receive_timeout,
        ) {
            Ok(link) => {
                self.link = Some(link);
                Ok(())
            }
            Err(err) => {
                error!("{err}");
                Err(err)
            }
        }
    }

    fn status(&self) -> Result<RaceStatus, RaceError> {
        let athletes = self.machine.ledger().list_athletes(SortKey::Number, false)?;
        Ok(RaceStatus {
            phase: self.machine.phase(),
            event_date: self.machine.event_date(),
            start: self.machine.start_time()?,
            athletes: athletes.len(),
            finished: athletes.iter().filter(|a| a.has_finished()).count(),
            queued: self.consumer.len(),
            bridge: self.link.as_ref().map(|link| link.addr().to_string()),
            link: self
                .link
                .as_ref()
                .map_or(LinkStatus::Disconnected, BridgeLink::status),
        })
    }
}
