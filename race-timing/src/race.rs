//! The race state machine.
//!
//! [`RaceMachine`] is the single authority over the race lifecycle
//! (Preparing → Running → Finished, plus reset back to Preparing) and over
//! whether an arrival is accepted. It owns no storage of its own: every
//! durable fact lives in the [`Ledger`], and every notable outcome is emitted
//! to the injected [`EventSink`].
//!
//! Every operation is callable in every phase. Calls that the current phase
//! does not allow return [`RaceError::NotPermitted`] instead of being dropped.

use std::fmt;
use std::io::Read;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};

use crate::athlete::{Athlete, AthleteDraft, AthleteField, AthleteId};
use crate::clock::{elapsed_seconds, from_iso, parse_start_time, to_iso};
use crate::error::{RaceError, RaceLogicError, StorageError};
use crate::events::{EventSink, RaceEvent, RejectKind, Source};
use crate::import::{self, ImportReport};
use crate::ingest::{Reading, TagResolver};
use crate::ledger::{FINISHED_STATUS, Ledger, RACE_STATUS_KEY, START_TIME_KEY, SortKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Preparing,
    Running,
    Finished,
}

impl Phase {
    pub fn permits(self, operation: Operation) -> bool {
        use Operation::*;
        match self {
            Phase::Preparing => matches!(
                operation,
                ImportAthletes | SaveAthlete | EditAthlete | Start | Reset
            ),
            Phase::Running => matches!(
                operation,
                EditAthlete | AdjustStart | RegisterArrival | Finish | Reset
            ),
            Phase::Finished => matches!(operation, EditAthlete | Reset),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Preparing => "preparing",
            Phase::Running => "running",
            Phase::Finished => "finished",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ImportAthletes,
    SaveAthlete,
    EditAthlete,
    Start,
    AdjustStart,
    RegisterArrival,
    Finish,
    Reset,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::ImportAthletes => "import athletes",
            Operation::SaveAthlete => "save athlete",
            Operation::EditAthlete => "edit athlete",
            Operation::Start => "start race",
            Operation::AdjustStart => "adjust start",
            Operation::RegisterArrival => "register arrival",
            Operation::Finish => "finish race",
            Operation::Reset => "reset race",
        })
    }
}

/// What a reset wipes besides the race state and arrivals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetScope {
    #[default]
    KeepAthletes,
    Everything,
}

/// Confirmation of an accepted arrival.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrivalReceipt {
    pub num: u32,
    pub name: String,
    pub at: NaiveDateTime,
    pub net_seconds: f64,
}

pub struct RaceMachine {
    ledger: Arc<dyn Ledger>,
    event_date: NaiveDate,
    phase: Phase,
    events: Arc<dyn EventSink>,
}

impl RaceMachine {
    /// Builds a machine over `ledger`, resuming the phase it records.
    pub fn new(
        ledger: Arc<dyn Ledger>,
        event_date: NaiveDate,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, RaceError> {
        let phase = if ledger.get_state(RACE_STATUS_KEY)?.as_deref() == Some(FINISHED_STATUS) {
            Phase::Finished
        } else if ledger.get_state(START_TIME_KEY)?.is_some() {
            Phase::Running
        } else {
            Phase::Preparing
        };
        Ok(Self {
            ledger,
            event_date,
            phase,
            events,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn event_date(&self) -> NaiveDate {
        self.event_date
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn start_time(&self) -> Result<Option<NaiveDateTime>, RaceError> {
        let Some(raw) = self.ledger.get_state(START_TIME_KEY)? else {
            return Ok(None);
        };
        match from_iso(&raw) {
            Some(start) => Ok(Some(start)),
            None => Err(StorageError::CorruptState {
                key: START_TIME_KEY.to_string(),
                value: raw,
            }
            .into()),
        }
    }

    fn permit(&self, operation: Operation) -> Result<(), RaceError> {
        if self.phase.permits(operation) {
            Ok(())
        } else {
            Err(RaceError::NotPermitted {
                operation,
                phase: self.phase,
            })
        }
    }

    /// Like [`Self::permit`], but also reports the refusal.
    fn guard(&self, operation: Operation) -> Result<(), RaceError> {
        self.permit(operation).inspect_err(|err| {
            self.events.emit(RaceEvent::OperationRefused {
                message: err.to_string(),
            })
        })
    }

    fn transition(&mut self, to: Phase) {
        let from = self.phase;
        self.phase = to;
        if from != to {
            self.events.emit(RaceEvent::PhaseChanged { from, to });
        }
    }

    pub fn import_csv<R: Read>(&mut self, reader: R) -> Result<ImportReport, RaceError> {
        self.guard(Operation::ImportAthletes)?;
        let report = import::read_athletes(reader, self.event_date)?;
        if !report.athletes.is_empty() {
            self.ledger.upsert_athletes(report.athletes.clone())?;
        }
        self.events.emit(RaceEvent::AthletesImported {
            loaded: report.athletes.len(),
            rejected: report.errors.len(),
        });
        Ok(report)
    }

    pub fn save_athlete(&mut self, draft: &AthleteDraft) -> Result<Athlete, RaceError> {
        self.guard(Operation::SaveAthlete)?;
        let mut athlete = Athlete::validate(draft, self.event_date)
            .map_err(|err| RaceError::InvalidInput(err.to_string()))?;
        if let Some(existing) = self.ledger.get_athlete(athlete.num)? {
            athlete.arrival = existing.arrival;
        }
        self.ledger.upsert_athletes(vec![athlete.clone()])?;
        Ok(athlete)
    }

    /// Looks an athlete up by the number as typed.
    pub fn find_athlete(&self, input: &str) -> Result<Athlete, RaceError> {
        let id = input.parse::<AthleteId>()?;
        self.ledger
            .get_athlete(id.0)?
            .ok_or_else(|| RaceError::AthleteNotFound {
                reference: format!("athlete {id}"),
            })
    }

    /// Corrects the registration of an existing athlete, in any phase.
    /// A recorded arrival is left untouched.
    pub fn edit_athlete(&mut self, draft: &AthleteDraft) -> Result<Athlete, RaceError> {
        self.guard(Operation::EditAthlete)?;
        let current = self.find_athlete(&draft.num)?;
        let mut athlete = Athlete::validate(draft, self.event_date)
            .map_err(|err| RaceError::InvalidInput(err.to_string()))?;
        self.ledger.update_athlete(athlete.clone())?;
        athlete.arrival = current.arrival;
        self.events.emit(RaceEvent::AthleteUpdated { num: athlete.num });
        Ok(athlete)
    }

    /// Changes one field of athlete `input`, keeping the others.
    pub fn edit_field(
        &mut self,
        input: &str,
        field: AthleteField,
        value: &str,
    ) -> Result<Athlete, RaceError> {
        let mut draft = AthleteDraft::from(&self.find_athlete(input)?);
        draft.set(field, value);
        self.edit_athlete(&draft)
    }

    /// Preparing → Running. `time` is `HH:MM:SS.mmm` on the event date.
    pub fn start(&mut self, time: &str) -> Result<NaiveDateTime, RaceError> {
        self.guard(Operation::Start)?;
        let start = self.persist_start(time)?;
        self.events.emit(RaceEvent::StartSet {
            start,
            adjusted: false,
        });
        self.transition(Phase::Running);
        Ok(start)
    }

    /// Overwrites the start while Running.
    ///
    /// Net times already recorded are not recomputed; moving the start
    /// under existing arrivals is reported as a warning event.
    pub fn adjust_start(&mut self, time: &str) -> Result<NaiveDateTime, RaceError> {
        self.guard(Operation::AdjustStart)?;
        let previous = self.start_time()?;
        let start = self.persist_start(time)?;

        let arrivals = self
            .ledger
            .list_athletes(SortKey::Number, false)?
            .iter()
            .filter(|athlete| athlete.has_finished())
            .count();
        if let Some(previous) = previous.filter(|previous| *previous != start && arrivals > 0) {
            self.events.emit(RaceEvent::StartMovedUnderArrivals {
                previous,
                start,
                arrivals,
            });
        }
        self.events.emit(RaceEvent::StartSet {
            start,
            adjusted: true,
        });
        Ok(start)
    }

    fn persist_start(&self, time: &str) -> Result<NaiveDateTime, RaceError> {
        if self.ledger.athlete_count()? == 0 {
            return Err(RaceLogicError::NoAthletes.into());
        }
        let start = self.event_date.and_time(parse_start_time(time)?);
        self.ledger.set_state(START_TIME_KEY, &to_iso(start))?;
        Ok(start)
    }

    /// Records the finish of `id` at `now`.
    ///
    /// Checks run in this order: phase, athlete exists, no prior arrival,
    /// start set, `now` not before the start. A duplicate is therefore
    /// reported as such whatever `now` is.
    pub fn register_arrival(
        &mut self,
        id: AthleteId,
        now: NaiveDateTime,
    ) -> Result<ArrivalReceipt, RaceError> {
        self.permit(Operation::RegisterArrival)?;

        let athlete = self
            .ledger
            .get_athlete(id.0)?
            .ok_or_else(|| RaceError::AthleteNotFound {
                reference: format!("athlete {id}"),
            })?;
        if let Some(arrival) = &athlete.arrival {
            return Err(RaceError::DuplicateArrival {
                num: athlete.num,
                net_seconds: arrival.net_seconds,
            });
        }

        let start = self.start_time()?.ok_or(RaceLogicError::NoStartTime)?;
        if now < start {
            return Err(RaceLogicError::ArrivalBeforeStart { arrival: now, start }.into());
        }

        let net_seconds = elapsed_seconds(start, now);
        self.ledger.record_arrival(athlete.num, now, net_seconds)?;

        Ok(ArrivalReceipt {
            num: athlete.num,
            name: athlete.name,
            at: now,
            net_seconds,
        })
    }

    /// Manual entry: `input` is the athlete number as typed.
    pub fn register_manual(
        &mut self,
        input: &str,
        now: NaiveDateTime,
    ) -> Result<ArrivalReceipt, RaceError> {
        let result = self
            .permit(Operation::RegisterArrival)
            .and_then(|_| input.parse::<AthleteId>())
            .and_then(|id| self.register_arrival(id, now));
        self.report(result, Source::Manual, format!("'{}'", input.trim()))
    }

    /// Streaming entry: the reading's tag is resolved to an athlete first.
    pub fn register_reading(
        &mut self,
        reading: &Reading,
        resolver: &dyn TagResolver,
        now: NaiveDateTime,
    ) -> Result<ArrivalReceipt, RaceError> {
        let result = self
            .permit(Operation::RegisterArrival)
            .and_then(|_| resolver.resolve(&reading.tag))
            .and_then(|id| self.register_arrival(id, now));
        let source = Source::Rfid {
            antenna: reading.antenna,
            tag: reading.tag.clone(),
        };
        self.report(result, source, format!("tag {}", reading.tag))
    }

    fn report(
        &self,
        result: Result<ArrivalReceipt, RaceError>,
        source: Source,
        reference: String,
    ) -> Result<ArrivalReceipt, RaceError> {
        match &result {
            Ok(receipt) => self.events.emit(RaceEvent::ArrivalAccepted {
                receipt: receipt.clone(),
                source,
            }),
            Err(err) => self.events.emit(RaceEvent::ArrivalRejected {
                source,
                reference,
                kind: RejectKind::of(err),
                message: err.to_string(),
            }),
        }
        result
    }

    /// Running → Finished. Arrivals are locked out afterwards.
    pub fn finish(&mut self) -> Result<(), RaceError> {
        self.guard(Operation::Finish)?;
        self.ledger.set_state(RACE_STATUS_KEY, FINISHED_STATUS)?;
        self.transition(Phase::Finished);
        Ok(())
    }

    /// Any phase → Preparing, clearing the start, the status and every arrival.
    pub fn reset(&mut self, scope: ResetScope) -> Result<(), RaceError> {
        self.guard(Operation::Reset)?;
        match scope {
            ResetScope::KeepAthletes => self.ledger.reset_race()?,
            ResetScope::Everything => self.ledger.reset_all()?,
        }
        self.transition(Phase::Preparing);
        Ok(())
    }
}
