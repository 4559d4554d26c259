//! Race ledger: the row/key-value store behind the state machine.
//!
//! The state machine only talks to the [`Ledger`] trait. [`MemoryLedger`] is
//! the bundled implementation, optionally mirrored to a JSON snapshot file so
//! a restarted process picks up where it left off.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::athlete::{Arrival, Athlete};
use crate::error::{StorageError, StorageResult};

/// Ledger key holding the ISO start instant.
pub const START_TIME_KEY: &str = "horario_largada";
/// Ledger key holding the race status marker.
pub const RACE_STATUS_KEY: &str = "estado_prova";
/// Value of [`RACE_STATUS_KEY`] once the race is finished.
pub const FINISHED_STATUS: &str = "FINALIZADO";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Number,
    Name,
    Sex,
    Age,
    Category,
    Modality,
    NetTime,
}

/// Describes a successful mutation, delivered to every observer.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerChange {
    AthletesUpserted(usize),
    AthleteUpdated { num: u32 },
    ArrivalRecorded { num: u32 },
    StateChanged { key: String },
    RaceReset,
    Cleared,
}

pub trait LedgerObserver: Send + Sync {
    fn ledger_changed(&self, change: &LedgerChange);
}

/// Narrow persistence contract consumed by the state machine.
///
/// Every mutating call notifies attached observers exactly once when it
/// succeeds and not at all when it fails.
pub trait Ledger: Send + Sync {
    fn get_athlete(&self, num: u32) -> StorageResult<Option<Athlete>>;

    fn list_athletes(&self, sort: SortKey, descending: bool) -> StorageResult<Vec<Athlete>>;

    fn athlete_count(&self) -> StorageResult<usize> {
        Ok(self.list_athletes(SortKey::Number, false)?.len())
    }

    fn upsert_athletes(&self, athletes: Vec<Athlete>) -> StorageResult<()>;

    /// Replaces the registration fields of an existing athlete. The stored
    /// arrival is kept whatever `athlete.arrival` holds.
    fn update_athlete(&self, athlete: Athlete) -> StorageResult<()>;

    fn record_arrival(&self, num: u32, at: NaiveDateTime, net_seconds: f64) -> StorageResult<()>;

    fn get_state(&self, key: &str) -> StorageResult<Option<String>>;

    fn get_state_or(&self, key: &str, default: &str) -> StorageResult<String> {
        Ok(self.get_state(key)?.unwrap_or_else(|| default.to_string()))
    }

    fn set_state(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Clears race state and every arrival, keeping the athletes.
    fn reset_race(&self) -> StorageResult<()>;

    /// Clears athletes and race state.
    fn reset_all(&self) -> StorageResult<()>;

    fn attach(&self, observer: Arc<dyn LedgerObserver>);
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LedgerData {
    athletes: BTreeMap<u32, Athlete>,
    state: BTreeMap<String, String>,
}

/// Mutex-guarded ledger with an optional JSON snapshot.
///
/// Mutations are applied to a copy, written to the snapshot (if any), and
/// only then committed, so a failed write leaves the ledger untouched.
#[derive(Default)]
pub struct MemoryLedger {
    data: Mutex<LedgerData>,
    snapshot: Option<PathBuf>,
    observers: Mutex<Vec<Arc<dyn LedgerObserver>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a ledger mirrored to `path`, loading it if the file exists.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let data = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)?,
            Err(err) if err.kind() == ErrorKind::NotFound => LedgerData::default(),
            Err(err) => return Err(err.into()),
        };
        info!(path = %path.display(), athletes = data.athletes.len(), "ledger opened");
        Ok(Self {
            data: Mutex::new(data),
            snapshot: Some(path),
            observers: Mutex::new(Vec::new()),
        })
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, LedgerData>> {
        self.data.lock().map_err(|_| StorageError::Poisoned)
    }

    fn mutate<F>(&self, change: LedgerChange, apply: F) -> StorageResult<()>
    where
        F: FnOnce(&mut LedgerData) -> StorageResult<()>,
    {
        {
            let mut guard = self.lock()?;
            let mut next = guard.clone();
            apply(&mut next)?;
            if let Some(path) = &self.snapshot {
                write_snapshot(path, &next)?;
            }
            *guard = next;
        }
        self.notify(&change);
        Ok(())
    }

    fn notify(&self, change: &LedgerChange) {
        let observers = match self.observers.lock() {
            Ok(observers) => observers.clone(),
            Err(_) => {
                warn!("observer list poisoned, skipping notification");
                return;
            }
        };
        debug!(observers = observers.len(), ?change, "notifying ledger observers");
        for observer in observers {
            observer.ledger_changed(change);
        }
    }
}

fn write_snapshot(path: &Path, data: &LedgerData) -> StorageResult<()> {
    let encoded = serde_json::to_vec_pretty(data)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, encoded)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl Ledger for MemoryLedger {
    fn get_athlete(&self, num: u32) -> StorageResult<Option<Athlete>> {
        Ok(self.lock()?.athletes.get(&num).cloned())
    }

    fn list_athletes(&self, sort: SortKey, descending: bool) -> StorageResult<Vec<Athlete>> {
        let mut athletes: Vec<Athlete> = self.lock()?.athletes.values().cloned().collect();
        sort_athletes(&mut athletes, sort, descending);
        Ok(athletes)
    }

    fn athlete_count(&self) -> StorageResult<usize> {
        Ok(self.lock()?.athletes.len())
    }

    fn upsert_athletes(&self, athletes: Vec<Athlete>) -> StorageResult<()> {
        let count = athletes.len();
        self.mutate(LedgerChange::AthletesUpserted(count), |data| {
            for athlete in athletes {
                data.athletes.insert(athlete.num, athlete);
            }
            Ok(())
        })?;
        info!(count, "athletes inserted or updated");
        Ok(())
    }

    fn update_athlete(&self, athlete: Athlete) -> StorageResult<()> {
        let num = athlete.num;
        self.mutate(LedgerChange::AthleteUpdated { num }, |data| {
            let stored = data
                .athletes
                .get_mut(&num)
                .ok_or(StorageError::UnknownAthlete(num))?;
            let arrival = stored.arrival.take();
            *stored = Athlete { arrival, ..athlete };
            Ok(())
        })?;
        info!(athlete = num, "athlete updated");
        Ok(())
    }

    fn record_arrival(&self, num: u32, at: NaiveDateTime, net_seconds: f64) -> StorageResult<()> {
        self.mutate(LedgerChange::ArrivalRecorded { num }, |data| {
            let athlete = data
                .athletes
                .get_mut(&num)
                .ok_or(StorageError::UnknownAthlete(num))?;
            athlete.arrival = Some(Arrival { at, net_seconds });
            Ok(())
        })
    }

    fn get_state(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.lock()?.state.get(key).cloned())
    }

    fn set_state(&self, key: &str, value: &str) -> StorageResult<()> {
        self.mutate(
            LedgerChange::StateChanged {
                key: key.to_string(),
            },
            |data| {
                data.state.insert(key.to_string(), value.to_string());
                Ok(())
            },
        )
    }

    fn reset_race(&self) -> StorageResult<()> {
        self.mutate(LedgerChange::RaceReset, |data| {
            data.state.clear();
            for athlete in data.athletes.values_mut() {
                athlete.arrival = None;
            }
            Ok(())
        })?;
        warn!("race reset: start time, status and all arrivals cleared");
        Ok(())
    }

    fn reset_all(&self) -> StorageResult<()> {
        self.mutate(LedgerChange::Cleared, |data| {
            *data = LedgerData::default();
            Ok(())
        })?;
        warn!("ledger cleared: all athletes and race state removed");
        Ok(())
    }

    fn attach(&self, observer: Arc<dyn LedgerObserver>) {
        match self.observers.lock() {
            Ok(mut observers) => observers.push(observer),
            Err(_) => warn!("observer list poisoned, observer not attached"),
        }
    }
}

/// Orders athletes in place. Athletes without a net time always sort last
/// when ordering by net time, regardless of direction.
pub fn sort_athletes(athletes: &mut [Athlete], sort: SortKey, descending: bool) {
    athletes.sort_by(|a, b| {
        if sort == SortKey::NetTime {
            return match (a.net_seconds(), b.net_seconds()) {
                (Some(x), Some(y)) => directed(x.total_cmp(&y), descending),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => a.num.cmp(&b.num),
            };
        }
        let ord = match sort {
            SortKey::Number => a.num.cmp(&b.num),
            SortKey::Name => a.name.cmp(&b.name),
            SortKey::Sex => a.sex.cmp(&b.sex),
            SortKey::Age => a.age.cmp(&b.age),
            SortKey::Category => a.category.cmp(&b.category),
            SortKey::Modality => a.modality.cmp(&b.modality),
            SortKey::NetTime => Ordering::Equal,
        };
        directed(ord.then(a.num.cmp(&b.num)), descending)
    });
}

fn directed(ord: Ordering, descending: bool) -> Ordering {
    if descending {
        ord.reverse()
    } else {
        ord
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use chrono::NaiveDate;

    use super::*;
    use crate::athlete::Sex;

    fn athlete(num: u32, name: &str) -> Athlete {
        Athlete {
            num,
            name: name.to_string(),
            sex: Sex::Male,
            birth_date: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
            age: 35,
            category: "GERAL".into(),
            modality: "5K".into(),
            arrival: None,
        }
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 15)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl LedgerObserver for Counter {
        fn ledger_changed(&self, _change: &LedgerChange) {
            self.0.fetch_add(1, AtomicOrdering::SeqCst);
        }
    }

    #[test]
    fn observers_notified_once_per_successful_mutation() {
        let ledger = MemoryLedger::new();
        let counter = Arc::new(Counter::default());
        ledger.attach(counter.clone());

        ledger.upsert_athletes(vec![athlete(1, "a"), athlete(2, "b")]).unwrap();
        ledger.set_state(START_TIME_KEY, "2025-06-15T10:00:00").unwrap();
        ledger.record_arrival(1, at(10, 5, 0), 300.0).unwrap();
        assert_eq!(counter.0.load(AtomicOrdering::SeqCst), 3);

        // Failed mutation: no notification, nothing stored.
        assert!(matches!(
            ledger.record_arrival(99, at(10, 6, 0), 360.0),
            Err(StorageError::UnknownAthlete(99))
        ));
        assert_eq!(counter.0.load(AtomicOrdering::SeqCst), 3);

        // Reads never notify.
        ledger.get_athlete(1).unwrap();
        ledger.list_athletes(SortKey::Name, false).unwrap();
        assert_eq!(counter.0.load(AtomicOrdering::SeqCst), 3);
    }

    #[test]
    fn update_keeps_recorded_arrival() {
        let ledger = MemoryLedger::new();
        let counter = Arc::new(Counter::default());
        ledger.upsert_athletes(vec![athlete(1, "a")]).unwrap();
        ledger.record_arrival(1, at(10, 5, 0), 300.0).unwrap();
        ledger.attach(counter.clone());

        ledger.update_athlete(athlete(1, "renamed")).unwrap();
        let stored = ledger.get_athlete(1).unwrap().unwrap();
        assert_eq!(stored.name, "renamed");
        assert_eq!(stored.net_seconds(), Some(300.0));

        assert!(matches!(
            ledger.update_athlete(athlete(2, "ghost")),
            Err(StorageError::UnknownAthlete(2))
        ));
        assert_eq!(ledger.athlete_count().unwrap(), 1);
        assert_eq!(counter.0.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn reset_race_keeps_athletes() {
        let ledger = MemoryLedger::new();
        ledger.upsert_athletes(vec![athlete(1, "a")]).unwrap();
        ledger.set_state(START_TIME_KEY, "2025-06-15T10:00:00").unwrap();
        ledger.record_arrival(1, at(10, 5, 0), 300.0).unwrap();

        ledger.reset_race().unwrap();
        assert_eq!(ledger.get_state(START_TIME_KEY).unwrap(), None);
        assert_eq!(ledger.get_athlete(1).unwrap().unwrap().arrival, None);

        ledger.reset_all().unwrap();
        assert_eq!(ledger.athlete_count().unwrap(), 0);
    }

    #[test]
    fn state_defaults() {
        let ledger = MemoryLedger::new();
        assert_eq!(ledger.get_state_or(RACE_STATUS_KEY, "none").unwrap(), "none");
    }

    #[test]
    fn net_time_sort_puts_unfinished_last() {
        let mut athletes = vec![athlete(1, "a"), athlete(2, "b"), athlete(3, "c")];
        athletes[1].arrival = Some(Arrival {
            at: at(10, 5, 0),
            net_seconds: 300.0,
        });
        athletes[2].arrival = Some(Arrival {
            at: at(10, 4, 0),
            net_seconds: 240.0,
        });

        sort_athletes(&mut athletes, SortKey::NetTime, false);
        let order: Vec<u32> = athletes.iter().map(|a| a.num).collect();
        assert_eq!(order, vec![3, 2, 1]);

        sort_athletes(&mut athletes, SortKey::NetTime, true);
        let order: Vec<u32> = athletes.iter().map(|a| a.num).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        {
            let ledger = MemoryLedger::open(&path).unwrap();
            ledger.upsert_athletes(vec![athlete(7, "g")]).unwrap();
            ledger.set_state(START_TIME_KEY, "2025-06-15T10:00:00").unwrap();
            ledger.record_arrival(7, at(10, 1, 0), 60.0).unwrap();
        }

        let reopened = MemoryLedger::open(&path).unwrap();
        let stored = reopened.get_athlete(7).unwrap().unwrap();
        assert_eq!(stored.net_seconds(), Some(60.0));
        assert_eq!(
            reopened.get_state(START_TIME_KEY).unwrap().as_deref(),
            Some("2025-06-15T10:00:00")
        );
    }

    #[test]
    fn failed_snapshot_write_leaves_data_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("ledger.json");
        let ledger = MemoryLedger::open(&path).unwrap();

        assert!(matches!(
            ledger.upsert_athletes(vec![athlete(1, "a")]),
            Err(StorageError::Io(_))
        ));
        assert_eq!(ledger.athlete_count().unwrap(), 0);
    }
}
