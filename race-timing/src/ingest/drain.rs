use tracing::debug;

use super::{ReadingConsumer, TagResolver};
use crate::clock::Clock;
use crate::race::RaceMachine;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub accepted: usize,
    pub rejected: usize,
}

impl DrainSummary {
    pub fn total(&self) -> usize {
        self.accepted + self.rejected
    }
}

/// Feeds every queued reading to the machine, in arrival order, until the
/// queue is empty. A rejected reading never stops the drain; the machine has
/// already reported it to its event sink.
pub fn drain(
    machine: &mut RaceMachine,
    consumer: &ReadingConsumer,
    resolver: &dyn TagResolver,
    clock: &dyn Clock,
) -> DrainSummary {
    let mut summary = DrainSummary::default();
    while let Some(reading) = consumer.try_next() {
        match machine.register_reading(&reading, resolver, clock.now()) {
            Ok(_) => summary.accepted += 1,
            Err(_) => summary.rejected += 1,
        }
    }
    if summary.total() > 0 {
        debug!(accepted = summary.accepted, rejected = summary.rejected, "drained reading queue");
    }
    summary
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, NaiveDate};

    use super::*;
    use crate::athlete::{Athlete, AthleteDraft};
    use crate::clock::ManualClock;
    use crate::events::{MemorySink, RaceEvent};
    use crate::ingest::{NumericTags, Reading, ReadingQueue};
    use crate::ledger::{Ledger, MemoryLedger};

    fn runner(num: u32) -> Athlete {
        let draft = AthleteDraft {
            num: num.to_string(),
            name: format!("Runner {num}"),
            sex: "M".into(),
            birth_date: "01/01/1990".into(),
            modality: "5K".into(),
            category: None,
        };
        Athlete::validate(&draft, NaiveDate::from_ymd_opt(2025, 6, 15).unwrap()).unwrap()
    }

    #[test]
    fn failures_do_not_stop_the_drain() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        let ledger = Arc::new(MemoryLedger::new());
        ledger.upsert_athletes(vec![runner(7), runner(9)]).unwrap();
        let sink = Arc::new(MemorySink::new());
        let mut machine = RaceMachine::new(ledger.clone(), date, sink.clone()).unwrap();
        machine.start("10:00:00.000").unwrap();

        let clock = ManualClock::new(date.and_hms_opt(10, 1, 0).unwrap());
        let (tx, rx) = ReadingQueue::bounded(16);
        for (tag, antenna) in [("7", 1), ("404", 1), ("7", 2), ("9", 2)] {
            tx.try_push(Reading {
                tag: tag.into(),
                antenna,
            })
            .unwrap();
        }
        clock.advance(Duration::seconds(1));

        let summary = drain(&mut machine, &rx, &NumericTags, &clock);
        assert_eq!(summary, DrainSummary { accepted: 2, rejected: 2 });
        assert!(rx.is_empty());

        let rejected = sink
            .events()
            .into_iter()
            .filter(|event| matches!(event, RaceEvent::ArrivalRejected { .. }))
            .count();
        assert_eq!(rejected, 2);
        assert_eq!(ledger.get_athlete(9).unwrap().unwrap().net_seconds(), Some(61.0));
    }
}
