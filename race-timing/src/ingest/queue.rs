use std::time::Duration;

use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TryRecvError, TrySendError, bounded};

use super::Reading;

/// Bounded FIFO between reader threads and the state machine thread.
///
/// Any number of producers may feed it; a single consumer drains it.
pub struct ReadingQueue;

impl ReadingQueue {
    pub fn bounded(capacity: usize) -> (ReadingProducer, ReadingConsumer) {
        let (tx, rx) = bounded(capacity.max(1));
        (ReadingProducer { tx }, ReadingConsumer { rx })
    }
}

#[derive(Debug, Clone)]
pub struct ReadingProducer {
    tx: Sender<Reading>,
}

impl ReadingProducer {
    /// Enqueues without waiting. Fails when the queue is full or the
    /// consumer is gone.
    pub fn try_push(&self, reading: Reading) -> Result<(), TrySendError<Reading>> {
        self.tx.try_send(reading)
    }

    /// Enqueues, waiting in `patience` slices while the queue is full.
    ///
    /// Returns `false` without enqueuing once `keep_going` turns false or
    /// the consumer has been dropped.
    pub fn push_while<F>(&self, mut reading: Reading, patience: Duration, keep_going: F) -> bool
    where
        F: Fn() -> bool,
    {
        loop {
            match self.tx.send_timeout(reading, patience) {
                Ok(()) => return true,
                Err(SendTimeoutError::Disconnected(_)) => return false,
                Err(SendTimeoutError::Timeout(back)) => {
                    if !keep_going() {
                        return false;
                    }
                    reading = back;
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct ReadingConsumer {
    rx: Receiver<Reading>,
}

impl ReadingConsumer {
    /// Next queued reading, or `None` if the queue is empty right now.
    pub fn try_next(&self) -> Option<Reading> {
        match self.rx.try_recv() {
            Ok(reading) => Some(reading),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    use super::*;

    fn reading(tag: &str) -> Reading {
        Reading {
            tag: tag.into(),
            antenna: 1,
        }
    }

    #[test]
    fn fifo_order() {
        let (tx, rx) = ReadingQueue::bounded(8);
        for tag in ["1", "2", "3"] {
            tx.try_push(reading(tag)).unwrap();
        }
        let drained: Vec<String> = std::iter::from_fn(|| rx.try_next()).map(|r| r.tag).collect();
        assert_eq!(drained, vec!["1", "2", "3"]);
        assert!(rx.is_empty());
    }

    #[test]
    fn full_queue_rejects_try_push() {
        let (tx, _rx) = ReadingQueue::bounded(1);
        tx.try_push(reading("1")).unwrap();
        assert!(matches!(tx.try_push(reading("2")), Err(TrySendError::Full(_))));
    }

    #[test]
    fn push_while_waits_for_room() {
        let (tx, rx) = ReadingQueue::bounded(1);
        tx.try_push(reading("1")).unwrap();

        let producer = thread::spawn(move || {
            tx.push_while(reading("2"), Duration::from_millis(10), || true)
        });
        thread::sleep(Duration::from_millis(50));
        assert_eq!(rx.try_next().map(|r| r.tag).as_deref(), Some("1"));

        assert!(producer.join().unwrap());
        // The blocked reading lands once there is room.
        let mut next = None;
        for _ in 0..100 {
            next = rx.try_next();
            if next.is_some() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(next.map(|r| r.tag).as_deref(), Some("2"));
    }

    #[test]
    fn push_while_gives_up_when_stopped() {
        let (tx, _rx) = ReadingQueue::bounded(1);
        tx.try_push(reading("1")).unwrap();
        let running = Arc::new(AtomicBool::new(false));
        let flag = running.clone();
        assert!(!tx.push_while(reading("2"), Duration::from_millis(5), move || {
            flag.load(Ordering::SeqCst)
        }));
    }
}
