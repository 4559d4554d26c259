//! TCP client for the RFID bridge.
//!
//! The bridge pushes `tag_id,antenna\n` lines. A background thread reads the
//! socket, reassembles lines, parses them and feeds the reading queue. It
//! never touches the state machine; the worker drains the queue on its own
//! schedule.

use std::fmt;
use std::io::{ErrorKind, Read};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::TransportError;
use crate::events::{EventSink, RaceEvent};
use crate::ingest::{LineBuffer, Reading, ReadingProducer};

/// Read timeout on the bridge socket, so `stop()` is noticed promptly.
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

/// How long a full queue is waited on before re-checking the running flag.
const QUEUE_PATIENCE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected,
    Connected,
    Failed(String),
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Disconnected => f.write_str("disconnected"),
            LinkStatus::Connected => f.write_str("connected"),
            LinkStatus::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// A running connection to the bridge.
pub struct BridgeLink {
    addr: String,
    running: Arc<AtomicBool>,
    status: Arc<Mutex<LinkStatus>>,
    socket: Option<TcpStream>,
    reader: Option<JoinHandle<()>>,
}

impl BridgeLink {
    /// Connects to `addr` and starts the reader thread.
    pub fn start(
        addr: &str,
        producer: ReadingProducer,
        events: Arc<dyn EventSink>,
        receive_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let connect_err = |source| TransportError::Connect {
            addr: addr.to_string(),
            source,
        };
        let stream = TcpStream::connect(addr).map_err(connect_err)?;
        stream
            .set_read_timeout(Some(receive_timeout))
            .map_err(connect_err)?;
        let socket = stream.try_clone().ok();

        let running = Arc::new(AtomicBool::new(true));
        let status = Arc::new(Mutex::new(LinkStatus::Connected));
        info!(addr, "connected to RFID bridge");

        let reader = {
            let running = running.clone();
            let status = status.clone();
            let addr = addr.to_string();
            thread::Builder::new()
                .name("bridge-link".into())
                .spawn(move || {
                    let outcome = receive_loop(stream, &producer, events.as_ref(), &running);
                    let next = match outcome {
                        Ok(()) => LinkStatus::Disconnected,
                        Err(TransportError::Closed) => {
                            warn!(addr = %addr, "{}", TransportError::Closed);
                            LinkStatus::Disconnected
                        }
                        Err(err) => {
                            error!(addr = %addr, "{err}");
                            LinkStatus::Failed(err.to_string())
                        }
                    };
                    set_status(&status, next);
                    running.store(false, Ordering::SeqCst);
                })
                .map_err(connect_err)?
        };

        Ok(Self {
            addr: addr.to_string(),
            running,
            status,
            socket,
            reader: Some(reader),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> LinkStatus {
        match self.status.lock() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Stops the reader thread and waits for it. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(socket) = self.socket.take() {
            let _ = socket.shutdown(Shutdown::Both);
        }
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                error!(addr = %self.addr, "bridge reader thread panicked");
            }
            info!(addr = %self.addr, "disconnected from RFID bridge");
        }
        set_status(&self.status, LinkStatus::Disconnected);
    }
}

impl Drop for BridgeLink {
    fn drop(&mut self) {
        self.stop();
    }
}

fn set_status(slot: &Mutex<LinkStatus>, next: LinkStatus) {
    match slot.lock() {
        Ok(mut status) => *status = next,
        Err(poisoned) => *poisoned.into_inner() = next,
    }
}

/// Reads until stopped or the bridge goes away. `Ok` means a local stop.
fn receive_loop(
    mut stream: TcpStream,
    producer: &ReadingProducer,
    events: &dyn EventSink,
    running: &AtomicBool,
) -> Result<(), TransportError> {
    let mut buf = [0u8; 4096];
    let mut lines = LineBuffer::new();

    while running.load(Ordering::SeqCst) {
        let n = match stream.read(&mut buf) {
            Ok(0) if !running.load(Ordering::SeqCst) => break,
            Ok(0) => return Err(TransportError::Closed),
            Ok(n) => n,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(_) if !running.load(Ordering::SeqCst) => break,
            Err(err) => return Err(TransportError::Receive(err)),
        };

        for line in lines.push(&buf[..n]) {
            let reading = match Reading::parse_line(&line) {
                Ok(reading) => reading,
                Err(reason) => {
                    events.emit(RaceEvent::MalformedReading {
                        line,
                        reason: reason.to_string(),
                    });
                    continue;
                }
            };
            debug!(tag = %reading.tag, antenna = reading.antenna, "reading queued");
            let keep_going = || running.load(Ordering::SeqCst);
            if !producer.push_while(reading, QUEUE_PATIENCE, keep_going) {
                // Stopped while waiting for room, or the consumer is gone.
                return Ok(());
            }
        }
    }
    Ok(())
}
