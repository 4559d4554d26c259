//! Tag reader task.
//!
//! The reader runs on its own Tokio task and hands reads over an `mpsc`
//! channel. Device failures never end the task: it reports the failure in
//! its status, waits the reconnect delay and tries again until stopped.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncSeekExt, BufReader, SeekFrom};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::{select, time};
use tracing::{debug, info, warn};

use crate::reading::{TagRead, read_counted_line};

pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const MOCK_INTERVAL: Duration = Duration::from_secs(1);

/// Reads buffered between the reader task and its consumer.
const READ_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderStatus {
    Disconnected,
    Connected,
    Failed(String),
}

impl fmt::Display for ReaderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReaderStatus::Disconnected => f.write_str("disconnected"),
            ReaderStatus::Connected => f.write_str("connected"),
            ReaderStatus::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderSource {
    /// Line-oriented device (or any readable path), one tag per line.
    Device(PathBuf),
    /// Scripted reads, emitted one per interval.
    Mock(Vec<TagRead>),
}

#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub source: ReaderSource,
    pub reconnect_delay: Duration,
    pub mock_interval: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            source: ReaderSource::Device(PathBuf::from("/dev/ttyUSB0")),
            reconnect_delay: RECONNECT_DELAY,
            mock_interval: MOCK_INTERVAL,
        }
    }
}

struct Running {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct RfidReader {
    config: ReaderConfig,
    status: Arc<watch::Sender<ReaderStatus>>,
    reads_tx: mpsc::Sender<TagRead>,
    reads_rx: mpsc::Receiver<TagRead>,
    running: Option<Running>,
}

impl RfidReader {
    pub fn new(config: ReaderConfig) -> Self {
        let (status, _) = watch::channel(ReaderStatus::Disconnected);
        let (reads_tx, reads_rx) = mpsc::channel(READ_BUFFER);
        Self {
            config,
            status: Arc::new(status),
            reads_tx,
            reads_rx,
            running: None,
        }
    }

    /// Spawns the reader task. Does nothing if it is already running.
    pub fn start(&mut self) {
        if self.running.is_some() {
            return;
        }
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_source(
            self.config.clone(),
            self.reads_tx.clone(),
            self.status.clone(),
            stop_rx,
        ));
        self.running = Some(Running { stop, task });
        info!("reader started");
    }

    /// Stops the reader task and waits for it. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        let Some(Running { stop, task }) = self.running.take() else {
            return;
        };
        let _ = stop.send(());
        if let Err(err) = task.await {
            warn!(error = ?err, "reader task ended abnormally");
        }
        self.status.send_replace(ReaderStatus::Disconnected);
        info!("reader stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Next read, or `None` if nothing arrives within `timeout`.
    pub async fn next_read(&mut self, timeout: Duration) -> Option<TagRead> {
        time::timeout(timeout, self.reads_rx.recv()).await.ok().flatten()
    }

    pub fn status(&self) -> ReaderStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ReaderStatus> {
        self.status.subscribe()
    }
}

async fn run_source(
    config: ReaderConfig,
    reads: mpsc::Sender<TagRead>,
    status: Arc<watch::Sender<ReaderStatus>>,
    mut stop: oneshot::Receiver<()>,
) {
    match config.source {
        ReaderSource::Device(path) => {
            run_device(path, config.reconnect_delay, reads, &status, &mut stop).await
        }
        ReaderSource::Mock(script) => {
            run_mock(script, config.mock_interval, reads, &status, &mut stop).await
        }
    }
}

/// Sleeps for `delay`. Returns `false` if a stop arrived first.
async fn pause(delay: Duration, stop: &mut oneshot::Receiver<()>) -> bool {
    select! {
        _ = stop => false,
        _ = time::sleep(delay) => true,
    }
}

/// Hands a read to the consumer. Returns `false` if a stop arrived first or
/// the consumer is gone; a full buffer never holds up a stop.
async fn forward(
    reads: &mpsc::Sender<TagRead>,
    read: TagRead,
    stop: &mut oneshot::Receiver<()>,
) -> bool {
    select! {
        _ = stop => false,
        sent = reads.send(read) => sent.is_ok(),
    }
}

fn set_status(status: &watch::Sender<ReaderStatus>, next: ReaderStatus) {
    status.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        info!(from = %current, to = %next, "reader status changed");
        *current = next;
        true
    });
}

async fn run_device(
    path: PathBuf,
    reconnect_delay: Duration,
    reads: mpsc::Sender<TagRead>,
    status: &watch::Sender<ReaderStatus>,
    stop: &mut oneshot::Receiver<()>,
) {
    // Bytes already consumed from a regular file, so a reopen resumes
    // instead of replaying old reads.
    let mut offset = 0u64;
    loop {
        let mut file = match File::open(&path).await {
            Ok(file) => file,
            Err(err) => {
                set_status(status, ReaderStatus::Failed(format!("cannot open {}: {err}", path.display())));
                if !pause(reconnect_delay, stop).await {
                    return;
                }
                continue;
            }
        };

        let resumable = matches!(
            file.metadata().await,
            Ok(meta) if meta.is_file() && meta.len() >= offset
        );
        if !resumable {
            offset = 0;
        }
        if offset > 0 {
            if let Err(err) = file.seek(SeekFrom::Start(offset)).await {
                set_status(status, ReaderStatus::Failed(format!("cannot seek {}: {err}", path.display())));
                if !pause(reconnect_delay, stop).await {
                    return;
                }
                continue;
            }
            debug!(path = %path.display(), offset, "resuming device");
        }

        set_status(status, ReaderStatus::Connected);
        let mut lines = BufReader::new(file);
        loop {
            let line = select! {
                _ = &mut *stop => return,
                line = read_counted_line(&mut lines, &mut offset) => line,
            };
            match line {
                Ok(Some(line)) => match TagRead::parse_device_line(&line) {
                    Ok(read) => {
                        debug!(tag = %read.tag_id, antenna = read.antenna, "tag read");
                        if !forward(&reads, read, stop).await {
                            return;
                        }
                    }
                    Err(err) => warn!("{err}"),
                },
                Ok(None) => {
                    warn!(path = %path.display(), "reader stream ended");
                    break;
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "reader connection lost");
                    break;
                }
            }
        }

        set_status(status, ReaderStatus::Disconnected);
        if !pause(reconnect_delay, stop).await {
            return;
        }
    }
}

async fn run_mock(
    script: Vec<TagRead>,
    interval: Duration,
    reads: mpsc::Sender<TagRead>,
    status: &watch::Sender<ReaderStatus>,
    stop: &mut oneshot::Receiver<()>,
) {
    set_status(status, ReaderStatus::Connected);
    for read in script {
        if !pause(interval, stop).await {
            return;
        }
        debug!(tag = %read.tag_id, antenna = read.antenna, "mock tag read");
        if !forward(&reads, read, stop).await {
            return;
        }
    }
    // Script exhausted: stay connected until stopped.
    let _ = stop.await;
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[tokio::test]
    async fn mock_emits_script_in_order() {
        let mut reader = RfidReader::new(ReaderConfig {
            source: ReaderSource::Mock(vec![TagRead::new("7", 1), TagRead::new("9", 2)]),
            mock_interval: Duration::from_millis(10),
            ..ReaderConfig::default()
        });
        assert_eq!(reader.status(), ReaderStatus::Disconnected);
        reader.start();
        reader.start();

        let wait = Duration::from_secs(1);
        assert_eq!(reader.next_read(wait).await, Some(TagRead::new("7", 1)));
        assert_eq!(reader.next_read(wait).await, Some(TagRead::new("9", 2)));
        assert_eq!(reader.next_read(Duration::from_millis(50)).await, None);
        assert_eq!(reader.status(), ReaderStatus::Connected);

        reader.stop().await;
        reader.stop().await;
        assert_eq!(reader.status(), ReaderStatus::Disconnected);
        assert!(!reader.is_running());
    }

    #[tokio::test]
    async fn device_lines_become_reads() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "E200\n\n9,2\nbad,x").expect("write device lines");
        file.flush().expect("flush");

        let mut reader = RfidReader::new(ReaderConfig {
            source: ReaderSource::Device(file.path().to_path_buf()),
            reconnect_delay: Duration::from_secs(60),
            ..ReaderConfig::default()
        });
        let mut status = reader.watch_status();
        reader.start();

        let wait = Duration::from_secs(1);
        assert_eq!(reader.next_read(wait).await, Some(TagRead::new("E200", 1)));
        assert_eq!(reader.next_read(wait).await, Some(TagRead::new("9", 2)));

        // End of stream is reported as a disconnect while waiting to retry.
        time::timeout(wait, status.wait_for(|s| *s == ReaderStatus::Disconnected))
            .await
            .expect("status change")
            .expect("status channel open");
        reader.stop().await;
    }

    #[tokio::test]
    async fn missing_device_is_a_visible_failure() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut reader = RfidReader::new(ReaderConfig {
            source: ReaderSource::Device(dir.path().join("ttyUSB9")),
            reconnect_delay: Duration::from_secs(60),
            ..ReaderConfig::default()
        });
        let mut status = reader.watch_status();
        reader.start();

        let failed = time::timeout(
            Duration::from_secs(1),
            status.wait_for(|s| matches!(s, ReaderStatus::Failed(_))),
        )
        .await
        .expect("status change")
        .expect("status channel open")
        .clone();
        assert!(failed.to_string().contains("ttyUSB9"));

        // Stop interrupts the reconnect wait.
        time::timeout(Duration::from_secs(1), reader.stop())
            .await
            .expect("stop should not wait for the reconnect delay");
    }

    #[tokio::test]
    async fn stop_returns_with_full_read_buffer() {
        let script = (1..=300).map(|n| TagRead::new(n.to_string(), 1)).collect();
        let mut reader = RfidReader::new(ReaderConfig {
            source: ReaderSource::Mock(script),
            mock_interval: Duration::ZERO,
            ..ReaderConfig::default()
        });
        reader.start();

        // Nobody drains: the task fills the buffer and blocks on the next send.
        time::sleep(Duration::from_millis(200)).await;
        time::timeout(Duration::from_secs(3), reader.stop())
            .await
            .expect("stop should not wait for buffer space");
        assert!(!reader.is_running());
        assert_eq!(reader.next_read(Duration::from_millis(50)).await, Some(TagRead::new("1", 1)));
    }

    #[tokio::test]
    async fn reconnect_resumes_after_the_last_read() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "E200\n9,2").expect("write device lines");
        file.flush().expect("flush");

        let mut reader = RfidReader::new(ReaderConfig {
            source: ReaderSource::Device(file.path().to_path_buf()),
            reconnect_delay: Duration::from_millis(20),
            ..ReaderConfig::default()
        });
        reader.start();

        let wait = Duration::from_secs(1);
        assert_eq!(reader.next_read(wait).await, Some(TagRead::new("E200", 1)));
        assert_eq!(reader.next_read(wait).await, Some(TagRead::new("9", 2)));

        // Several reopens happen here; none may replay the first two lines.
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(reader.next_read(Duration::from_millis(50)).await, None);

        writeln!(file, "11,3").expect("append device line");
        file.flush().expect("flush");
        assert_eq!(reader.next_read(wait).await, Some(TagRead::new("11", 3)));
        assert_eq!(reader.next_read(Duration::from_millis(100)).await, None);
        reader.stop().await;
    }

    #[tokio::test]
    async fn truncated_device_is_read_from_the_start() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "E200,1\nE201,1").expect("write device lines");
        file.flush().expect("flush");

        let mut reader = RfidReader::new(ReaderConfig {
            source: ReaderSource::Device(file.path().to_path_buf()),
            reconnect_delay: Duration::from_millis(20),
            ..ReaderConfig::default()
        });
        reader.start();

        let wait = Duration::from_secs(1);
        assert_eq!(reader.next_read(wait).await, Some(TagRead::new("E200", 1)));
        assert_eq!(reader.next_read(wait).await, Some(TagRead::new("E201", 1)));

        // Shorter than what was already consumed.
        std::fs::write(file.path(), "5,4\n").expect("rewrite device");
        assert_eq!(reader.next_read(wait).await, Some(TagRead::new("5", 4)));
        reader.stop().await;
    }
}
