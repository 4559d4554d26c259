use std::{
    collections::BTreeMap,
    future::Future,
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use anyhow::Result;
use tokio::{
    io::AsyncReadExt,
    net::{TcpListener, TcpStream, tcp::OwnedReadHalf},
    select,
    sync::{Mutex, broadcast},
};
use tracing::{debug, info, warn};

use crate::reader::RfidReader;
use crate::reading::{TagRead, write_read};

/// How long the server waits on the reader before re-checking other events.
const READ_POLL: Duration = Duration::from_millis(500);

/// Accepts TCP clients and forwards every tag read to all of them.
pub struct BridgeServer {
    listener: TcpListener,
    state: Arc<BridgeState>,
}

impl BridgeServer {
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            state: Arc::new(BridgeState::new()),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle for publishing reads and inspecting counters from outside.
    pub fn publisher(&self) -> Publisher {
        Publisher {
            state: Arc::clone(&self.state),
        }
    }

    /// Starts `reader`, serves clients and forwards reads until `shutdown`.
    pub async fn run_until<F>(self, mut reader: RfidReader, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let BridgeServer { listener, state } = self;
        tokio::pin!(shutdown);
        reader.start();

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("bridge shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state);
                }
                read = reader.next_read(READ_POLL) => {
                    if let Some(read) = read {
                        state.publish(read).await;
                    }
                }
            }
        }

        reader.stop().await;
        Ok(())
    }

    pub async fn run_until_ctrl_c(self, reader: RfidReader) -> Result<()> {
        self.run_until(reader, async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

#[derive(Clone)]
pub struct Publisher {
    state: Arc<BridgeState>,
}

impl Publisher {
    pub async fn publish(&self, read: TagRead) {
        self.state.publish(read).await;
    }

    /// Reads seen so far, per antenna.
    pub async fn antenna_counts(&self) -> BTreeMap<u32, u64> {
        self.state.antenna_counts.lock().await.clone()
    }

    pub fn client_count(&self) -> usize {
        self.state.broadcaster.receiver_count()
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<BridgeState>,
) {
    match result {
        Ok((stream, peer)) => spawn_client_handler(stream, peer, state),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_client_handler(stream: TcpStream, peer: SocketAddr, state: &Arc<BridgeState>) {
    // Subscribe before spawning so no read published after accept is missed.
    let inbox = state.subscribe();
    info!(peer = %peer, clients = state.broadcaster.receiver_count(), "client connected");
    tokio::spawn(async move {
        match serve_client(stream, inbox).await {
            Ok(()) => info!(peer = %peer, "client disconnected"),
            Err(err) => warn!(peer = %peer, error = ?err, "client dropped"),
        }
    });
}

struct BridgeState {
    broadcaster: broadcast::Sender<TagRead>,
    antenna_counts: Mutex<BTreeMap<u32, u64>>,
}

impl BridgeState {
    fn new() -> Self {
        // Slow clients that fall this far behind skip reads rather than stall the bridge.
        let (broadcaster, _) = broadcast::channel(1024);
        Self {
            broadcaster,
            antenna_counts: Mutex::new(BTreeMap::new()),
        }
    }

    async fn publish(&self, read: TagRead) {
        let total = {
            let mut counts = self.antenna_counts.lock().await;
            let count = counts.entry(read.antenna).or_insert(0);
            *count += 1;
            *count
        };
        info!(tag = %read.tag_id, antenna = read.antenna, total, "tag read");
        if self.broadcaster.send(read).is_err() {
            debug!("no clients connected, read not forwarded");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<TagRead> {
        self.broadcaster.subscribe()
    }
}

async fn serve_client(stream: TcpStream, mut inbox: broadcast::Receiver<TagRead>) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    loop {
        select! {
            closed = wait_for_close(&mut reader) => {
                closed?;
                return Ok(());
            }
            message = inbox.recv() => match message {
                Ok(read) => write_read(&mut writer, &read).await?,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "client lagging behind, reads skipped");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
        }
    }
}

/// Clients have nothing to say; anything they send is discarded until EOF.
async fn wait_for_close(reader: &mut OwnedReadHalf) -> std::io::Result<()> {
    let mut buf = [0u8; 256];
    loop {
        if reader.read(&mut buf).await? == 0 {
            return Ok(());
        }
    }
}
