use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use rfid_bridge::{
    reader::{ReaderConfig, ReaderSource, RfidReader},
    reading::{TagRead, read_line},
    server::BridgeServer,
};
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
    sync::oneshot,
    time::timeout,
};

const STEP: Duration = Duration::from_secs(5);

fn scripted_reader(reads: Vec<TagRead>) -> RfidReader {
    RfidReader::new(ReaderConfig {
        source: ReaderSource::Mock(reads),
        reconnect_delay: Duration::from_millis(50),
        mock_interval: Duration::from_millis(200),
    })
}

async fn next_line(reader: &mut BufReader<TcpStream>) -> Result<String> {
    let line = timeout(STEP, read_line(reader)).await??;
    line.ok_or_else(|| anyhow::anyhow!("bridge closed the connection"))
}

#[tokio::test]
async fn every_client_receives_every_read() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let server = BridgeServer::new(listener);
    let addr = server.local_addr()?;
    let publisher = server.publisher();

    // Connections wait in the backlog until the server loop accepts them,
    // well before the first scripted read is due.
    let mut first = BufReader::new(TcpStream::connect(addr).await?);
    let mut second = BufReader::new(TcpStream::connect(addr).await?);

    let reader = scripted_reader(vec![TagRead::new("7", 1), TagRead::new("9", 2)]);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server_task = tokio::spawn(async move {
        server
            .run_until(reader, async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    for client in [&mut first, &mut second] {
        assert_eq!(next_line(client).await?, "7,1");
        assert_eq!(next_line(client).await?, "9,2");
    }

    assert_eq!(
        publisher.antenna_counts().await,
        BTreeMap::from([(1, 1), (2, 1)])
    );

    let _ = shutdown_tx.send(());
    timeout(STEP, server_task).await???;
    Ok(())
}

#[tokio::test]
async fn disconnected_client_does_not_stop_the_others() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let server = BridgeServer::new(listener);
    let addr = server.local_addr()?;
    let publisher = server.publisher();

    let leaver = TcpStream::connect(addr).await?;
    let mut stayer = BufReader::new(TcpStream::connect(addr).await?);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server_task = tokio::spawn(async move {
        server
            .run_until(scripted_reader(Vec::new()), async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    timeout(STEP, async {
        while publisher.client_count() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    drop(leaver);
    timeout(STEP, async {
        while publisher.client_count() > 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    publisher.publish(TagRead::new("E200", 3)).await;
    assert_eq!(next_line(&mut stayer).await?, "E200,3");

    let _ = shutdown_tx.send(());
    timeout(STEP, server_task).await???;
    Ok(())
}
