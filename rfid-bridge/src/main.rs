use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use rfid_bridge::{cli::Cli, reader::RfidReader, server::BridgeServer};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let reader = RfidReader::new(cli.reader_config()?);
    let listener = TcpListener::bind(cli.listen).await?;
    let server = BridgeServer::new(listener);
    let addr = server.local_addr()?;
    info!(device = %cli.device, "bridge listening on {}", addr);

    if let Err(err) = server.run_until_ctrl_c(reader).await {
        warn!("bridge exited with error: {err:?}");
        return Err(err);
    }
    Ok(())
}
