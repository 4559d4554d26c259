use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::reader::{ReaderConfig, ReaderSource};
use crate::reading::{DeviceLineError, TagRead};

/// Device value that switches the bridge to scripted reads.
pub const MOCK_DEVICE: &str = "mock";

#[derive(Parser, Debug)]
#[command(author, version, about = "Forward RFID tag reads to TCP clients", long_about = None)]
pub struct Cli {
    /// Reader device path, or `mock` to emit the `--mock-tag` reads.
    #[arg(long, default_value = "/dev/ttyUSB0")]
    pub device: String,

    /// Socket address clients connect to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "0.0.0.0:9999")]
    pub listen: SocketAddr,

    /// Scripted read for mock mode, as `tag` or `tag,antenna`. Repeatable.
    #[arg(long = "mock-tag")]
    pub mock_tags: Vec<String>,

    /// Seconds to wait before reopening a failed device.
    #[arg(long, default_value_t = 5)]
    pub reconnect_secs: u64,

    /// Milliseconds between scripted reads in mock mode.
    #[arg(long, default_value_t = 1000)]
    pub mock_interval_ms: u64,
}

impl Cli {
    pub fn reader_config(&self) -> Result<ReaderConfig, DeviceLineError> {
        let source = if self.device.eq_ignore_ascii_case(MOCK_DEVICE) {
            let reads = self
                .mock_tags
                .iter()
                .map(|raw| TagRead::parse_device_line(raw))
                .collect::<Result<Vec<_>, _>>()?;
            ReaderSource::Mock(reads)
        } else {
            ReaderSource::Device(PathBuf::from(&self.device))
        };

        Ok(ReaderConfig {
            source,
            reconnect_delay: Duration::from_secs(self.reconnect_secs),
            mock_interval: Duration::from_millis(self.mock_interval_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_the_serial_device() {
        let cli = Cli::try_parse_from(["rfid-bridge"]).unwrap();
        assert_eq!(cli.listen, "0.0.0.0:9999".parse::<SocketAddr>().unwrap());
        let config = cli.reader_config().unwrap();
        assert_eq!(config.source, ReaderSource::Device(PathBuf::from("/dev/ttyUSB0")));
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
    }

    #[test]
    fn mock_mode_parses_scripted_tags() {
        let cli = Cli::try_parse_from([
            "rfid-bridge",
            "--device",
            "mock",
            "--mock-tag",
            "7,1",
            "--mock-tag",
            "E200",
            "--mock-interval-ms",
            "50",
        ])
        .unwrap();
        let config = cli.reader_config().unwrap();
        assert_eq!(
            config.source,
            ReaderSource::Mock(vec![TagRead::new("7", 1), TagRead::new("E200", 1)])
        );
        assert_eq!(config.mock_interval, Duration::from_millis(50));
    }

    #[test]
    fn bad_mock_tag_is_rejected() {
        let cli =
            Cli::try_parse_from(["rfid-bridge", "--device", "mock", "--mock-tag", "7,x"]).unwrap();
        assert!(matches!(cli.reader_config(), Err(DeviceLineError::Antenna(_))));
    }
}
