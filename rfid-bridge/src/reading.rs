use std::fmt;
use std::io;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Antenna reported when the device line does not name one.
pub const DEFAULT_ANTENNA: u32 = 1;

/// One tag seen by the reader.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagRead {
    pub tag_id: String,
    pub antenna: u32,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceLineError {
    #[error("empty tag in device line {0:?}")]
    EmptyTag(String),

    #[error("invalid antenna in device line {0:?}")]
    Antenna(String),

    #[error("too many fields in device line {0:?}")]
    TooManyFields(String),
}

impl TagRead {
    pub fn new(tag_id: impl Into<String>, antenna: u32) -> Self {
        Self {
            tag_id: tag_id.into(),
            antenna,
        }
    }

    /// Wire form sent to clients: `tag_id,antenna\n`.
    pub fn encode(&self) -> String {
        format!("{self}\n")
    }

    /// Parses a line produced by the reader device: `tag` or `tag,antenna`.
    pub fn parse_device_line(line: &str) -> Result<Self, DeviceLineError> {
        let trimmed = line.trim_matches(LINE_ENDINGS).trim();
        let mut fields = trimmed.split(',').map(str::trim);
        let tag = fields.next().unwrap_or_default();
        if tag.is_empty() {
            return Err(DeviceLineError::EmptyTag(trimmed.to_string()));
        }
        let antenna = match fields.next() {
            None => DEFAULT_ANTENNA,
            Some(raw) => match raw.parse::<u32>() {
                Ok(antenna) if antenna > 0 => antenna,
                _ => return Err(DeviceLineError::Antenna(trimmed.to_string())),
            },
        };
        if fields.next().is_some() {
            return Err(DeviceLineError::TooManyFields(trimmed.to_string()));
        }
        Ok(Self::new(tag, antenna))
    }
}

impl fmt::Display for TagRead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.tag_id, self.antenna)
    }
}

/// Reads the next non-blank line, without its line ending.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    read_counted_line(reader, &mut 0).await
}

/// Like [`read_line`], adding every byte consumed (blank lines included)
/// to `consumed`.
pub async fn read_counted_line<R>(reader: &mut R, consumed: &mut u64) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }
        *consumed += bytes as u64;

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.trim().is_empty() {
            continue;
        }
        return Ok(Some(trimmed.to_string()));
    }
}

pub async fn write_read<W>(writer: &mut W, read: &TagRead) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(read.encode().as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
