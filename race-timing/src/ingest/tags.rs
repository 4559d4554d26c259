use std::collections::HashMap;
use std::io::Read;

use crate::athlete::AthleteId;
use crate::error::{ImportError, RaceError};

/// Maps an RFID tag to the athlete wearing it.
pub trait TagResolver: Send + Sync {
    fn resolve(&self, tag: &str) -> Result<AthleteId, RaceError>;
}

fn unknown(tag: &str) -> RaceError {
    RaceError::AthleteNotFound {
        reference: format!("tag \"{tag}\""),
    }
}

/// Tags that carry the athlete number directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct NumericTags;

impl TagResolver for NumericTags {
    fn resolve(&self, tag: &str) -> Result<AthleteId, RaceError> {
        tag.parse::<AthleteId>().map_err(|_| unknown(tag))
    }
}

/// Explicit tag to number mapping, falling back to numeric tags.
#[derive(Debug, Default, Clone)]
pub struct TagTable {
    entries: HashMap<String, u32>,
}

impl TagTable {
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(tag, num)| (tag.into().trim().to_string(), num))
                .collect(),
        }
    }

    /// Loads a `tag,num` CSV with a header row.
    pub fn from_csv<R: Read>(reader: R) -> Result<Self, ImportError> {
        let mut csv = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = csv
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_lowercase())
            .collect();
        let position = |name: &str| headers.iter().position(|h| h == name);
        let (Some(tag_col), Some(num_col)) = (position("tag"), position("num")) else {
            let missing = ["tag", "num"]
                .into_iter()
                .filter(|&name| position(name).is_none())
                .map(String::from)
                .collect();
            return Err(ImportError::InvalidHeader { missing });
        };

        let mut entries = HashMap::new();
        for (index, record) in csv.records().enumerate() {
            let record = record?;
            let tag = record.get(tag_col).unwrap_or_default();
            let num = record.get(num_col).and_then(|raw| raw.parse::<u32>().ok());
            match num {
                Some(num) if !tag.is_empty() && num > 0 => {
                    entries.insert(tag.to_string(), num);
                }
                _ => tracing::warn!(line = index + 2, "skipping unusable tag mapping row"),
            }
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TagResolver for TagTable {
    fn resolve(&self, tag: &str) -> Result<AthleteId, RaceError> {
        match self.entries.get(tag.trim()) {
            Some(num) => Ok(AthleteId(*num)),
            None => NumericTags.resolve(tag),
        }
    }
}
