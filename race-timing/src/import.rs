//! Batch import of athletes from a CSV file.
//!
//! One bad row never aborts the batch: every row is validated on its own and
//! the report carries both the accepted athletes and the per-row errors.
//! Only a broken header or an unreadable file fails the whole import.

use std::collections::HashSet;
use std::fmt;
use std::io::Read;

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, Trim};
use tracing::{debug, warn};

use crate::athlete::{Athlete, AthleteDraft};
use crate::error::{ImportError, ValidationError};

pub const REQUIRED_COLUMNS: [&str; 5] = ["num", "nome", "sexo", "data_nascimento", "modalidade"];
pub const CATEGORY_COLUMN: &str = "categoria";

/// A rejected data row. `line` is 1-based with the header on line 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    pub line: u64,
    pub num: Option<String>,
    pub error: ValidationError,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.num {
            Some(num) => write!(f, "line {}: athlete #{num} - {}", self.line, self.error),
            None => write!(f, "line {}: {}", self.line, self.error),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub athletes: Vec<Athlete>,
    pub errors: Vec<RowError>,
}

impl ImportReport {
    pub fn loaded(&self) -> usize {
        self.athletes.len()
    }
}

struct Columns {
    num: usize,
    name: usize,
    sex: usize,
    birth_date: usize,
    modality: usize,
    category: Option<usize>,
}

impl Columns {
    fn locate(headers: &StringRecord) -> Result<Self, ImportError> {
        let names: Vec<String> = headers
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_lowercase())
            .collect();
        let find = |column: &str| names.iter().position(|name| name == column);

        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|&&column| find(column).is_none())
            .map(|column| column.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ImportError::InvalidHeader { missing });
        }

        let required = |column: &str| find(column).ok_or_else(|| ImportError::InvalidHeader {
            missing: vec![column.to_string()],
        });
        Ok(Self {
            num: required("num")?,
            name: required("nome")?,
            sex: required("sexo")?,
            birth_date: required("data_nascimento")?,
            modality: required("modalidade")?,
            category: find(CATEGORY_COLUMN),
        })
    }

    fn draft(&self, record: &StringRecord) -> AthleteDraft {
        let field = |index: usize| record.get(index).unwrap_or_default().to_string();
        AthleteDraft {
            num: field(self.num),
            name: field(self.name),
            sex: field(self.sex),
            birth_date: field(self.birth_date),
            modality: field(self.modality),
            category: self.category.and_then(|index| record.get(index)).map(str::to_string),
        }
    }
}

/// Reads and validates every athlete row from `reader`.
pub fn read_athletes<R: Read>(reader: R, event_date: NaiveDate) -> Result<ImportReport, ImportError> {
    let mut csv = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);
    let columns = Columns::locate(csv.headers()?)?;

    let mut report = ImportReport::default();
    let mut seen = HashSet::new();

    for (index, record) in csv.records().enumerate() {
        let record = record?;
        // Blank lines are skipped by the reader, so trust its position.
        let line = record
            .position()
            .map(|position| position.line())
            .unwrap_or(index as u64 + 2);
        if record.iter().all(str::is_empty) {
            continue;
        }

        let draft = columns.draft(&record);
        let validated = Athlete::validate(&draft, event_date).and_then(|athlete| {
            if seen.insert(athlete.num) {
                Ok(athlete)
            } else {
                Err(ValidationError::DuplicateNumber(athlete.num))
            }
        });

        match validated {
            Ok(athlete) => report.athletes.push(athlete),
            Err(error) => {
                let num = Some(draft.num.trim().to_string()).filter(|num| !num.is_empty());
                let row = RowError { line, num, error };
                warn!("{row}");
                report.errors.push(row);
            }
        }
    }

    debug!(loaded = report.athletes.len(), rejected = report.errors.len(), "csv import parsed");
    Ok(report)
}
