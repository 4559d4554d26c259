//! Athlete records and their validation.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{RaceError, ValidationError};

/// Category assigned when the source leaves it blank.
pub const DEFAULT_CATEGORY: &str = "GERAL";

const BIRTH_DATE_FORMAT: &str = "%d/%m/%Y";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Sex {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
}

impl Sex {
    pub fn code(self) -> &'static str {
        match self {
            Sex::Male => "M",
            Sex::Female => "F",
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Sex {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "M" => Ok(Sex::Male),
            "F" => Ok(Sex::Female),
            _ => Err(ValidationError::InvalidSex(s.to_string())),
        }
    }
}

/// Athlete number as typed by an operator or resolved from a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AthleteId(pub u32);

impl FromStr for AthleteId {
    type Err = RaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().parse::<u32>() {
            Ok(num) if num > 0 => Ok(AthleteId(num)),
            _ => Err(RaceError::InvalidInput(format!(
                "'{}' is not a valid athlete number",
                s.trim()
            ))),
        }
    }
}

impl fmt::Display for AthleteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A recorded finish. Both fields are written together, exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arrival {
    pub at: NaiveDateTime,
    pub net_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Athlete {
    pub num: u32,
    pub name: String,
    pub sex: Sex,
    pub birth_date: NaiveDate,
    pub age: u32,
    pub category: String,
    pub modality: String,
    pub arrival: Option<Arrival>,
}

/// Unvalidated athlete fields, as read from a CSV row or an edit form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AthleteDraft {
    pub num: String,
    pub name: String,
    pub sex: String,
    pub birth_date: String,
    pub modality: String,
    pub category: Option<String>,
}

impl From<&Athlete> for AthleteDraft {
    fn from(athlete: &Athlete) -> Self {
        Self {
            num: athlete.num.to_string(),
            name: athlete.name.clone(),
            sex: athlete.sex.code().to_string(),
            birth_date: athlete.birth_date.format(BIRTH_DATE_FORMAT).to_string(),
            modality: athlete.modality.clone(),
            category: Some(athlete.category.clone()),
        }
    }
}

/// Editable athlete field, as named on the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AthleteField {
    Name,
    Sex,
    BirthDate,
    Category,
    Modality,
}

impl FromStr for AthleteField {
    type Err = RaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "nome" | "name" => Ok(AthleteField::Name),
            "sexo" | "sex" => Ok(AthleteField::Sex),
            "nascimento" | "data_nascimento" | "birth" => Ok(AthleteField::BirthDate),
            "categoria" | "category" => Ok(AthleteField::Category),
            "modalidade" | "modality" => Ok(AthleteField::Modality),
            other => Err(RaceError::InvalidInput(format!(
                "unknown field '{other}', use nome, sexo, nascimento, categoria or modalidade"
            ))),
        }
    }
}

impl AthleteDraft {
    pub fn set(&mut self, field: AthleteField, value: &str) {
        let value = value.to_string();
        match field {
            AthleteField::Name => self.name = value,
            AthleteField::Sex => self.sex = value,
            AthleteField::BirthDate => self.birth_date = value,
            AthleteField::Category => self.category = Some(value),
            AthleteField::Modality => self.modality = value,
        }
    }
}

impl Athlete {
    /// Validates a draft against the event date, normalising the category
    /// and deriving the age.
    pub fn validate(draft: &AthleteDraft, event_date: NaiveDate) -> Result<Self, ValidationError> {
        let num = parse_number(&draft.num)?;
        let name = required(&draft.name, "nome")?;
        let sex = draft.sex.parse::<Sex>()?;
        let birth_text = required(&draft.birth_date, "data_nascimento")?;
        let modality = required(&draft.modality, "modalidade")?;
        let category = normalize_category(draft.category.as_deref());

        let birth_date = NaiveDate::parse_from_str(&birth_text, BIRTH_DATE_FORMAT)
            .map_err(|_| ValidationError::InvalidBirthDate(birth_text.clone()))?;
        let age = age_on(birth_date, event_date).ok_or_else(|| ValidationError::BornAfterEvent {
            birth: birth_text.clone(),
            event: event_date.format(BIRTH_DATE_FORMAT).to_string(),
        })?;

        Ok(Self {
            num,
            name,
            sex,
            birth_date,
            age,
            category,
            modality,
            arrival: None,
        })
    }

    pub fn has_finished(&self) -> bool {
        self.arrival.is_some()
    }

    pub fn net_seconds(&self) -> Option<f64> {
        self.arrival.as_ref().map(|arrival| arrival.net_seconds)
    }

    pub fn is_pcd(&self) -> bool {
        self.category.eq_ignore_ascii_case("PCD")
    }
}

fn parse_number(raw: &str) -> Result<u32, ValidationError> {
    match raw.trim().parse::<u32>() {
        Ok(num) if num > 0 => Ok(num),
        _ => Err(ValidationError::InvalidNumber(raw.trim().to_string())),
    }
}

fn required(raw: &str, field: &'static str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    Ok(trimmed.to_string())
}

pub fn normalize_category(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(category) if !category.is_empty() => category.to_uppercase(),
        _ => DEFAULT_CATEGORY.to_string(),
    }
}

/// Full years elapsed between `birth` and `on`, or `None` if `birth` is later.
pub fn age_on(birth: NaiveDate, on: NaiveDate) -> Option<u32> {
    if birth > on {
        return None;
    }
    let mut years = on.year() - birth.year();
    if (on.month(), on.day()) < (birth.month(), birth.day()) {
        years -= 1;
    }
    u32::try_from(years).ok()
}
