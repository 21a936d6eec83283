use derive_more::Display;
use percent_encoding::percent_decode_str;
use serde::Serialize;
use std::str::FromStr;

/// Name of a region: selects a record collection and a concentration file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub struct Region(String);

impl Region {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid region name '{0}'")]
pub struct InvalidRegion(String);

impl FromStr for Region {
    type Err = InvalidRegion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = !s.is_empty()
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

        if valid {
            Ok(Region(s.to_string()))
        } else {
            Err(InvalidRegion(s.to_string()))
        }
    }
}

/// A monitoring site: zone plus station typology (urban, traffic, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display)]
#[display(fmt = "{}-{}", zone, typology)]
pub struct Site {
    pub zone: String,
    pub typology: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid site token '{0}': expected 'zone-typology'")]
pub struct InvalidSite(String);

impl FromStr for Site {
    type Err = InvalidSite;

    /// Parses a `zone-typology` lookup token.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidSite(s.to_string());
        let (zone, typology) = s.trim().split_once('-').ok_or_else(invalid)?;
        let (zone, typology) = (zone.trim(), typology.trim());

        if zone.is_empty() || typology.is_empty() || typology.contains('-') {
            return Err(invalid());
        }

        Ok(Site {
            zone: zone.to_string(),
            typology: typology.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("path segment '{0}' is not valid utf-8 once decoded")]
pub struct InvalidSegment(String);

/// Percent-decodes a path segment, so `saint%20louis` names `saint louis`.
pub fn decode_segment(segment: &str) -> Result<String, InvalidSegment> {
    percent_decode_str(segment)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| InvalidSegment(segment.to_string()))
}

/// Identity of a record inside a region. Records from the simplified
/// ingestion have no pollutant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub zone: String,
    pub typology: String,
    pub pollutant: Option<String>,
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.pollutant {
            Some(pollutant) => write!(f, "zone={} typo={} pol={}", self.zone, self.typology, pollutant),
            None => write!(f, "zone={} typo={}", self.zone, self.typology),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementRecord {
    pub zone: String,
    pub typology: String,
    pub pollutant: Option<String>,
    pub value: f64,
    pub index: f64,
}

impl MeasurementRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            zone: self.zone.clone(),
            typology: self.typology.clone(),
            pollutant: self.pollutant.clone(),
        }
    }
}

/// Row layout of the `records` table. The simplified ingestion stores an
/// empty pollutant.
#[derive(Debug, sqlx::FromRow)]
pub struct RecordRow {
    pub zone: String,
    pub typology: String,
    pub pollutant: String,
    pub value: f64,
    pub iqa: f64,
}

impl From<RecordRow> for MeasurementRecord {
    fn from(row: RecordRow) -> Self {
        MeasurementRecord {
            zone: row.zone,
            typology: row.typology,
            pollutant: Some(row.pollutant).filter(|p| !p.is_empty()),
            value: row.value,
            index: row.iqa,
        }
    }
}
