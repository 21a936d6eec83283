//! Inbound index payloads.
//!
//! Bodies are url-encoded forms whose `data` field is base64 encoded JSON
//! (or, for concentrations, base64 encoded ciphertext).

use crate::domain::MeasurementRecord;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("data is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("data is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid {field} '{name}'")]
    InvalidName { field: &'static str, name: String },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataForm {
    pub data: String,
}

/// `[value, index]`; either side is null when the exporter found no data.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Reading(pub Option<f64>, pub Option<f64>);

/// `{zone: {typology: {pollutant: [value, index]}}}`
pub type IndexPayload = BTreeMap<String, BTreeMap<String, BTreeMap<String, Reading>>>;

/// `{zone: {typology: index}}`
pub type SimpleIndexPayload = BTreeMap<String, BTreeMap<String, f64>>;

/// Records decoded from a payload, plus the readings that carried nulls.
#[derive(Debug, Default, PartialEq)]
pub struct Ingest {
    pub records: Vec<MeasurementRecord>,
    pub skipped: usize,
}

pub fn decode_base64(data: &str) -> Result<Vec<u8>, PayloadError> {
    // Encoders may wrap lines, and a '+' posted without percent-encoding
    // arrives as a space.
    let compact: String = data
        .chars()
        .filter(|c| !matches!(c, '\r' | '\n' | '\t'))
        .map(|c| if c == ' ' { '+' } else { c })
        .collect();

    Ok(BASE64.decode(compact)?)
}

pub fn encode_base64(data: &[u8]) -> String {
    BASE64.encode(data)
}

fn check_site_name(field: &'static str, name: &str) -> Result<(), PayloadError> {
    if name.trim().is_empty() || name.contains('-') || name.contains(',') {
        return Err(PayloadError::InvalidName {
            field,
            name: name.to_string(),
        });
    }
    Ok(())
}

pub fn decode_index_payload(data: &str) -> Result<Ingest, PayloadError> {
    let payload: IndexPayload = serde_json::from_slice(&decode_base64(data)?)?;
    let mut ingest = Ingest::default();

    for (zone, typologies) in payload {
        check_site_name("zone", &zone)?;
        for (typology, pollutants) in typologies {
            check_site_name("typology", &typology)?;
            for (pollutant, reading) in pollutants {
                if pollutant.trim().is_empty() {
                    return Err(PayloadError::InvalidName {
                        field: "pollutant",
                        name: pollutant,
                    });
                }
                match reading {
                    Reading(Some(value), Some(index)) => ingest.records.push(MeasurementRecord {
                        zone: zone.clone(),
                        typology: typology.clone(),
                        pollutant: Some(pollutant),
                        value,
                        index,
                    }),
                    _ => {
                        log::debug!("no data for {}-{} {}, skipping", zone, typology, pollutant);
                        ingest.skipped += 1;
                    }
                }
            }
        }
    }

    Ok(ingest)
}

pub fn decode_simple_payload(data: &str) -> Result<Ingest, PayloadError> {
    let payload: SimpleIndexPayload = serde_json::from_slice(&decode_base64(data)?)?;
    let mut ingest = Ingest::default();

    for (zone, typologies) in payload {
        check_site_name("zone", &zone)?;
        for (typology, index) in typologies {
            check_site_name("typology", &typology)?;
            ingest.records.push(MeasurementRecord {
                zone: zone.clone(),
                typology,
                pollutant: None,
                value: index,
                index,
            });
        }
    }

    Ok(ingest)
}

/// Encodes a payload the way the service expects to find it in `data`.
pub fn encode_json<T: Serialize>(payload: &T) -> Result<String, PayloadError> {
    Ok(encode_base64(&serde_json::to_vec(payload)?))
}
