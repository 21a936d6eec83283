//! Export side: turns hourly concentrations into index payloads and sends
//! uploads to the service.

use crate::concentrations::{self, ConcentrationError};
use crate::crypto::{self, CryptoError};
use crate::payload::{self, IndexPayload, PayloadError, Reading};
use config::{Config, ConfigError, File};
use derive_more::{Add, AddAssign, Div};
use secrecy::Secret;
use std::collections::BTreeMap;
use std::path::Path;

/// Rolling mean applied to PM10 before taking its latest value.
pub const PM10_WINDOW: usize = 24;
pub const PM10_MIN_PERIODS: usize = 18;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("cannot read site configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Concentrations(#[from] ConcentrationError),
    #[error("no index threshold for pollutant '{0}'")]
    UnknownPollutant(String),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Copy, Clone, PartialEq, PartialOrd, Add, AddAssign, Div)]
pub struct Concentration(pub f64);

/// Regulatory thresholds (µg/m³) the index is relative to.
#[derive(Debug, Clone)]
pub struct Thresholds(BTreeMap<String, f64>);

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds(
            [("NO2", 200.0), ("PM10", 50.0), ("O3", 180.0)]
                .into_iter()
                .map(|(pollutant, limit)| (pollutant.to_string(), limit))
                .collect(),
        )
    }
}

impl Thresholds {
    /// Index on the 0-1 scale of the `iqa` scheme.
    pub fn index(&self, pollutant: &str, value: Concentration) -> Result<f64, ExportError> {
        let limit = self
            .0
            .get(pollutant)
            .ok_or_else(|| ExportError::UnknownPollutant(pollutant.to_string()))?;

        Ok(value.0 / limit)
    }
}

/// `{zone: {typology: {pollutant: "measure1, measure2"}}}`
pub type SiteConfig = BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>;

pub fn load_sites(path: &Path) -> Result<SiteConfig, ExportError> {
    let config = Config::builder()
        .add_source(File::from(path).required(true))
        .build()?;

    Ok(config.try_deserialize()?)
}

/// Pollutant codes are upper case whatever the configuration source did to
/// its keys.
fn pollutant_code(pollutant: &str) -> String {
    pollutant.trim().to_uppercase()
}

fn measure_names(list: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Row-wise mean of the columns; rows with any gap are dropped.
pub fn combine(columns: &[&Vec<Option<f64>>]) -> Vec<Concentration> {
    let rows = columns.iter().map(|c| c.len()).min().unwrap_or(0);
    if columns.is_empty() {
        return Vec::new();
    }

    (0..rows)
        .filter_map(|row| {
            let mut sum = Concentration(0.0);
            for column in columns {
                sum += Concentration(column[row]?);
            }
            Some(sum / columns.len() as f64)
        })
        .collect()
}

/// Mean over the trailing `window` values, kept once at least
/// `min_periods` values are available.
pub fn rolling_mean(series: &[Concentration], window: usize, min_periods: usize) -> Vec<Concentration> {
    (0..series.len())
        .filter_map(|end| {
            let start = (end + 1).saturating_sub(window);
            let values = &series[start..=end];
            if values.len() < min_periods.max(1) {
                return None;
            }
            let sum = values.iter().fold(Concentration(0.0), |acc, &v| acc + v);
            Some(sum / values.len() as f64)
        })
        .collect()
}

/// `[value, index]` of the most recent value, or `[null, null]`.
pub fn latest_reading(
    pollutant: &str,
    series: &[Concentration],
    thresholds: &Thresholds,
) -> Result<Reading, ExportError> {
    match series.last() {
        Some(&value) => Ok(Reading(Some(value.0), Some(thresholds.index(pollutant, value)?))),
        None => Ok(Reading(None, None)),
    }
}

/// Builds the index payload of every configured site from CSV
/// concentrations (`dh` index plus one column per measure).
pub fn build_payload(
    sites: &SiteConfig,
    contents: &str,
    thresholds: &Thresholds,
) -> Result<IndexPayload, ExportError> {
    let mut payload = IndexPayload::new();

    for (zone, typologies) in sites {
        for (typology, pollutants) in typologies {
            for (pollutant, measures) in pollutants {
                let pollutant = pollutant_code(pollutant);
                let measures = measure_names(measures);
                let extract = concentrations::extract(contents, &measures)?;
                let columns: Vec<_> = extract.data.values().collect();

                let mut series = combine(&columns);
                log::debug!("get mesures of {:?}: found {} hourly data", measures, series.len());
                if pollutant == "PM10" {
                    series = rolling_mean(&series, PM10_WINDOW, PM10_MIN_PERIODS);
                    log::debug!("PM10: apply 24h rolling mean...");
                }

                let reading = latest_reading(&pollutant, &series, thresholds)?;
                match reading {
                    Reading(Some(value), Some(index)) => {
                        log::info!("{} {} {}: {:.0} ({:.2})", zone, typology, pollutant, value, index)
                    }
                    _ => log::warn!("{} {} {}: no data for these mesures", zone, typology, pollutant),
                }

                payload
                    .entry(zone.clone())
                    .or_default()
                    .entry(typology.clone())
                    .or_default()
                    .insert(pollutant, reading);
            }
        }
    }

    Ok(payload)
}

async fn post_form(client: &reqwest::Client, url: &str, data: String) -> Result<String, ExportError> {
    log::debug!("send data to {} ...", url);
    let response = client.post(url).form(&[("data", data)]).send().await?;
    let status = response.status();
    let body = response.text().await?;
    log::debug!("status_code: {}", status);
    log::debug!("content:\n{}", body);

    if !status.is_success() {
        return Err(ExportError::Rejected {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

/// Posts index readings to `<host>/post/iqa/<region>`.
pub async fn send_indices(
    client: &reqwest::Client,
    host: &str,
    region: &str,
    payload: &IndexPayload,
) -> Result<String, ExportError> {
    let url = format!("{}/post/iqa/{}", host.trim_end_matches('/'), region);
    post_form(client, &url, payload::encode_json(payload)?).await
}

/// Encrypts CSV concentrations and posts them to `<host>/post/conc/<region>`.
pub async fn send_concentrations(
    client: &reqwest::Client,
    host: &str,
    region: &str,
    key: Secret<String>,
    contents: Vec<u8>,
) -> Result<String, ExportError> {
    let sealed = tokio::task::spawn_blocking(move || crypto::encrypt(&key, &contents))
        .await??;
    let url = format!("{}/post/conc/{}", host.trim_end_matches('/'), region);

    post_form(client, &url, payload::encode_base64(&sealed)).await
}
