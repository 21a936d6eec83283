//! HTTP endpoints.

use crate::classify::{Classifier, Rgb};
use crate::concentrations::{self, Extract};
use crate::crypto;
use crate::domain::{decode_segment, MeasurementRecord, RecordKey, Region, Site};
use crate::error::{handle_rejection, ApiError};
use crate::payload::{self, DataForm, Ingest};
use crate::store::{RecordStore, Upsert};
use secrecy::Secret;
use serde::Serialize;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use warp::{Filter, Rejection, Reply};

/// Scheme used to color the indices served by `/get/iqa`.
pub const DISPLAY_SCHEME: &str = "iqa";

pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub classifier: Classifier,
    pub data_dir: PathBuf,
    pub key: Secret<String>,
}

pub type SharedState = Arc<AppState>;

fn with_state(state: SharedState) -> impl Filter<Extract = (SharedState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn data_form(limit: u64) -> impl Filter<Extract = (DataForm,), Error = Rejection> + Clone {
    warp::body::content_length_limit(limit).and(warp::body::form())
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.trim().split(',').map(str::trim).filter(|s| !s.is_empty())
}

#[derive(Serialize)]
struct Status {
    status: &'static str,
    version: &'static str,
}

fn index() -> impl Reply {
    warp::reply::json(&Status {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Serialize, PartialEq)]
pub struct IngestSummary {
    pub status: &'static str,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

async fn store_records(state: &AppState, region: &Region, ingest: Ingest) -> Result<IngestSummary, ApiError> {
    let mut summary = IngestSummary {
        status: "ok",
        inserted: 0,
        updated: 0,
        skipped: ingest.skipped,
    };

    for record in &ingest.records {
        match state.store.upsert(region, record).await? {
            Upsert::Inserted => summary.inserted += 1,
            Upsert::Updated => summary.updated += 1,
        }
    }

    log::info!(
        "{}: {} inserted, {} updated, {} skipped",
        region,
        summary.inserted,
        summary.updated,
        summary.skipped
    );
    Ok(summary)
}

async fn post_iqa(region: Region, form: DataForm, state: SharedState) -> Result<impl Reply, Rejection> {
    let ingest = payload::decode_index_payload(&form.data).map_err(ApiError::from)?;
    let summary = store_records(&state, &region, ingest).await?;

    Ok(warp::reply::json(&summary))
}

async fn post_index(region: Region, form: DataForm, state: SharedState) -> Result<impl Reply, Rejection> {
    let ingest = payload::decode_simple_payload(&form.data).map_err(ApiError::from)?;
    let summary = store_records(&state, &region, ingest).await?;

    Ok(warp::reply::json(&summary))
}

#[derive(Serialize)]
struct Done {
    status: &'static str,
}

async fn post_conc(region: Region, form: DataForm, state: SharedState) -> Result<impl Reply, Rejection> {
    let sealed = payload::decode_base64(&form.data).map_err(ApiError::from)?;

    // PBKDF2 runs on the blocking pool.
    let task_state = state.clone();
    let contents = tokio::task::spawn_blocking(move || crypto::decrypt(&task_state.key, &sealed))
        .await
        .map_err(ApiError::from)?
        .map_err(ApiError::from)?;

    let size = contents.len();
    concentrations::write(&state.data_dir, &region, contents)
        .await
        .map_err(ApiError::from)?;
    log::info!("{}: wrote {} bytes of concentrations", region, size);

    Ok(warp::reply::json(&Done { status: "ok" }))
}

#[derive(Debug, Default, Serialize)]
pub struct IqaReply {
    pub iqa: Vec<f64>,
    pub color: Vec<Rgb>,
    pub concentrations: Vec<BTreeMap<String, f64>>,
}

/// Highest index across the site's pollutants.
fn site_index(records: &[MeasurementRecord]) -> f64 {
    records
        .iter()
        .map(|r| r.index)
        .fold(f64::NEG_INFINITY, f64::max)
}

async fn lookup_sites(state: &AppState, region: &Region, list: &str) -> Result<IqaReply, ApiError> {
    let mut reply = IqaReply::default();

    for token in split_list(list) {
        let site: Site = token.parse()?;
        let records = state
            .store
            .site_records(region, &site.zone, &site.typology)
            .await?;

        if records.is_empty() {
            return Err(ApiError::MissingRecord(format!(
                "cannot find data for zone={} and typo={}",
                site.zone, site.typology
            )));
        }

        let iqa = site_index(&records);
        reply.color.push(state.classifier.classify(iqa, DISPLAY_SCHEME)?);
        reply.iqa.push(iqa);
        reply.concentrations.push(
            records
                .into_iter()
                .filter_map(|r| r.pollutant.map(|p| (p, r.value)))
                .collect(),
        );
    }

    Ok(reply)
}

async fn get_iqa(region: Region, list: String, state: SharedState) -> Result<impl Reply, Rejection> {
    let list = decode_segment(&list).map_err(ApiError::from)?;
    let reply = lookup_sites(&state, &region, &list).await?;

    Ok(warp::reply::json(&reply))
}

#[derive(Serialize)]
struct ConcReply {
    status: &'static str,
    #[serde(flatten)]
    extract: Extract,
}

async fn get_conc(region: Region, list: String, state: SharedState) -> Result<impl Reply, Rejection> {
    let list = decode_segment(&list).map_err(ApiError::from)?;
    let measures: Vec<String> = split_list(&list).map(String::from).collect();
    let extract = concentrations::read(&state.data_dir, &region, &measures)
        .await
        .map_err(ApiError::from)?;

    Ok(warp::reply::json(&ConcReply { status: "ok", extract }))
}

#[derive(Serialize)]
struct RecordReply {
    status: &'static str,
    record: MeasurementRecord,
    color: Rgb,
}

async fn get_record(
    region: Region,
    zone: String,
    typology: String,
    pollutant: String,
    state: SharedState,
) -> Result<impl Reply, Rejection> {
    let key = RecordKey {
        zone: decode_segment(&zone).map_err(ApiError::from)?,
        typology: decode_segment(&typology).map_err(ApiError::from)?,
        pollutant: Some(decode_segment(&pollutant).map_err(ApiError::from)?),
    };
    let record = state
        .store
        .get(&region, &key)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::MissingRecord(format!("cannot find data for {}", key)))?;
    let color = state
        .classifier
        .classify(record.index, DISPLAY_SCHEME)
        .map_err(ApiError::from)?;

    Ok(warp::reply::json(&RecordReply {
        status: "ok",
        record,
        color,
    }))
}

#[derive(Serialize)]
struct ColorReply {
    scheme: String,
    value: f64,
    bucket: usize,
    color: Rgb,
}

async fn get_color(scheme: String, value: f64, state: SharedState) -> Result<impl Reply, Rejection> {
    let table = state.classifier.scheme(&scheme).map_err(ApiError::from)?;

    Ok(warp::reply::json(&ColorReply {
        bucket: table.bucket(value),
        color: table.classify(value),
        scheme,
        value,
    }))
}

/// All endpoints, with errors rendered as JSON.
pub fn routes(
    state: SharedState,
    max_payload_bytes: u64,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let index_route = warp::path::end().and(warp::get()).map(index);
    let post_iqa_route = warp::path!("post" / "iqa" / Region)
        .and(warp::post())
        .and(data_form(max_payload_bytes))
        .and(with_state(state.clone()))
        .and_then(post_iqa);
    let post_index_route = warp::path!("post" / "index" / Region)
        .and(warp::post())
        .and(data_form(max_payload_bytes))
        .and(with_state(state.clone()))
        .and_then(post_index);
    let post_conc_route = warp::path!("post" / "conc" / Region)
        .and(warp::post())
        .and(data_form(max_payload_bytes))
        .and(with_state(state.clone()))
        .and_then(post_conc);
    let get_iqa_route = warp::path!("get" / "iqa" / Region / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(get_iqa);
    let get_conc_route = warp::path!("get" / "conc" / Region / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(get_conc);
    let get_record_route = warp::path!("get" / "record" / Region / String / String / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(get_record);
    let color_route = warp::path!("color" / String / f64)
        .and(warp::get())
        .and(with_state(state))
        .and_then(get_color);

    index_route
        .or(post_iqa_route)
        .or(post_index_route)
        .or(post_conc_route)
        .or(get_iqa_route)
        .or(get_conc_route)
        .or(get_record_route)
        .or(color_route)
        .recover(handle_rejection)
        .with(warp::log("apiair"))
}
