use apiair::classify::Classifier;
use apiair::domain::{RecordKey, Region};
use apiair::export::{self, ExportError, SiteConfig, Thresholds};
use apiair::routes::{routes, AppState};
use apiair::store::{MemoryStore, RecordStore};
use secrecy::Secret;
use std::net::SocketAddr;
use std::sync::Arc;

const KEY: &str = "export key";

/// Hourly NO2 over 20 hours; PM10 only for the last 15.
fn hourly_csv() -> String {
    let mut csv = String::from("dh,NO2_A,PM10_B\n");
    for hour in 0..20 {
        let pm10 = if hour < 5 { String::new() } else { format!("{}", 40 + hour) };
        csv.push_str(&format!("2016-01-01 {:02}:00:00,{},{}\n", hour, 100 + hour, pm10));
    }
    csv
}

fn sites() -> SiteConfig {
    let mut sites = SiteConfig::new();
    let urb = sites
        .entry("marseille".to_string())
        .or_default()
        .entry("urb".to_string())
        .or_default();
    urb.insert("NO2".to_string(), "NO2_A".to_string());
    urb.insert("PM10".to_string(), "PM10_B".to_string());
    sites
}

async fn serve(store: Arc<MemoryStore>, data_dir: &std::path::Path) -> String {
    let state = Arc::new(AppState {
        store,
        classifier: Classifier::standard().unwrap(),
        data_dir: data_dir.to_path_buf(),
        key: Secret::new(KEY.to_string()),
    });
    let address: SocketAddr = ([127, 0, 0, 1], 0).into();
    let (bound, server) = warp::serve(routes(state, 1024 * 1024)).bind_ephemeral(address);
    tokio::spawn(server);

    format!("http://{}", bound)
}

#[tokio::test]
async fn exported_indices_reach_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let host = serve(store.clone(), dir.path()).await;

    let payload = export::build_payload(&sites(), &hourly_csv(), &Thresholds::default()).unwrap();
    let answer = export::send_indices(&reqwest::Client::new(), &host, "paca", &payload)
        .await
        .unwrap();
    let answer: serde_json::Value = serde_json::from_str(&answer).unwrap();
    assert_eq!(answer["inserted"], 1);
    assert_eq!(answer["skipped"], 1);

    // 15 hourly PM10 values are too few for a 24h mean.
    let region: Region = "paca".parse().unwrap();
    let no2 = store
        .get(
            &region,
            &RecordKey {
                zone: "marseille".to_string(),
                typology: "urb".to_string(),
                pollutant: Some("NO2".to_string()),
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(no2.value, 119.0);
    assert_eq!(no2.index, 119.0 / 200.0);
}

#[tokio::test]
async fn exported_concentrations_are_readable() {
    let dir = tempfile::tempdir().unwrap();
    let host = serve(Arc::new(MemoryStore::new()), dir.path()).await;
    let client = reqwest::Client::new();

    export::send_concentrations(
        &client,
        &host,
        "paca",
        Secret::new(KEY.to_string()),
        hourly_csv().into_bytes(),
    )
    .await
    .unwrap();

    let body: serde_json::Value = client
        .get(format!("{}/get/conc/paca/NO2_A", host))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["index"].as_array().unwrap().len(), 20);
    assert_eq!(body["data"]["NO2_A"][19], 119.0);
}

#[tokio::test]
async fn server_errors_are_surfaced() {
    let dir = tempfile::tempdir().unwrap();
    let host = serve(Arc::new(MemoryStore::new()), dir.path()).await;

    let result = export::send_concentrations(
        &reqwest::Client::new(),
        &host,
        "paca",
        Secret::new("wrong key".to_string()),
        hourly_csv().into_bytes(),
    )
    .await;

    match result {
        Err(ExportError::Rejected { status, body }) => {
            assert_eq!(status, 400);
            assert!(body.contains("decryption"));
        }
        other => panic!("unexpected {:?}", other.map(|_| ())),
    }
}
