use apiair::classify::Classifier;
use apiair::configuration::{get_configuration, Settings};
use apiair::routes::{self, AppState};
use apiair::store::SqliteStore;
use log::info;
use std::error;
use std::sync::Arc;

async fn start_server(settings: Settings) -> Result<(), Box<dyn error::Error>> {
    tokio::fs::create_dir_all(&settings.storage.data_dir).await?;

    let store = SqliteStore::connect(&settings.storage.database_url).await?;
    let classifier = Classifier::standard()?;
    info!(
        "Schemes: {}",
        classifier.scheme_names().collect::<Vec<_>>().join(", ")
    );

    let state = Arc::new(AppState {
        store: Arc::new(store),
        classifier,
        data_dir: settings.storage.data_dir.clone(),
        key: settings.crypto.key.clone(),
    });
    let routes = routes::routes(state, settings.application.max_payload_bytes);

    let address = settings.application.address();
    info!("Listening on {}", address);
    warp::serve(routes).run(address).await;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn error::Error>> {
    env_logger::init();

    let settings = get_configuration()?;
    info!(
        "Starting apiair {} (data in {})",
        env!("CARGO_PKG_VERSION"),
        settings.storage.data_dir.display()
    );

    start_server(settings).await
}
