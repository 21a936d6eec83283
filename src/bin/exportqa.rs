//! Sends regional air quality data to an apiair server.
//!
//! `exportqa indices` computes the latest index of every configured site
//! from an hourly concentration CSV; `exportqa concentrations` uploads the
//! CSV itself, encrypted with the shared key.

use apiair::export::{self, Thresholds};
use clap::{Parser, Subcommand};
use log::{debug, info};
use secrecy::Secret;
use std::error;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Opts {
    /// Base URL of the server, e.g. http://127.0.0.1:5000
    host: String,

    /// Region the data belongs to.
    #[arg(long, default_value = "paca")]
    region: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Post the latest index of each site.
    Indices {
        /// Hourly concentrations: a `dh` column plus one column per measure.
        #[arg(long)]
        input: PathBuf,

        /// Sites and their measures, `{zone: {typology: {pollutant: "mes1, mes2"}}}`.
        #[arg(long, default_value = "configuration/pacaqa.yml")]
        sites: PathBuf,
    },
    /// Post the encrypted concentration file.
    Concentrations {
        #[arg(long)]
        input: PathBuf,

        #[arg(long, env = "APIAIR_KEY", hide_env_values = true)]
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn error::Error>> {
    env_logger::init();

    let opts = Opts::parse();
    debug!("host is {}", opts.host);
    let client = reqwest::Client::new();

    let answer = match opts.command {
        Command::Indices { input, sites } => {
            let sites = export::load_sites(&sites)?;
            let contents = tokio::fs::read_to_string(&input).await?;
            let payload = export::build_payload(&sites, &contents, &Thresholds::default())?;
            export::send_indices(&client, &opts.host, &opts.region, &payload).await?
        }
        Command::Concentrations { input, key } => {
            let contents = tokio::fs::read(&input).await?;
            debug!("read {} bytes from {}", contents.len(), input.display());
            export::send_concentrations(&client, &opts.host, &opts.region, Secret::new(key), contents).await?
        }
    };

    info!("server answered: {}", answer);
    Ok(())
}
