use config::{Config, ConfigError, File};
use secrecy::Secret;
use serde_aux::field_attributes::deserialize_number_from_string;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub storage: StorageSettings,
    pub crypto: CryptoSettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: IpAddr,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_payload_bytes: u64,
}

impl ApplicationSettings {
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

#[derive(serde::Deserialize, Clone)]
pub struct StorageSettings {
    /// Directory holding the per-region concentration files.
    pub data_dir: PathBuf,
    /// Record store; `sqlite::memory:` keeps records in process only.
    pub database_url: String,
}

#[derive(serde::Deserialize, Clone)]
pub struct CryptoSettings {
    /// Shared secret of the concentration uploads (`APP_CRYPTO__KEY`).
    pub key: Secret<String>,
}

/// Settings files layered over `configuration/base`, chosen by
/// `APP_ENVIRONMENT`.
pub const ENVIRONMENTS: &[&str] = &["local", "production"];

/// Name of the settings file for `APP_ENVIRONMENT`, `local` when unset.
pub fn environment_name(value: Option<&str>) -> Result<&'static str, ConfigError> {
    let requested = value.unwrap_or("local").trim().to_lowercase();

    ENVIRONMENTS
        .iter()
        .copied()
        .find(|name| *name == requested)
        .ok_or_else(|| {
            ConfigError::Message(format!(
                "unknown APP_ENVIRONMENT '{}', expected one of: {}",
                requested,
                ENVIRONMENTS.join(", ")
            ))
        })
}

/// Reads `configuration/base`, then the environment file, then `APP_*`
/// environment variables (`APP_STORAGE__DATA_DIR=...`).
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let directory = std::env::current_dir()
        .map_err(|e| ConfigError::Message(format!("cannot locate the working directory: {}", e)))?
        .join("configuration");
    let environment = environment_name(std::env::var("APP_ENVIRONMENT").ok().as_deref())?;

    let config = Config::builder()
        .add_source(File::from(directory.join("base")).required(true))
        .add_source(File::from(directory.join(environment)).required(true))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_environment_file() {
        assert_eq!(environment_name(None).unwrap(), "local");
        assert_eq!(environment_name(Some("Production")).unwrap(), "production");
        assert!(matches!(environment_name(Some("staging")), Err(ConfigError::Message(_))));
    }

    #[test]
    fn numbers_may_come_as_strings() {
        let settings: ApplicationSettings = serde_json::from_value(serde_json::json!({
            "host": "127.0.0.1",
            "port": "5000",
            "max_payload_bytes": 1048576
        }))
        .unwrap();
        assert_eq!(settings.address().to_string(), "127.0.0.1:5000");
    }
}
