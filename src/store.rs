//! Keyed measurement record storage.

use crate::domain::{MeasurementRecord, RecordKey, RecordRow, Region};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::str::FromStr;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt data: {count} records for {key}")]
    CorruptData { key: String, count: usize },
}

/// Outcome of an upsert.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Writes `record`, overwriting value and index of an existing record
    /// with the same key.
    async fn upsert(&self, region: &Region, record: &MeasurementRecord) -> Result<Upsert, StoreError>;

    async fn get(&self, region: &Region, key: &RecordKey) -> Result<Option<MeasurementRecord>, StoreError>;

    /// Every record of a zone/typology pair, whatever the pollutant.
    async fn site_records(
        &self,
        region: &Region,
        zone: &str,
        typology: &str,
    ) -> Result<Vec<MeasurementRecord>, StoreError>;
}

fn single<T>(mut rows: Vec<T>, key: &RecordKey) -> Result<Option<T>, StoreError> {
    match rows.len() {
        0 | 1 => Ok(rows.pop()),
        count => Err(StoreError::CorruptData {
            key: key.to_string(),
            count,
        }),
    }
}

const CREATE_RECORDS: &str = "create table if not exists records (
    region text not null,
    zone text not null,
    typology text not null,
    pollutant text not null,
    value real not null,
    iqa real not null
)";

const SELECT_BY_KEY: &str = "select zone, typology, pollutant, value, iqa from records
     where region = ? and zone = ? and typology = ? and pollutant = ?";

/// SQLite backed store: one `records` table shared by every region.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<SqliteStore, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let mut pool_options = SqlitePoolOptions::new();
        // Every connection to ":memory:" opens its own database.
        if database_url.contains(":memory:") {
            pool_options = pool_options.max_connections(1);
        }
        let pool = pool_options.connect_with(options).await?;

        SqliteStore::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<SqliteStore, StoreError> {
        sqlx::query(CREATE_RECORDS).execute(&pool).await?;

        Ok(SqliteStore { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn pollutant_column(key: &RecordKey) -> &str {
    key.pollutant.as_deref().unwrap_or("")
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn upsert(&self, region: &Region, record: &MeasurementRecord) -> Result<Upsert, StoreError> {
        let key = record.key();
        let mut tx = self.pool.begin().await?;

        let existing: Vec<RecordRow> = sqlx::query_as(SELECT_BY_KEY)
            .bind(region.as_str())
            .bind(&key.zone)
            .bind(&key.typology)
            .bind(pollutant_column(&key))
            .fetch_all(&mut *tx)
            .await?;

        let outcome = match single(existing, &key)? {
            Some(_) => {
                sqlx::query(
                    "update records set value = ?, iqa = ?
                     where region = ? and zone = ? and typology = ? and pollutant = ?",
                )
                .bind(record.value)
                .bind(record.index)
                .bind(region.as_str())
                .bind(&key.zone)
                .bind(&key.typology)
                .bind(pollutant_column(&key))
                .execute(&mut *tx)
                .await?;
                Upsert::Updated
            }
            None => {
                sqlx::query(
                    "insert into records (region, zone, typology, pollutant, value, iqa)
                     values (?, ?, ?, ?, ?, ?)",
                )
                .bind(region.as_str())
                .bind(&key.zone)
                .bind(&key.typology)
                .bind(pollutant_column(&key))
                .bind(record.value)
                .bind(record.index)
                .execute(&mut *tx)
                .await?;
                Upsert::Inserted
            }
        };

        tx.commit().await?;

        Ok(outcome)
    }

    async fn get(&self, region: &Region, key: &RecordKey) -> Result<Option<MeasurementRecord>, StoreError> {
        let rows: Vec<RecordRow> = sqlx::query_as(SELECT_BY_KEY)
            .bind(region.as_str())
            .bind(&key.zone)
            .bind(&key.typology)
            .bind(pollutant_column(key))
            .fetch_all(&self.pool)
            .await?;

        Ok(single(rows, key)?.map(MeasurementRecord::from))
    }

    async fn site_records(
        &self,
        region: &Region,
        zone: &str,
        typology: &str,
    ) -> Result<Vec<MeasurementRecord>, StoreError> {
        let rows: Vec<RecordRow> = sqlx::query_as(
            "select zone, typology, pollutant, value, iqa from records
             where region = ? and zone = ? and typology = ?
             order by pollutant",
        )
        .bind(region.as_str())
        .bind(zone)
        .bind(typology)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(MeasurementRecord::from).collect())
    }
}

/// In-process store. Contents are lost on exit.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<(Region, RecordKey), MeasurementRecord>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        Default::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert(&self, region: &Region, record: &MeasurementRecord) -> Result<Upsert, StoreError> {
        let mut records = self.records.lock().await;

        match records.insert((region.clone(), record.key()), record.clone()) {
            Some(_) => Ok(Upsert::Updated),
            None => Ok(Upsert::Inserted),
        }
    }

    async fn get(&self, region: &Region, key: &RecordKey) -> Result<Option<MeasurementRecord>, StoreError> {
        let records = self.records.lock().await;

        Ok(records.get(&(region.clone(), key.clone())).cloned())
    }

    async fn site_records(
        &self,
        region: &Region,
        zone: &str,
        typology: &str,
    ) -> Result<Vec<MeasurementRecord>, StoreError> {
        let records = self.records.lock().await;
        let mut found: Vec<MeasurementRecord> = records
            .iter()
            .filter(|((r, key), _)| r == region && key.zone == zone && key.typology == typology)
            .map(|(_, record)| record.clone())
            .collect();
        found.sort_by(|a, b| a.pollutant.cmp(&b.pollutant));

        Ok(found)
    }
}
