//! Dataset metadata catalog using PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use tracing::{debug, info, instrument};

use point_common::{quote_ident, BoundingBox};

use crate::descriptor::{ContributedType, DatasetDescriptor, DatasetExtent};
use crate::error::{StorageError, StorageResult};

/// Record store for dataset descriptors.
///
/// The ingest pipeline and the query path only talk to metadata through this
/// trait, so tests can swap in an in-memory store.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Create backing tables if they do not exist.
    async fn migrate(&self) -> StorageResult<()>;

    async fn get_by_name(&self, dataset_name: &str) -> StorageResult<Option<DatasetDescriptor>>;

    async fn get_by_url_hash(&self, url_hash: &str) -> StorageResult<Option<DatasetDescriptor>>;

    /// Every approved dataset, ordered by name.
    async fn list_approved(&self) -> StorageResult<Vec<DatasetDescriptor>>;

    /// Approved datasets refreshed at `update_freq`.
    async fn list_by_frequency(&self, update_freq: &str) -> StorageResult<Vec<DatasetDescriptor>>;

    /// Store a new descriptor. Fails if the name or source URL is taken.
    async fn register(&self, descriptor: &DatasetDescriptor) -> StorageResult<()>;

    /// Record a freshly computed extent and mark the dataset ingested.
    async fn update_after_ingest(
        &self,
        dataset_name: &str,
        extent: &DatasetExtent,
    ) -> StorageResult<()>;

    /// Delete a descriptor. Returns whether one existed.
    async fn remove(&self, dataset_name: &str) -> StorageResult<bool>;
}

/// Database connection pool and metadata operations.
#[derive(Clone)]
pub struct Catalog {
    pool: PgPool,
}

impl Catalog {
    /// Create a new catalog connection from database URL.
    pub async fn connect(database_url: &str, max_connections: u32) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    ///
    /// Statements run on one connection under an advisory lock so concurrent
    /// workers do not race on `CREATE ... IF NOT EXISTS`.
    pub async fn migrate(&self) -> StorageResult<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_ID)
            .execute(&mut *conn)
            .await?;

        let mut result = Ok(());
        // Split SQL statements and execute them individually
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                if let Err(e) = sqlx::query(trimmed).execute(&mut *conn).await {
                    result = Err(StorageError::Migration(e.to_string()));
                    break;
                }
            }
        }

        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_ID)
            .execute(&mut *conn)
            .await?;

        result
    }

    /// Drop a dataset's canonical table and delete its record together.
    #[instrument(skip(self))]
    pub async fn drop_dataset(&self, dataset_name: &str) -> StorageResult<()> {
        let descriptor = self
            .get_by_name(dataset_name)
            .await?
            .ok_or_else(|| StorageError::DatasetNotFound(dataset_name.to_string()))?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "DROP TABLE IF EXISTS {}",
            quote_ident(&descriptor.canonical_table())
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM meta_master WHERE dataset_name = $1")
            .bind(dataset_name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(dataset = %dataset_name, "Dataset dropped");
        Ok(())
    }

    async fn fetch_one_where(
        &self,
        predicate: &str,
        value: &str,
    ) -> StorageResult<Option<DatasetDescriptor>> {
        let row = sqlx::query_as::<_, DatasetRow>(&format!(
            "{} WHERE {} = $1",
            SELECT_DATASET, predicate
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DatasetDescriptor::try_from).transpose()
    }
}

#[async_trait]
impl MetadataStore for Catalog {
    async fn migrate(&self) -> StorageResult<()> {
        Catalog::migrate(self).await
    }

    async fn get_by_name(&self, dataset_name: &str) -> StorageResult<Option<DatasetDescriptor>> {
        self.fetch_one_where("dataset_name", dataset_name).await
    }

    async fn get_by_url_hash(&self, url_hash: &str) -> StorageResult<Option<DatasetDescriptor>> {
        self.fetch_one_where("source_url_hash", url_hash).await
    }

    async fn list_approved(&self) -> StorageResult<Vec<DatasetDescriptor>> {
        let rows = sqlx::query_as::<_, DatasetRow>(&format!(
            "{} WHERE approved_status ORDER BY dataset_name",
            SELECT_DATASET
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DatasetDescriptor::try_from).collect()
    }

    async fn list_by_frequency(&self, update_freq: &str) -> StorageResult<Vec<DatasetDescriptor>> {
        let rows = sqlx::query_as::<_, DatasetRow>(&format!(
            "{} WHERE approved_status AND update_freq = $1 ORDER BY dataset_name",
            SELECT_DATASET
        ))
        .bind(update_freq)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DatasetDescriptor::try_from).collect()
    }

    #[instrument(skip(self, descriptor), fields(dataset = %descriptor.dataset_name))]
    async fn register(&self, descriptor: &DatasetDescriptor) -> StorageResult<()> {
        let contributed = descriptor
            .contributed_data_types
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StorageError::invalid_metadata(&descriptor.dataset_name, e.to_string()))?;
        let bbox = descriptor.bbox;

        let result = sqlx::query(
            r#"
            INSERT INTO meta_master (
                source_url_hash, dataset_name, human_name, description,
                source_url, attribution, update_freq,
                business_key, observed_date, latitude, longitude, location,
                approved_status, contributed_data_types,
                obs_from, obs_to, bbox, date_added, is_ingested
            ) VALUES (
                $1, $2, $3, $4,
                $5, $6, $7,
                $8, $9, $10, $11, $12,
                $13, $14,
                $15, $16,
                ST_MakeEnvelope($17::DOUBLE PRECISION, $18::DOUBLE PRECISION,
                                $19::DOUBLE PRECISION, $20::DOUBLE PRECISION, 4326),
                NOW(), FALSE
            )
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&descriptor.source_url_hash)
        .bind(&descriptor.dataset_name)
        .bind(&descriptor.human_name)
        .bind(&descriptor.description)
        .bind(&descriptor.source_url)
        .bind(&descriptor.attribution)
        .bind(&descriptor.update_freq)
        .bind(&descriptor.business_key)
        .bind(&descriptor.observed_date)
        .bind(&descriptor.latitude)
        .bind(&descriptor.longitude)
        .bind(&descriptor.location)
        .bind(descriptor.approved_status)
        .bind(contributed)
        .bind(descriptor.obs_from)
        .bind(descriptor.obs_to)
        .bind(bbox.map(|b| b.min_x))
        .bind(bbox.map(|b| b.min_y))
        .bind(bbox.map(|b| b.max_x))
        .bind(bbox.map(|b| b.max_y))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::DatasetExists(descriptor.dataset_name.clone()));
        }

        info!("Dataset registered");
        Ok(())
    }

    #[instrument(skip(self, extent))]
    async fn update_after_ingest(
        &self,
        dataset_name: &str,
        extent: &DatasetExtent,
    ) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        let bbox = extent.bbox;

        let result = sqlx::query(
            r#"
            UPDATE meta_master SET
                obs_from = $2,
                obs_to = $3,
                bbox = ST_MakeEnvelope($4::DOUBLE PRECISION, $5::DOUBLE PRECISION,
                                       $6::DOUBLE PRECISION, $7::DOUBLE PRECISION, 4326),
                last_update = NOW(),
                is_ingested = TRUE
            WHERE dataset_name = $1
            "#,
        )
        .bind(dataset_name)
        .bind(extent.obs_from.map(|t| t.date()))
        .bind(extent.obs_to.map(|t| t.date()))
        .bind(bbox.map(|b| b.min_x))
        .bind(bbox.map(|b| b.min_y))
        .bind(bbox.map(|b| b.max_x))
        .bind(bbox.map(|b| b.max_y))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::DatasetNotFound(dataset_name.to_string()));
        }

        tx.commit().await?;
        debug!(dataset = %dataset_name, "Metadata extent updated");
        Ok(())
    }

    async fn remove(&self, dataset_name: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM meta_master WHERE dataset_name = $1")
            .bind(dataset_name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

const SELECT_DATASET: &str = "SELECT source_url_hash, dataset_name, human_name, description, \
     source_url, attribution, update_freq, business_key, observed_date, \
     latitude, longitude, location, approved_status, contributed_data_types, \
     obs_from, obs_to, \
     ST_XMin(bbox) AS bbox_min_x, ST_YMin(bbox) AS bbox_min_y, \
     ST_XMax(bbox) AS bbox_max_x, ST_YMax(bbox) AS bbox_max_y, \
     date_added, last_update, is_ingested \
     FROM meta_master";

/// Internal row type for database queries.
#[derive(FromRow)]
struct DatasetRow {
    source_url_hash: String,
    dataset_name: String,
    human_name: String,
    description: Option<String>,
    source_url: String,
    attribution: Option<String>,
    update_freq: String,
    business_key: String,
    observed_date: String,
    latitude: Option<String>,
    longitude: Option<String>,
    location: Option<String>,
    approved_status: bool,
    contributed_data_types: Option<String>,
    obs_from: Option<NaiveDate>,
    obs_to: Option<NaiveDate>,
    bbox_min_x: Option<f64>,
    bbox_min_y: Option<f64>,
    bbox_max_x: Option<f64>,
    bbox_max_y: Option<f64>,
    date_added: Option<DateTime<Utc>>,
    last_update: Option<DateTime<Utc>>,
    is_ingested: bool,
}

/// Rebuild a bounding box from four nullable envelope columns.
pub(crate) fn bbox_from_columns(
    min_x: Option<f64>,
    min_y: Option<f64>,
    max_x: Option<f64>,
    max_y: Option<f64>,
) -> Option<BoundingBox> {
    match (min_x, min_y, max_x, max_y) {
        (Some(a), Some(b), Some(c), Some(d)) => Some(BoundingBox::new(a, b, c, d)),
        _ => None,
    }
}

impl TryFrom<DatasetRow> for DatasetDescriptor {
    type Error = StorageError;

    fn try_from(row: DatasetRow) -> Result<Self, Self::Error> {
        let contributed_data_types = row
            .contributed_data_types
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(serde_json::from_str::<Vec<ContributedType>>)
            .transpose()
            .map_err(|e| StorageError::invalid_metadata(&row.dataset_name, e.to_string()))?;

        Ok(DatasetDescriptor {
            bbox: bbox_from_columns(row.bbox_min_x, row.bbox_min_y, row.bbox_max_x, row.bbox_max_y),
            dataset_name: row.dataset_name,
            human_name: row.human_name,
            description: row.description,
            source_url: row.source_url,
            source_url_hash: row.source_url_hash,
            attribution: row.attribution,
            update_freq: row.update_freq,
            business_key: row.business_key,
            observed_date: row.observed_date,
            latitude: row.latitude,
            longitude: row.longitude,
            location: row.location,
            approved_status: row.approved_status,
            contributed_data_types,
            obs_from: row.obs_from,
            obs_to: row.obs_to,
            date_added: row.date_added,
            last_update: row.last_update,
            is_ingested: row.is_ingested,
        })
    }
}

/// Advisory lock key held while migrating.
const MIGRATION_LOCK_ID: i64 = 0x706c_656e_6172;

/// Database schema SQL.
const SCHEMA_SQL: &str = r#"
CREATE EXTENSION IF NOT EXISTS postgis;

CREATE TABLE IF NOT EXISTS meta_master (
    source_url_hash VARCHAR(32) PRIMARY KEY,
    dataset_name VARCHAR(100) NOT NULL UNIQUE,
    human_name VARCHAR(255) NOT NULL,
    description TEXT,
    source_url VARCHAR(255) NOT NULL,
    attribution VARCHAR(255),
    obs_from DATE,
    obs_to DATE,
    bbox geometry(Geometry, 4326),
    update_freq VARCHAR(100) NOT NULL,
    last_update TIMESTAMPTZ,
    date_added TIMESTAMPTZ,
    business_key VARCHAR(255) NOT NULL,
    observed_date VARCHAR(255) NOT NULL,
    latitude VARCHAR(100),
    longitude VARCHAR(100),
    location VARCHAR(100),
    approved_status BOOLEAN NOT NULL DEFAULT FALSE,
    contributed_data_types TEXT,
    is_ingested BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE INDEX IF NOT EXISTS idx_meta_master_update_freq ON meta_master(update_freq);

CREATE TABLE IF NOT EXISTS meta_shape (
    dataset_name VARCHAR(100) PRIMARY KEY,
    human_name VARCHAR(255) NOT NULL,
    source_url VARCHAR(255),
    date_added TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    bbox geometry(Geometry, 4326),
    is_ingested BOOLEAN NOT NULL DEFAULT FALSE
);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_from_columns() {
        assert_eq!(
            bbox_from_columns(Some(-88.0), Some(41.0), Some(-87.0), Some(42.0)),
            Some(BoundingBox::new(-88.0, 41.0, -87.0, 42.0))
        );
        assert_eq!(bbox_from_columns(None, Some(41.0), Some(-87.0), Some(42.0)), None);
    }

    #[test]
    fn test_schema_sql_statements() {
        let statements: Vec<_> = SCHEMA_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        assert_eq!(statements.len(), 4);
        assert!(statements[0].contains("postgis"));
    }
}
