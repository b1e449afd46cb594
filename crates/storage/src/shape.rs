//! Metadata for shapefile datasets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use tracing::{info, instrument};

use point_common::{quote_ident, slugify, BoundingBox};

use crate::catalog::bbox_from_columns;
use crate::error::{StorageError, StorageResult};

/// Metadata record for one shapefile dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeDescriptor {
    /// Slug of the human name; also the name of the imported table.
    pub dataset_name: String,
    pub human_name: String,
    pub source_url: Option<String>,
    pub date_added: DateTime<Utc>,
    pub bbox: Option<BoundingBox>,
    pub is_ingested: bool,
}

/// Shapefile metadata operations over `meta_shape`.
#[derive(Clone)]
pub struct ShapeCatalog {
    pool: PgPool,
}

impl ShapeCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register a shapefile dataset.
    #[instrument(skip(self))]
    pub async fn add(&self, human_name: &str, source_url: &str) -> StorageResult<ShapeDescriptor> {
        let dataset_name = slugify(human_name);
        if dataset_name.is_empty() {
            return Err(StorageError::invalid_metadata(
                human_name,
                "human name has no usable characters",
            ));
        }

        let row = sqlx::query_as::<_, ShapeRow>(&format!(
            "INSERT INTO meta_shape (dataset_name, human_name, source_url, date_added, is_ingested) \
             VALUES ($1, $2, $3, NOW(), FALSE) \
             ON CONFLICT DO NOTHING \
             RETURNING {}",
            SHAPE_COLUMNS
        ))
        .bind(&dataset_name)
        .bind(human_name)
        .bind(source_url)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                info!(dataset = %dataset_name, "Shape dataset registered");
                Ok(row.into())
            }
            None => Err(StorageError::DatasetExists(dataset_name)),
        }
    }

    pub async fn get(&self, dataset_name: &str) -> StorageResult<Option<ShapeDescriptor>> {
        let row = sqlx::query_as::<_, ShapeRow>(&format!(
            "SELECT {} FROM meta_shape WHERE dataset_name = $1",
            SHAPE_COLUMNS
        ))
        .bind(dataset_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ShapeDescriptor::from))
    }

    /// Every registered shapefile dataset, ordered by name.
    pub async fn index(&self) -> StorageResult<Vec<ShapeDescriptor>> {
        let rows = sqlx::query_as::<_, ShapeRow>(&format!(
            "SELECT {} FROM meta_shape ORDER BY dataset_name",
            SHAPE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ShapeDescriptor::from).collect())
    }

    /// Mark a dataset imported and store the envelope of its geometries.
    #[instrument(skip(self))]
    pub async fn mark_ingested(&self, dataset_name: &str) -> StorageResult<ShapeDescriptor> {
        let row = sqlx::query_as::<_, ShapeRow>(&format!(
            "UPDATE meta_shape SET is_ingested = TRUE, \
             bbox = (SELECT ST_SetSRID(ST_Extent(geom)::geometry, 4326) FROM {}) \
             WHERE dataset_name = $1 \
             RETURNING {}",
            quote_ident(dataset_name),
            SHAPE_COLUMNS
        ))
        .bind(dataset_name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ShapeDescriptor::from)
            .ok_or_else(|| StorageError::DatasetNotFound(dataset_name.to_string()))
    }

    /// Delete a record, dropping its imported table when there is one.
    #[instrument(skip(self))]
    pub async fn remove(&self, dataset_name: &str) -> StorageResult<()> {
        let shape = self
            .get(dataset_name)
            .await?
            .ok_or_else(|| StorageError::DatasetNotFound(dataset_name.to_string()))?;

        let mut tx = self.pool.begin().await?;

        if shape.is_ingested {
            sqlx::query(&format!("DROP TABLE IF EXISTS {}", quote_ident(dataset_name)))
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("DELETE FROM meta_shape WHERE dataset_name = $1")
            .bind(dataset_name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(dataset = %dataset_name, "Shape dataset removed");
        Ok(())
    }
}

const SHAPE_COLUMNS: &str = "dataset_name, human_name, source_url, date_added, \
     ST_XMin(bbox) AS bbox_min_x, ST_YMin(bbox) AS bbox_min_y, \
     ST_XMax(bbox) AS bbox_max_x, ST_YMax(bbox) AS bbox_max_y, is_ingested";

#[derive(FromRow)]
struct ShapeRow {
    dataset_name: String,
    human_name: String,
    source_url: Option<String>,
    date_added: DateTime<Utc>,
    bbox_min_x: Option<f64>,
    bbox_min_y: Option<f64>,
    bbox_max_x: Option<f64>,
    bbox_max_y: Option<f64>,
    is_ingested: bool,
}

impl From<ShapeRow> for ShapeDescriptor {
    fn from(row: ShapeRow) -> Self {
        ShapeDescriptor {
            dataset_name: row.dataset_name,
            human_name: row.human_name,
            source_url: row.source_url,
            date_added: row.date_added,
            bbox: bbox_from_columns(row.bbox_min_x, row.bbox_min_y, row.bbox_max_x, row.bbox_max_y),
            is_ingested: row.is_ingested,
        }
    }
}
