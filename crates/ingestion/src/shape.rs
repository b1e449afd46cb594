//! Shapefile import through the external `ogr2ogr` tool.

use std::path::{Path, PathBuf};

use storage::{ShapeCatalog, ShapeDescriptor, StorageError};
use tokio::process::Command;
use tracing::{info, instrument};

use crate::config::FetchOptions;
use crate::error::{EtlError, Result};
use crate::source::SourceFile;

/// Imports zipped shapefiles into PostGIS tables named after the dataset.
pub struct ShapeEtl {
    shapes: ShapeCatalog,
    database_url: String,
    ogr2ogr: PathBuf,
    fetch: FetchOptions,
}

impl ShapeEtl {
    pub fn new(
        shapes: ShapeCatalog,
        database_url: impl Into<String>,
        ogr2ogr: impl Into<PathBuf>,
        fetch: FetchOptions,
    ) -> Self {
        Self {
            shapes,
            database_url: database_url.into(),
            ogr2ogr: ogr2ogr.into(),
            fetch,
        }
    }

    /// Import a registered shapefile dataset and record its envelope.
    ///
    /// The table import and the metadata update are separate steps; if the
    /// second fails the table exists but the record still reads not ingested.
    #[instrument(skip(self))]
    pub async fn import(&self, dataset_name: &str, source: Option<&str>) -> Result<ShapeDescriptor> {
        let shape = self
            .shapes
            .get(dataset_name)
            .await?
            .ok_or_else(|| StorageError::DatasetNotFound(dataset_name.to_string()))?;

        if shape.is_ingested {
            return Err(EtlError::configuration(
                dataset_name,
                "shapefile dataset is already ingested",
            ));
        }

        let location = source
            .or(shape.source_url.as_deref())
            .ok_or_else(|| EtlError::configuration(dataset_name, "no source location"))?;
        let file = SourceFile::fetch(location, &self.fetch).await?;

        let args = ogr2ogr_args(&self.database_url, file.path(), dataset_name);
        let output = Command::new(&self.ogr2ogr)
            .args(&args)
            .output()
            .await
            .map_err(|e| EtlError::Shapefile(format!("Failed to run ogr2ogr: {}", e)))?;

        if !output.status.success() {
            return Err(EtlError::Shapefile(format!(
                "ogr2ogr failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let shape = self.shapes.mark_ingested(dataset_name).await?;
        info!(dataset = %dataset_name, bbox = ?shape.bbox, "Shapefile imported");
        Ok(shape)
    }
}

/// Arguments importing the zip at `zip_path` into table `table`.
pub fn ogr2ogr_args(database_url: &str, zip_path: &Path, table: &str) -> Vec<String> {
    vec![
        "-f".to_string(),
        "PostgreSQL".to_string(),
        format!("PG:{}", database_url),
        format!("/vsizip/{}", zip_path.display()),
        "-nln".to_string(),
        table.to_string(),
        "-t_srs".to_string(),
        "EPSG:4326".to_string(),
        "-nlt".to_string(),
        "PROMOTE_TO_MULTI".to_string(),
        "-lco".to_string(),
        "GEOMETRY_NAME=geom".to_string(),
        "-overwrite".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ogr2ogr_args() {
        let args = ogr2ogr_args(
            "postgresql://u:p@localhost:5432/plenario",
            Path::new("/tmp/wards.zip"),
            "city_wards",
        );
        assert_eq!(args[2], "PG:postgresql://u:p@localhost:5432/plenario");
        assert_eq!(args[3], "/vsizip//tmp/wards.zip");
        let nln = args.iter().position(|a| a == "-nln").unwrap();
        assert_eq!(args[nln + 1], "city_wards");
        assert!(args.contains(&"GEOMETRY_NAME=geom".to_string()));
        assert!(args.contains(&"EPSG:4326".to_string()));
    }
}
