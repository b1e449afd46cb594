//! Point dataset ETL: source → staging → dedup → derive + merge → metadata.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{error, info, instrument, warn};

use storage::{
    discover_table_schema, Catalog, DatasetDescriptor, DatasetExtent, MetadataStore,
    SchemaCache, StorageError, TableSchema, TxOutcome,
};

use crate::config::EtlOptions;
use crate::derive::{deduplicate, DedupCounts, DerivationPlan};
use crate::error::{EtlError, Result};
use crate::inference::resolve_columns;
use crate::merge::{compute_extent, create_new, insert_into};
use crate::source::SourceFile;
use crate::staging::{discard_staging, load_staging};

/// What one ingest attempt did.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub dataset: String,
    /// Whether the canonical table was created by this attempt.
    pub created: bool,
    pub staged_rows: u64,
    pub duplicates_removed: u64,
    pub null_keys_skipped: u64,
    pub inserted_rows: u64,
    /// Metadata refresh runs after the data commit and may fail on its own.
    pub metadata: TxOutcome<DatasetExtent>,
}

/// Point dataset ingester.
///
/// Two attempts on the same dataset must not run at once: they would share
/// one staging table. Callers serialize per dataset.
pub struct PointEtl {
    catalog: Catalog,
    schema_cache: SchemaCache,
    options: EtlOptions,
}

impl PointEtl {
    pub fn new(catalog: Catalog, schema_cache: SchemaCache, options: EtlOptions) -> Self {
        Self {
            catalog,
            schema_cache,
            options,
        }
    }

    fn pool(&self) -> &PgPool {
        self.catalog.pool()
    }

    pub fn options(&self) -> &EtlOptions {
        &self.options
    }

    /// First ingest of a registered dataset. Fails if it already has a
    /// canonical table.
    ///
    /// `source` overrides the descriptor's source location.
    #[instrument(skip(self))]
    pub async fn add(&self, dataset_name: &str, source: Option<&str>) -> Result<IngestReport> {
        let descriptor = self.load_descriptor(dataset_name).await?;
        if discover_table_schema(self.pool(), &descriptor.canonical_table())
            .await?
            .is_some()
        {
            return Err(EtlError::configuration(
                dataset_name,
                "dataset already has a canonical table; run an update instead",
            ));
        }
        self.ingest(&descriptor, source).await
    }

    /// Re-ingest a registered dataset, merging only new business keys.
    /// Creates the canonical table if it is missing.
    #[instrument(skip(self))]
    pub async fn update(&self, dataset_name: &str, source: Option<&str>) -> Result<IngestReport> {
        let descriptor = self.load_descriptor(dataset_name).await?;
        self.ingest(&descriptor, source).await
    }

    async fn load_descriptor(&self, dataset_name: &str) -> Result<DatasetDescriptor> {
        self.catalog
            .get_by_name(dataset_name)
            .await?
            .ok_or_else(|| StorageError::DatasetNotFound(dataset_name.to_string()).into())
    }

    /// Run one full ingest attempt for `descriptor`.
    #[instrument(skip(self, descriptor, source), fields(dataset = %descriptor.dataset_name))]
    pub async fn ingest(
        &self,
        descriptor: &DatasetDescriptor,
        source: Option<&str>,
    ) -> Result<IngestReport> {
        let dataset = descriptor.dataset_name.clone();
        if descriptor.location_strategy().is_none() {
            return Err(EtlError::configuration(
                &dataset,
                "neither latitude/longitude nor location field is configured",
            ));
        }

        let location = source.unwrap_or(descriptor.source_url.as_str());
        let source = SourceFile::fetch(location, &self.options.fetch).await?;

        let canonical_table = descriptor.canonical_table();
        let existing = discover_table_schema(self.pool(), &canonical_table).await?;

        let columns = {
            let path = source.path().to_path_buf();
            let existing = existing.clone();
            let business_key = descriptor.business_key_column();
            let hints = descriptor.contributed_data_types.clone();
            tokio::task::spawn_blocking(move || {
                resolve_columns(&path, existing.as_ref(), &business_key, hints.as_deref())
            })
            .await
            .map_err(|e| EtlError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??
        };

        let plan = DerivationPlan::new(descriptor, &columns)?;
        let staged_rows = load_staging(self.pool(), &plan.staging_table, &columns, source.path()).await?;

        let merged = self.dedup_and_merge(&plan, existing.as_ref()).await;
        let (counts, inserted_rows) = match merged {
            Ok(result) => {
                discard_staging(self.pool(), &plan.staging_table).await;
                result
            }
            Err(e) => {
                if self.options.keep_staging_on_failure {
                    warn!(table = %plan.staging_table, "Keeping staging table for inspection");
                } else {
                    discard_staging(self.pool(), &plan.staging_table).await;
                }
                return Err(e);
            }
        };

        self.schema_cache.invalidate(&canonical_table).await;

        let metadata = TxOutcome::from_result(self.refresh_metadata(&dataset).await);
        if let TxOutcome::RolledBack { cause } = &metadata {
            warn!(cause = %cause, "Metadata refresh failed after data commit; re-run it");
        }

        let report = IngestReport {
            dataset,
            created: existing.is_none(),
            staged_rows,
            duplicates_removed: counts.duplicates_removed,
            null_keys_skipped: counts.null_keys_skipped,
            inserted_rows,
            metadata,
        };
        info!(
            created = report.created,
            staged = report.staged_rows,
            inserted = report.inserted_rows,
            "Ingest complete"
        );
        Ok(report)
    }

    async fn dedup_and_merge(
        &self,
        plan: &DerivationPlan,
        existing: Option<&TableSchema>,
    ) -> Result<(DedupCounts, u64)> {
        let counts = deduplicate(self.pool(), plan, self.options.dedup_policy).await?;
        let inserted = match existing {
            Some(schema) => insert_into(self.pool(), plan, schema).await?,
            None => create_new(self.pool(), plan).await?,
        };
        Ok((counts, inserted))
    }

    /// Recompute a dataset's extent and store it.
    pub async fn refresh_metadata(&self, dataset_name: &str) -> Result<DatasetExtent> {
        let descriptor = self.load_descriptor(dataset_name).await?;
        let extent = compute_extent(self.pool(), &descriptor.canonical_table()).await?;
        self.catalog.update_after_ingest(dataset_name, &extent).await?;
        Ok(extent)
    }

    /// Drop a dataset's canonical table and metadata record.
    #[instrument(skip(self))]
    pub async fn remove_dataset(&self, dataset_name: &str) -> Result<()> {
        let descriptor = self.load_descriptor(dataset_name).await?;
        self.catalog.drop_dataset(dataset_name).await?;
        self.schema_cache.invalidate(&descriptor.canonical_table()).await;
        Ok(())
    }

    /// Re-ingest every approved dataset refreshed at `update_freq`.
    ///
    /// Different datasets run concurrently up to `parallel_ingests`; a failure
    /// is logged and does not stop the others.
    #[instrument(skip(self))]
    pub async fn update_by_frequency(
        &self,
        update_freq: &str,
    ) -> Result<Vec<(String, Result<IngestReport>)>> {
        let datasets = self.catalog.list_by_frequency(update_freq).await?;
        info!(count = datasets.len(), "Updating datasets");

        let results: Vec<_> = stream::iter(datasets)
            .map(|descriptor| async move {
                let result = self.ingest(&descriptor, None).await;
                if let Err(e) = &result {
                    error!(dataset = %descriptor.dataset_name, error = %e, "Dataset update failed");
                }
                (descriptor.dataset_name, result)
            })
            .buffer_unordered(self.options.parallel_ingests.max(1))
            .collect()
            .await;

        Ok(results)
    }
}
