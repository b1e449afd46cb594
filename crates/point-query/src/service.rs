//! Read path entry points.

use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use sqlx::PgPool;
use storage::{MetadataStore, SchemaCache};
use tracing::{info, instrument};

use crate::detail::{detail_query, DetailResponse};
use crate::errors::{QueryError, QueryResult};
use crate::params::{NamedParams, RawParams, DATASET_NAME};
use crate::predicate::compile_filters;
use crate::timeseries::{dataset_timeseries, narrow_candidates, TimeseriesEntry, TimeseriesResponse};

/// Per-request fan-out across candidate datasets.
pub const DEFAULT_QUERY_CONCURRENCY: usize = 4;

/// Answers time-series and detail queries.
///
/// Holds no per-request state; share one instance across requests.
#[derive(Clone)]
pub struct PointQuery {
    store: Arc<dyn MetadataStore>,
    pool: PgPool,
    schema_cache: SchemaCache,
    concurrency: usize,
}

impl PointQuery {
    pub fn new(store: Arc<dyn MetadataStore>, pool: PgPool, schema_cache: SchemaCache) -> Self {
        Self {
            store,
            pool,
            schema_cache,
            concurrency: DEFAULT_QUERY_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn schema_cache(&self) -> &SchemaCache {
        &self.schema_cache
    }

    pub async fn timeseries(&self, raw: RawParams) -> QueryResult<TimeseriesResponse> {
        self.timeseries_at(raw, Utc::now().naive_utc()).await
    }

    /// Bucketed counts per candidate dataset, with `now` anchoring the
    /// default date window.
    #[instrument(skip(self, raw))]
    pub async fn timeseries_at(
        &self,
        mut raw: RawParams,
        now: NaiveDateTime,
    ) -> QueryResult<TimeseriesResponse> {
        let named = NamedParams::extract(&mut raw, now)?;

        // Field filters need one schema; a time series spans many.
        let warnings: Vec<String> = raw
            .keys()
            .map(|key| format!("Unused parameter '{}'", key))
            .collect();

        let candidates = narrow_candidates(
            self.store.as_ref(),
            named.datasets.as_deref(),
            named.start,
            named.end,
            named.within.as_ref(),
        )
        .await?;

        let per_dataset: Vec<Vec<TimeseriesEntry>> = stream::iter(candidates.iter())
            .map(|descriptor| dataset_timeseries(&self.pool, descriptor, &named))
            .buffered(self.concurrency)
            .try_collect()
            .await?;
        let entries: Vec<TimeseriesEntry> = per_dataset.into_iter().flatten().collect();

        info!(
            datasets = candidates.len(),
            entries = entries.len(),
            agg = %named.agg,
            "Time series computed"
        );

        Ok(TimeseriesResponse {
            entries,
            query: named.echo(),
            warnings,
        })
    }

    pub async fn detail(&self, raw: RawParams) -> QueryResult<DetailResponse> {
        self.detail_at(raw, Utc::now().naive_utc()).await
    }

    /// Paged rows of the single dataset named by `dataset_name`.
    #[instrument(skip(self, raw))]
    pub async fn detail_at(&self, mut raw: RawParams, now: NaiveDateTime) -> QueryResult<DetailResponse> {
        let named = NamedParams::extract(&mut raw, now)?;

        let dataset_name = match named.datasets.as_deref() {
            Some([name]) => name.clone(),
            _ => {
                return Err(QueryError::validation(
                    DATASET_NAME,
                    "exactly one dataset is required",
                ))
            }
        };

        let descriptor = self
            .store
            .get_by_name(&dataset_name)
            .await?
            .ok_or_else(|| QueryError::DatasetNotFound(dataset_name.clone()))?;
        let schema = self
            .schema_cache
            .get_or_discover(&self.pool, &descriptor.canonical_table())
            .await?
            .ok_or_else(|| QueryError::DatasetNotFound(dataset_name.clone()))?;

        let filters = compile_filters(&raw, &schema, named.buffer_meters)?;
        let mut qb = detail_query(&schema, &named, &filters);
        let rows: Vec<serde_json::Value> = qb.build_query_scalar().fetch_all(&self.pool).await?;

        info!(dataset = %dataset_name, rows = rows.len(), "Detail query served");

        Ok(DetailResponse {
            dataset_name,
            rows,
            offset: named.offset,
            limit: named.limit,
            query: named.echo(),
            warnings: filters.warnings,
        })
    }
}
