//! In-memory LRU cache of discovered table schemas.
//!
//! Query requests resolve a dataset's canonical schema on every call, so the
//! discovered layouts are kept here. The cache is owned by whoever builds the
//! pipeline or query engine and passed in; nothing global. Merges change a
//! table's row set but can also create it, so the ingest path invalidates the
//! dataset's entry after every successful merge.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use sqlx::PgPool;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StorageResult;
use crate::schema::{discover_table_schema, TableSchema};

/// Shared, explicitly invalidated cache of canonical table schemas.
#[derive(Clone)]
pub struct SchemaCache {
    inner: Arc<Mutex<LruCache<String, Arc<TableSchema>>>>,
    stats: Arc<SchemaCacheStats>,
}

#[derive(Default)]
pub struct SchemaCacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub invalidations: AtomicU64,
}

impl SchemaCache {
    /// Create a cache holding at most `capacity` schemas (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(capacity))),
            stats: Arc::new(SchemaCacheStats::default()),
        }
    }

    pub async fn get(&self, table_name: &str) -> Option<Arc<TableSchema>> {
        let mut cache = self.inner.lock().await;
        match cache.get(table_name) {
            Some(schema) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(schema.clone())
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn insert(&self, schema: TableSchema) -> Arc<TableSchema> {
        let schema = Arc::new(schema);
        self.inner
            .lock()
            .await
            .put(schema.table_name.clone(), schema.clone());
        schema
    }

    /// Drop one table's entry. Returns whether anything was cached.
    pub async fn invalidate(&self, table_name: &str) -> bool {
        self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
        let removed = self.inner.lock().await.pop(table_name).is_some();
        debug!(table = %table_name, removed, "Schema cache invalidated");
        removed
    }

    /// Drop every entry.
    pub async fn flush(&self) {
        self.inner.lock().await.clear();
        debug!("Schema cache flushed");
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn stats(&self) -> &SchemaCacheStats {
        &self.stats
    }

    /// Cached schema, or discover and cache it. Missing tables are not cached.
    pub async fn get_or_discover(
        &self,
        pool: &PgPool,
        table_name: &str,
    ) -> StorageResult<Option<Arc<TableSchema>>> {
        if let Some(schema) = self.get(table_name).await {
            return Ok(Some(schema));
        }

        match discover_table_schema(pool, table_name).await? {
            Some(schema) => Ok(Some(self.insert(schema).await)),
            None => Ok(None),
        }
    }
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use point_common::{ColumnDescriptor, ColumnType};

    fn schema(name: &str) -> TableSchema {
        TableSchema::new(
            name,
            vec![ColumnDescriptor::new("point_id", ColumnType::String, false)],
        )
    }

    #[tokio::test]
    async fn test_insert_get_invalidate() {
        let cache = SchemaCache::new(4);
        assert!(cache.get("dat_a").await.is_none());

        cache.insert(schema("dat_a")).await;
        assert_eq!(cache.get("dat_a").await.unwrap().table_name, "dat_a");

        assert!(cache.invalidate("dat_a").await);
        assert!(!cache.invalidate("dat_a").await);
        assert!(cache.get("dat_a").await.is_none());

        assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 1);
        assert_eq!(cache.stats().misses.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_lru_eviction_and_flush() {
        let cache = SchemaCache::new(2);
        cache.insert(schema("dat_a")).await;
        cache.insert(schema("dat_b")).await;
        cache.get("dat_a").await;
        cache.insert(schema("dat_c")).await;

        assert!(cache.get("dat_b").await.is_none());
        assert!(cache.get("dat_a").await.is_some());
        assert_eq!(cache.len().await, 2);

        cache.flush().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_zero_capacity_is_clamped() {
        let cache = SchemaCache::new(0);
        cache.insert(schema("dat_a")).await;
        assert_eq!(cache.len().await, 1);
    }
}
