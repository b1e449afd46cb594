//! In-memory `MetadataStore` for tests that do not need Postgres.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use storage::{DatasetDescriptor, DatasetExtent, MetadataStore, StorageError, StorageResult};

#[derive(Default)]
pub struct MemoryMetaStore {
    records: Mutex<BTreeMap<String, DatasetDescriptor>>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store already holding `descriptors`.
    pub fn with_datasets(descriptors: impl IntoIterator<Item = DatasetDescriptor>) -> Self {
        let store = Self::new();
        {
            let mut records = store.records.lock().expect("store lock poisoned");
            for d in descriptors {
                records.insert(d.dataset_name.clone(), d);
            }
        }
        store
    }

    fn records(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, DatasetDescriptor>> {
        self.records.lock().expect("store lock poisoned")
    }
}

#[async_trait]
impl MetadataStore for MemoryMetaStore {
    async fn migrate(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn get_by_name(&self, dataset_name: &str) -> StorageResult<Option<DatasetDescriptor>> {
        Ok(self.records().get(dataset_name).cloned())
    }

    async fn get_by_url_hash(&self, url_hash: &str) -> StorageResult<Option<DatasetDescriptor>> {
        Ok(self
            .records()
            .values()
            .find(|d| d.source_url_hash == url_hash)
            .cloned())
    }

    async fn list_approved(&self) -> StorageResult<Vec<DatasetDescriptor>> {
        Ok(self
            .records()
            .values()
            .filter(|d| d.approved_status)
            .cloned()
            .collect())
    }

    async fn list_by_frequency(&self, update_freq: &str) -> StorageResult<Vec<DatasetDescriptor>> {
        Ok(self
            .records()
            .values()
            .filter(|d| d.approved_status && d.update_freq == update_freq)
            .cloned()
            .collect())
    }

    async fn register(&self, descriptor: &DatasetDescriptor) -> StorageResult<()> {
        let mut records = self.records();
        let taken = records.contains_key(&descriptor.dataset_name)
            || records
                .values()
                .any(|d| d.source_url_hash == descriptor.source_url_hash);
        if taken {
            return Err(StorageError::DatasetExists(descriptor.dataset_name.clone()));
        }
        records.insert(descriptor.dataset_name.clone(), descriptor.clone());
        Ok(())
    }

    async fn update_after_ingest(
        &self,
        dataset_name: &str,
        extent: &DatasetExtent,
    ) -> StorageResult<()> {
        let mut records = self.records();
        let record = records
            .get_mut(dataset_name)
            .ok_or_else(|| StorageError::DatasetNotFound(dataset_name.to_string()))?;
        record.obs_from = extent.obs_from.map(|t| t.date());
        record.obs_to = extent.obs_to.map(|t| t.date());
        record.bbox = extent.bbox;
        record.is_ingested = true;
        Ok(())
    }

    async fn remove(&self, dataset_name: &str) -> StorageResult<bool> {
        Ok(self.records().remove(dataset_name).is_some())
    }
}
