//! Dataset descriptors: what the pipeline needs to know about a dataset.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use point_common::{
    canonical_table_name, slugify, staging_table_name, BoundingBox, ColumnType,
};

/// Default update frequency for newly registered datasets.
pub const DEFAULT_UPDATE_FREQ: &str = "yearly";

/// Identifier of a source URL: first 32 hex characters of its SHA-256.
pub fn url_hash(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(32);
    hash
}

/// A contributor-supplied column type hint, stored as JSON with the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributedType {
    pub field_name: String,
    pub data_type: String,
}

impl ContributedType {
    pub fn new(field_name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            data_type: data_type.into(),
        }
    }

    pub fn column_type(&self) -> Option<ColumnType> {
        ColumnType::from_hint(&self.data_type)
    }
}

/// How a point geometry is derived from a dataset's source columns.
///
/// Column names here are already slugged to match staging columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationStrategy {
    /// Separate latitude and longitude columns.
    LatLon { latitude: String, longitude: String },
    /// One text column holding a `(lat, lon)` pair.
    Combined { location: String },
}

/// Metadata record for one point dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub dataset_name: String,
    pub human_name: String,
    pub description: Option<String>,
    pub source_url: String,
    pub source_url_hash: String,
    pub attribution: Option<String>,
    pub update_freq: String,
    /// Source field uniquely identifying a record.
    pub business_key: String,
    /// Source field holding the observation date.
    pub observed_date: String,
    pub latitude: Option<String>,
    pub longitude: Option<String>,
    pub location: Option<String>,
    pub approved_status: bool,
    pub contributed_data_types: Option<Vec<ContributedType>>,
    pub obs_from: Option<NaiveDate>,
    pub obs_to: Option<NaiveDate>,
    pub bbox: Option<BoundingBox>,
    pub date_added: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
    pub is_ingested: bool,
}

impl DatasetDescriptor {
    /// Describe a new dataset. The name is the slug of `human_name`.
    pub fn new(
        human_name: impl Into<String>,
        source_url: impl Into<String>,
        business_key: impl Into<String>,
        observed_date: impl Into<String>,
    ) -> Self {
        let human_name = human_name.into();
        let source_url = source_url.into();
        Self {
            dataset_name: slugify(&human_name),
            source_url_hash: url_hash(&source_url),
            human_name,
            description: None,
            source_url,
            attribution: None,
            update_freq: DEFAULT_UPDATE_FREQ.to_string(),
            business_key: business_key.into(),
            observed_date: observed_date.into(),
            latitude: None,
            longitude: None,
            location: None,
            approved_status: false,
            contributed_data_types: None,
            obs_from: None,
            obs_to: None,
            bbox: None,
            date_added: None,
            last_update: None,
            is_ingested: false,
        }
    }

    pub fn with_lat_lon(mut self, latitude: impl Into<String>, longitude: impl Into<String>) -> Self {
        self.latitude = Some(latitude.into());
        self.longitude = Some(longitude.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_update_freq(mut self, update_freq: impl Into<String>) -> Self {
        self.update_freq = update_freq.into();
        self
    }

    pub fn with_contributed_types(mut self, types: Vec<ContributedType>) -> Self {
        self.contributed_data_types = Some(types);
        self
    }

    pub fn approved(mut self) -> Self {
        self.approved_status = true;
        self
    }

    pub fn canonical_table(&self) -> String {
        canonical_table_name(&self.dataset_name)
    }

    pub fn staging_table(&self) -> String {
        staging_table_name(&self.dataset_name)
    }

    /// Staging column holding the business key.
    pub fn business_key_column(&self) -> String {
        slugify(&self.business_key)
    }

    /// Staging column holding the observation date.
    pub fn observed_date_column(&self) -> String {
        slugify(&self.observed_date)
    }

    /// Geometry derivation strategy. Lat/lon columns win over a combined
    /// location column; `None` means geometry cannot be derived.
    pub fn location_strategy(&self) -> Option<LocationStrategy> {
        let present = |field: &Option<String>| {
            field
                .as_deref()
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(slugify)
        };

        match (present(&self.latitude), present(&self.longitude)) {
            (Some(latitude), Some(longitude)) => {
                Some(LocationStrategy::LatLon { latitude, longitude })
            }
            _ => present(&self.location).map(|location| LocationStrategy::Combined { location }),
        }
    }

    /// Whether the declared temporal extent can overlap `[start, end]`.
    ///
    /// Datasets with no recorded extent are always candidates.
    pub fn may_overlap_dates(&self, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        let starts_after_window = self.obs_from.is_some_and(|from| from > end.date());
        let ends_before_window = self.obs_to.is_some_and(|to| to < start.date());
        !(starts_after_window || ends_before_window)
    }

    /// Whether the recorded bounding box can intersect `area`.
    ///
    /// Datasets with no recorded bounding box are always candidates.
    pub fn may_intersect(&self, area: &BoundingBox) -> bool {
        self.bbox.map_or(true, |bbox| bbox.intersects(area))
    }
}

/// Temporal and spatial extent of a canonical table, recomputed after merges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DatasetExtent {
    pub obs_from: Option<NaiveDateTime>,
    pub obs_to: Option<NaiveDateTime>,
    pub bbox: Option<BoundingBox>,
}
