//! Time-series aggregation across point datasets.

use chrono::NaiveDateTime;
use point_common::{quote_ident, AggUnit, WithinFilter, GEOM_COLUMN, POINT_DATE_COLUMN};
use serde::Serialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use storage::{DatasetDescriptor, MetadataStore};
use tracing::debug;

use crate::errors::{QueryError, QueryResult};
use crate::params::{NamedParams, QueryEcho};
use crate::predicate::push_within;

/// Count of one dataset's rows in one time bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeseriesEntry {
    pub dataset_name: String,
    /// Start of the bucket.
    pub bucket: NaiveDateTime,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeseriesResponse {
    /// Per-dataset entries, concatenated in candidate order. Empty buckets
    /// are absent rather than zero.
    pub entries: Vec<TimeseriesEntry>,
    pub query: QueryEcho,
    pub warnings: Vec<String>,
}

/// Datasets that can possibly match the date window and area.
///
/// Uses recorded metadata only. A dataset with no recorded extent is kept;
/// one that was never ingested has no rows and is dropped.
pub async fn narrow_candidates(
    store: &dyn MetadataStore,
    requested: Option<&[String]>,
    start: NaiveDateTime,
    end: NaiveDateTime,
    within: Option<&WithinFilter>,
) -> QueryResult<Vec<DatasetDescriptor>> {
    let datasets = match requested {
        Some(names) => {
            let mut found = Vec::with_capacity(names.len());
            for name in names {
                let descriptor = store
                    .get_by_name(name)
                    .await?
                    .ok_or_else(|| QueryError::DatasetNotFound(name.clone()))?;
                found.push(descriptor);
            }
            found
        }
        None => store.list_approved().await?,
    };

    let area = within.and_then(WithinFilter::envelope);
    let total = datasets.len();
    let candidates: Vec<DatasetDescriptor> = datasets
        .into_iter()
        .filter(|d| d.is_ingested)
        .filter(|d| d.may_overlap_dates(start, end))
        .filter(|d| area.as_ref().map_or(true, |a| d.may_intersect(a)))
        .collect();

    debug!(total, candidates = candidates.len(), "Narrowed candidate datasets");
    Ok(candidates)
}

/// Bucketed count query for one canonical table.
///
/// The window is open at both ends.
pub fn timeseries_query(
    canonical_table: &str,
    agg: AggUnit,
    start: NaiveDateTime,
    end: NaiveDateTime,
    within: Option<&WithinFilter>,
) -> QueryBuilder<'static, Postgres> {
    let point_date = quote_ident(POINT_DATE_COLUMN);
    let mut qb = QueryBuilder::new(format!(
        "SELECT date_trunc('{}', {pd}) AS bucket, COUNT(*) AS count FROM {} WHERE {pd} > ",
        agg.as_str(),
        quote_ident(canonical_table),
        pd = point_date
    ));
    qb.push_bind(start);
    qb.push(format!(" AND {} < ", point_date));
    qb.push_bind(end);
    if let Some(filter) = within {
        qb.push(" AND ");
        push_within(&mut qb, &quote_ident(GEOM_COLUMN), filter);
    }
    qb.push(" GROUP BY bucket ORDER BY bucket");
    qb
}

/// Bucketed counts of one dataset.
pub async fn dataset_timeseries(
    pool: &PgPool,
    descriptor: &DatasetDescriptor,
    named: &NamedParams,
) -> QueryResult<Vec<TimeseriesEntry>> {
    let mut qb = timeseries_query(
        &descriptor.canonical_table(),
        named.agg,
        named.start,
        named.end,
        named.within.as_ref(),
    );
    let rows: Vec<(NaiveDateTime, i64)> = qb.build_query_as().fetch_all(pool).await?;

    Ok(rows
        .into_iter()
        .map(|(bucket, count)| TimeseriesEntry {
            dataset_name: descriptor.dataset_name.clone(),
            bucket,
            count,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use point_common::{extract_first_geometry_fragment, BoundingBox};
    use storage::DatasetExtent;
    use test_utils::MemoryMetaStore;

    fn day(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn ingested(name: &str, from: NaiveDateTime, to: NaiveDateTime, bbox: BoundingBox) -> DatasetDescriptor {
        let mut d = DatasetDescriptor::new(name, format!("/tmp/{}.csv", name), "id", "date")
            .with_lat_lon("lat", "lon")
            .approved();
        d.dataset_name = name.to_string();
        d.is_ingested = true;
        d.obs_from = Some(from.date());
        d.obs_to = Some(to.date());
        d.bbox = Some(bbox);
        d
    }

    fn chicago() -> BoundingBox {
        BoundingBox::new(-87.9, 41.6, -87.5, 42.0)
    }

    fn store() -> MemoryMetaStore {
        let mut never = DatasetDescriptor::new("pending", "/tmp/p.csv", "id", "date").approved();
        never.dataset_name = "pending".to_string();
        MemoryMetaStore::with_datasets(vec![
            ingested("events_2015", day(2015, 6, 1), day(2015, 6, 5), chicago()),
            ingested("events_2016", day(2016, 1, 10), day(2016, 1, 11), chicago()),
            ingested(
                "paris_events",
                day(2015, 6, 1),
                day(2015, 6, 5),
                BoundingBox::new(2.2, 48.8, 2.4, 48.9),
            ),
            never,
        ])
    }

    fn names(datasets: &[DatasetDescriptor]) -> Vec<&str> {
        datasets.iter().map(|d| d.dataset_name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_narrow_by_date_window() {
        let store = store();
        let found = narrow_candidates(&store, None, day(2015, 1, 1), day(2015, 12, 31), None)
            .await
            .unwrap();
        assert_eq!(names(&found), vec!["events_2015", "paris_events"]);
    }

    #[tokio::test]
    async fn test_narrow_by_area() {
        let store = store();
        let area = extract_first_geometry_fragment(
            r#"{"type":"Polygon","coordinates":[[[-87.7,41.8],[-87.6,41.8],[-87.6,41.9],[-87.7,41.8]]]}"#,
        )
        .unwrap();
        let within = WithinFilter::new(area, 100.0);
        let found = narrow_candidates(&store, None, day(2015, 1, 1), day(2016, 12, 31), Some(&within))
            .await
            .unwrap();
        assert_eq!(names(&found), vec!["events_2015", "events_2016"]);
    }

    #[tokio::test]
    async fn test_requested_unknown_dataset() {
        let store = store();
        let requested = vec!["missing".to_string()];
        let err = narrow_candidates(&store, Some(&requested), day(2015, 1, 1), day(2016, 1, 1), None)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_unknown_extent_is_kept() {
        let mut unknown = ingested("no_extent", day(2015, 1, 1), day(2015, 1, 1), chicago());
        unknown.obs_from = None;
        unknown.obs_to = None;
        unknown.bbox = None;
        let store = MemoryMetaStore::with_datasets(vec![unknown]);
        let found = narrow_candidates(&store, None, day(2020, 1, 1), day(2020, 2, 1), None)
            .await
            .unwrap();
        assert_eq!(names(&found), vec!["no_extent"]);
    }

    #[tokio::test]
    async fn test_extent_update_feeds_narrowing() {
        let store = store();
        store
            .update_after_ingest(
                "events_2016",
                &DatasetExtent {
                    obs_from: Some(day(2014, 1, 1)),
                    obs_to: Some(day(2016, 1, 11)),
                    bbox: Some(chicago()),
                },
            )
            .await
            .unwrap();
        let found = narrow_candidates(&store, None, day(2015, 1, 1), day(2015, 2, 1), None)
            .await
            .unwrap();
        assert!(names(&found).contains(&"events_2016"));
    }

    #[test]
    fn test_timeseries_query_sql() {
        let qb = timeseries_query("dat_events", AggUnit::Week, day(2015, 1, 1), day(2016, 1, 1), None);
        assert_eq!(
            qb.sql(),
            "SELECT date_trunc('week', \"point_date\") AS bucket, COUNT(*) AS count \
             FROM \"dat_events\" WHERE \"point_date\" > $1 AND \"point_date\" < $2 \
             GROUP BY bucket ORDER BY bucket"
        );
    }

    #[test]
    fn test_timeseries_query_with_area() {
        let area = extract_first_geometry_fragment(r#"{"type":"Point","coordinates":[-87.6,41.8]}"#).unwrap();
        let within = WithinFilter::new(area, 100.0);
        let qb = timeseries_query("dat_events", AggUnit::Day, day(2015, 1, 1), day(2016, 1, 1), Some(&within));
        assert!(qb
            .sql()
            .contains("AND ST_Within(\"geom\", ST_SetSRID(ST_GeomFromGeoJSON($3), 4326)) GROUP BY"));
    }
}
