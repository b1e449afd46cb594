//! End-to-end ingest tests against a PostGIS database.
//!
//! Skipped unless `TEST_DATABASE_URL` is set.

use chrono::NaiveDate;
use ingestion::staging::load_staging;
use ingestion::{infer_columns, DedupPolicy, EtlError, EtlOptions, PointEtl};
use sqlx::PgPool;
use storage::{Catalog, DatasetDescriptor, MetadataStore, SchemaCache};
use tempfile::TempDir;
use test_utils::{
    lat_lon_descriptor, location_descriptor, require_database, unique_dataset_name, write_csv,
    DUPLICATE_KEYS_CSV, EXTRA_COLUMN_CSV, LOCATION_EVENTS_CSV, RADIO_EVENTS_CSV,
};

struct Harness {
    catalog: Catalog,
    etl: PointEtl,
    dir: TempDir,
}

impl Harness {
    async fn new(url: &str, policy: DedupPolicy) -> Self {
        let catalog = Catalog::connect(url, 4).await.expect("connect");
        catalog.migrate().await.expect("migrate");
        let options = EtlOptions {
            dedup_policy: policy,
            ..EtlOptions::default()
        };
        let etl = PointEtl::new(catalog.clone(), SchemaCache::new(16), options);
        Self {
            catalog,
            etl,
            dir: TempDir::new().expect("tempdir"),
        }
    }

    fn pool(&self) -> &PgPool {
        self.catalog.pool()
    }

    async fn register(&self, descriptor: &DatasetDescriptor) {
        self.catalog.register(descriptor).await.expect("register");
    }

    async fn count(&self, sql: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(sql)
            .fetch_one(self.pool())
            .await
            .expect("count query")
    }

    async fn table_exists(&self, table: &str) -> bool {
        sqlx::query_scalar::<_, bool>("SELECT to_regclass($1) IS NOT NULL")
            .bind(table)
            .fetch_one(self.pool())
            .await
            .expect("to_regclass")
    }

    async fn cleanup(&self, dataset: &str) {
        let _ = self.catalog.drop_dataset(dataset).await;
    }
}

#[tokio::test]
async fn test_first_ingest_creates_canonical_table() {
    let url = require_database!();
    let h = Harness::new(&url, DedupPolicy::KeepFirst).await;
    let name = unique_dataset_name("radio_events");
    let path = write_csv(&h.dir, "events.csv", RADIO_EVENTS_CSV);
    let descriptor = lat_lon_descriptor(&name, path.to_str().unwrap());
    h.register(&descriptor).await;

    let report = h.etl.add(&name, None).await.expect("add");
    let table = descriptor.canonical_table();

    assert!(report.created);
    assert_eq!(report.staged_rows, 5);
    assert_eq!(report.inserted_rows, 5);
    assert_eq!(report.duplicates_removed, 0);
    assert_eq!(h.count(&format!("SELECT COUNT(*) FROM \"{}\"", table)).await, 5);
    assert_eq!(
        h.count(&format!("SELECT COUNT(*) FROM \"{}\" WHERE point_date IS NULL", table)).await,
        0
    );

    // The (0, 0) row keeps its data but loses its geometry.
    let null_geom: Vec<String> =
        sqlx::query_scalar(&format!("SELECT point_id FROM \"{}\" WHERE geom IS NULL", table))
            .fetch_all(h.pool())
            .await
            .unwrap();
    assert_eq!(null_geom, vec!["Community Calendar".to_string()]);

    // Staging is gone after a successful attempt.
    assert!(!h.table_exists(&descriptor.staging_table()).await);

    let extent = report.metadata.committed().expect("metadata committed");
    assert_eq!(
        extent.obs_from.map(|t| t.date()),
        NaiveDate::from_ymd_opt(2015, 6, 1)
    );
    let bbox = extent.bbox.expect("bbox");
    assert!(bbox.min_x < -87.64 && bbox.max_x > -87.63);
    assert!(bbox.min_y > 41.0, "sentinel point must not widen the bbox");

    let stored = h.catalog.get_by_name(&name).await.unwrap().unwrap();
    assert!(stored.is_ingested);
    assert_eq!(stored.obs_to, NaiveDate::from_ymd_opt(2015, 6, 5));

    h.cleanup(&name).await;
}

#[tokio::test]
async fn test_reingest_is_idempotent() {
    let url = require_database!();
    let h = Harness::new(&url, DedupPolicy::KeepFirst).await;
    let name = unique_dataset_name("radio_events");
    let path = write_csv(&h.dir, "events.csv", RADIO_EVENTS_CSV);
    let descriptor = lat_lon_descriptor(&name, path.to_str().unwrap());
    h.register(&descriptor).await;

    h.etl.add(&name, None).await.expect("add");
    let report = h.etl.update(&name, None).await.expect("update");

    assert!(!report.created);
    assert_eq!(report.staged_rows, 5);
    assert_eq!(report.inserted_rows, 0);
    assert_eq!(
        h.count(&format!("SELECT COUNT(*) FROM \"{}\"", descriptor.canonical_table())).await,
        5
    );

    // A second add is refused once the table exists.
    assert!(matches!(
        h.etl.add(&name, None).await,
        Err(EtlError::Configuration { .. })
    ));

    h.cleanup(&name).await;
}

async fn surviving_host(policy: DedupPolicy) -> Option<String> {
    let url = test_utils::test_database_url()?;
    let h = Harness::new(&url, policy).await;
    let name = unique_dataset_name("dup_events");
    let path = write_csv(&h.dir, "dups.csv", DUPLICATE_KEYS_CSV);
    let descriptor = lat_lon_descriptor(&name, path.to_str().unwrap());
    h.register(&descriptor).await;

    let report = h.etl.add(&name, None).await.expect("add");
    assert_eq!(report.staged_rows, 2);
    assert_eq!(report.duplicates_removed, 1);
    assert_eq!(report.inserted_rows, 1);

    let host: String = sqlx::query_scalar(&format!(
        "SELECT host FROM \"{}\" WHERE point_id = 'Weather Report'",
        descriptor.canonical_table()
    ))
    .fetch_one(h.pool())
    .await
    .unwrap();

    h.cleanup(&name).await;
    Some(host)
}

#[tokio::test]
async fn test_dedup_keep_first() {
    let _url = require_database!();
    assert_eq!(surviving_host(DedupPolicy::KeepFirst).await.as_deref(), Some("Cecil"));
}

#[tokio::test]
async fn test_dedup_keep_last() {
    let _url = require_database!();
    assert_eq!(surviving_host(DedupPolicy::KeepLast).await.as_deref(), Some("Kevin"));
}

#[tokio::test]
async fn test_staging_line_numbers_follow_file_order() {
    let url = require_database!();
    let h = Harness::new(&url, DedupPolicy::KeepFirst).await;
    let name = unique_dataset_name("staging_order");
    let path = write_csv(&h.dir, "events.csv", RADIO_EVENTS_CSV);
    let columns = infer_columns(&mut std::fs::File::open(&path).unwrap()).unwrap();
    let table = format!("staging_{}", name);

    let rows = load_staging(h.pool(), &table, &columns, &path).await.unwrap();
    assert_eq!(rows, 5);

    let loaded: Vec<(i32, String)> = sqlx::query_as(&format!(
        "SELECT line_num, event_name FROM \"{}\" ORDER BY line_num",
        table
    ))
    .fetch_all(h.pool())
    .await
    .unwrap();
    let expected: Vec<(i32, String)> = RADIO_EVENTS_CSV
        .lines()
        .skip(1)
        .enumerate()
        .map(|(i, line)| (i as i32 + 1, line.split(',').nth(2).unwrap().to_string()))
        .collect();
    assert_eq!(loaded, expected);

    ingestion::staging::discard_staging(h.pool(), &table).await;
}

#[tokio::test]
async fn test_malformed_source_leaves_nothing_behind() {
    let url = require_database!();
    let h = Harness::new(&url, DedupPolicy::KeepFirst).await;
    let name = unique_dataset_name("bad_events");
    let path = write_csv(&h.dir, "bad.csv", EXTRA_COLUMN_CSV);
    let descriptor = lat_lon_descriptor(&name, path.to_str().unwrap());
    h.register(&descriptor).await;

    let err = h.etl.add(&name, None).await.unwrap_err();
    assert!(matches!(err, EtlError::Load { .. }), "got {:?}", err);
    assert!(!h.table_exists(&descriptor.staging_table()).await);
    assert!(!h.table_exists(&descriptor.canonical_table()).await);

    h.cleanup(&name).await;
}

#[tokio::test]
async fn test_combined_location_column() {
    let url = require_database!();
    let h = Harness::new(&url, DedupPolicy::KeepFirst).await;
    let name = unique_dataset_name("located_events");
    let path = write_csv(&h.dir, "located.csv", LOCATION_EVENTS_CSV);
    let descriptor = location_descriptor(&name, path.to_str().unwrap());
    h.register(&descriptor).await;

    let report = h.etl.add(&name, None).await.expect("add");
    assert_eq!(report.inserted_rows, 3);

    let (x, y): (f64, f64) = sqlx::query_as(&format!(
        "SELECT ST_X(geom), ST_Y(geom) FROM \"{}\" WHERE point_id = 'Station Identification'",
        descriptor.canonical_table()
    ))
    .fetch_one(h.pool())
    .await
    .unwrap();
    test_utils::assert_approx_eq!(x, -87.63, 1e-9);
    test_utils::assert_approx_eq!(y, 41.88, 1e-9);

    // Empty location yields no geometry rather than a failure.
    assert_eq!(
        h.count(&format!(
            "SELECT COUNT(*) FROM \"{}\" WHERE geom IS NULL",
            descriptor.canonical_table()
        ))
        .await,
        1
    );

    h.cleanup(&name).await;
}

#[tokio::test]
async fn test_missing_location_configuration() {
    let url = require_database!();
    let h = Harness::new(&url, DedupPolicy::KeepFirst).await;
    let name = unique_dataset_name("unlocated");
    let path = write_csv(&h.dir, "events.csv", RADIO_EVENTS_CSV);
    let mut descriptor = DatasetDescriptor::new(&name, path.to_str().unwrap(), "event_name", "date");
    descriptor.dataset_name = name.clone();
    h.register(&descriptor).await;

    let err = h.etl.add(&name, None).await.unwrap_err();
    assert!(matches!(err, EtlError::Configuration { .. }));

    h.cleanup(&name).await;
}

#[tokio::test]
async fn test_remove_dataset() {
    let url = require_database!();
    let h = Harness::new(&url, DedupPolicy::KeepFirst).await;
    let name = unique_dataset_name("doomed");
    let path = write_csv(&h.dir, "events.csv", RADIO_EVENTS_CSV);
    let descriptor = lat_lon_descriptor(&name, path.to_str().unwrap());
    h.register(&descriptor).await;
    h.etl.add(&name, None).await.expect("add");

    h.etl.remove_dataset(&name).await.expect("remove");
    assert!(!h.table_exists(&descriptor.canonical_table()).await);
    assert!(h.catalog.get_by_name(&name).await.unwrap().is_none());
}
