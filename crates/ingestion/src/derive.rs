//! Deduplication and derivation over a loaded staging table.
//!
//! Dedup runs as `DELETE`s against the staging table itself, so it is
//! irreversible for that staging instance. Derivation is expressed as SQL
//! select expressions that the merge step embeds in its insert-from-select:
//! `point_date` from the observed-date column, `geom` from either a lat/lon
//! pair or a combined `(lat, lon)` location string.

use point_common::{
    quote_ident, ColumnDescriptor, GEOM_COLUMN, IDENTITY_COLUMN, LINE_NUMBER_COLUMN,
    POINT_DATE_COLUMN, SRID,
};
use sqlx::PgPool;
use storage::{DatasetDescriptor, LocationStrategy, TableSchema};
use tracing::{info, instrument, warn};

use crate::config::DedupPolicy;
use crate::error::{EtlError, Result};

/// Pattern pulling latitude and longitude out of `(41.88, -87.63)`.
pub const LOCATION_PATTERN: &str = r"\(([^,]+),([^)]+)\)";

/// Delete every staging row but one per business key.
pub fn dedup_sql(staging: &str, business_key: &str, policy: DedupPolicy) -> String {
    // The row that loses the comparison is the one deleted.
    let loser = match policy {
        DedupPolicy::KeepFirst => ">",
        DedupPolicy::KeepLast => "<",
    };
    let table = quote_ident(staging);
    let key = quote_ident(business_key);
    let line = quote_ident(LINE_NUMBER_COLUMN);
    format!(
        "DELETE FROM {table} s USING {table} d \
         WHERE s.{key} = d.{key} AND s.{line} {loser} d.{line}"
    )
}

/// Delete staging rows with no business key; they cannot become identities.
pub fn null_key_sql(staging: &str, business_key: &str) -> String {
    format!(
        "DELETE FROM {} WHERE {} IS NULL",
        quote_ident(staging),
        quote_ident(business_key)
    )
}

/// `point_date` expression over staging alias `s`.
pub fn point_date_expr(observed_date: &str) -> String {
    format!("CAST(s.{} AS TIMESTAMP)", quote_ident(observed_date))
}

/// `geom` expression over staging alias `s`.
pub fn geom_expr(strategy: &LocationStrategy) -> String {
    let (lon, lat) = match strategy {
        LocationStrategy::LatLon { latitude, longitude } => (
            format!("s.{}", quote_ident(longitude)),
            format!("s.{}", quote_ident(latitude)),
        ),
        LocationStrategy::Combined { location } => {
            let matched = format!(
                "regexp_match(CAST(s.{} AS TEXT), '{}')",
                quote_ident(location),
                LOCATION_PATTERN
            );
            (
                format!("TRIM(({})[2])", matched),
                format!("TRIM(({})[1])", matched),
            )
        }
    };
    format!(
        "ST_SetSRID(ST_MakePoint(CAST({} AS DOUBLE PRECISION), CAST({} AS DOUBLE PRECISION)), {})",
        lon, lat, SRID
    )
}

/// Everything needed to turn staging rows into canonical rows.
#[derive(Debug, Clone)]
pub struct DerivationPlan {
    pub dataset_name: String,
    pub staging_table: String,
    pub canonical_table: String,
    pub business_key: String,
    /// Staging data columns (without `line_num`), in staging order.
    pub columns: Vec<ColumnDescriptor>,
    pub point_date_expr: String,
    pub geom_expr: String,
}

impl DerivationPlan {
    /// Validate the descriptor against the staged columns and build the plan.
    pub fn new(descriptor: &DatasetDescriptor, columns: &[ColumnDescriptor]) -> Result<Self> {
        let dataset = &descriptor.dataset_name;
        let strategy = descriptor.location_strategy().ok_or_else(|| {
            EtlError::configuration(
                dataset,
                "neither latitude/longitude nor location field is configured",
            )
        })?;

        let business_key = descriptor.business_key_column();
        let observed_date = descriptor.observed_date_column();

        let mut required = vec![
            ("business key", business_key.clone()),
            ("observed date", observed_date.clone()),
        ];
        match &strategy {
            LocationStrategy::LatLon { latitude, longitude } => {
                required.push(("latitude", latitude.clone()));
                required.push(("longitude", longitude.clone()));
            }
            LocationStrategy::Combined { location } => {
                required.push(("location", location.clone()));
            }
        }
        for (role, name) in required {
            if !columns.iter().any(|c| c.name == name) {
                return Err(EtlError::configuration(
                    dataset,
                    format!("{} field '{}' is not a column of the source", role, name),
                ));
            }
        }

        Ok(Self {
            dataset_name: dataset.clone(),
            staging_table: descriptor.staging_table(),
            canonical_table: descriptor.canonical_table(),
            business_key,
            columns: columns.to_vec(),
            point_date_expr: point_date_expr(&observed_date),
            geom_expr: geom_expr(&strategy),
        })
    }

    /// Data columns carried into the canonical table, paired as
    /// (staging name, canonical name). The business key becomes the identity
    /// column; with an existing table, columns it lacks are left out.
    pub fn carried_columns(&self, existing: Option<&TableSchema>) -> Vec<(String, String)> {
        self.columns
            .iter()
            .map(|c| {
                let target = if c.name == self.business_key {
                    IDENTITY_COLUMN.to_string()
                } else {
                    c.name.clone()
                };
                (c.name.clone(), target)
            })
            .filter(|(_, target)| existing.map_or(true, |schema| schema.has_column(target)))
            .collect()
    }

    /// Select producing canonical rows for staging keys not yet present.
    ///
    /// Output columns follow [`Self::carried_columns`] then `point_date`, `geom`.
    pub fn select_new_rows_sql(&self, existing: Option<&TableSchema>) -> String {
        let mut select: Vec<String> = self
            .carried_columns(existing)
            .iter()
            .map(|(source, _)| format!("s.{}", quote_ident(source)))
            .collect();
        select.push(format!("{} AS {}", self.point_date_expr, POINT_DATE_COLUMN));
        select.push(format!("{} AS {}", self.geom_expr, GEOM_COLUMN));

        let mut sql = format!(
            "SELECT {} FROM {} s",
            select.join(", "),
            quote_ident(&self.staging_table)
        );

        if existing.is_some() {
            let identity = quote_ident(IDENTITY_COLUMN);
            sql.push_str(&format!(
                " LEFT JOIN {} d ON s.{} = d.{} WHERE d.{} IS NULL",
                quote_ident(&self.canonical_table),
                quote_ident(&self.business_key),
                identity,
                identity
            ));
        }

        sql
    }
}

/// Counts from deduplicating a staging table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupCounts {
    pub null_keys_skipped: u64,
    pub duplicates_removed: u64,
}

/// Drop null-key rows, then collapse duplicate business keys per `policy`.
#[instrument(skip(pool, plan), fields(dataset = %plan.dataset_name))]
pub async fn deduplicate(
    pool: &PgPool,
    plan: &DerivationPlan,
    policy: DedupPolicy,
) -> Result<DedupCounts> {
    let null_keys_skipped = sqlx::query(&null_key_sql(&plan.staging_table, &plan.business_key))
        .execute(pool)
        .await?
        .rows_affected();
    if null_keys_skipped > 0 {
        warn!(rows = null_keys_skipped, "Skipped staging rows without a business key");
    }

    let duplicates_removed =
        sqlx::query(&dedup_sql(&plan.staging_table, &plan.business_key, policy))
            .execute(pool)
            .await?
            .rows_affected();

    info!(
        duplicates_removed,
        policy = policy.as_str(),
        "Staging table deduplicated"
    );
    Ok(DedupCounts {
        null_keys_skipped,
        duplicates_removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use point_common::ColumnType;

    fn descriptor() -> DatasetDescriptor {
        DatasetDescriptor::new("Radio Events", "/tmp/events.csv", "Event Name", "Date")
            .with_lat_lon("lat", "lon")
    }

    fn staged() -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor::new("lat", ColumnType::Float, true),
            ColumnDescriptor::new("lon", ColumnType::Float, true),
            ColumnDescriptor::new("event_name", ColumnType::String, false),
            ColumnDescriptor::new("date", ColumnType::Date, false),
        ]
    }

    #[test]
    fn test_dedup_sql_policies() {
        assert_eq!(
            dedup_sql("staging_x", "event_name", DedupPolicy::KeepFirst),
            "DELETE FROM \"staging_x\" s USING \"staging_x\" d WHERE s.\"event_name\" = \
             d.\"event_name\" AND s.\"line_num\" > d.\"line_num\""
        );
        assert!(dedup_sql("staging_x", "event_name", DedupPolicy::KeepLast)
            .ends_with("s.\"line_num\" < d.\"line_num\""));
    }

    #[test]
    fn test_geom_expr_lat_lon_orders_lon_first() {
        let expr = geom_expr(&LocationStrategy::LatLon {
            latitude: "lat".into(),
            longitude: "lon".into(),
        });
        assert_eq!(
            expr,
            "ST_SetSRID(ST_MakePoint(CAST(s.\"lon\" AS DOUBLE PRECISION), \
             CAST(s.\"lat\" AS DOUBLE PRECISION)), 4326)"
        );
    }

    #[test]
    fn test_geom_expr_combined_location() {
        let expr = geom_expr(&LocationStrategy::Combined {
            location: "location".into(),
        });
        assert!(expr.contains("regexp_match(CAST(s.\"location\" AS TEXT), '\\(([^,]+),([^)]+)\\)')"));
        // Longitude is the second capture group and goes first.
        let lon = expr.find(")[2]").unwrap();
        let lat = expr.find(")[1]").unwrap();
        assert!(lon < lat);
    }

    #[test]
    fn test_plan_requires_location_strategy() {
        let d = DatasetDescriptor::new("Radio Events", "/tmp/e.csv", "event_name", "date");
        let err = DerivationPlan::new(&d, &staged()).unwrap_err();
        assert!(matches!(err, EtlError::Configuration { .. }));
    }

    #[test]
    fn test_plan_requires_configured_columns() {
        let d = descriptor().with_lat_lon("latitude", "lon");
        let err = DerivationPlan::new(&d, &staged()).unwrap_err();
        assert!(err.to_string().contains("latitude field 'latitude'"));
    }

    #[test]
    fn test_select_for_first_ingest_has_no_anti_join() {
        let plan = DerivationPlan::new(&descriptor(), &staged()).unwrap();
        let sql = plan.select_new_rows_sql(None);
        assert!(sql.starts_with("SELECT s.\"lat\", s.\"lon\", s.\"event_name\", s.\"date\", CAST("));
        assert!(sql.ends_with("FROM \"staging_radio_events\" s"));
        assert!(!sql.contains("LEFT JOIN"));
    }

    #[test]
    fn test_select_for_existing_table_anti_joins() {
        let plan = DerivationPlan::new(&descriptor(), &staged()).unwrap();
        let existing = TableSchema::new(
            "dat_radio_events",
            vec![
                ColumnDescriptor::new("point_id", ColumnType::String, false),
                ColumnDescriptor::new("lat", ColumnType::Float, true),
                ColumnDescriptor::new("lon", ColumnType::Float, true),
                ColumnDescriptor::new("point_date", ColumnType::Timestamp, false),
                ColumnDescriptor::new("geom", ColumnType::Geometry, true),
            ],
        );

        let carried = plan.carried_columns(Some(&existing));
        assert_eq!(
            carried,
            vec![
                ("lat".to_string(), "lat".to_string()),
                ("lon".to_string(), "lon".to_string()),
                ("event_name".to_string(), "point_id".to_string()),
            ]
        );

        let sql = plan.select_new_rows_sql(Some(&existing));
        assert!(sql.ends_with(
            "LEFT JOIN \"dat_radio_events\" d ON s.\"event_name\" = d.\"point_id\" \
             WHERE d.\"point_id\" IS NULL"
        ));
        assert!(!sql.contains("s.\"date\","));
    }
}
