//! Point dataset ETL worker.
//!
//! Registers datasets, runs ingests (single, by update frequency, or
//! shapefile imports) and answers ad-hoc time-series and detail queries
//! from the command line.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ingestion::{PointEtl, ShapeEtl};
use point_query::{parse_pairs, OutputFormat, PointQuery, QueryError, TimeseriesResponse};
use serde::Serialize;
use storage::{Catalog, ContributedType, DatasetDescriptor, MetadataStore, SchemaCache, ShapeCatalog};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use config::EtlConfig;

#[derive(Parser, Debug)]
#[command(name = "etl-worker")]
#[command(about = "Point and shapefile dataset ETL into PostGIS")]
struct Args {
    /// YAML file overriding environment configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Local file used instead of the registered source URL
    #[arg(long, global = true)]
    source_path: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create metadata tables
    Migrate,

    /// Register a point dataset
    Register {
        /// Human-readable name; the dataset name is its slug
        human_name: String,
        #[arg(long)]
        source_url: String,
        #[arg(long)]
        business_key: String,
        #[arg(long)]
        observed_date: String,
        #[arg(long, requires = "longitude")]
        latitude: Option<String>,
        #[arg(long, requires = "latitude")]
        longitude: Option<String>,
        /// Combined "(lat, lon)" column
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        update_freq: Option<String>,
        /// Column type hint as field=type, repeatable
        #[arg(long = "column-type")]
        column_types: Vec<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        attribution: Option<String>,
        /// Mark the dataset approved
        #[arg(long)]
        approve: bool,
    },

    /// First ingest of a registered dataset
    Add { dataset: String },

    /// Re-ingest a dataset, merging new business keys
    Update { dataset: String },

    /// Re-ingest every approved dataset with this update frequency
    UpdateFrequency { update_freq: String },

    /// Recompute a dataset's date extent and bounding box
    RefreshMetadata { dataset: String },

    /// Drop a dataset's table and metadata record
    Delete { dataset: String },

    /// Register a zipped shapefile dataset
    RegisterShape {
        human_name: String,
        #[arg(long)]
        source_url: String,
    },

    /// Import a registered shapefile with ogr2ogr
    ImportShape { dataset: String },

    /// Drop an imported shapefile and its record
    DeleteShape { dataset: String },

    /// Bucketed counts, parameters as key=value
    Timeseries { params: Vec<String> },

    /// Rows of one dataset, parameters as key=value
    Detail { params: Vec<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = EtlConfig::from_env()?;
    if let Some(path) = &args.config {
        config = config.overlay_yaml(path)?;
    }
    info!(
        database = %config.redacted_database_url(),
        dedup_policy = config.dedup_policy.as_str(),
        "Loaded configuration"
    );

    let catalog = Catalog::connect(&config.database_url, config.max_db_connections)
        .await
        .context("Failed to connect to database")?;
    let schema_cache = SchemaCache::new(config.schema_cache_size);
    let source = args.source_path.as_deref();

    match args.command {
        Command::Migrate => {
            catalog.migrate().await?;
            info!("Migrations applied");
        }

        Command::Register {
            human_name,
            source_url,
            business_key,
            observed_date,
            latitude,
            longitude,
            location,
            update_freq,
            column_types,
            description,
            attribution,
            approve,
        } => {
            let mut descriptor =
                DatasetDescriptor::new(human_name, source_url, business_key, observed_date);
            if let (Some(lat), Some(lon)) = (latitude, longitude) {
                descriptor = descriptor.with_lat_lon(lat, lon);
            }
            if let Some(location) = location {
                descriptor = descriptor.with_location(location);
            }
            if descriptor.location_strategy().is_none() {
                bail!("either --latitude/--longitude or --location is required");
            }
            if let Some(freq) = update_freq {
                descriptor = descriptor.with_update_freq(freq);
            }
            if !column_types.is_empty() {
                descriptor = descriptor.with_contributed_types(parse_column_types(&column_types)?);
            }
            descriptor.description = description;
            descriptor.attribution = attribution;
            if approve {
                descriptor = descriptor.approved();
            }

            catalog.register(&descriptor).await?;
            info!(dataset = %descriptor.dataset_name, "Dataset registered");
            print_json(&descriptor)?;
        }

        Command::Add { dataset } => {
            let etl = PointEtl::new(catalog, schema_cache, config.etl_options());
            print_json(&etl.add(&dataset, source).await?)?;
        }

        Command::Update { dataset } => {
            let etl = PointEtl::new(catalog, schema_cache, config.etl_options());
            print_json(&etl.update(&dataset, source).await?)?;
        }

        Command::UpdateFrequency { update_freq } => {
            let etl = PointEtl::new(catalog, schema_cache, config.etl_options());
            let results = etl.update_by_frequency(&update_freq).await?;

            let mut failed = 0;
            for (dataset, result) in &results {
                match result {
                    Ok(report) => print_json(report)?,
                    Err(e) => {
                        failed += 1;
                        error!(dataset = %dataset, error = %e, "Update failed");
                    }
                }
            }
            info!(total = results.len(), failed, "Frequency update finished");
            if failed > 0 {
                bail!("{} of {} dataset updates failed", failed, results.len());
            }
        }

        Command::RefreshMetadata { dataset } => {
            let etl = PointEtl::new(catalog, schema_cache, config.etl_options());
            print_json(&etl.refresh_metadata(&dataset).await?)?;
        }

        Command::Delete { dataset } => {
            let etl = PointEtl::new(catalog, schema_cache, config.etl_options());
            etl.remove_dataset(&dataset).await?;
            info!(dataset = %dataset, "Dataset removed");
        }

        Command::RegisterShape {
            human_name,
            source_url,
        } => {
            let shapes = ShapeCatalog::new(catalog.pool().clone());
            print_json(&shapes.add(&human_name, &source_url).await?)?;
        }

        Command::ImportShape { dataset } => {
            let shapes = ShapeCatalog::new(catalog.pool().clone());
            let etl = ShapeEtl::new(
                shapes,
                config.database_url.clone(),
                config.ogr2ogr_path.clone(),
                config.fetch_options(),
            );
            print_json(&etl.import(&dataset, source).await?)?;
        }

        Command::DeleteShape { dataset } => {
            let shapes = ShapeCatalog::new(catalog.pool().clone());
            shapes.remove(&dataset).await?;
            info!(dataset = %dataset, "Shapefile dataset removed");
        }

        Command::Timeseries { params } => {
            let query = point_query(&catalog, schema_cache);
            match query.timeseries(parse_pairs(&params)).await {
                Ok(response) => {
                    for warning in &response.warnings {
                        warn!(%warning, "Ignored query parameter");
                    }
                    match response.query.data_type {
                        OutputFormat::Json => print_json(&response)?,
                        OutputFormat::Csv => print_timeseries_csv(&response)?,
                    }
                }
                Err(e) => return query_failure(e),
            }
        }

        Command::Detail { params } => {
            let query = point_query(&catalog, schema_cache);
            match query.detail(parse_pairs(&params)).await {
                Ok(response) => print_json(&response)?,
                Err(e) => return query_failure(e),
            }
        }
    }

    Ok(())
}

fn point_query(catalog: &Catalog, schema_cache: SchemaCache) -> PointQuery {
    let store: Arc<dyn MetadataStore> = Arc::new(catalog.clone());
    PointQuery::new(store, catalog.pool().clone(), schema_cache)
}

/// Parse `field=type` hints.
fn parse_column_types(pairs: &[String]) -> Result<Vec<ContributedType>> {
    pairs
        .iter()
        .map(|pair| {
            let (field, data_type) = pair
                .split_once('=')
                .with_context(|| format!("column type '{}' is not field=type", pair))?;
            let hint = ContributedType::new(field.trim(), data_type.trim());
            if hint.column_type().is_none() {
                bail!("unknown column type '{}' for {}", data_type, field);
            }
            Ok(hint)
        })
        .collect()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_timeseries_csv(response: &TimeseriesResponse) -> Result<()> {
    let mut writer = csv::Writer::from_writer(std::io::stdout());
    writer.write_record(["dataset_name", "bucket", "count"])?;
    for entry in &response.entries {
        writer.write_record([
            entry.dataset_name.clone(),
            entry.bucket.format("%Y-%m-%d %H:%M:%S").to_string(),
            entry.count.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn query_failure(e: QueryError) -> Result<()> {
    print_json(&e.to_body())?;
    bail!("query rejected with status {}", e.status_code())
}
