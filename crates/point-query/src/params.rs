//! Named top-level query parameters.
//!
//! Each recognized parameter has a validator turning the raw string into a
//! typed value and a default used when the caller leaves it out. Defaults
//! receive the request time so `now`-relative ones are computed lazily.
//! Named parameters are consumed before any `field__operator` parsing.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDateTime};
use point_common::geometry::DEFAULT_BUFFER_METERS;
use point_common::{extract_first_geometry_fragment, parse_datetime, AggUnit, GeoFragment, WithinFilter};
use serde::Serialize;

use crate::errors::{QueryError, QueryResult};

/// Flat string-to-string request parameters, ordered by key.
pub type RawParams = BTreeMap<String, String>;

/// Days covered by the default date window.
pub const DEFAULT_WINDOW_DAYS: i64 = 90;
pub const DEFAULT_LIMIT: i64 = 1000;

/// Requested output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Csv,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "json" => Some(OutputFormat::Json),
            "csv" => Some(OutputFormat::Csv),
            _ => None,
        }
    }
}

/// Typed value produced by a named-parameter validator.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Agg(AggUnit),
    Format(OutputFormat),
    Timestamp(NaiveDateTime),
    Datasets(Vec<String>),
    Area(GeoFragment),
    Meters(f64),
    Count(i64),
}

/// A registered named parameter.
pub struct NamedParam {
    pub key: &'static str,
    validate: fn(&str) -> Result<ParamValue, String>,
    default: fn(NaiveDateTime) -> Option<ParamValue>,
}

pub const AGG: &str = "agg";
pub const DATA_TYPE: &str = "data_type";
pub const START: &str = "obs_date__ge";
pub const END: &str = "obs_date__le";
pub const DATASET_NAME: &str = "dataset_name";
pub const DATASET_NAMES: &str = "dataset_name__in";
pub const LOCATION: &str = "location_geom__within";
pub const BUFFER: &str = "buffer";
pub const OFFSET: &str = "offset";
pub const LIMIT: &str = "limit";

/// Every named parameter, in validation order.
pub const NAMED_PARAMS: &[NamedParam] = &[
    NamedParam {
        key: AGG,
        validate: validate_agg,
        default: |_| Some(ParamValue::Agg(AggUnit::Day)),
    },
    NamedParam {
        key: DATA_TYPE,
        validate: validate_format,
        default: |_| Some(ParamValue::Format(OutputFormat::Json)),
    },
    NamedParam {
        key: START,
        validate: validate_timestamp,
        default: |now| Some(ParamValue::Timestamp(now - Duration::days(DEFAULT_WINDOW_DAYS))),
    },
    NamedParam {
        key: END,
        validate: validate_timestamp,
        default: |now| Some(ParamValue::Timestamp(now)),
    },
    NamedParam {
        key: DATASET_NAME,
        validate: validate_datasets,
        default: |_| None,
    },
    NamedParam {
        key: DATASET_NAMES,
        validate: validate_datasets,
        default: |_| None,
    },
    NamedParam {
        key: LOCATION,
        validate: validate_area,
        default: |_| None,
    },
    NamedParam {
        key: BUFFER,
        validate: validate_meters,
        default: |_| Some(ParamValue::Meters(DEFAULT_BUFFER_METERS)),
    },
    NamedParam {
        key: OFFSET,
        validate: validate_count,
        default: |_| Some(ParamValue::Count(0)),
    },
    NamedParam {
        key: LIMIT,
        validate: validate_positive_count,
        default: |_| Some(ParamValue::Count(DEFAULT_LIMIT)),
    },
];

pub fn is_named(key: &str) -> bool {
    NAMED_PARAMS.iter().any(|p| p.key == key)
}

fn validate_agg(s: &str) -> Result<ParamValue, String> {
    AggUnit::parse(s)
        .map(ParamValue::Agg)
        .map_err(|e| e.to_string())
}

fn validate_format(s: &str) -> Result<ParamValue, String> {
    OutputFormat::parse(s)
        .map(ParamValue::Format)
        .ok_or_else(|| format!("'{}' is an invalid output format", s))
}

fn validate_timestamp(s: &str) -> Result<ParamValue, String> {
    parse_datetime(s)
        .map(ParamValue::Timestamp)
        .map_err(|e| e.to_string())
}

fn validate_datasets(s: &str) -> Result<ParamValue, String> {
    let names: Vec<String> = s
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect();
    if names.is_empty() {
        return Err("no dataset names given".to_string());
    }
    Ok(ParamValue::Datasets(names))
}

fn validate_area(s: &str) -> Result<ParamValue, String> {
    extract_first_geometry_fragment(s)
        .map(ParamValue::Area)
        .map_err(|e| e.to_string())
}

fn validate_meters(s: &str) -> Result<ParamValue, String> {
    match s.parse::<f64>() {
        Ok(m) if m.is_finite() && m >= 0.0 => Ok(ParamValue::Meters(m)),
        _ => Err(format!("'{}' is not a non-negative distance in meters", s)),
    }
}

fn validate_count(s: &str) -> Result<ParamValue, String> {
    match s.parse::<i64>() {
        Ok(n) if n >= 0 => Ok(ParamValue::Count(n)),
        _ => Err(format!("'{}' is not a non-negative integer", s)),
    }
}

fn validate_positive_count(s: &str) -> Result<ParamValue, String> {
    match s.parse::<i64>() {
        Ok(n) if n > 0 => Ok(ParamValue::Count(n)),
        _ => Err(format!("'{}' is not a positive integer", s)),
    }
}

/// Typed named parameters of one request.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedParams {
    pub agg: AggUnit,
    pub format: OutputFormat,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Explicitly requested datasets; `None` means every approved dataset.
    pub datasets: Option<Vec<String>>,
    pub within: Option<WithinFilter>,
    pub buffer_meters: f64,
    pub offset: i64,
    pub limit: i64,
}

impl NamedParams {
    /// Validate and remove every named parameter from `raw`.
    ///
    /// The first failing validator rejects the request. What is left in
    /// `raw` afterwards is field filters and unrecognized keys.
    pub fn extract(raw: &mut RawParams, now: NaiveDateTime) -> QueryResult<Self> {
        let mut values: BTreeMap<&'static str, ParamValue> = BTreeMap::new();

        for param in NAMED_PARAMS {
            let value = match raw.remove(param.key) {
                Some(supplied) => Some(
                    (param.validate)(supplied.trim())
                        .map_err(|reason| QueryError::validation(param.key, reason))?,
                ),
                None => (param.default)(now),
            };
            if let Some(value) = value {
                values.insert(param.key, value);
            }
        }

        let agg = match values.remove(AGG) {
            Some(ParamValue::Agg(agg)) => agg,
            _ => AggUnit::Day,
        };
        let format = match values.remove(DATA_TYPE) {
            Some(ParamValue::Format(format)) => format,
            _ => OutputFormat::Json,
        };
        let start = match values.remove(START) {
            Some(ParamValue::Timestamp(ts)) => ts,
            _ => now - Duration::days(DEFAULT_WINDOW_DAYS),
        };
        let end = match values.remove(END) {
            Some(ParamValue::Timestamp(ts)) => ts,
            _ => now,
        };
        if start > end {
            return Err(QueryError::validation(
                START,
                format!("start {} is after end {}", start, end),
            ));
        }

        let mut datasets: Option<Vec<String>> = None;
        for key in [DATASET_NAME, DATASET_NAMES] {
            if let Some(ParamValue::Datasets(names)) = values.remove(key) {
                let list = datasets.get_or_insert_with(Vec::new);
                for name in names {
                    if !list.contains(&name) {
                        list.push(name);
                    }
                }
            }
        }

        let buffer_meters = match values.remove(BUFFER) {
            Some(ParamValue::Meters(m)) => m,
            _ => DEFAULT_BUFFER_METERS,
        };
        let within = match values.remove(LOCATION) {
            Some(ParamValue::Area(fragment)) => Some(WithinFilter::new(fragment, buffer_meters)),
            _ => None,
        };
        let offset = match values.remove(OFFSET) {
            Some(ParamValue::Count(n)) => n,
            _ => 0,
        };
        let limit = match values.remove(LIMIT) {
            Some(ParamValue::Count(n)) => n,
            _ => DEFAULT_LIMIT,
        };

        Ok(Self {
            agg,
            format,
            start,
            end,
            datasets,
            within,
            buffer_meters,
            offset,
            limit,
        })
    }

    /// Serializable echo of the effective parameters.
    pub fn echo(&self) -> QueryEcho {
        QueryEcho {
            agg: self.agg,
            data_type: self.format,
            obs_date_ge: self.start,
            obs_date_le: self.end,
            datasets: self.datasets.clone(),
            location_geom_within: self
                .within
                .as_ref()
                .and_then(|w| serde_json::to_value(w.fragment().geometry()).ok()),
            buffer: self.buffer_meters,
        }
    }
}

/// Effective query parameters as reported back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct QueryEcho {
    pub agg: AggUnit,
    pub data_type: OutputFormat,
    #[serde(rename = "obs_date__ge")]
    pub obs_date_ge: NaiveDateTime,
    #[serde(rename = "obs_date__le")]
    pub obs_date_le: NaiveDateTime,
    #[serde(rename = "dataset_name__in", skip_serializing_if = "Option::is_none")]
    pub datasets: Option<Vec<String>>,
    #[serde(rename = "location_geom__within", skip_serializing_if = "Option::is_none")]
    pub location_geom_within: Option<serde_json::Value>,
    pub buffer: f64,
}

/// Build raw parameters from `key=value` pairs.
///
/// Pairs without `=` become keys with an empty value.
pub fn parse_pairs<I, S>(pairs: I) -> RawParams
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    pairs
        .into_iter()
        .map(|pair| match pair.as_ref().split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.as_ref().to_string(), String::new()),
        })
        .collect()
}
