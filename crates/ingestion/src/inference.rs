//! Column type inference over CSV sources.
//!
//! Every column starts with all candidate types; each non-empty value removes
//! the candidates that cannot represent it. The first surviving candidate in
//! [`ColumnType::INFERENCE_ORDER`] wins, and `String` always survives.

use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use point_common::{slugify, ColumnDescriptor, ColumnType};
use storage::{ContributedType, TableSchema};
use tracing::{debug, warn};

use crate::error::Result;

/// Slug header fields into column names.
///
/// Blank results become `column_<n>` (1-based) and repeats get `_2`, `_3`...
pub fn normalize_headers<I, S>(headers: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    headers
        .into_iter()
        .enumerate()
        .map(|(idx, header)| {
            let mut name = slugify(header.as_ref());
            if name.is_empty() {
                name = format!("column_{}", idx + 1);
            }
            let base = name.clone();
            let mut n = 2;
            while !seen.insert(name.clone()) {
                name = format!("{}_{}", base, n);
                n += 1;
            }
            name
        })
        .collect()
}

/// Read and normalize the header row, then rewind.
pub fn read_header<R: Read + Seek>(reader: &mut R) -> Result<Vec<String>> {
    let names = {
        let mut csv = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(&mut *reader);
        normalize_headers(csv.headers()?.iter())
    };
    reader.seek(SeekFrom::Start(0))?;
    Ok(names)
}

/// Infer a descriptor per header field by scanning every data row.
///
/// The reader is rewound afterwards so the next consumer starts at the header.
pub fn infer_columns<R: Read + Seek>(reader: &mut R) -> Result<Vec<ColumnDescriptor>> {
    let columns = {
        let mut csv = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(&mut *reader);
        let names = normalize_headers(csv.headers()?.iter());

        let mut candidates: Vec<Vec<ColumnType>> =
            vec![ColumnType::INFERENCE_ORDER.to_vec(); names.len()];
        let mut nullable = vec![false; names.len()];
        let mut observed = vec![false; names.len()];
        let mut rows = 0usize;

        for record in csv.records() {
            let record = record?;
            rows += 1;
            for idx in 0..names.len() {
                match record.get(idx).map(str::trim).filter(|v| !v.is_empty()) {
                    None => nullable[idx] = true,
                    Some(value) => {
                        observed[idx] = true;
                        if candidates[idx].len() > 1 {
                            candidates[idx].retain(|t| t.accepts(value));
                        }
                    }
                }
            }
        }

        debug!(rows, columns = names.len(), "Scanned source for column inference");

        names
            .into_iter()
            .enumerate()
            .map(|(idx, name)| {
                let column_type = if observed[idx] {
                    candidates[idx].first().copied().unwrap_or(ColumnType::String)
                } else {
                    ColumnType::String
                };
                ColumnDescriptor::new(name, column_type, nullable[idx] || !observed[idx])
            })
            .collect()
    };

    reader.seek(SeekFrom::Start(0))?;
    Ok(columns)
}

/// Override inferred types with contributor hints. Unknown hint types and
/// hints for absent columns are ignored with a warning.
pub fn apply_type_hints(columns: &mut [ColumnDescriptor], hints: &[ContributedType]) {
    for hint in hints {
        let name = slugify(&hint.field_name);
        let Some(column_type) = hint.column_type() else {
            warn!(field = %hint.field_name, data_type = %hint.data_type, "Ignoring unknown type hint");
            continue;
        };
        match columns.iter_mut().find(|c| c.name == name) {
            Some(column) => column.column_type = column_type,
            None => warn!(field = %hint.field_name, "Type hint names a column not in the source"),
        }
    }
}

/// Staging columns for a source whose canonical table already exists: the
/// canonical type for every known header, `String` for new ones.
pub fn align_to_existing(header: &[String], existing: &[ColumnDescriptor]) -> Vec<ColumnDescriptor> {
    header
        .iter()
        .map(|name| match existing.iter().find(|c| &c.name == name) {
            Some(column) => ColumnDescriptor::new(name.clone(), column.column_type, true),
            None => {
                warn!(column = %name, "Source column not in canonical table; it will not be merged");
                ColumnDescriptor::new(name.clone(), ColumnType::String, true)
            }
        })
        .collect()
}

/// Decide staging columns for a source file.
///
/// An existing canonical schema wins, then contributor hints covering every
/// column, then inference (with any partial hints applied on top).
pub fn resolve_columns(
    path: &Path,
    canonical: Option<&TableSchema>,
    business_key_column: &str,
    hints: Option<&[ContributedType]>,
) -> Result<Vec<ColumnDescriptor>> {
    let mut file = File::open(path)?;

    if let Some(schema) = canonical {
        let header = read_header(&mut file)?;
        let existing = schema.staging_columns(business_key_column);
        return Ok(align_to_existing(&header, &existing));
    }

    if let Some(hints) = hints.filter(|h| !h.is_empty()) {
        let header = read_header(&mut file)?;
        let hinted: HashSet<String> = hints.iter().map(|h| slugify(&h.field_name)).collect();
        if header.iter().all(|name| hinted.contains(name)) {
            let mut columns: Vec<_> = header
                .into_iter()
                .map(|name| ColumnDescriptor::new(name, ColumnType::String, true))
                .collect();
            apply_type_hints(&mut columns, hints);
            return Ok(columns);
        }
    }

    let mut columns = infer_columns(&mut file)?;
    if let Some(hints) = hints {
        apply_type_hints(&mut columns, hints);
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Cursor};

    fn column<'a>(columns: &'a [ColumnDescriptor], name: &str) -> &'a ColumnDescriptor {
        columns.iter().find(|c| c.name == name).unwrap()
    }

    #[test]
    fn test_normalize_headers() {
        let names = normalize_headers(["Event Name", "", "Date", "date", "DATE"]);
        assert_eq!(names, vec!["event_name", "column_2", "date", "date_2", "date_3"]);
    }

    #[test]
    fn test_infer_types_and_nullability() {
        let data = "\
Flag,Count,Big,Ratio,Day,Clock,Stamp,Name
yes,1,3000000000,1.5,2015-06-01,08:15,2015-06-01 08:15:00,a
no,,2,2,06/02/2015,13:00:01,06/02/2015 01:00 PM,b
";
        let columns = infer_columns(&mut Cursor::new(data)).unwrap();

        assert_eq!(column(&columns, "flag").column_type, ColumnType::Boolean);
        assert_eq!(column(&columns, "count").column_type, ColumnType::Integer);
        assert!(column(&columns, "count").nullable);
        assert!(!column(&columns, "flag").nullable);
        assert_eq!(column(&columns, "big").column_type, ColumnType::BigInteger);
        assert_eq!(column(&columns, "ratio").column_type, ColumnType::Float);
        assert_eq!(column(&columns, "day").column_type, ColumnType::Date);
        assert_eq!(column(&columns, "clock").column_type, ColumnType::Time);
        assert_eq!(column(&columns, "stamp").column_type, ColumnType::Timestamp);
        assert_eq!(column(&columns, "name").column_type, ColumnType::String);
    }

    #[test]
    fn test_mixed_values_fall_back_to_string() {
        let data = "when\n2015-06-01\n08:15\n";
        let columns = infer_columns(&mut Cursor::new(data)).unwrap();
        assert_eq!(columns[0].column_type, ColumnType::String);
    }

    #[test]
    fn test_missing_trailing_field_is_nullable() {
        let data = "a,b\n1,2\n3\n";
        let columns = infer_columns(&mut Cursor::new(data)).unwrap();
        assert!(!columns[0].nullable);
        assert!(columns[1].nullable);
        assert_eq!(columns[1].column_type, ColumnType::Integer);
    }

    #[test]
    fn test_header_only_source() {
        let columns = infer_columns(&mut Cursor::new("a,b\n")).unwrap();
        assert!(columns.iter().all(|c| c.column_type == ColumnType::String && c.nullable));
    }

    #[test]
    fn test_stream_is_rewound() {
        let mut cursor = Cursor::new("lat,lon\n41.8,-87.6\n");
        infer_columns(&mut cursor).unwrap();
        let mut first = String::new();
        BufReader::new(&mut cursor).read_line(&mut first).unwrap();
        assert_eq!(first, "lat,lon\n");
    }

    #[test]
    fn test_apply_type_hints() {
        let mut columns = vec![
            ColumnDescriptor::new("zip", ColumnType::Integer, false),
            ColumnDescriptor::new("when", ColumnType::String, false),
        ];
        apply_type_hints(
            &mut columns,
            &[
                ContributedType::new("Zip", "string"),
                ContributedType::new("when", "datetime"),
                ContributedType::new("when", "money"),
                ContributedType::new("missing", "integer"),
            ],
        );
        assert_eq!(columns[0].column_type, ColumnType::String);
        assert_eq!(columns[1].column_type, ColumnType::Timestamp);
    }

    #[test]
    fn test_align_to_existing() {
        let existing = vec![
            ColumnDescriptor::new("event_name", ColumnType::String, false),
            ColumnDescriptor::new("lat", ColumnType::Float, true),
        ];
        let header = vec!["lat".to_string(), "event_name".to_string(), "extra".to_string()];
        let aligned = align_to_existing(&header, &existing);
        let names: Vec<_> = aligned.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["lat", "event_name", "extra"]);
        assert_eq!(aligned[0].column_type, ColumnType::Float);
        assert_eq!(aligned[2].column_type, ColumnType::String);
    }

    #[test]
    fn test_resolve_columns_with_full_hints_skips_inference() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hinted.csv");
        std::fs::write(&path, "id,value\n1,not-a-number\n").unwrap();

        let hints = vec![
            ContributedType::new("id", "string"),
            ContributedType::new("value", "integer"),
        ];
        let columns = resolve_columns(&path, None, "id", Some(&hints)).unwrap();
        assert_eq!(columns[0].column_type, ColumnType::String);
        assert_eq!(columns[1].column_type, ColumnType::Integer);
    }
}
