//! SQL identifier helpers.
//!
//! Table and column names come from source files and metadata records, so
//! they are always quoted before being spliced into statement text. Values
//! never are; they travel as bind parameters.

/// Quote an identifier for Postgres, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Name of a dataset's canonical table.
pub fn canonical_table_name(dataset_name: &str) -> String {
    format!("dat_{}", dataset_name)
}

/// Name of a dataset's staging table.
pub fn staging_table_name(dataset_name: &str) -> String {
    format!("staging_{}", dataset_name)
}

/// Index names are capped at 63 bytes, so the dataset part is cut to 45.
pub fn index_name(dataset_name: &str, column: &str) -> String {
    let prefix: String = dataset_name.chars().take(45).collect();
    format!("ix_{}_{}", prefix, column)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("event_name"), "\"event_name\"");
        assert_eq!(quote_ident("bad\"name"), "\"bad\"\"name\"");
    }

    #[test]
    fn test_table_names() {
        assert_eq!(canonical_table_name("crimes"), "dat_crimes");
        assert_eq!(staging_table_name("crimes"), "staging_crimes");
    }

    #[test]
    fn test_index_name_truncates() {
        let long = "a".repeat(60);
        let name = index_name(&long, "point_date");
        assert_eq!(name, format!("ix_{}_point_date", "a".repeat(45)));
        assert!(name.len() <= 63);
    }
}
