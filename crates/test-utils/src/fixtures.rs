//! Common test fixtures for point dataset tests.
//!
//! Small CSV sources covering the scenarios the pipeline cares about, and
//! descriptors wired to them.

use std::path::PathBuf;

use storage::DatasetDescriptor;
use tempfile::TempDir;

/// Five events with unique names; one geocoded to (0, 0).
pub const RADIO_EVENTS_CSV: &str = "\
lat,lon,event_name,date
41.88,-87.63,Station Identification,2015-06-01
41.89,-87.62,Weather Report,2015-06-02
41.90,-87.64,Traffic Report,2015-06-03
0,0,Community Calendar,2015-06-04
41.87,-87.65,Word From Our Sponsors,2015-06-05
";

/// Two rows sharing the business key `Weather Report`, differing by host.
pub const DUPLICATE_KEYS_CSV: &str = "\
lat,lon,event_name,date,host
41.88,-87.63,Weather Report,2015-06-01,Cecil
41.89,-87.62,Weather Report,2015-06-02,Kevin
";

/// Events located by a combined `(lat, lon)` column.
pub const LOCATION_EVENTS_CSV: &str = "\
event_name,date,location
Station Identification,2015-06-01,\"(41.88, -87.63)\"
Weather Report,2015-06-02,\"(41.89, -87.62)\"
Traffic Report,2015-06-03,
";

/// A row with more fields than the header declares.
pub const EXTRA_COLUMN_CSV: &str = "\
lat,lon,event_name,date
41.88,-87.63,Station Identification,2015-06-01
41.89,-87.62,Weather Report,2015-06-02,surplus
";

/// Rows for a second dataset in a later, disjoint date range.
pub const LATER_EVENTS_CSV: &str = "\
lat,lon,event_name,date
41.88,-87.63,Glow Cloud Sighting,2016-01-10
41.89,-87.62,Dog Park Closure,2016-01-11
41.90,-87.64,Librarian Alert,2016-01-11
";

/// Write `contents` to `file_name` inside `dir`, returning the path.
pub fn write_csv(dir: &TempDir, file_name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(file_name);
    std::fs::write(&path, contents).expect("failed to write CSV fixture");
    path
}

/// Descriptor for a lat/lon event dataset named exactly `dataset_name`.
pub fn lat_lon_descriptor(dataset_name: &str, source: &str) -> DatasetDescriptor {
    let mut descriptor = DatasetDescriptor::new(dataset_name, source, "event_name", "date")
        .with_lat_lon("lat", "lon")
        .approved();
    descriptor.dataset_name = dataset_name.to_string();
    descriptor
}

/// Descriptor for a dataset located by a combined `location` column.
pub fn location_descriptor(dataset_name: &str, source: &str) -> DatasetDescriptor {
    let mut descriptor = DatasetDescriptor::new(dataset_name, source, "event_name", "date")
        .with_location("location")
        .approved();
    descriptor.dataset_name = dataset_name.to_string();
    descriptor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_row_counts() {
        assert_eq!(RADIO_EVENTS_CSV.lines().count(), 6);
        assert_eq!(DUPLICATE_KEYS_CSV.lines().count(), 3);
    }

    #[test]
    fn test_write_csv() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "events.csv", RADIO_EVENTS_CSV);
        assert_eq!(std::fs::read_to_string(path).unwrap(), RADIO_EVENTS_CSV);
    }

    #[test]
    fn test_descriptor_keeps_name() {
        let d = lat_lon_descriptor("events_abc123", "/tmp/events.csv");
        assert_eq!(d.dataset_name, "events_abc123");
        assert_eq!(d.canonical_table(), "dat_events_abc123");
        assert!(d.approved_status);
        assert!(d.location_strategy().is_some());
    }
}
