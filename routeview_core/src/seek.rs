//! Distance-to-index resolution for seeking.

use crate::record::Record;

/// Finds the record to show for a seek to `target` meters.
///
/// Returns `i` with `at_distance[i] <= target < at_distance[i + 1]`. A target
/// at or past the last record resolves to the last index (more records may
/// still arrive); a target before the first record resolves to 0. With fewer
/// than two records there is nothing to seek and -1 is returned.
///
/// Runs of equal distances resolve to the last record of the run.
pub fn resolve(records: &[Record], target: f64) -> i64 {
    let n = records.len();
    if n < 2 {
        return -1;
    }
    if target.is_nan() {
        return -1;
    }
    if target >= records[n - 1].at_distance {
        return (n - 1) as i64;
    }
    // First index whose distance is strictly greater than the target.
    let upper = records.partition_point(|r| r.at_distance <= target);
    upper.saturating_sub(1) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::LatLng;

    fn seq(distances: &[f64]) -> Vec<Record> {
        distances
            .iter()
            .map(|&d| Record::pano("p", 0.0, LatLng::new(0.0, 0.0), d, 0.0))
            .collect()
    }

    #[test]
    fn test_resolve_interior() {
        let records = seq(&[0.0, 10.0, 25.0]);
        assert_eq!(resolve(&records, 12.0), 1);
        assert_eq!(resolve(&records, 0.0), 0);
        assert_eq!(resolve(&records, 9.99), 0);
        assert_eq!(resolve(&records, 10.0), 1);
        assert_eq!(resolve(&records, 24.9), 1);
    }

    #[test]
    fn test_resolve_edges() {
        let records = seq(&[5.0, 10.0, 25.0]);
        assert_eq!(resolve(&records, 25.0), 2);
        assert_eq!(resolve(&records, 1_000.0), 2);
        assert_eq!(resolve(&records, -3.0), 0);
        assert_eq!(resolve(&seq(&[5.0]), 5.0), -1);
        assert_eq!(resolve(&[], 5.0), -1);
        assert_eq!(resolve(&records, f64::NAN), -1);
    }

    #[test]
    fn test_resolve_equal_distances() {
        let records = seq(&[0.0, 10.0, 10.0, 20.0]);
        assert_eq!(resolve(&records, 10.0), 2);
        assert_eq!(resolve(&records, 15.0), 2);
    }
}
