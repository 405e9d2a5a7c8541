//! Recorded series handed to reporting layers.

use serde::{Deserialize, Serialize};

/// The recorded history of one quantity, one value per completed tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub units: String,
    pub values: Vec<f64>,
}

impl Series {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn last(&self) -> Option<f64> {
        self.values.last().copied()
    }

    /// Smallest and largest finite values.
    pub fn range(&self) -> Option<(f64, f64)> {
        self.values
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |range, v| match range {
                Some((lo, hi)) => Some((f64::min(lo, v), f64::max(hi, v))),
                None => Some((v, v)),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_skips_non_finite() {
        let series = Series {
            name: "x".to_string(),
            units: "widgets".to_string(),
            values: vec![2.0, f64::NAN, -1.0, 5.0],
        };
        assert_eq!(series.range(), Some((-1.0, 5.0)));
        assert_eq!(series.last(), Some(5.0));
        assert_eq!(series.len(), 4);
    }

    #[test]
    fn test_empty_series_has_no_range() {
        let series = Series {
            name: "x".to_string(),
            units: String::new(),
            values: Vec::new(),
        };
        assert!(series.is_empty());
        assert_eq!(series.range(), None);
    }
}
