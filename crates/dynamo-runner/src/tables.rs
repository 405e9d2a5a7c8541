//! The bundled table dataset.

use dynamo_core::{TableError, TableSet};

/// Fraction of demand that can be shipped, by weeks of inventory coverage.
pub const ORDER_FULFILLMENT: &str = "ORDER_FULFILLMENT";

/// Fraction of arrivals lost in transit, by arrivals relative to expected
/// demand.
pub const SHIPPING_LOSS: &str = "SHIPPING_LOSS";

const BUNDLED: &str = include_str!("../data/tables.json");

/// Parses the bundled dataset without installing it.
pub fn parse_bundled() -> Result<TableSet, TableError> {
    TableSet::from_json(BUNDLED)
}

/// The process-wide dataset, installed from the bundled file on first use.
pub fn bundled() -> Result<&'static TableSet, TableError> {
    TableSet::global(parse_bundled)
}
