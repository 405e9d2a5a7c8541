//! Engine error types.
//!
//! Every variant here is a configuration or lifecycle error: the model graph is
//! malformed or the scheduler was driven out of order. None of them is retried.

use thiserror::Error;

use crate::table::TableError;

/// Errors raised while building, starting, or stepping a model.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Two declarations share a name
    #[error("quantity `{0}` is declared more than once")]
    DuplicateQuantity(String),

    /// A handle was reserved for a name that was never declared
    #[error("quantity `{0}` is referenced but never declared")]
    UndeclaredQuantity(String),

    /// Lookup of a name the model does not contain
    #[error("unknown quantity `{0}`")]
    UnknownQuantity(String),

    /// Malformed interpolation table
    #[error("table for `{name}` is malformed: {source}")]
    Table {
        name: String,
        #[source]
        source: TableError,
    },

    /// The evaluation order lists a name twice
    #[error("evaluation order lists `{0}` more than once")]
    DuplicateRank(String),

    /// The evaluation order lists a stock, flow, or after-flows quantity
    #[error("evaluation order lists `{0}`, which is not a ranked derived quantity")]
    NotRankable(String),

    /// A ranked derived quantity is missing from the evaluation order
    #[error("derived quantity `{0}` is missing from the evaluation order")]
    Unranked(String),

    /// A lag primitive names an upstream quantity that does not exist
    #[error("lag `{lag}` is bound to unknown quantity `{upstream}`")]
    MissingUpstream { lag: String, upstream: String },

    /// A lag primitive was evaluated before `reset` bound its upstream
    #[error("lag `{0}` was evaluated before its upstream was bound")]
    Unbound(String),

    /// Lag time constant or delay outside its valid range
    #[error("lag `{name}` has invalid time {value}")]
    InvalidLagTime { name: String, value: f64 },

    /// Time step must be finite and positive
    #[error("invalid time step {0}: must be finite and positive")]
    InvalidStep(f64),

    /// Stepping or evaluating before `start`
    #[error("scheduler has not been started")]
    NotStarted,

    /// A series was requested for a quantity with no recorded steps
    #[error("no recorded history for `{0}`")]
    NoHistory(String),

    /// Stock-only operation applied to another kind of quantity
    #[error("`{0}` is not a stock")]
    NotAStock(String),
}
