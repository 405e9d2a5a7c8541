//! Discrete-time evaluation engine for System-Dynamics models.
//!
//! A model is a network of named scalar quantities (stocks, flows, derived
//! quantities, lookup tables, and lag primitives) stepped forward with an
//! explicit Euler scheme under a fixed phase order.
//!
//! # Modules
//!
//! - [`model`]: declaring quantities and finalizing the evaluation order
//! - [`scheduler`]: phase order, settling startup, clock, recorded series
//! - [`frame`]: the view equations evaluate against
//! - `lag`: smoothing and delay primitives, reached through the builder
//! - [`table`]: piecewise-linear lookup tables and the shared table dataset
//! - [`diagnostics`]: advisory numerical and ordering checks
//!
//! # Example
//!
//! ```
//! use dynamo_core::ModelBuilder;
//!
//! let mut builder = ModelBuilder::new();
//! let outflow = builder.handle("outflow");
//! let level = builder.stock("level", "units", 100.0, move |f| -f.previous(outflow));
//! builder.flow("outflow", "units/time", move |f| 0.1 * f.current(level));
//!
//! let mut scheduler = builder.finalize(&[]).unwrap();
//! scheduler.start(1.0).unwrap();
//! scheduler.tick().unwrap();
//! assert_eq!(scheduler.lookup("level").unwrap().current(), 90.0);
//! ```

pub mod diagnostics;
pub mod error;
pub mod frame;
mod lag;
pub mod model;
pub mod quantity;
pub mod scheduler;
pub mod series;
pub mod table;

pub use diagnostics::{DiagnosticsMode, Finding, FindingKind};
pub use error::EngineError;
pub use frame::Frame;
pub use model::{EquationFn, Hook, ModelBuilder};
pub use quantity::{Constraint, QuantityId, QuantityKind, QuantityRef};
pub use scheduler::{Scheduler, SETTLING_PASSES};
pub use series::Series;
pub use table::{Table, TableError, TableSet};
