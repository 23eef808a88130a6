//! Streaming regression pipeline for the textual-innovation study.
//!
//! Reproduces the paper's tables from the unified meta-table: streaming
//! OLS with HC3 standard errors over Parquet row groups, yearly mean
//! aggregation, period-specific regressions, and rolling-window
//! coefficient trajectories.

pub mod dense;
pub mod error;
pub mod frame;
pub mod models;
pub mod results;
pub mod source;
pub mod streaming;
pub mod transform;
pub mod windows;
pub mod yearly;

pub use error::PipelineError;
pub use frame::Frame;
pub use source::{ParquetSource, RowGroupSource, SourceError, VecSource};
pub use streaming::{fit_streaming, FitOptions, RegressionFit};
pub use transform::{Control, RegressionSpec};
