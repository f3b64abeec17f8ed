//
// lib.rs
// Tricorder-rs
//
// Exposes the crate's modules and re-exports the CLI entry point for both binary and library consumers.
//

// Public surface of the library: evaluation wrapper, series reading and NIfTI conversion.
pub mod cli;
pub mod convert;
pub mod dicom_access;
pub mod dicomdir;
pub mod error;
pub mod evaluate;
pub mod metadata;
pub mod models;
pub mod pixels;
pub mod report;
pub mod series;
pub mod volume;

pub use cli::{run as run_cli, Cli, Commands};
pub use error::{EvaluationError, SeriesError, SeriesFailure, VolumeError};
pub use evaluate::{EvaluateSegmentation, EvaluationConfig, EvaluationOverrides, VolumeSource};
pub use series::{SeriesBackend, SeriesReadOptions};
