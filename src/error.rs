//
// error.rs
// Tricorder-rs
//
// Typed errors for the evaluation invoker, the series reader and NIfTI volume I/O.
//

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Failures of a single EvaluateSegmentation run.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("evaluation tool not found or not executable: {path:?}")]
    ToolNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to launch evaluation tool {path:?}")]
    Launch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("evaluation tool exited with {status}: {stderr}")]
    ToolFailed { status: ExitStatus, stderr: String },

    #[error("malformed evaluation report {path:?}: {reason}")]
    MalformedReport { path: PathBuf, reason: String },

    #[error("evaluation report has no measurement.metrics section")]
    MissingMetrics,

    #[error("metric {metric} has no numeric value attribute")]
    InvalidScore { metric: String },

    #[error("failed to stage input volume")]
    Volume(#[from] VolumeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a single series could not be assembled.
#[derive(Debug, Error)]
pub enum SeriesFailure {
    #[error("no files belong to series {0}")]
    NoFiles(String),

    #[error("failed to open {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: dicom::object::ReadError,
    },

    #[error("failed to decode pixel data of {path:?}")]
    Decode {
        path: PathBuf,
        #[source]
        source: dicom_pixeldata::Error,
    },

    #[error("slice {path:?} has shape {found:?}, expected {expected:?}")]
    InconsistentSlices {
        path: PathBuf,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("failed to assemble volume: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Errors that abort a whole read, as opposed to [`SeriesFailure`].
#[derive(Debug, Error)]
pub enum SeriesError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("failed to open {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: dicom::object::ReadError,
    },

    #[error("{path:?} is not a DICOMDIR: missing directory record sequence")]
    NotDicomdir { path: PathBuf },

    #[error("cannot stack series: {id} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        id: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error(transparent)]
    Series(#[from] SeriesFailure),

    #[error(transparent)]
    Volume(#[from] VolumeError),
}

/// NIfTI read/write failures.
#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("NIfTI error on {path:?}: {source}")]
    Nifti {
        path: PathBuf,
        #[source]
        source: nifti::NiftiError,
    },

    #[error("volume must have between 1 and 7 dimensions, got {0}")]
    Dimensionality(usize),
}
