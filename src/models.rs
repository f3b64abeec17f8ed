//
// models.rs
// Tricorder-rs
//
// Data structures shared by the evaluation invoker and the series reader.
//

use std::collections::BTreeMap;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::error::SeriesFailure;

/// Tag → value dictionary attached to a series.
pub type Metadata = BTreeMap<String, String>;

/// Flattened scores of one evaluation run, plus the parsed report when requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub scores: BTreeMap<String, f64>,
    pub raw: Option<serde_json::Value>,
}

/// One decoded series.
#[derive(Debug, Clone)]
pub struct SeriesImage {
    pub id: String,
    /// `(slices, rows, columns)`, with a trailing samples axis for colour data.
    pub data: ArrayD<f32>,
    pub metadata: Option<Metadata>,
}

/// A series that could not be assembled.
#[derive(Debug)]
pub struct FailedSeries {
    pub id: String,
    pub reason: SeriesFailure,
}

/// Per-series result: either the decoded series or why it was dropped.
pub type SeriesOutcome = Result<SeriesImage, FailedSeries>;

/// Per-series arrays, either kept apart or stacked along a new leading axis.
#[derive(Debug, Clone)]
pub enum SeriesImages {
    List(Vec<ArrayD<f32>>),
    Stacked(ArrayD<f32>),
}

impl SeriesImages {
    pub fn len(&self) -> usize {
        match self {
            SeriesImages::List(images) => images.len(),
            SeriesImages::Stacked(array) => {
                if array.ndim() == 0 {
                    0
                } else {
                    array.shape()[0]
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_list(self) -> Vec<ArrayD<f32>> {
        match self {
            SeriesImages::List(images) => images,
            SeriesImages::Stacked(array) => array.outer_iter().map(|v| v.to_owned()).collect(),
        }
    }
}

/// Aggregated read result. `ids` and `metas` are only populated when asked for.
#[derive(Debug, Clone)]
pub struct SeriesBatch {
    pub images: SeriesImages,
    pub ids: Option<Vec<String>>,
    pub metas: Option<Vec<Metadata>>,
}

/// Short description of a single DICOM file for CLI summaries.
#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub patient_name: Option<String>,
    pub patient_id: Option<String>,
    pub study_id: Option<String>,
    pub series_instance_uid: Option<String>,
    pub modality: Option<String>,
    pub acquisition_time: Option<String>,
    pub rows: Option<u32>,
    pub columns: Option<u32>,
    pub has_pixel_data: bool,
}
