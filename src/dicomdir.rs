//
// dicomdir.rs
// Tricorder-rs
//
// Walks the patient/study/series/image records of a DICOMDIR index and reads the series it references.
//

use std::path::{Path, PathBuf};

use dicom::dictionary_std::tags;
use dicom::object::{open_file, InMemDicomObject};

use crate::dicom_access::ElementAccess;
use crate::error::SeriesError;
use crate::models::{FailedSeries, SeriesBatch, SeriesOutcome};
use crate::series::{self, MetaStyle};

/// One SERIES record together with the files of its IMAGE records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DicomdirSeries {
    pub patient_id: String,
    pub patient_name: String,
    pub study_id: String,
    pub series_uid: String,
    pub files: Vec<PathBuf>,
}

impl DicomdirSeries {
    /// `{PatientID}_{PatientName}_{StudyID}_{SeriesInstanceUID}`
    pub fn composite_id(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.patient_id, self.patient_name, self.study_id, self.series_uid
        )
    }
}

#[derive(Debug, Clone)]
pub struct DicomdirReadOptions {
    pub return_ids: bool,
    pub return_meta: bool,
    pub stack: bool,
    pub ignore_groups: Vec<String>,
}

impl Default for DicomdirReadOptions {
    fn default() -> Self {
        Self {
            return_ids: false,
            return_meta: false,
            stack: true,
            ignore_groups: Vec::new(),
        }
    }
}

fn record_type(record: &InMemDicomObject) -> String {
    record
        .element_str(tags::DIRECTORY_RECORD_TYPE)
        .map(|t| t.trim().to_ascii_uppercase())
        .unwrap_or_default()
}

/// Absolute path of an IMAGE record's ReferencedFileID, relative to `root`.
fn referenced_file(record: &InMemDicomObject, root: &Path) -> Option<PathBuf> {
    let components = record
        .element(tags::REFERENCED_FILE_ID)
        .ok()?
        .to_multi_str()
        .ok()?;
    let mut path = root.to_path_buf();
    for component in components.iter() {
        let component = component.trim();
        if !component.is_empty() {
            path.push(component);
        }
    }
    Some(path)
}

/// List every series referenced by the DICOMDIR at `path`.
///
/// Records are taken in file order: each STUDY belongs to the last PATIENT
/// seen, each SERIES to the last STUDY and each IMAGE to the last SERIES.
/// Other record types are skipped.
///
/// The offset links (0004,1400) and (0004,1420) are not followed. A DICOMDIR
/// that does not list every record after its parent and before the parent's
/// next sibling is grouped wrongly.
pub fn parse_dicomdir(path: &Path) -> Result<Vec<DicomdirSeries>, SeriesError> {
    let obj = open_file(path).map_err(|source| SeriesError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let records = obj
        .element(tags::DIRECTORY_RECORD_SEQUENCE)
        .ok()
        .and_then(|e| e.items())
        .ok_or_else(|| SeriesError::NotDicomdir {
            path: path.to_path_buf(),
        })?;
    let root = path.parent().unwrap_or_else(|| Path::new("."));

    let mut found: Vec<DicomdirSeries> = Vec::new();
    let mut patient: Option<(String, String)> = None;
    let mut study: Option<String> = None;
    let mut in_series = false;

    for record in records {
        match record_type(record).as_str() {
            "PATIENT" => {
                patient = Some((
                    record.element_str(tags::PATIENT_ID).unwrap_or_default(),
                    record.element_str(tags::PATIENT_NAME).unwrap_or_default(),
                ));
                study = None;
                in_series = false;
            }
            "STUDY" if patient.is_some() => {
                study = Some(record.element_str(tags::STUDY_ID).unwrap_or_default());
                in_series = false;
            }
            "SERIES" => {
                if let (Some((patient_id, patient_name)), Some(study_id)) = (&patient, &study) {
                    found.push(DicomdirSeries {
                        patient_id: patient_id.clone(),
                        patient_name: patient_name.clone(),
                        study_id: study_id.clone(),
                        series_uid: record.series_uid().unwrap_or_default(),
                        files: Vec::new(),
                    });
                    in_series = true;
                }
            }
            "IMAGE" if in_series => {
                match (referenced_file(record, root), found.last_mut()) {
                    (Some(file), Some(series)) => series.files.push(file),
                    (None, _) => tracing::debug!("IMAGE record without ReferencedFileID in {:?}", path),
                    _ => {}
                }
            }
            _ => {}
        }
    }

    tracing::debug!("{:?} references {} series", path, found.len());
    Ok(found)
}

/// Read each series listed in the DICOMDIR, one outcome per series.
pub fn read_dicomdir_outcomes(path: &Path, options: &DicomdirReadOptions) -> Result<Vec<SeriesOutcome>, SeriesError> {
    let meta = if options.return_meta {
        MetaStyle::SliceTags
    } else {
        MetaStyle::None
    };
    Ok(parse_dicomdir(path)?
        .into_iter()
        .map(|entry| {
            let id = entry.composite_id();
            series::read_files(&id, &entry.files, meta, &options.ignore_groups)
                .map_err(|reason| FailedSeries { id, reason })
        })
        .collect())
}

/// Best-effort read of every series in the DICOMDIR, keyed by composite ids.
pub fn read_dicomdir(path: &Path, options: &DicomdirReadOptions) -> Result<SeriesBatch, SeriesError> {
    let outcomes = read_dicomdir_outcomes(path, options)?;
    series::aggregate(outcomes, options.return_ids, options.return_meta, options.stack)
}
