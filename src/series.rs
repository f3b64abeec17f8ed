//
// series.rs
// Tricorder-rs
//
// Discovers DICOM series in a folder, assembles each one into a volume and aggregates the results.
//

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use dicom::dictionary_std::tags;
use dicom::object::{open_file, DefaultDicomObject, OpenFileOptions, ReadError};
use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn};
use walkdir::WalkDir;

use crate::dicom_access::ElementAccess;
use crate::error::{SeriesError, SeriesFailure};
use crate::metadata;
use crate::models::{FailedSeries, Metadata, SeriesBatch, SeriesImage, SeriesImages, SeriesOutcome};
use crate::pixels;

/// How slices are located, ordered and described.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum SeriesBackend {
    /// Files grouped by SeriesInstanceUID, ordered by slice position then
    /// instance number. Metadata is the first slice's `gggg|eeee` dictionary.
    #[default]
    Grouped,
    /// `.dcm`/`.IMA` files ordered by AcquisitionTime. Metadata is the first
    /// matching file's attribute set keyed by keyword.
    PerFile,
}

/// Which series to read and what to return for them.
#[derive(Debug, Clone)]
pub struct SeriesReadOptions {
    pub backend: SeriesBackend,
    /// Series to read; every series found in the folder when empty.
    pub series_ids: Vec<String>,
    pub return_ids: bool,
    pub return_meta: bool,
    /// Stack all series into one array with a leading series axis.
    pub stack: bool,
    /// Tag groups (`gggg`, hex) left out of the metadata.
    pub ignore_groups: Vec<String>,
}

impl Default for SeriesReadOptions {
    fn default() -> Self {
        Self {
            backend: SeriesBackend::Grouped,
            series_ids: Vec::new(),
            return_ids: false,
            return_meta: false,
            stack: true,
            ignore_groups: Vec::new(),
        }
    }
}

/// Metadata flavour collected while assembling a series.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum MetaStyle {
    None,
    SliceTags,
    AttributeSet,
}

pub(crate) struct Slice {
    pub path: PathBuf,
    pub obj: DefaultDicomObject,
}

pub(crate) fn open_slice(path: &Path) -> Result<Slice, SeriesFailure> {
    let obj = open_file(path).map_err(|source| SeriesFailure::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Slice {
        path: path.to_path_buf(),
        obj,
    })
}

/// Open `path` up to, but not including, its pixel data.
fn open_header(path: &Path) -> Result<DefaultDicomObject, ReadError> {
    OpenFileOptions::new().read_until(tags::PIXEL_DATA).open_file(path)
}

fn regular_files(folder: &Path) -> Result<Vec<PathBuf>, SeriesError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(folder).min_depth(1).max_depth(1) {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Group the DICOM files directly inside `folder` by SeriesInstanceUID.
/// Files that do not parse, or carry no series UID, are ignored.
pub fn scan_folder(folder: &Path) -> Result<BTreeMap<String, Vec<PathBuf>>, SeriesError> {
    let mut groups: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for path in regular_files(folder)? {
        match open_header(&path) {
            Ok(obj) => match obj.series_uid() {
                Some(uid) => groups.entry(uid).or_default().push(path),
                None => tracing::debug!("{:?} has no SeriesInstanceUID, skipping", path),
            },
            Err(e) => tracing::debug!("{:?} is not readable as DICOM: {}", path, e),
        }
    }
    tracing::debug!("found {} series in {:?}", groups.len(), folder);
    Ok(groups)
}

/// Sorted SeriesInstanceUIDs found in `folder`.
pub fn discover_series(folder: &Path) -> Result<Vec<String>, SeriesError> {
    Ok(scan_folder(folder)?.into_keys().collect())
}

fn cmp_position(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
    }
}

fn order_by_position(slices: &mut [Slice]) {
    slices.sort_by(|a, b| {
        cmp_position(a.obj.slice_position(), b.obj.slice_position())
            .then_with(|| a.obj.instance_number().cmp(&b.obj.instance_number()))
            .then_with(|| a.path.cmp(&b.path))
    });
}

/// Decode `slices` in order and concatenate them along the slice axis.
fn stack_slices(slices: &[Slice]) -> Result<ArrayD<f32>, SeriesFailure> {
    let mut arrays: Vec<ArrayD<f32>> = Vec::with_capacity(slices.len());
    for slice in slices {
        let pixels = pixels::decode_pixels(&slice.obj, &slice.path)?;
        if let Some(first) = arrays.first() {
            if first.shape()[1..] != pixels.shape()[1..] {
                return Err(SeriesFailure::InconsistentSlices {
                    path: slice.path.clone(),
                    expected: first.shape()[1..].to_vec(),
                    found: pixels.shape()[1..].to_vec(),
                });
            }
        }
        arrays.push(pixels);
    }
    let views: Vec<ArrayViewD<'_, f32>> = arrays.iter().map(|a| a.view()).collect();
    Ok(ndarray::concatenate(Axis(0), &views)?)
}

/// Build one series from already ordered slices.
pub(crate) fn assemble(
    id: &str,
    slices: &[Slice],
    meta: MetaStyle,
    ignore_groups: &[String],
) -> Result<SeriesImage, SeriesFailure> {
    let first = slices
        .first()
        .ok_or_else(|| SeriesFailure::NoFiles(id.to_string()))?;
    let data = stack_slices(slices)?;
    let metadata = match meta {
        MetaStyle::None => None,
        MetaStyle::SliceTags => Some(metadata::slice_tags(&first.obj, ignore_groups)),
        MetaStyle::AttributeSet => Some(metadata::attribute_set(&first.obj, ignore_groups)),
    };
    tracing::debug!("assembled series {} with shape {:?}", id, data.shape());
    Ok(SeriesImage {
        id: id.to_string(),
        data,
        metadata,
    })
}

/// Open `paths` and assemble them in the given order.
pub(crate) fn read_files(
    id: &str,
    paths: &[PathBuf],
    meta: MetaStyle,
    ignore_groups: &[String],
) -> Result<SeriesImage, SeriesFailure> {
    let slices = paths
        .iter()
        .map(|p| open_slice(p))
        .collect::<Result<Vec<_>, _>>()?;
    assemble(id, &slices, meta, ignore_groups)
}

fn read_grouped(id: &str, paths: Option<&Vec<PathBuf>>, options: &SeriesReadOptions) -> Result<SeriesImage, SeriesFailure> {
    let paths = paths.ok_or_else(|| SeriesFailure::NoFiles(id.to_string()))?;
    let mut slices = paths
        .iter()
        .map(|p| open_slice(p))
        .collect::<Result<Vec<_>, _>>()?;
    order_by_position(&mut slices);
    let meta = if options.return_meta {
        MetaStyle::SliceTags
    } else {
        MetaStyle::None
    };
    assemble(id, &slices, meta, &options.ignore_groups)
}

/// A file considered by the per-file backend.
struct Candidate {
    path: PathBuf,
    series_uid: Option<String>,
    acquisition_time: Option<NaiveTime>,
}

fn has_dicom_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm") || ext.eq_ignore_ascii_case("ima"))
}

/// `.dcm`/`.IMA` files of `folder` ordered by acquisition time, then file name.
fn list_candidates(folder: &Path) -> Result<Vec<Candidate>, SeriesError> {
    let mut candidates = Vec::new();
    for path in regular_files(folder)?.into_iter().filter(|p| has_dicom_extension(p)) {
        match open_header(&path) {
            Ok(obj) => candidates.push(Candidate {
                series_uid: obj.series_uid(),
                acquisition_time: obj.acquisition_time(),
                path,
            }),
            Err(e) => tracing::warn!("skipping unreadable file {:?}: {}", path, e),
        }
    }
    candidates.sort_by(|a, b| {
        a.acquisition_time
            .cmp(&b.acquisition_time)
            .then_with(|| a.path.cmp(&b.path))
    });
    Ok(candidates)
}

fn read_per_file(id: &str, candidates: &[Candidate], options: &SeriesReadOptions) -> Result<SeriesImage, SeriesFailure> {
    let slices = candidates
        .iter()
        .filter(|c| c.series_uid.as_deref() == Some(id))
        .map(|c| open_slice(&c.path))
        .collect::<Result<Vec<_>, _>>()?;
    let meta = if options.return_meta {
        MetaStyle::AttributeSet
    } else {
        MetaStyle::None
    };
    assemble(id, &slices, meta, &options.ignore_groups)
}

fn outcome(id: &str, result: Result<SeriesImage, SeriesFailure>) -> SeriesOutcome {
    result.map_err(|reason| FailedSeries {
        id: id.to_string(),
        reason,
    })
}

/// Read every requested series of `folder`, one outcome per series id.
pub fn read_series_outcomes(folder: &Path, options: &SeriesReadOptions) -> Result<Vec<SeriesOutcome>, SeriesError> {
    match options.backend {
        SeriesBackend::Grouped => {
            let groups = scan_folder(folder)?;
            let ids: Vec<String> = if options.series_ids.is_empty() {
                groups.keys().cloned().collect()
            } else {
                options.series_ids.clone()
            };
            Ok(ids
                .iter()
                .map(|id| outcome(id, read_grouped(id, groups.get(id), options)))
                .collect())
        }
        SeriesBackend::PerFile => {
            let ids = if options.series_ids.is_empty() {
                discover_series(folder)?
            } else {
                options.series_ids.clone()
            };
            let candidates = list_candidates(folder)?;
            Ok(ids
                .iter()
                .map(|id| outcome(id, read_per_file(id, &candidates, options)))
                .collect())
        }
    }
}

/// Best-effort read: series that fail are logged and left out.
///
/// An empty batch is returned, not an error, when nothing could be read.
pub fn read_series(folder: &Path, options: &SeriesReadOptions) -> Result<SeriesBatch, SeriesError> {
    let outcomes = read_series_outcomes(folder, options)?;
    aggregate(outcomes, options.return_ids, options.return_meta, options.stack)
}

/// Collect successful outcomes into a [`SeriesBatch`], dropping failures.
pub fn aggregate(
    outcomes: Vec<SeriesOutcome>,
    return_ids: bool,
    return_meta: bool,
    stack: bool,
) -> Result<SeriesBatch, SeriesError> {
    let mut images = Vec::new();
    let mut ids = Vec::new();
    let mut metas: Vec<Metadata> = Vec::new();

    for outcome in outcomes {
        match outcome {
            Ok(series) => {
                images.push(series.data);
                ids.push(series.id);
                metas.push(series.metadata.unwrap_or_default());
            }
            Err(failed) => {
                tracing::warn!("skipping series {}: {}", failed.id, failed.reason);
            }
        }
    }

    let images = if stack {
        SeriesImages::Stacked(stack_series(&ids, &images)?)
    } else {
        SeriesImages::List(images)
    };

    Ok(SeriesBatch {
        images,
        ids: return_ids.then_some(ids),
        metas: return_meta.then_some(metas),
    })
}

/// Stack per-series arrays along a new leading axis; all shapes must agree.
pub fn stack_series(ids: &[String], images: &[ArrayD<f32>]) -> Result<ArrayD<f32>, SeriesError> {
    let Some(first) = images.first() else {
        return Ok(ArrayD::zeros(IxDyn(&[0])));
    };
    for (id, image) in ids.iter().zip(images) {
        if image.shape() != first.shape() {
            return Err(SeriesError::ShapeMismatch {
                id: id.clone(),
                expected: first.shape().to_vec(),
                found: image.shape().to_vec(),
            });
        }
    }
    let views: Vec<ArrayViewD<'_, f32>> = images.iter().map(|a| a.view()).collect();
    ndarray::stack(Axis(0), &views).map_err(|e| SeriesError::Series(SeriesFailure::Shape(e)))
}
