//
// convert.rs
// Tricorder-rs
//
// Converts every series of a DICOM folder or DICOMDIR into compressed NIfTI volumes.
//

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::dicomdir::{self, DicomdirReadOptions};
use crate::error::SeriesError;
use crate::series::{self, SeriesReadOptions};
use crate::volume;

/// Where the series come from.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SourceKind {
    /// A folder of DICOM files.
    Folder,
    /// A DICOMDIR index file.
    Dicomdir,
}

/// Write each series found at `source` as `<target>/<id>.nii.gz`, or as
/// `<target>/<base>_<index>.nii.gz` when `base_name` is given.
///
/// Series that cannot be read are skipped. Ids that sanitize to a name already
/// written get their index appended. Returns the written paths in series order.
pub fn to_nifti(
    source: &Path,
    target: &Path,
    kind: SourceKind,
    base_name: Option<&str>,
) -> Result<Vec<PathBuf>, SeriesError> {
    let batch = match kind {
        SourceKind::Folder => series::read_series(
            source,
            &SeriesReadOptions {
                return_ids: true,
                stack: false,
                ..SeriesReadOptions::default()
            },
        )?,
        SourceKind::Dicomdir => dicomdir::read_dicomdir(
            source,
            &DicomdirReadOptions {
                return_ids: true,
                stack: false,
                ..DicomdirReadOptions::default()
            },
        )?,
    };

    fs::create_dir_all(target)?;

    let ids = batch.ids.unwrap_or_default();
    let mut written = Vec::with_capacity(ids.len());
    let mut used = HashSet::new();
    for (index, (image, id)) in batch.images.into_list().into_iter().zip(ids).enumerate() {
        let stem = match base_name {
            Some(base) => format!("{}_{}", base, index),
            None => unique_stem(sanitize_filename(&id), index, &mut used),
        };
        let path = target.join(format!("{}.nii.gz", stem));
        volume::save_volume(image.view(), &path)?;
        tracing::info!("saved series {} to {:?}", id, path);
        written.push(path);
    }
    Ok(written)
}

/// Claim `stem` in `used`, suffixing `_<index>` while it is taken.
fn unique_stem(stem: String, index: usize, used: &mut HashSet<String>) -> String {
    let mut candidate = stem.clone();
    while used.contains(&candidate) {
        candidate = format!("{}_{}", candidate, index);
    }
    if candidate != stem {
        tracing::warn!("file name {} already used, writing {} instead", stem, candidate);
    }
    used.insert(candidate.clone());
    candidate
}

/// Replace characters that cannot appear in a file name.
pub fn sanitize_filename(input: &str) -> String {
    input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '^') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
