//
// volume.rs
// Tricorder-rs
//
// Persists arrays as NIfTI-1 volumes and reads them back.
//

use std::path::Path;

use ndarray::{ArrayD, ArrayViewD};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};

use crate::error::VolumeError;

/// Write `data` as a NIfTI-1 file. The output is gzip-compressed when `path` ends in `.gz`.
///
/// Arrays are indexed slowest axis first, e.g. `(slices, rows, columns)`; the
/// header stores them fastest first, so such an array lands as `[columns, rows, slices]`.
pub fn save_volume(data: ArrayViewD<'_, f32>, path: &Path) -> Result<(), VolumeError> {
    if data.ndim() == 0 || data.ndim() > 7 {
        return Err(VolumeError::Dimensionality(data.ndim()));
    }
    let shape = data.shape().to_vec();
    // [z, H, W] -> [W, H, z]
    let header_order = data.reversed_axes();
    let header_order = header_order.as_standard_layout();
    WriterOptions::new(path)
        .write_nifti(&header_order)
        .map_err(|source| VolumeError::Nifti {
            path: path.to_path_buf(),
            source,
        })?;
    tracing::debug!("wrote volume {:?} with shape {:?}", path, shape);
    Ok(())
}

/// Read a NIfTI-1 file (plain or gzip) into an `f32` array, slowest axis first.
/// This is the inverse of [`save_volume`].
pub fn load_volume(path: &Path) -> Result<ArrayD<f32>, VolumeError> {
    let nifti_err = |source| VolumeError::Nifti {
        path: path.to_path_buf(),
        source,
    };
    let obj = ReaderOptions::new().read_file(path).map_err(nifti_err)?;
    // [W, H, z] -> [z, H, W]
    let data = obj.into_volume().into_ndarray::<f32>().map_err(nifti_err)?;
    Ok(data.reversed_axes().as_standard_layout().into_owned())
}
