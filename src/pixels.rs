//
// pixels.rs
// Tricorder-rs
//
// Decodes DICOM pixel data into f32 arrays and exposes the single-file read.
//

use std::path::Path;

use dicom::object::{open_file, DefaultDicomObject};
use dicom_pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder, VoiLutOption};
use ndarray::{ArrayD, Axis};

use crate::error::SeriesFailure;

/// What [`read_file`] hands back.
#[derive(Debug)]
pub enum FileRead {
    Pixels(ArrayD<f32>),
    Dataset(Box<DefaultDicomObject>),
    Both(ArrayD<f32>, Box<DefaultDicomObject>),
}

impl FileRead {
    pub fn pixels(&self) -> Option<&ArrayD<f32>> {
        match self {
            FileRead::Pixels(p) | FileRead::Both(p, _) => Some(p),
            FileRead::Dataset(_) => None,
        }
    }

    pub fn dataset(&self) -> Option<&DefaultDicomObject> {
        match self {
            FileRead::Dataset(ds) | FileRead::Both(_, ds) => Some(ds),
            FileRead::Pixels(_) => None,
        }
    }
}

/// Open one DICOM file and return its pixels, its dataset or both.
///
/// Asking for neither falls back to the pixels.
pub fn read_file(path: &Path, return_data: bool, return_dataset: bool) -> Result<FileRead, SeriesFailure> {
    let obj = open_file(path).map_err(|source| SeriesFailure::Open {
        path: path.to_path_buf(),
        source,
    })?;

    match (return_data, return_dataset) {
        (false, true) => Ok(FileRead::Dataset(Box::new(obj))),
        (true, true) => {
            let pixels = decode_pixels(&obj, path)?;
            Ok(FileRead::Both(pixels, Box::new(obj)))
        }
        _ => Ok(FileRead::Pixels(decode_pixels(&obj, path)?)),
    }
}

/// Decode all frames of `obj` as `(frames, rows, columns)`, or
/// `(frames, rows, columns, samples)` when there is more than one sample per pixel.
///
/// The modality LUT (rescale slope/intercept) is applied, VOI windowing is not.
pub fn decode_pixels(obj: &DefaultDicomObject, path: &Path) -> Result<ArrayD<f32>, SeriesFailure> {
    let decode_err = |source| SeriesFailure::Decode {
        path: path.to_path_buf(),
        source,
    };
    let decoded = obj.decode_pixel_data().map_err(decode_err)?;

    let options = ConvertOptions::new()
        .with_modality_lut(ModalityLutOption::Default)
        .with_voi_lut(VoiLutOption::Identity);
    let array = decoded
        .to_ndarray_with_options::<f32>(&options)
        .map_err(decode_err)?
        .into_dyn();

    // frames x rows x columns x samples
    if array.ndim() == 4 && array.shape()[3] == 1 {
        Ok(array.index_axis_move(Axis(3), 0))
    } else {
        Ok(array)
    }
}
