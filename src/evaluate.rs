//
// evaluate.rs
// Tricorder-rs
//
// Wraps the external EvaluateSegmentation tool: stages inputs, builds its command line, runs it and collects scores.
//

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;

use ndarray::ArrayViewD;
use tempfile::{Builder, NamedTempFile, TempPath};

use crate::error::EvaluationError;
use crate::models::EvaluationReport;
use crate::report;
use crate::volume;

/// Metric codes understood by EvaluateSegmentation.
pub mod metric {
    pub const DICE: &str = "DICE";
    pub const JACRD: &str = "JACRD";
    pub const GCOERR: &str = "GCOERR";
    pub const VOLSMTY: &str = "VOLSMTY";
    pub const KAPPA: &str = "KAPPA";
    pub const AUC: &str = "AUC";
    pub const RNDIND: &str = "RNDIND";
    pub const ADJRIND: &str = "ADJRIND";
    pub const ICCORR: &str = "ICCORR";
    pub const MUTINF: &str = "MUTINF";
    pub const FALLOUT: &str = "FALLOUT";
    pub const COEFVAR: &str = "COEFVAR";
    pub const AVGDIST: &str = "AVGDIST";
    pub const BAVD: &str = "bAVD";
    /// Accepts a quantile suffix, e.g. `HDRFDST@0.95@`.
    pub const HDRFDST: &str = "HDRFDST";
    pub const VARINFO: &str = "VARINFO";
    pub const PROBDST: &str = "PROBDST";
    pub const MAHLNBS: &str = "MAHLNBS";
    pub const SNSVTY: &str = "SNSVTY";
    pub const SPCFTY: &str = "SPCFTY";
    pub const PRCISON: &str = "PRCISON";
    /// Accepts a beta suffix, e.g. `FMEASR@0.5@`.
    pub const FMEASR: &str = "FMEASR";
    pub const ACURCY: &str = "ACURCY";
    pub const TP: &str = "TP";
    pub const TN: &str = "TN";
    pub const FP: &str = "FP";
    pub const FN: &str = "FN";
    pub const SEGVOL: &str = "SEGVOL";
    pub const REFVOL: &str = "REFVOL";

    pub const ALL: &[&str] = &[
        DICE, JACRD, GCOERR, VOLSMTY, KAPPA, AUC, RNDIND, ADJRIND, ICCORR, MUTINF, FALLOUT,
        COEFVAR, AVGDIST, BAVD, HDRFDST, VARINFO, PROBDST, MAHLNBS, SNSVTY, SPCFTY, PRCISON,
        FMEASR, ACURCY, TP, TN, FP, FN, SEGVOL, REFVOL,
    ];
}

/// Unit used for distance and volume metrics.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum DistanceUnit {
    #[default]
    Voxel,
    Millimeter,
}

impl DistanceUnit {
    pub fn as_arg(self) -> &'static str {
        match self {
            DistanceUnit::Voxel => "voxel",
            DistanceUnit::Millimeter => "millimeter",
        }
    }
}

/// Processing mode of the tool. Only `Segmentation` has been validated against real output.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum EvaluationMode {
    #[default]
    Segmentation,
    Localization,
    Detection,
}

impl EvaluationMode {
    fn flag(self) -> Option<&'static str> {
        match self {
            EvaluationMode::Segmentation => None,
            EvaluationMode::Localization => Some("-loc"),
            EvaluationMode::Detection => Some("-det"),
        }
    }
}

/// Defaults fixed when the invoker is built.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationConfig {
    pub binary: PathBuf,
    /// Run every metric, ignoring `metrics`.
    pub use_all: bool,
    /// Comma-separated metric codes, used when `use_all` is false.
    pub metrics: String,
    /// Binarize fuzzy inputs at this threshold before evaluating.
    pub threshold: Option<f64>,
    pub unit: DistanceUnit,
    pub mode: EvaluationMode,
    /// Keep the parsed report next to the flattened scores.
    pub return_raw: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("EvaluateSegmentation"),
            use_all: true,
            metrics: format!("{},{}", metric::DICE, metric::PROBDST),
            threshold: None,
            unit: DistanceUnit::Voxel,
            mode: EvaluationMode::Segmentation,
            return_raw: false,
        }
    }
}

/// Per-call replacements for [`EvaluationConfig`] fields. `None` keeps the default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationOverrides {
    pub use_all: Option<bool>,
    pub metrics: Option<String>,
    /// `Some(None)` disables a configured threshold for this call.
    pub threshold: Option<Option<f64>>,
    pub unit: Option<DistanceUnit>,
    pub mode: Option<EvaluationMode>,
    pub return_raw: Option<bool>,
}

/// A label volume handed to the tool, either on disk or in memory.
#[derive(Debug, Clone)]
pub enum VolumeSource<'a> {
    Path(&'a Path),
    Array(ArrayViewD<'a, f32>),
}

impl<'a> From<&'a Path> for VolumeSource<'a> {
    fn from(path: &'a Path) -> Self {
        VolumeSource::Path(path)
    }
}

impl<'a> From<ArrayViewD<'a, f32>> for VolumeSource<'a> {
    fn from(array: ArrayViewD<'a, f32>) -> Self {
        VolumeSource::Array(array)
    }
}

/// Input path for the tool, plus the temporary file backing it when staged from memory.
struct StagedVolume {
    path: PathBuf,
    temp: Option<TempPath>,
}

impl StagedVolume {
    fn stage(source: &VolumeSource<'_>) -> Result<Self, EvaluationError> {
        match source {
            VolumeSource::Path(path) => Ok(Self {
                path: path.to_path_buf(),
                temp: None,
            }),
            VolumeSource::Array(array) => {
                let temp = temp_path(".nii.gz")?;
                volume::save_volume(array.view(), &temp)?;
                Ok(Self {
                    path: temp.to_path_buf(),
                    temp: Some(temp),
                })
            }
        }
    }
}

impl Drop for StagedVolume {
    fn drop(&mut self) {
        if let Some(temp) = self.temp.take() {
            release(temp);
        }
    }
}

fn temp_path(suffix: &str) -> Result<TempPath, EvaluationError> {
    let file: NamedTempFile = Builder::new().prefix("tricorder-").suffix(suffix).tempfile()?;
    Ok(file.into_temp_path())
}

/// Remove a temporary file, tolerating one that is already gone.
fn release(temp: TempPath) {
    let path = temp.to_path_buf();
    if let Err(e) = temp.close() {
        if e.kind() != ErrorKind::NotFound {
            tracing::warn!("failed to remove temporary file {:?}: {}", path, e);
        }
    }
}

/// Resolved options for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOptions {
    pub use_all: bool,
    pub metrics: String,
    pub threshold: Option<f64>,
    pub unit: DistanceUnit,
    pub mode: EvaluationMode,
    pub return_raw: bool,
}

/// Runs EvaluateSegmentation against pairs of label volumes.
#[derive(Debug, Clone)]
pub struct EvaluateSegmentation {
    config: EvaluationConfig,
}

impl EvaluateSegmentation {
    pub fn new(config: EvaluationConfig) -> Self {
        Self { config }
    }

    /// Shortcut for the default configuration with a custom binary location.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self::new(EvaluationConfig {
            binary: binary.into(),
            ..EvaluationConfig::default()
        })
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    pub fn resolve(&self, overrides: &EvaluationOverrides) -> ResolvedOptions {
        let c = &self.config;
        ResolvedOptions {
            use_all: overrides.use_all.unwrap_or(c.use_all),
            metrics: overrides
                .metrics
                .clone()
                .unwrap_or_else(|| c.metrics.clone()),
            threshold: overrides.threshold.unwrap_or(c.threshold),
            unit: overrides.unit.unwrap_or(c.unit),
            mode: overrides.mode.unwrap_or(c.mode),
            return_raw: overrides.return_raw.unwrap_or(c.return_raw),
        }
    }

    /// Arguments passed to the tool (binary excluded).
    pub fn command_args(
        &self,
        truth: &Path,
        prediction: &Path,
        xml_path: &Path,
        options: &ResolvedOptions,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if let Some(flag) = options.mode.flag() {
            args.push(flag.into());
        }
        args.push(truth.into());
        args.push(prediction.into());
        if let Some(threshold) = options.threshold {
            args.push("-thd".into());
            args.push(threshold.to_string().into());
        }
        args.push("-xml".into());
        args.push(xml_path.into());
        args.push("-unit".into());
        args.push(options.unit.as_arg().into());
        args.push("-use".into());
        if options.use_all {
            args.push("all".into());
        } else {
            args.push(options.metrics.as_str().into());
        }
        args
    }

    /// Evaluate `prediction` against `truth`.
    ///
    /// When `xml_path` is `None` the report goes to a temporary file that is
    /// removed afterwards. In-memory volumes are staged as temporary `.nii.gz`
    /// files for the duration of the call.
    pub fn get_scores(
        &self,
        truth: VolumeSource<'_>,
        prediction: VolumeSource<'_>,
        xml_path: Option<&Path>,
        overrides: &EvaluationOverrides,
    ) -> Result<EvaluationReport, EvaluationError> {
        let options = self.resolve(overrides);
        let start = Instant::now();

        let truth = StagedVolume::stage(&truth)?;
        let prediction = StagedVolume::stage(&prediction)?;

        let (xml, temp_xml) = match xml_path {
            Some(path) => (path.to_path_buf(), None),
            None => {
                let temp = temp_path(".xml")?;
                (temp.to_path_buf(), Some(temp))
            }
        };

        let result = self.run_tool(&truth.path, &prediction.path, &xml, &options);
        tracing::info!("evaluation finished in {:.3}s", start.elapsed().as_secs_f64());
        drop(truth);
        drop(prediction);

        let result = result.and_then(|()| {
            let raw = report::read_report(&xml)?;
            let scores = report::flatten_metrics(&raw)?;
            Ok(EvaluationReport {
                scores,
                raw: options.return_raw.then_some(raw),
            })
        });

        if let Some(temp) = temp_xml {
            release(temp);
        }
        result
    }

    fn run_tool(
        &self,
        truth: &Path,
        prediction: &Path,
        xml: &Path,
        options: &ResolvedOptions,
    ) -> Result<(), EvaluationError> {
        let binary = &self.config.binary;
        let args = self.command_args(truth, prediction, xml, options);
        tracing::debug!("running {:?} {:?}", binary, args);

        let output = Command::new(binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| match source.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => EvaluationError::ToolNotFound {
                    path: binary.clone(),
                    source,
                },
                _ => EvaluationError::Launch {
                    path: binary.clone(),
                    source,
                },
            })?;

        if !output.stdout.is_empty() {
            tracing::debug!("tool stdout: {}", String::from_utf8_lossy(&output.stdout).trim_end());
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(EvaluationError::ToolFailed {
                status: output.status,
                stderr,
            });
        }
        Ok(())
    }
}
