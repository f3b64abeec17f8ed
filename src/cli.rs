//
// cli.rs
// Tricorder-rs
//
// Defines the CLI surface with Clap and dispatches user-selected commands to the corresponding modules.
//

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};

use crate::convert::{self, SourceKind};
use crate::dicomdir::{self, DicomdirReadOptions};
use crate::evaluate::{
    DistanceUnit, EvaluateSegmentation, EvaluationConfig, EvaluationMode, EvaluationOverrides,
    VolumeSource,
};
use crate::metadata;
use crate::models::SeriesBatch;
use crate::series::{self, SeriesBackend, SeriesReadOptions};

/// Command-line interface glue code: defines the available verbs and dispatches to modules.
#[derive(Parser)]
#[command(name = "tricorder")]
#[command(about = "Medical imaging utilities: segmentation evaluation and DICOM series conversion", long_about = None)]
pub struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Score a prediction against a ground truth with EvaluateSegmentation
    Evaluate {
        truth: PathBuf,
        prediction: PathBuf,
        /// Location of the EvaluateSegmentation binary
        #[arg(long, env = "EVALUATE_SEGMENTATION_BIN", default_value = "EvaluateSegmentation")]
        bin: PathBuf,
        /// Comma-separated metric codes (e.g. DICE,PROBDST,bAVD); all metrics when omitted
        #[arg(long)]
        metrics: Option<String>,
        /// Binarize fuzzy inputs at this threshold
        #[arg(long)]
        threshold: Option<f64>,
        /// Report distances and volumes in millimeters instead of voxels
        #[arg(long)]
        millimeter: bool,
        #[arg(long, value_enum, default_value_t = Mode::Segmentation)]
        mode: Mode,
        /// Keep the XML report at this path
        #[arg(long)]
        xml: Option<PathBuf>,
        /// Print the full parsed report as JSON
        #[arg(long)]
        raw: bool,
    },
    /// Read the DICOM series of a folder
    Series {
        folder: PathBuf,
        #[arg(long, value_enum, default_value_t = Backend::Grouped)]
        backend: Backend,
        /// Restrict to these SeriesInstanceUIDs
        #[arg(long = "series-id")]
        series_ids: Vec<String>,
        /// Print the metadata of each series
        #[arg(long)]
        meta: bool,
        /// Tag groups (hex, e.g. 0029) left out of the metadata
        #[arg(long = "ignore-group")]
        ignore_groups: Vec<String>,
    },
    /// Read the series referenced by a DICOMDIR
    Dicomdir { path: PathBuf },
    /// Convert DICOM series to compressed NIfTI
    ToNifti {
        source: PathBuf,
        target: PathBuf,
        /// Treat the source as a DICOMDIR index instead of a folder
        #[arg(long)]
        dicomdir: bool,
        /// Name outputs <NAME>_<index> instead of by series id
        #[arg(long)]
        name: Option<String>,
    },
    /// Summarize a single DICOM file
    Info {
        file: PathBuf,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum Mode {
    Segmentation,
    Localization,
    Detection,
}

impl From<Mode> for EvaluationMode {
    fn from(value: Mode) -> Self {
        match value {
            Mode::Segmentation => EvaluationMode::Segmentation,
            Mode::Localization => EvaluationMode::Localization,
            Mode::Detection => EvaluationMode::Detection,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum Backend {
    Grouped,
    PerFile,
}

impl From<Backend> for SeriesBackend {
    fn from(value: Backend) -> Self {
        match value {
            Backend::Grouped => SeriesBackend::Grouped,
            Backend::PerFile => SeriesBackend::PerFile,
        }
    }
}

pub fn run() -> anyhow::Result<()> {
    // Parse the raw CLI arguments once and dispatch to a subcommand handler.
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Evaluate {
            truth,
            prediction,
            bin,
            metrics,
            threshold,
            millimeter,
            mode,
            xml,
            raw,
        } => {
            let config = EvaluationConfig {
                binary: bin,
                use_all: metrics.is_none(),
                metrics: metrics.unwrap_or_else(|| EvaluationConfig::default().metrics),
                threshold,
                unit: if millimeter {
                    DistanceUnit::Millimeter
                } else {
                    DistanceUnit::Voxel
                },
                mode: mode.into(),
                return_raw: raw,
            };
            let report = EvaluateSegmentation::new(config)
                .get_scores(
                    VolumeSource::Path(&truth),
                    VolumeSource::Path(&prediction),
                    xml.as_deref(),
                    &EvaluationOverrides::default(),
                )
                .context("Evaluation failed")?;
            for (name, score) in &report.scores {
                println!("{:<10} {}", name, score);
            }
            if let Some(raw) = &report.raw {
                println!("{}", serde_json::to_string_pretty(raw)?);
            }
        }
        Commands::Series {
            folder,
            backend,
            series_ids,
            meta,
            ignore_groups,
        } => {
            let options = SeriesReadOptions {
                backend: backend.into(),
                series_ids,
                return_ids: true,
                return_meta: meta,
                stack: false,
                ignore_groups,
            };
            let batch = series::read_series(&folder, &options)
                .with_context(|| format!("Failed to read series from {:?}", folder))?;
            print_batch(batch)?;
        }
        Commands::Dicomdir { path } => {
            let options = DicomdirReadOptions {
                return_ids: true,
                stack: false,
                ..DicomdirReadOptions::default()
            };
            let batch = dicomdir::read_dicomdir(&path, &options)
                .with_context(|| format!("Failed to read DICOMDIR {:?}", path))?;
            print_batch(batch)?;
        }
        Commands::ToNifti {
            source,
            target,
            dicomdir,
            name,
        } => {
            let kind = if dicomdir {
                SourceKind::Dicomdir
            } else {
                SourceKind::Folder
            };
            let written = convert::to_nifti(&source, &target, kind, name.as_deref())
                .context("Conversion to NIfTI failed")?;
            if written.is_empty() {
                bail!("No readable series found in {:?}", source);
            }
            for path in written {
                println!("{}", path.display());
            }
        }
        Commands::Info { file, json } => metadata::print_info(&file, json)?,
    }

    Ok(())
}

fn print_batch(batch: SeriesBatch) -> anyhow::Result<()> {
    let ids = batch.ids.unwrap_or_default();
    let metas = batch.metas;
    let images = batch.images.into_list();
    if images.is_empty() {
        bail!("No readable series found");
    }
    for (idx, (id, image)) in ids.iter().zip(&images).enumerate() {
        println!("{}  shape {:?}", id, image.shape());
        if let Some(meta) = metas.as_ref().and_then(|m| m.get(idx)) {
            for (key, value) in meta {
                println!("    {:<24} {}", key, value);
            }
        }
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}
