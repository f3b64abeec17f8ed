//
// evaluate_segmentation.rs
// Tricorder-rs
//
// Runs the evaluation wrapper against a stand-in EvaluateSegmentation script that echoes its arguments into the XML report.
//
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use ndarray::{Array, ArrayD, IxDyn};
use tempfile::{tempdir, TempDir};
use tricorder::evaluate::{DistanceUnit, EvaluationMode};
use tricorder::{volume, EvaluateSegmentation, EvaluationConfig, EvaluationError, EvaluationOverrides, VolumeSource};

// Scores every requested metric 1 when both inputs are byte-identical and 0
// otherwise, and records mode, unit, threshold and the input paths. The FAIL
// metric logs the paths it was given and exits non-zero.
const FAKE_TOOL: &str = r#"#!/bin/sh
mode=segmentation
case "$1" in
  -loc) mode=localization; shift ;;
  -det) mode=detection; shift ;;
esac
truth="$1"; pred="$2"; shift 2
thd=none; xml=""; unit=""; use=""
while [ $# -gt 0 ]; do
  case "$1" in
    -thd) thd="$2"; shift 2 ;;
    -xml) xml="$2"; shift 2 ;;
    -unit) unit="$2"; shift 2 ;;
    -use) use="$2"; shift 2 ;;
    *) shift ;;
  esac
done
if [ ! -f "$truth" ] || [ ! -f "$pred" ]; then
  echo "cannot read input volume" >&2
  exit 3
fi
if [ "$truth" = "$pred" ] || cmp -s "$truth" "$pred"; then same=1; else same=0; fi
if [ "$use" = "all" ]; then use="DICE,JACRD,HDRFDST"; fi
if [ "$use" = "FAIL" ]; then
  echo "$truth $pred $xml" > "$(dirname "$0")/failed-call.log"
  echo "evaluation aborted" >&2
  exit 4
fi
if [ "$use" = "BROKEN" ]; then
  echo "<measurement><metrics>" > "$xml"
  exit 0
fi
{
  echo '<?xml version="1.0" encoding="UTF-8"?>'
  echo '<measurement>'
  echo "  <fixed-image filename=\"$truth\"/>"
  echo "  <moving-image filename=\"$pred\"/>"
  echo '  <metrics>'
  IFS=,
  for m in $use; do
    echo "    <$m value=\"$same\" name=\"$m\" unit=\"$unit\"/>"
  done
  echo '  </metrics>'
  echo "  <settings mode=\"$mode\" unit=\"$unit\" threshold=\"$thd\"/>"
  echo '</measurement>'
} > "$xml"
"#;

/// The script is written once per test binary so no test execs it while another is still writing it.
fn fake_tool() -> &'static Path {
    static TOOL: OnceLock<(TempDir, PathBuf)> = OnceLock::new();
    let (_, path) = TOOL.get_or_init(|| {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("EvaluateSegmentation");
        fs::write(&path, FAKE_TOOL).expect("write fake tool");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
        (dir, path)
    });
    path
}

fn labels(seed: f32) -> ArrayD<f32> {
    Array::from_shape_fn(IxDyn(&[2, 3, 4]), |idx| {
        if (idx[0] + idx[1] + idx[2]) % 2 == 0 {
            seed
        } else {
            0.0
        }
    })
}

fn invoker() -> EvaluateSegmentation {
    EvaluateSegmentation::new(EvaluationConfig {
        binary: fake_tool().to_path_buf(),
        use_all: false,
        metrics: "DICE,PROBDST".to_string(),
        ..EvaluationConfig::default()
    })
}

fn settings(raw: &serde_json::Value) -> (String, String, String) {
    let s = &raw["measurement"]["settings"];
    let field = |k: &str| s[k].as_str().unwrap_or_default().to_string();
    (field("@mode"), field("@unit"), field("@threshold"))
}

#[test]
fn explicit_metric_subset_defines_result_keys() {
    let dir = tempdir().expect("tempdir");
    let truth = dir.path().join("truth.nii.gz");
    volume::save_volume(labels(1.0).view(), &truth).expect("save");

    let report = invoker()
        .get_scores(
            VolumeSource::Path(&truth),
            VolumeSource::Path(&truth),
            None,
            &EvaluationOverrides {
                metrics: Some("DICE,JACRD,SNSVTY".to_string()),
                ..Default::default()
            },
        )
        .expect("scores");
    let keys: Vec<_> = report.scores.keys().cloned().collect();
    assert_eq!(keys, ["DICE", "JACRD", "SNSVTY"]);
    assert!(report.scores.values().all(|v| *v == 1.0));
    assert!(report.raw.is_none());
}

#[test]
fn use_all_runs_every_metric() {
    let dir = tempdir().expect("tempdir");
    let truth = dir.path().join("truth.nii.gz");
    volume::save_volume(labels(1.0).view(), &truth).expect("save");

    let invoker = EvaluateSegmentation::with_binary(fake_tool());
    let report = invoker
        .get_scores(
            VolumeSource::Path(&truth),
            VolumeSource::Path(&truth),
            None,
            &EvaluationOverrides::default(),
        )
        .expect("scores");
    assert_eq!(report.scores.len(), 3);
    assert!(report.scores.contains_key("HDRFDST"));
}

#[test]
fn in_memory_arrays_match_persisted_files() {
    let dir = tempdir().expect("tempdir");
    let truth = labels(1.0);
    let pred = labels(1.0);
    let truth_path = dir.path().join("truth.nii.gz");
    let pred_path = dir.path().join("pred.nii.gz");
    volume::save_volume(truth.view(), &truth_path).expect("save truth");
    volume::save_volume(pred.view(), &pred_path).expect("save pred");

    let invoker = invoker();
    let overrides = EvaluationOverrides::default();
    let from_files = invoker
        .get_scores(
            VolumeSource::Path(&truth_path),
            VolumeSource::Path(&pred_path),
            None,
            &overrides,
        )
        .expect("from files");
    let from_arrays = invoker
        .get_scores(
            VolumeSource::Array(truth.view()),
            VolumeSource::Array(pred.view()),
            None,
            &overrides,
        )
        .expect("from arrays");
    let mixed = invoker
        .get_scores(
            VolumeSource::Path(&truth_path),
            VolumeSource::Array(pred.view()),
            None,
            &overrides,
        )
        .expect("mixed");

    assert_eq!(from_files.scores, from_arrays.scores);
    assert_eq!(from_files.scores, mixed.scores);
    assert_eq!(from_files.scores["DICE"], 1.0);

    let different = invoker
        .get_scores(
            VolumeSource::Path(&truth_path),
            VolumeSource::Array(labels(2.0).view()),
            None,
            &overrides,
        )
        .expect("different");
    assert_eq!(different.scores["DICE"], 0.0);
}

#[test]
fn staged_arrays_and_temporary_report_are_removed() {
    let dir = tempdir().expect("tempdir");
    let xml = dir.path().join("report.xml");
    let report = invoker()
        .get_scores(
            VolumeSource::Array(labels(1.0).view()),
            VolumeSource::Array(labels(1.0).view()),
            Some(&xml),
            &EvaluationOverrides {
                return_raw: Some(true),
                ..Default::default()
            },
        )
        .expect("scores");

    let raw = report.raw.expect("raw report");
    let staged_truth = raw["measurement"]["fixed-image"]["@filename"]
        .as_str()
        .expect("filename")
        .to_string();
    assert!(staged_truth.ends_with(".nii.gz"));
    assert!(!Path::new(&staged_truth).exists());
    // a caller-supplied report path is kept
    assert!(xml.exists());
}

#[test]
fn constructor_defaults_reach_the_tool() {
    let invoker = EvaluateSegmentation::new(EvaluationConfig {
        binary: fake_tool().to_path_buf(),
        use_all: false,
        metrics: "DICE".to_string(),
        threshold: Some(0.5),
        unit: DistanceUnit::Millimeter,
        mode: EvaluationMode::Localization,
        return_raw: true,
    });
    let dir = tempdir().expect("tempdir");
    let truth = dir.path().join("t.nii.gz");
    volume::save_volume(labels(1.0).view(), &truth).expect("save");

    let report = invoker
        .get_scores(
            VolumeSource::Path(&truth),
            VolumeSource::Path(&truth),
            None,
            &EvaluationOverrides::default(),
        )
        .expect("scores");
    let raw = report.raw.expect("raw requested in config");
    assert_eq!(
        settings(&raw),
        ("localization".to_string(), "millimeter".to_string(), "0.5".to_string())
    );
}

#[test]
fn per_call_overrides_win_and_do_not_stick() {
    let invoker = EvaluateSegmentation::new(EvaluationConfig {
        binary: fake_tool().to_path_buf(),
        use_all: false,
        metrics: "DICE".to_string(),
        threshold: Some(0.5),
        unit: DistanceUnit::Millimeter,
        mode: EvaluationMode::Localization,
        return_raw: false,
    });
    let dir = tempdir().expect("tempdir");
    let truth = dir.path().join("t.nii.gz");
    volume::save_volume(labels(1.0).view(), &truth).expect("save");

    let overrides = EvaluationOverrides {
        use_all: Some(true),
        metrics: Some("KAPPA".to_string()),
        threshold: Some(None),
        unit: Some(DistanceUnit::Voxel),
        mode: Some(EvaluationMode::Segmentation),
        return_raw: Some(true),
    };
    let report = invoker
        .get_scores(VolumeSource::Path(&truth), VolumeSource::Path(&truth), None, &overrides)
        .expect("scores");
    let raw = report.raw.expect("raw overridden on");
    assert_eq!(
        settings(&raw),
        ("segmentation".to_string(), "voxel".to_string(), "none".to_string())
    );
    assert_eq!(report.scores.len(), 3);

    let again = invoker
        .get_scores(
            VolumeSource::Path(&truth),
            VolumeSource::Path(&truth),
            None,
            &EvaluationOverrides::default(),
        )
        .expect("scores");
    assert!(again.raw.is_none());
    let keys: Vec<_> = again.scores.keys().cloned().collect();
    assert_eq!(keys, ["DICE"]);
}

#[test]
fn non_zero_exit_surfaces_stderr() {
    let err = invoker()
        .get_scores(
            VolumeSource::Path(Path::new("/no/such/truth.nii.gz")),
            VolumeSource::Path(Path::new("/no/such/pred.nii.gz")),
            None,
            &EvaluationOverrides::default(),
        )
        .unwrap_err();
    match err {
        EvaluationError::ToolFailed { status, stderr } => {
            assert_eq!(status.code(), Some(3));
            assert_eq!(stderr, "cannot read input volume");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn staged_files_are_removed_when_the_tool_fails() {
    let err = invoker()
        .get_scores(
            VolumeSource::Array(labels(1.0).view()),
            VolumeSource::Array(labels(2.0).view()),
            None,
            &EvaluationOverrides {
                metrics: Some("FAIL".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, EvaluationError::ToolFailed { .. }));

    let log = fake_tool().parent().expect("tool dir").join("failed-call.log");
    let logged = fs::read_to_string(log).expect("tool log");
    let paths: Vec<&str> = logged.split_whitespace().collect();
    assert_eq!(paths.len(), 3);
    assert!(paths[0].ends_with(".nii.gz") && paths[1].ends_with(".nii.gz"));
    assert!(paths[2].ends_with(".xml"));
    for path in paths {
        assert!(!Path::new(path).exists(), "{path} left behind");
    }
}

#[test]
fn truncated_report_is_malformed() {
    let dir = tempdir().expect("tempdir");
    let truth = dir.path().join("t.nii.gz");
    volume::save_volume(labels(1.0).view(), &truth).expect("save");

    let err = invoker()
        .get_scores(
            VolumeSource::Path(&truth),
            VolumeSource::Path(&truth),
            None,
            &EvaluationOverrides {
                metrics: Some("BROKEN".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, EvaluationError::MalformedReport { .. }));
}

#[test]
fn missing_tool_is_distinguished_from_tool_failure() {
    // spawn only once the shared script is fully written
    let _ = fake_tool();
    let invoker = EvaluateSegmentation::with_binary("/no/such/dir/EvaluateSegmentation");
    let err = invoker
        .get_scores(
            VolumeSource::Array(labels(1.0).view()),
            VolumeSource::Array(labels(1.0).view()),
            None,
            &EvaluationOverrides::default(),
        )
        .unwrap_err();
    assert!(matches!(err, EvaluationError::ToolNotFound { .. }));
}
