//! On-disk model artifact: JSON with weights, bias, input geometry and the
//! label mapping, integrity-checked with a SHA-256 over the parameters.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{Classifier, ClassifierError, LabelMapping};
use crate::models::Condition;
use crate::pipeline::preprocess::{InputSpec, INPUT_CHANNELS};

pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct ArtifactFile {
    format_version: u32,
    artifact_version: u64,
    created_at: DateTime<Utc>,
    input: InputSpec,
    /// Display names, in output-column order.
    labels: Vec<String>,
    /// Row-major, features × classes.
    weights: Vec<f32>,
    bias: Vec<f32>,
    checksum: String,
}

/// Load and validate an artifact. Every failure is `ArtifactLoad`.
pub fn load_artifact(path: &Path) -> Result<Classifier, ClassifierError> {
    let fail = |reason: String| ClassifierError::ArtifactLoad {
        path: path.to_path_buf(),
        reason,
    };

    let raw = std::fs::read(path).map_err(|e| fail(e.to_string()))?;
    let file: ArtifactFile =
        serde_json::from_slice(&raw).map_err(|e| fail(format!("corrupt artifact: {e}")))?;

    if file.format_version != ARTIFACT_FORMAT_VERSION {
        return Err(fail(format!(
            "unsupported format version {}",
            file.format_version
        )));
    }
    if file.input.channels != INPUT_CHANNELS || file.input.width == 0 || file.input.height == 0 {
        return Err(fail(format!("unsupported input geometry {:?}", file.input)));
    }

    let labels = file
        .labels
        .iter()
        .map(|l| l.parse::<Condition>().map_err(|_| fail(format!("unknown label '{l}'"))))
        .collect::<Result<Vec<_>, _>>()?;
    let mapping = LabelMapping::new(labels).map_err(|e| fail(e.to_string()))?;

    let expected = checksum(&file.weights, &file.bias);
    if expected != file.checksum {
        return Err(fail("checksum mismatch".into()));
    }

    let features = file.input.features();
    let weights = Array2::from_shape_vec((features, mapping.len()), file.weights)
        .map_err(|e| fail(format!("weights shape: {e}")))?;
    let bias = Array1::from(file.bias);

    Classifier::new(
        mapping,
        file.input,
        weights,
        bias,
        file.artifact_version,
        file.created_at,
    )
    .map_err(|e| fail(e.to_string()))
}

/// Serialize `classifier` into `writer`.
pub fn write_artifact<W: Write>(classifier: &Classifier, writer: W) -> Result<(), serde_json::Error> {
    let weights: Vec<f32> = classifier.weights().iter().copied().collect();
    let bias = classifier.bias().to_vec();
    let file = ArtifactFile {
        format_version: ARTIFACT_FORMAT_VERSION,
        artifact_version: classifier.version(),
        created_at: classifier.created_at(),
        input: classifier.input_spec(),
        labels: classifier
            .mapping()
            .labels()
            .iter()
            .map(|l| l.as_str().to_string())
            .collect(),
        checksum: checksum(&weights, &bias),
        weights,
        bias,
    };
    serde_json::to_writer(writer, &file)
}

/// Write `classifier` to `path` without ever exposing a partial file.
///
/// The artifact goes to a temp file in the same directory, is fsynced,
/// reloaded from the temp path to prove it is loadable, then renamed over
/// `path`. Returns the reloaded classifier.
pub fn persist_atomic(classifier: &Classifier, path: &Path) -> Result<Classifier, ClassifierError> {
    let fail = |reason: String| ClassifierError::ArtifactSave {
        path: path.to_path_buf(),
        reason,
    };
    let dir = path
        .parent()
        .ok_or_else(|| fail("artifact path has no parent directory".into()))?;
    std::fs::create_dir_all(dir).map_err(|e| fail(e.to_string()))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".oct_classifier")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| fail(e.to_string()))?;

    {
        let mut writer = std::io::BufWriter::new(tmp.as_file_mut());
        write_artifact(classifier, &mut writer).map_err(|e| fail(e.to_string()))?;
        writer.flush().map_err(|e| fail(e.to_string()))?;
    }
    tmp.as_file().sync_all().map_err(|e| fail(e.to_string()))?;

    let reloaded = load_artifact(tmp.path())
        .map_err(|e| fail(format!("written artifact failed to reload: {e}")))?;

    tmp.persist(path).map_err(|e| fail(e.error.to_string()))?;
    sync_dir(dir);

    tracing::info!(
        path = %path.display(),
        version = reloaded.version(),
        "Model artifact persisted"
    );
    Ok(reloaded)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = std::fs::File::open(dir) {
        if let Err(e) = handle.sync_all() {
            tracing::warn!(dir = %dir.display(), error = %e, "Directory fsync failed");
        }
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

fn checksum(weights: &[f32], bias: &[f32]) -> String {
    let mut hasher = Sha256::new();
    for v in weights.iter().chain(bias) {
        hasher.update(v.to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::reference_classifier;

    #[test]
    fn persisted_artifact_reloads_identically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("oct_classifier.json");
        let model = reference_classifier(InputSpec::new(3, 3), 4);

        let reloaded = persist_atomic(&model, &path).unwrap();
        assert_eq!(reloaded.weights(), model.weights());
        assert_eq!(reloaded.bias(), model.bias());
        assert_eq!(reloaded.version(), 4);
        assert_eq!(reloaded.mapping(), model.mapping());

        let from_disk = load_artifact(&path).unwrap();
        assert_eq!(from_disk.weights(), model.weights());
    }

    #[test]
    fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oct_classifier.json");
        persist_atomic(&reference_classifier(InputSpec::new(2, 2), 1), &path).unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("oct_classifier.json")]);
    }

    #[test]
    fn missing_file_is_artifact_load() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_artifact(&dir.path().join("nope.json"));
        assert!(matches!(result, Err(ClassifierError::ArtifactLoad { .. })));
    }

    #[test]
    fn corrupt_json_is_artifact_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, b"{\"format_version\": 1, \"weights\": [").unwrap();
        assert!(matches!(
            load_artifact(&path),
            Err(ClassifierError::ArtifactLoad { .. })
        ));
    }

    #[test]
    fn tampered_weights_fail_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        persist_atomic(&reference_classifier(InputSpec::new(2, 2), 1), &path).unwrap();

        let mut json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        json["weights"][0] = serde_json::json!(123.0);
        std::fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();

        let err = load_artifact(&path).unwrap_err();
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn truncated_weights_are_shape_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        persist_atomic(&reference_classifier(InputSpec::new(2, 2), 1), &path).unwrap();

        let mut json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        let mut weights: Vec<f32> = serde_json::from_value(json["weights"].clone()).unwrap();
        weights.pop();
        json["checksum"] = serde_json::json!(checksum(&weights, &[0.0; 4]));
        json["weights"] = serde_json::json!(weights);
        json["bias"] = serde_json::json!([0.0, 0.0, 0.0, 0.0]);
        std::fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();

        let err = load_artifact(&path).unwrap_err();
        assert!(matches!(err, ClassifierError::ArtifactLoad { .. }));
        assert!(err.to_string().contains("shape"));
    }

    #[test]
    fn unknown_label_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        persist_atomic(&reference_classifier(InputSpec::new(2, 2), 1), &path).unwrap();

        let mut json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        json["labels"][1] = serde_json::json!("Glaucoma");
        std::fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();

        let err = load_artifact(&path).unwrap_err();
        assert!(err.to_string().contains("Glaucoma"));
    }
}
