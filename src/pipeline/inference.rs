//! Inference path: upload bytes -> stored image + gated prediction.
//!
//! Synchronous by design of its callers: the HTTP layer runs `infer` on a
//! blocking thread under a timeout.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use super::classifier::{ClassifierError, ClassifierSlot, DecisionGate};
use super::preprocess::{PreprocessError, Preprocessor};
use super::storage::{StorageError, UploadStore};
use crate::models::ScanPrediction;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error(transparent)]
    InvalidImage(#[from] PreprocessError),

    #[error("Failed to store upload: {0}")]
    Storage(#[from] StorageError),

    #[error("Classifier failed: {0}")]
    Classifier(#[from] ClassifierError),
}

pub struct InferenceService {
    classifier: Arc<ClassifierSlot>,
    uploads: UploadStore,
    gate: DecisionGate,
}

impl InferenceService {
    pub fn new(classifier: Arc<ClassifierSlot>, uploads: UploadStore, gate: DecisionGate) -> Self {
        Self {
            classifier,
            uploads,
            gate,
        }
    }

    pub fn gate(&self) -> DecisionGate {
        self.gate
    }

    /// Decode, persist, preprocess, predict, gate.
    ///
    /// Undecodable bytes fail before anything is written. Failures after the
    /// image is stored leave the file in place.
    pub fn infer(&self, bytes: &[u8], filename: &str) -> Result<ScanPrediction, InferenceError> {
        let started = Instant::now();
        let decoded = Preprocessor::decode_image(bytes).map_err(|e| {
            warn!(filename, error = %e, "Rejected upload");
            e
        })?;

        let stored = self.uploads.save(filename, bytes)?;
        let upload_date = Utc::now();

        // One Arc for preprocessing and prediction: both use the same model's geometry.
        let model = self.classifier.current()?;
        let tensor = Preprocessor::new(model.input_spec()).preprocess_decoded(&decoded)?;
        let probabilities = model.predict_one(&tensor)?;
        let gated = self.gate.decide(&probabilities, model.mapping());

        info!(
            image = %stored.file_name,
            label = %gated.label,
            arg_max = ?gated.arg_max,
            confidence = gated.confidence,
            model_version = model.version(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Scan classified"
        );

        Ok(ScanPrediction {
            predicted_class: gated.label,
            predicted_probability: gated.confidence,
            confidence_percent: gated.confidence_percent,
            image_url: stored.image_url,
            upload_date,
            model_version: model.version(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Condition;
    use crate::pipeline::classifier::{Classifier, LabelMapping};
    use crate::pipeline::preprocess::InputSpec;
    use crate::test_support::{normal_detector, solid_png};

    fn service(dir: &std::path::Path, classifier: Classifier, threshold: f32) -> InferenceService {
        let slot = Arc::new(ClassifierSlot::new(classifier, dir.join("models/m.json")));
        InferenceService::new(
            slot,
            UploadStore::new(dir.join("uploads")),
            DecisionGate::new(threshold),
        )
    }

    #[test]
    fn normal_scan_is_classified_normal() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), normal_detector(InputSpec::default_oct()), 0.9);

        let png = solid_png(496, 512, [255, 255, 255]);
        let prediction = svc.infer(&png, "NORMAL-1001.jpeg").unwrap();

        assert_eq!(prediction.predicted_class, Condition::Normal);
        assert!(prediction.predicted_probability >= 0.9);
        assert!(prediction.confidence_percent >= 90.0);
        assert!(prediction.image_url.starts_with("uploads/"));
        assert!(prediction.image_url.ends_with("_NORMAL-1001.jpeg"));

        let stored = UploadStore::new(dir.path().join("uploads"))
            .read(&prediction.image_url)
            .unwrap();
        assert_eq!(stored, png);
    }

    #[test]
    fn low_confidence_reports_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let untrained = Classifier::untrained(LabelMapping::canonical(), InputSpec::new(8, 8));
        let svc = service(dir.path(), untrained, 0.9);

        let prediction = svc.infer(&solid_png(20, 20, [90, 90, 90]), "x.png").unwrap();
        assert_eq!(prediction.predicted_class, Condition::Unknown);
        assert_eq!(prediction.predicted_probability, 0.25);
        assert_eq!(prediction.model_version, 1);
    }

    #[test]
    fn corrupted_upload_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(
            dir.path(),
            Classifier::untrained(LabelMapping::canonical(), InputSpec::new(8, 8)),
            0.9,
        );

        let mut png = solid_png(20, 20, [1, 2, 3]);
        png.truncate(png.len() / 3);
        let result = svc.infer(&png, "broken.png");
        assert!(matches!(result, Err(InferenceError::InvalidImage(_))));

        let uploads = dir.path().join("uploads");
        let count = std::fs::read_dir(&uploads).map(|d| d.count()).unwrap_or(0);
        assert_eq!(count, 0);
    }
}
