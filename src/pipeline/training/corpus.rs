//! Training corpus builder: harvests doctor-confirmed scans into a labeled
//! tensor batch.
//!
//! Every eligible record yields an outcome. Bad records are skipped with a
//! reason and logged; they never fail the batch.

use std::collections::BTreeSet;

use ndarray::Array2;
use serde::Serialize;
use uuid::Uuid;

use super::error::TrainingError;
use crate::db::ScanStore;
use crate::models::{Condition, Scan};
use crate::pipeline::classifier::{LabelMapping, TrainingSet};
use crate::pipeline::preprocess::Preprocessor;
use crate::pipeline::storage::{StorageError, UploadStore};

/// Why an eligible scan did not make it into the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// `image_url` cannot be mapped under the uploads root.
    InvalidPath(String),
    ImageMissing(String),
    Unreadable(String),
    InvalidImage(String),
    MissingLabel,
    /// Label string is not a known condition.
    UnknownLabel(String),
    /// Label parses but is not trainable (`Unknown`).
    NotTrainable(String),
    /// Trainable label absent from the active model's mapping.
    LabelNotInMapping(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPath(s) => write!(f, "invalid image path: {s}"),
            Self::ImageMissing(s) => write!(f, "image missing: {s}"),
            Self::Unreadable(s) => write!(f, "image unreadable: {s}"),
            Self::InvalidImage(s) => write!(f, "invalid image: {s}"),
            Self::MissingLabel => write!(f, "no label"),
            Self::UnknownLabel(s) => write!(f, "unknown label '{s}'"),
            Self::NotTrainable(s) => write!(f, "label '{s}' is not trainable"),
            Self::LabelNotInMapping(s) => write!(f, "label '{s}' not in model mapping"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SampleOutcome {
    Included { label: Condition },
    Skipped { reason: SkipReason },
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleRecord {
    pub scan_id: Uuid,
    pub outcome: SampleOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CorpusReport {
    pub records: Vec<SampleRecord>,
}

impl CorpusReport {
    pub fn included(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, SampleOutcome::Included { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.records.len() - self.included()
    }
}

pub struct TrainingCorpus {
    pub set: TrainingSet,
    /// The active model's mapping the targets index into.
    pub mapping: LabelMapping,
    /// Labels actually present in this batch.
    pub observed_labels: BTreeSet<String>,
    pub report: CorpusReport,
}

pub enum CorpusOutcome {
    Ready(TrainingCorpus),
    /// Nothing usable: not an error.
    NoNewData(CorpusReport),
}

/// Build the corpus from every eligible scan in `store`.
pub fn build_corpus(
    store: &dyn ScanStore,
    uploads: &UploadStore,
    preprocessor: &Preprocessor,
    mapping: &LabelMapping,
) -> Result<CorpusOutcome, TrainingError> {
    let scans = store.list_eligible_for_training()?;
    tracing::info!(eligible = scans.len(), "Building training corpus");

    let mut rows = Vec::new();
    let mut targets = Vec::new();
    let mut observed_labels = BTreeSet::new();
    let mut report = CorpusReport::default();

    for scan in &scans {
        let outcome = match load_sample(scan, uploads, preprocessor, mapping) {
            Ok((tensor, label, target)) => {
                rows.push(tensor);
                targets.push(target);
                observed_labels.insert(label.as_str().to_string());
                SampleOutcome::Included { label }
            }
            Err(reason) => {
                tracing::warn!(scan_id = %scan.id, reason = %reason, "Skipping training sample");
                SampleOutcome::Skipped { reason }
            }
        };
        report.records.push(SampleRecord {
            scan_id: scan.id,
            outcome,
        });
    }

    if rows.is_empty() {
        tracing::info!(skipped = report.skipped(), "No usable training samples");
        return Ok(CorpusOutcome::NoNewData(report));
    }

    let set = TrainingSet::from_rows(&rows, targets)?;
    tracing::info!(
        included = report.included(),
        skipped = report.skipped(),
        labels = ?observed_labels,
        "Training corpus ready"
    );
    Ok(CorpusOutcome::Ready(TrainingCorpus {
        set,
        mapping: mapping.clone(),
        observed_labels,
        report,
    }))
}

/// Label checks run before the file read, so a bad label costs no I/O.
fn load_sample(
    scan: &Scan,
    uploads: &UploadStore,
    preprocessor: &Preprocessor,
    mapping: &LabelMapping,
) -> Result<(Array2<f32>, Condition, usize), SkipReason> {
    let raw_label = scan.training_label().ok_or(SkipReason::MissingLabel)?;
    let label: Condition = raw_label
        .parse()
        .map_err(|_| SkipReason::UnknownLabel(raw_label.to_string()))?;
    if !label.is_trainable() {
        return Err(SkipReason::NotTrainable(raw_label.to_string()));
    }
    let target = mapping
        .index_of(label)
        .ok_or_else(|| SkipReason::LabelNotInMapping(label.as_str().to_string()))?;

    let bytes = uploads.read(&scan.image_url).map_err(|e| match e {
        StorageError::InvalidPath(p) => SkipReason::InvalidPath(p),
        StorageError::NotFound(p) => SkipReason::ImageMissing(p.display().to_string()),
        StorageError::Io { path, source } => {
            SkipReason::Unreadable(format!("{}: {source}", path.display()))
        }
    })?;

    let tensor = preprocessor
        .preprocess(&bytes)
        .map_err(|e| SkipReason::InvalidImage(e.to_string()))?;
    Ok((tensor, label, target))
}
