//! Classifier adapter: a softmax classifier over preprocessed OCT tensors,
//! its on-disk artifact, the confidence gate, and the hot-swappable slot
//! that inference reads from.

pub mod artifact;
pub mod gate;
pub mod model;
pub mod slot;

pub use artifact::*;
pub use gate::*;
pub use model::*;
pub use slot::*;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Condition;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Failed to load model artifact {path}: {reason}")]
    ArtifactLoad { path: PathBuf, reason: String },

    #[error("Failed to save model artifact {path}: {reason}")]
    ArtifactSave { path: PathBuf, reason: String },

    #[error("Input has {actual} features, model expects {expected}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Invalid label mapping: {0}")]
    InvalidMapping(String),

    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    #[error("Training set is empty")]
    EmptyTrainingSet,

    #[error("Training diverged: {0}")]
    Diverged(String),

    #[error("Classifier slot lock poisoned")]
    LockPoisoned,
}

/// Ordered class labels: output column `i` of the classifier is `labels[i]`.
///
/// Persisted inside the artifact and reused by every retrain, so class
/// indices never silently reorder between model versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelMapping {
    labels: Vec<Condition>,
}

impl LabelMapping {
    pub fn new(labels: Vec<Condition>) -> Result<Self, ClassifierError> {
        if labels.is_empty() {
            return Err(ClassifierError::InvalidMapping("no labels".into()));
        }
        for (i, label) in labels.iter().enumerate() {
            if !label.is_trainable() {
                return Err(ClassifierError::InvalidMapping(format!(
                    "'{label}' cannot be a class label"
                )));
            }
            if labels[..i].contains(label) {
                return Err(ClassifierError::InvalidMapping(format!(
                    "duplicate label '{label}'"
                )));
            }
        }
        Ok(Self { labels })
    }

    /// The four OCT conditions in their canonical order.
    pub fn canonical() -> Self {
        Self {
            labels: Condition::TRAINABLE.to_vec(),
        }
    }

    pub fn labels(&self) -> &[Condition] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn index_of(&self, label: Condition) -> Option<usize> {
        self.labels.iter().position(|l| *l == label)
    }

    pub fn label_at(&self, index: usize) -> Option<Condition> {
        self.labels.get(index).copied()
    }
}
