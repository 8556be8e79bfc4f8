//! Retraining error types. A `TrainingError` fails the run; per-record data
//! problems are `SkipReason`s in the corpus report instead.

use thiserror::Error;

use crate::db::DatabaseError;
use crate::pipeline::classifier::ClassifierError;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Candidate label mapping {candidate:?} differs from active mapping {active:?}")]
    LabelMappingMismatch {
        candidate: Vec<String>,
        active: Vec<String>,
    },

    #[error("Candidate validation failed: {0}")]
    ValidationFailed(String),

    #[error(
        "Candidate held-out accuracy {candidate:.3} regresses past active {active:.3} (tolerance {tolerance:.3})"
    )]
    Regression {
        candidate: f32,
        active: f32,
        tolerance: f32,
    },
}
