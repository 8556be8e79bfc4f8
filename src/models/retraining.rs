use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{RetrainTrigger, RunStatus};

/// History row for one terminal retraining run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrainRun {
    pub id: Uuid,
    pub trigger: RetrainTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub samples_used: usize,
    pub samples_skipped: usize,
    pub train_accuracy: Option<f32>,
    pub train_loss: Option<f32>,
    pub validation_accuracy: Option<f32>,
    /// Artifact version installed by this run, when it succeeded.
    pub artifact_version: Option<u64>,
    pub error: Option<String>,
}
