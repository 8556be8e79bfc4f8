use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::Condition;

/// Response of the inference path, returned by `POST /api/predict`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanPrediction {
    pub predicted_class: Condition,
    /// Top probability in [0, 1], rounded to 2 decimals.
    pub predicted_probability: f32,
    /// `predicted_probability` as a percentage, rounded to 2 decimals.
    pub confidence_percent: f32,
    pub image_url: String,
    pub upload_date: DateTime<Utc>,
    pub model_version: u64,
}
