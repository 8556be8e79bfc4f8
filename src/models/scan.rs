use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::enums::Condition;
use crate::db::DatabaseError;

/// One uploaded OCT image and its prediction/assessment history.
///
/// Condition fields stay raw strings: rows written by older clients may carry
/// labels outside the current set, and the corpus builder reports those
/// instead of failing the whole read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    pub id: Uuid,
    pub patient_id: String,
    pub image_url: String,
    pub upload_date: DateTime<Utc>,
    pub prediction_condition: Option<String>,
    pub prediction_confidence: Option<f32>,
    pub doctor_notes: Option<String>,
    pub doctor_confirmed: Option<bool>,
    pub doctor_corrected_diagnosis: Option<String>,
    pub assessed_by: Option<String>,
    pub assessed_date: Option<DateTime<Utc>>,
}

impl Scan {
    /// Label a doctor-confirmed scan contributes to training:
    /// the correction when present, otherwise the original prediction.
    pub fn training_label(&self) -> Option<&str> {
        self.doctor_corrected_diagnosis
            .as_deref()
            .or(self.prediction_condition.as_deref())
            .filter(|s| !s.trim().is_empty())
    }

    /// A doctor has reviewed this scan.
    pub fn is_assessed(&self) -> bool {
        self.doctor_confirmed.is_some() || self.assessed_by.is_some()
    }
}

/// Request body for scan creation. `patient_id` comes from the path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewScan {
    #[serde(default)]
    pub patient_id: String,
    pub image_url: String,
    /// The `upload_date` returned by `/api/predict`; defaults to now.
    #[serde(default)]
    pub upload_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub prediction_condition: Option<Condition>,
    #[serde(default)]
    pub prediction_confidence: Option<f32>,
}

impl NewScan {
    pub fn validate(&self) -> Result<(), DatabaseError> {
        if self.patient_id.trim().is_empty() {
            return Err(DatabaseError::ConstraintViolation("patient_id is required".into()));
        }
        if self.image_url.trim().is_empty() {
            return Err(DatabaseError::ConstraintViolation("image_url is required".into()));
        }
        validate_confidence(self.prediction_confidence)
    }
}

/// Partial update. An absent field leaves the stored value unchanged.
///
/// Assessment fields are tri-state: absent keeps the value, `null` clears it,
/// a value replaces it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanUpdate {
    #[serde(default)]
    pub prediction_condition: Option<Condition>,
    #[serde(default)]
    pub prediction_confidence: Option<f32>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub doctor_notes: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub doctor_confirmed: Option<Option<bool>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub doctor_corrected_diagnosis: Option<Option<Condition>>,
}

impl ScanUpdate {
    /// True when the update carries clinical assessment fields,
    /// which only a doctor may write.
    pub fn has_assessment(&self) -> bool {
        self.doctor_notes.is_some()
            || self.doctor_confirmed.is_some()
            || self.doctor_corrected_diagnosis.is_some()
    }

    /// True when the update rewrites the model's prediction. On an assessed
    /// scan that changes the training label, so it needs a doctor.
    pub fn changes_prediction(&self) -> bool {
        self.prediction_condition.is_some() || self.prediction_confidence.is_some()
    }

    pub fn validate(&self) -> Result<(), DatabaseError> {
        if let Some(Some(diagnosis)) = self.doctor_corrected_diagnosis {
            if !diagnosis.is_trainable() {
                return Err(DatabaseError::ConstraintViolation(format!(
                    "'{diagnosis}' is not a valid corrected diagnosis"
                )));
            }
        }
        validate_confidence(self.prediction_confidence)
    }
}

/// A present `null` becomes `Some(None)`; a missing field stays `None` via `default`.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Who assessed a scan, stamped by the server at update time.
#[derive(Debug, Clone)]
pub struct Assessor {
    pub username: String,
    pub at: DateTime<Utc>,
}

fn validate_confidence(confidence: Option<f32>) -> Result<(), DatabaseError> {
    match confidence {
        Some(c) if !(0.0..=1.0).contains(&c) => Err(DatabaseError::ConstraintViolation(format!(
            "prediction_confidence {c} is outside [0, 1]"
        ))),
        _ => Ok(()),
    }
}
