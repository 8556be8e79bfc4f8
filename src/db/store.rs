//! Scan Store: the persistence seam shared by the HTTP layer and the retraining job.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

use super::repository;
use super::sqlite::{open_database, open_memory_database};
use super::DatabaseError;
use crate::models::{Assessor, NewScan, RetrainRun, Scan, ScanUpdate};

/// Default number of history rows returned by `list_runs`.
pub const RUN_HISTORY_LIMIT: usize = 50;

pub trait ScanStore: Send + Sync {
    /// Doctor-confirmed scans with a correction or prediction label.
    fn list_eligible_for_training(&self) -> Result<Vec<Scan>, DatabaseError>;

    fn create(&self, scan: NewScan) -> Result<Scan, DatabaseError>;

    fn get(&self, id: &Uuid) -> Result<Option<Scan>, DatabaseError>;

    fn list(&self) -> Result<Vec<Scan>, DatabaseError>;

    fn list_by_patient(&self, patient_id: &str) -> Result<Vec<Scan>, DatabaseError>;

    /// Fails with `NotFound` when the scan does not exist.
    fn update(
        &self,
        id: &Uuid,
        update: &ScanUpdate,
        assessor: Option<&Assessor>,
    ) -> Result<Scan, DatabaseError>;

    fn delete(&self, id: &Uuid) -> Result<Scan, DatabaseError>;

    fn record_run(&self, run: &RetrainRun) -> Result<(), DatabaseError>;

    fn list_runs(&self, limit: usize) -> Result<Vec<RetrainRun>, DatabaseError>;
}

/// SQLite-backed store. One connection, serialized behind a mutex.
pub struct SqliteScanStore {
    conn: Mutex<Connection>,
}

impl SqliteScanStore {
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self {
            conn: Mutex::new(open_database(path)?),
        })
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Ok(Self {
            conn: Mutex::new(open_memory_database()?),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)
    }
}

impl ScanStore for SqliteScanStore {
    fn list_eligible_for_training(&self) -> Result<Vec<Scan>, DatabaseError> {
        repository::list_training_eligible_scans(&*self.conn()?)
    }

    fn create(&self, new: NewScan) -> Result<Scan, DatabaseError> {
        new.validate()?;
        let scan = Scan {
            id: Uuid::new_v4(),
            patient_id: new.patient_id,
            image_url: new.image_url,
            upload_date: new.upload_date.unwrap_or_else(Utc::now),
            prediction_condition: new.prediction_condition.map(|c| c.as_str().to_string()),
            prediction_confidence: new.prediction_confidence,
            doctor_notes: None,
            doctor_confirmed: None,
            doctor_corrected_diagnosis: None,
            assessed_by: None,
            assessed_date: None,
        };
        repository::insert_scan(&*self.conn()?, &scan)?;
        tracing::info!(scan_id = %scan.id, patient_id = %scan.patient_id, "Scan recorded");
        Ok(scan)
    }

    fn get(&self, id: &Uuid) -> Result<Option<Scan>, DatabaseError> {
        repository::get_scan(&*self.conn()?, id)
    }

    fn list(&self) -> Result<Vec<Scan>, DatabaseError> {
        repository::list_scans(&*self.conn()?)
    }

    fn list_by_patient(&self, patient_id: &str) -> Result<Vec<Scan>, DatabaseError> {
        repository::list_scans_by_patient(&*self.conn()?, patient_id)
    }

    fn update(
        &self,
        id: &Uuid,
        update: &ScanUpdate,
        assessor: Option<&Assessor>,
    ) -> Result<Scan, DatabaseError> {
        update.validate()?;
        repository::update_scan(&*self.conn()?, id, update, assessor)
    }

    fn delete(&self, id: &Uuid) -> Result<Scan, DatabaseError> {
        let removed = repository::delete_scan(&*self.conn()?, id)?;
        tracing::info!(scan_id = %id, "Scan deleted");
        Ok(removed)
    }

    fn record_run(&self, run: &RetrainRun) -> Result<(), DatabaseError> {
        repository::insert_retrain_run(&*self.conn()?, run)
    }

    fn list_runs(&self, limit: usize) -> Result<Vec<RetrainRun>, DatabaseError> {
        repository::list_retrain_runs(&*self.conn()?, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Condition;

    fn new_scan(url: &str) -> NewScan {
        NewScan {
            patient_id: "p-7".into(),
            image_url: url.into(),
            upload_date: None,
            prediction_condition: Some(Condition::DiabeticMacularEdema),
            prediction_confidence: Some(0.97),
        }
    }

    #[test]
    fn create_assigns_id_and_upload_date() {
        let store = SqliteScanStore::open_in_memory().unwrap();
        let before = Utc::now();
        let scan = store.create(new_scan("uploads/x.png")).unwrap();
        assert!(scan.upload_date >= before);
        assert_eq!(
            scan.prediction_condition.as_deref(),
            Some("Diabetic Macular Edema")
        );
        assert_eq!(store.get(&scan.id).unwrap().unwrap(), scan);
    }

    #[test]
    fn create_rejects_invalid_confidence() {
        let store = SqliteScanStore::open_in_memory().unwrap();
        let mut bad = new_scan("uploads/x.png");
        bad.prediction_confidence = Some(-0.1);
        assert!(matches!(
            store.create(bad),
            Err(DatabaseError::ConstraintViolation(_))
        ));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn create_retry_with_same_image_is_conflict() {
        let store = SqliteScanStore::open_in_memory().unwrap();
        store.create(new_scan("uploads/x.png")).unwrap();
        assert!(matches!(
            store.create(new_scan("uploads/x.png")),
            Err(DatabaseError::Conflict(_))
        ));
    }

    #[test]
    fn confirmed_scan_becomes_eligible() {
        let store = SqliteScanStore::open_in_memory().unwrap();
        let scan = store.create(new_scan("uploads/x.png")).unwrap();
        assert!(store.list_eligible_for_training().unwrap().is_empty());

        let assessor = Assessor {
            username: "dr_grey".into(),
            at: Utc::now(),
        };
        let update = ScanUpdate {
            doctor_confirmed: Some(Some(true)),
            ..Default::default()
        };
        store.update(&scan.id, &update, Some(&assessor)).unwrap();
        assert_eq!(store.list_eligible_for_training().unwrap().len(), 1);
    }
}
