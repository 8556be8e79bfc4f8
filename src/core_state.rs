//! Shared application state.
//!
//! `CoreState` owns every long-lived component: the scan store, the active
//! classifier slot, the uploads directory, the inference service and the
//! retraining job. Wrapped in `Arc` at startup and shared by the HTTP
//! layer and the background scheduler.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::{AppConfig, ConfigError};
use crate::db::{self, ScanStore, SqliteScanStore};
use crate::pipeline::classifier::{
    persist_atomic, Classifier, ClassifierError, ClassifierSlot, DecisionGate, LabelMapping,
};
use crate::pipeline::inference::InferenceService;
use crate::pipeline::preprocess::InputSpec;
use crate::pipeline::storage::{StorageError, UploadStore};
use crate::pipeline::training::RetrainJob;

pub struct CoreState {
    pub config: AppConfig,
    store: Arc<dyn ScanStore>,
    classifier: Arc<ClassifierSlot>,
    uploads: UploadStore,
    inference: Arc<InferenceService>,
    retrain_job: Arc<RetrainJob>,
    started_at: DateTime<Utc>,
}

impl CoreState {
    /// Open the database, load the active model and wire the services.
    ///
    /// The model must load before anything serves traffic: a missing or
    /// corrupt artifact fails here.
    pub fn initialize(config: AppConfig) -> Result<Self, CoreError> {
        std::fs::create_dir_all(&config.data_dir).map_err(|source| StorageError::Io {
            path: config.data_dir.clone(),
            source,
        })?;

        let uploads = UploadStore::new(config.uploads_dir());
        uploads.ensure_dir()?;

        let store: Arc<dyn ScanStore> = Arc::new(SqliteScanStore::open(&config.database_path())?);
        let classifier = Arc::new(load_or_bootstrap_model(&config)?);

        Ok(Self::from_parts(config, store, classifier, uploads))
    }

    /// Assemble state from already-open components.
    pub fn from_parts(
        config: AppConfig,
        store: Arc<dyn ScanStore>,
        classifier: Arc<ClassifierSlot>,
        uploads: UploadStore,
    ) -> Self {
        let inference = Arc::new(InferenceService::new(
            classifier.clone(),
            uploads.clone(),
            DecisionGate::new(config.confidence_threshold),
        ));
        let retrain_job = Arc::new(RetrainJob::new(
            store.clone(),
            classifier.clone(),
            uploads.clone(),
            config.retrain.clone(),
        ));
        Self {
            config,
            store,
            classifier,
            uploads,
            inference,
            retrain_job,
            started_at: Utc::now(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ScanStore> {
        &self.store
    }

    pub fn classifier(&self) -> &Arc<ClassifierSlot> {
        &self.classifier
    }

    pub fn uploads(&self) -> &UploadStore {
        &self.uploads
    }

    pub fn inference(&self) -> &Arc<InferenceService> {
        &self.inference
    }

    pub fn retrain_job(&self) -> &Arc<RetrainJob> {
        &self.retrain_job
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

fn load_or_bootstrap_model(config: &AppConfig) -> Result<ClassifierSlot, CoreError> {
    let path = config.model_path();
    if path.exists() {
        return Ok(ClassifierSlot::load(&path)?);
    }
    if !config.bootstrap_model {
        return Err(CoreError::ModelMissing(path));
    }

    tracing::warn!(
        path = %path.display(),
        "No classifier artifact, writing an untrained model"
    );
    let untrained = Classifier::untrained(LabelMapping::canonical(), InputSpec::default_oct());
    let installed = persist_atomic(&untrained, &path)?;
    Ok(ClassifierSlot::new(installed, path))
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Database error: {0}")]
    Database(#[from] db::DatabaseError),
    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("No classifier artifact at {0} (set bootstrap_model to create one)")]
    ModelMissing(PathBuf),
    #[error("Server error: {0}")]
    Server(String),
}
