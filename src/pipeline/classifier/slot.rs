use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use ndarray::Array2;

use super::{load_artifact, persist_atomic, Classifier, ClassifierError};

/// Probability vector plus the version of the artifact that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub probabilities: Vec<f32>,
    pub model_version: u64,
}

/// The single active classifier, shared by every inference call.
///
/// Readers clone the `Arc` under a short read lock and predict without
/// holding it. A swap replaces the `Arc` under the write lock, so a caller
/// sees either the old or the new model, never a mix; the old model is
/// dropped when its last in-flight caller finishes.
pub struct ClassifierSlot {
    active: RwLock<Arc<Classifier>>,
    artifact_path: PathBuf,
    /// Serializes persist+swap so two swaps never interleave on disk.
    swap_lock: Mutex<()>,
}

impl ClassifierSlot {
    pub fn new(classifier: Classifier, artifact_path: PathBuf) -> Self {
        Self {
            active: RwLock::new(Arc::new(classifier)),
            artifact_path,
            swap_lock: Mutex::new(()),
        }
    }

    /// Load the active artifact from disk.
    pub fn load(artifact_path: &Path) -> Result<Self, ClassifierError> {
        let classifier = load_artifact(artifact_path)?;
        tracing::info!(
            path = %artifact_path.display(),
            version = classifier.version(),
            labels = classifier.mapping().len(),
            input = ?classifier.input_spec().tensor_shape(),
            "Classifier loaded"
        );
        Ok(Self::new(classifier, artifact_path.to_path_buf()))
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    pub fn current(&self) -> Result<Arc<Classifier>, ClassifierError> {
        self.active
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|_| ClassifierError::LockPoisoned)
    }

    pub fn version(&self) -> Result<u64, ClassifierError> {
        Ok(self.current()?.version())
    }

    /// Predict one `[1, features]` tensor against whichever model is active now.
    pub fn predict(&self, tensor: &Array2<f32>) -> Result<Prediction, ClassifierError> {
        let model = self.current()?;
        Ok(Prediction {
            probabilities: model.predict_one(tensor)?,
            model_version: model.version(),
        })
    }

    /// Persist `candidate` over the artifact path, then make it active.
    ///
    /// If persisting fails, neither the file nor the active model changes.
    pub fn swap(&self, candidate: Classifier) -> Result<Arc<Classifier>, ClassifierError> {
        let _guard = self.swap_lock.lock().map_err(|_| ClassifierError::LockPoisoned)?;

        let installed = Arc::new(persist_atomic(&candidate, &self.artifact_path)?);
        let previous = {
            let mut active = self.active.write().map_err(|_| ClassifierError::LockPoisoned)?;
            std::mem::replace(&mut *active, Arc::clone(&installed))
        };

        tracing::info!(
            from_version = previous.version(),
            to_version = installed.version(),
            "Classifier swapped"
        );
        Ok(installed)
    }
}
