//! Retraining job: corpus -> retrain -> validate -> atomic swap.
//!
//! State machine: `Idle -> Running -> {Succeeded | NoNewData | Failed} -> Idle`.
//! At most one run at a time: a trigger while Running is `Skipped`, never
//! queued. Every terminal run is written to the run history.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::Serialize;
use uuid::Uuid;

use super::corpus::{build_corpus, CorpusOutcome, CorpusReport};
use super::error::TrainingError;
use crate::config::RetrainConfig;
use crate::db::ScanStore;
use crate::models::{Condition, RetrainRun, RetrainTrigger, RunStatus};
use crate::pipeline::classifier::{
    Classifier, ClassifierSlot, TrainOptions, TrainingMetrics, TrainingSet,
};
use crate::pipeline::preprocess::Preprocessor;
use crate::pipeline::storage::UploadStore;

/// Tolerance for a probability vector summing to one.
const PROBABILITY_SUM_TOLERANCE: f32 = 1e-3;

#[derive(Debug)]
pub enum RetrainOutcome {
    Succeeded {
        run: RetrainRun,
        metrics: TrainingMetrics,
    },
    NoNewData {
        run: RetrainRun,
    },
    Failed {
        run: RetrainRun,
        error: String,
    },
    /// Another run was in progress.
    Skipped,
}

impl RetrainOutcome {
    pub fn run(&self) -> Option<&RetrainRun> {
        match self {
            Self::Succeeded { run, .. } | Self::NoNewData { run } | Self::Failed { run, .. } => {
                Some(run)
            }
            Self::Skipped => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Idle,
    Running,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub phase: JobPhase,
    pub running_trigger: Option<RetrainTrigger>,
    pub running_since: Option<DateTime<Utc>>,
    pub last_run: Option<RetrainRun>,
}

struct ActiveRun {
    trigger: RetrainTrigger,
    started_at: DateTime<Utc>,
}

pub struct RetrainJob {
    store: Arc<dyn ScanStore>,
    classifier: Arc<ClassifierSlot>,
    uploads: UploadStore,
    config: RetrainConfig,
    running: AtomicBool,
    active_run: Mutex<Option<ActiveRun>>,
    last_run: Mutex<Option<RetrainRun>>,
}

/// Exclusive right to execute one run. Dropping it returns the job to Idle.
pub struct RunPermit {
    job: Arc<RetrainJob>,
    trigger: RetrainTrigger,
    started_at: DateTime<Utc>,
}

enum Executed {
    Succeeded {
        metrics: TrainingMetrics,
        artifact_version: u64,
        report: CorpusReport,
    },
    NoNewData {
        report: CorpusReport,
    },
}

impl RetrainJob {
    pub fn new(
        store: Arc<dyn ScanStore>,
        classifier: Arc<ClassifierSlot>,
        uploads: UploadStore,
        config: RetrainConfig,
    ) -> Self {
        Self {
            store,
            classifier,
            uploads,
            config,
            running: AtomicBool::new(false),
            active_run: Mutex::new(None),
            last_run: Mutex::new(None),
        }
    }

    /// Claim the single run slot, or `None` if a run is in progress.
    pub fn try_begin(self: &Arc<Self>, trigger: RetrainTrigger) -> Option<RunPermit> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::info!(trigger = %trigger, "Retraining already running, trigger skipped");
            return None;
        }
        let started_at = Utc::now();
        if let Ok(mut active) = self.active_run.lock() {
            *active = Some(ActiveRun { trigger, started_at });
        }
        Some(RunPermit {
            job: Arc::clone(self),
            trigger,
            started_at,
        })
    }

    /// Run now on the calling thread, or report `Skipped`.
    pub fn trigger(self: &Arc<Self>, trigger: RetrainTrigger) -> RetrainOutcome {
        match self.try_begin(trigger) {
            Some(permit) => permit.run(),
            None => RetrainOutcome::Skipped,
        }
    }

    pub fn status(&self) -> JobStatus {
        let (running_trigger, running_since) = self
            .active_run
            .lock()
            .ok()
            .and_then(|a| a.as_ref().map(|r| (Some(r.trigger), Some(r.started_at))))
            .unwrap_or((None, None));
        let last_run = self.last_run.lock().ok().and_then(|l| l.clone());
        JobStatus {
            phase: if self.running.load(Ordering::Acquire) {
                JobPhase::Running
            } else {
                JobPhase::Idle
            },
            running_trigger,
            running_since,
            last_run,
        }
    }

    fn execute(&self) -> Result<Executed, TrainingError> {
        let active = self.classifier.current()?;
        let preprocessor = Preprocessor::new(active.input_spec());

        let corpus = match build_corpus(
            self.store.as_ref(),
            &self.uploads,
            &preprocessor,
            active.mapping(),
        )? {
            CorpusOutcome::Ready(corpus) => corpus,
            CorpusOutcome::NoNewData(report) => return Ok(Executed::NoNewData { report }),
        };

        let options = TrainOptions::from(&self.config);
        tracing::info!(
            samples = corpus.set.len(),
            epochs = options.epochs,
            validation_split = options.validation_split,
            from_version = active.version(),
            "Retraining classifier"
        );
        let retrained = active.retrain(&corpus.set, &options)?;

        validate_candidate(
            &active,
            &retrained.candidate,
            retrained.holdout.as_ref(),
            self.config.regression_tolerance,
        )?;

        let installed = self.classifier.swap(retrained.candidate)?;
        Ok(Executed::Succeeded {
            metrics: retrained.metrics,
            artifact_version: installed.version(),
            report: corpus.report,
        })
    }

    fn finish(&self, run: &RetrainRun) {
        if let Err(e) = self.store.record_run(run) {
            tracing::error!(run_id = %run.id, error = %e, "Failed to record retraining run");
        }
        if let Ok(mut last) = self.last_run.lock() {
            *last = Some(run.clone());
        }
    }
}

impl RunPermit {
    /// Execute the run to a terminal state and record it.
    pub fn run(self) -> RetrainOutcome {
        let job = Arc::clone(&self.job);
        let mut run = RetrainRun {
            id: Uuid::new_v4(),
            trigger: self.trigger,
            started_at: self.started_at,
            finished_at: self.started_at,
            status: RunStatus::Failed,
            samples_used: 0,
            samples_skipped: 0,
            train_accuracy: None,
            train_loss: None,
            validation_accuracy: None,
            artifact_version: None,
            error: None,
        };
        tracing::info!(run_id = %run.id, trigger = %self.trigger, "Retraining run started");

        let outcome = match job.execute() {
            Ok(Executed::Succeeded {
                metrics,
                artifact_version,
                report,
            }) => {
                run.status = RunStatus::Succeeded;
                run.samples_used = report.included();
                run.samples_skipped = report.skipped();
                run.train_accuracy = Some(metrics.train.accuracy);
                run.train_loss = Some(metrics.train.loss);
                run.validation_accuracy = metrics.validation.map(|v| v.accuracy);
                run.artifact_version = Some(artifact_version);
                run.finished_at = Utc::now();
                tracing::info!(
                    run_id = %run.id,
                    version = artifact_version,
                    train_accuracy = metrics.train.accuracy,
                    validation_accuracy = ?run.validation_accuracy,
                    "Retraining succeeded"
                );
                RetrainOutcome::Succeeded {
                    run: run.clone(),
                    metrics,
                }
            }
            Ok(Executed::NoNewData { report }) => {
                run.status = RunStatus::NoNewData;
                run.samples_skipped = report.skipped();
                run.finished_at = Utc::now();
                tracing::info!(run_id = %run.id, "No new training data, model unchanged");
                RetrainOutcome::NoNewData { run: run.clone() }
            }
            Err(e) => {
                let error = e.to_string();
                run.error = Some(error.clone());
                run.finished_at = Utc::now();
                tracing::error!(run_id = %run.id, error = %error, "Retraining failed, model unchanged");
                RetrainOutcome::Failed {
                    run: run.clone(),
                    error,
                }
            }
        };

        job.finish(&run);
        outcome
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        if let Ok(mut active) = self.job.active_run.lock() {
            *active = None;
        }
        self.job.running.store(false, Ordering::Release);
    }
}

fn mapping_mismatch(candidate: &[Condition], active: &Classifier) -> TrainingError {
    TrainingError::LabelMappingMismatch {
        candidate: candidate.iter().map(|c| c.as_str().to_string()).collect(),
        active: active
            .mapping()
            .labels()
            .iter()
            .map(|c| c.as_str().to_string())
            .collect(),
    }
}

/// Decide whether `candidate` may replace `active`.
///
/// The mapping and input geometry must match, the candidate's outputs must
/// be probability vectors, and on the held-out samples (when any) its
/// accuracy may trail the active model's by at most `tolerance`.
pub fn validate_candidate(
    active: &Classifier,
    candidate: &Classifier,
    holdout: Option<&TrainingSet>,
    tolerance: f32,
) -> Result<(), TrainingError> {
    if candidate.mapping() != active.mapping() {
        return Err(mapping_mismatch(candidate.mapping().labels(), active));
    }
    if candidate.input_spec() != active.input_spec() {
        return Err(TrainingError::ValidationFailed(format!(
            "input geometry changed from {:?} to {:?}",
            active.input_spec(),
            candidate.input_spec()
        )));
    }

    let inputs = match holdout {
        Some(h) => h.features().clone(),
        None => Array2::zeros((1, candidate.input_spec().features())),
    };
    let probs = candidate.predict(&inputs)?;
    if probs.ncols() != candidate.mapping().len() {
        return Err(TrainingError::ValidationFailed(format!(
            "{} outputs for {} labels",
            probs.ncols(),
            candidate.mapping().len()
        )));
    }
    for row in probs.rows() {
        let well_formed = row.iter().all(|p| p.is_finite() && (0.0..=1.0).contains(p))
            && (row.sum() - 1.0).abs() <= PROBABILITY_SUM_TOLERANCE;
        if !well_formed {
            return Err(TrainingError::ValidationFailed(
                "candidate produced a malformed probability vector".into(),
            ));
        }
    }

    if let Some(h) = holdout {
        let candidate_acc = candidate.evaluate(h)?.accuracy;
        let active_acc = active.evaluate(h)?.accuracy;
        tracing::info!(
            candidate = candidate_acc,
            active = active_acc,
            samples = h.len(),
            "Held-out comparison"
        );
        if candidate_acc + tolerance < active_acc {
            return Err(TrainingError::Regression {
                candidate: candidate_acc,
                active: active_acc,
                tolerance,
            });
        }
    }
    Ok(())
}
