use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use tracing::debug;

use super::{ClassifierError, LabelMapping};
use crate::config::RetrainConfig;
use crate::pipeline::preprocess::InputSpec;

/// Probability floor used when computing cross-entropy.
const LOG_EPSILON: f32 = 1e-7;

/// Linear softmax classifier: `softmax(x · W + b)`.
///
/// Immutable once built. Retraining produces a new instance, which is what
/// lets inference hold an `Arc<Classifier>` without any locking.
#[derive(Debug, Clone)]
pub struct Classifier {
    mapping: LabelMapping,
    input: InputSpec,
    /// features × classes
    weights: Array2<f32>,
    bias: Array1<f32>,
    version: u64,
    created_at: DateTime<Utc>,
}

impl Classifier {
    pub fn new(
        mapping: LabelMapping,
        input: InputSpec,
        weights: Array2<f32>,
        bias: Array1<f32>,
        version: u64,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ClassifierError> {
        let classes = mapping.len();
        if weights.dim() != (input.features(), classes) {
            return Err(ClassifierError::InvalidShape(format!(
                "weights are {:?}, expected ({}, {classes})",
                weights.dim(),
                input.features()
            )));
        }
        if bias.len() != classes {
            return Err(ClassifierError::InvalidShape(format!(
                "bias has {} entries, expected {classes}",
                bias.len()
            )));
        }
        if !weights.iter().chain(bias.iter()).all(|v| v.is_finite()) {
            return Err(ClassifierError::Diverged("non-finite parameters".into()));
        }
        Ok(Self {
            mapping,
            input,
            weights,
            bias,
            version,
            created_at,
        })
    }

    /// Zero-initialized model: uniform probabilities for every input.
    /// Used to bootstrap a fresh install before any corrections exist.
    pub fn untrained(mapping: LabelMapping, input: InputSpec) -> Self {
        let classes = mapping.len();
        Self {
            weights: Array2::zeros((input.features(), classes)),
            bias: Array1::zeros(classes),
            mapping,
            input,
            version: 1,
            created_at: Utc::now(),
        }
    }

    pub fn mapping(&self) -> &LabelMapping {
        &self.mapping
    }

    pub fn input_spec(&self) -> InputSpec {
        self.input
    }

    pub fn weights(&self) -> &Array2<f32> {
        &self.weights
    }

    pub fn bias(&self) -> &Array1<f32> {
        &self.bias
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Row-wise class probabilities for a batch `[n, features]`.
    pub fn predict(&self, x: &Array2<f32>) -> Result<Array2<f32>, ClassifierError> {
        self.check_features(x.ncols())?;
        Ok(forward(x.view(), &self.weights, &self.bias))
    }

    /// Probability vector for a single preprocessed image `[1, features]`.
    pub fn predict_one(&self, x: &Array2<f32>) -> Result<Vec<f32>, ClassifierError> {
        if x.nrows() != 1 {
            return Err(ClassifierError::ShapeMismatch {
                expected: 1,
                actual: x.nrows(),
            });
        }
        let probs = self.predict(x)?;
        Ok(probs.row(0).to_vec())
    }

    /// Accuracy and mean cross-entropy on a labeled set.
    pub fn evaluate(&self, set: &TrainingSet) -> Result<EvalMetrics, ClassifierError> {
        if set.is_empty() {
            return Err(ClassifierError::EmptyTrainingSet);
        }
        let probs = self.predict(&set.features)?;
        Ok(metrics_for(&probs, &set.targets))
    }

    /// Train a copy of this model on `set`. `self` is never modified.
    ///
    /// The set is shuffled with a seeded RNG, the tail `validation_split`
    /// fraction is held out, and mini-batch gradient descent on softmax
    /// cross-entropy runs for `epochs` passes over the rest.
    pub fn retrain(
        &self,
        set: &TrainingSet,
        options: &TrainOptions,
    ) -> Result<Retrained, ClassifierError> {
        if set.is_empty() {
            return Err(ClassifierError::EmptyTrainingSet);
        }
        self.check_features(set.features.ncols())?;
        if let Some(&bad) = set.targets.iter().find(|&&t| t >= self.mapping.len()) {
            return Err(ClassifierError::InvalidShape(format!(
                "target class {bad} outside {} labels",
                self.mapping.len()
            )));
        }

        let mut rng = StdRng::seed_from_u64(options.seed);
        let mut order: Vec<usize> = (0..set.len()).collect();
        order.shuffle(&mut rng);

        let holdout_len = options.holdout_len(set.len());
        let (train_idx, holdout_idx) = order.split_at(set.len() - holdout_len);
        let train = set.select(train_idx);
        let holdout = (!holdout_idx.is_empty()).then(|| set.select(holdout_idx));

        let mut weights = self.weights.clone();
        let mut bias = self.bias.clone();
        let batch_size = options.batch_size.max(1);
        let mut epoch_order: Vec<usize> = (0..train.len()).collect();

        for epoch in 0..options.epochs {
            epoch_order.shuffle(&mut rng);
            for batch in epoch_order.chunks(batch_size) {
                let xb = train.features.select(Axis(0), batch);
                let mut grad = forward(xb.view(), &weights, &bias);
                for (row, &sample) in batch.iter().enumerate() {
                    grad[[row, train.targets[sample]]] -= 1.0;
                }
                grad /= batch.len() as f32;

                let grad_w = xb.t().dot(&grad);
                let grad_b = grad.sum_axis(Axis(0));
                weights.scaled_add(-options.learning_rate, &grad_w);
                bias.scaled_add(-options.learning_rate, &grad_b);
            }

            if tracing::enabled!(tracing::Level::DEBUG) {
                let probs = forward(train.features.view(), &weights, &bias);
                let m = metrics_for(&probs, &train.targets);
                debug!(epoch = epoch + 1, accuracy = m.accuracy, loss = m.loss, "Epoch complete");
            }
        }

        if !weights.iter().chain(bias.iter()).all(|v| v.is_finite()) {
            return Err(ClassifierError::Diverged(format!(
                "learning rate {} produced non-finite weights",
                options.learning_rate
            )));
        }

        let candidate = Classifier::new(
            self.mapping.clone(),
            self.input,
            weights,
            bias,
            self.version + 1,
            Utc::now(),
        )?;

        let train_metrics = candidate.evaluate(&train)?;
        let validation = match &holdout {
            Some(h) => Some(candidate.evaluate(h)?),
            None => None,
        };

        Ok(Retrained {
            metrics: TrainingMetrics {
                epochs: options.epochs,
                train_samples: train.len(),
                holdout_samples: holdout_len,
                train: train_metrics,
                validation,
            },
            candidate,
            holdout,
        })
    }

    fn check_features(&self, actual: usize) -> Result<(), ClassifierError> {
        let expected = self.input.features();
        if actual != expected {
            return Err(ClassifierError::ShapeMismatch { expected, actual });
        }
        Ok(())
    }
}

fn forward(x: ArrayView2<'_, f32>, weights: &Array2<f32>, bias: &Array1<f32>) -> Array2<f32> {
    let mut logits = x.dot(weights);
    logits += bias;
    for mut row in logits.rows_mut() {
        let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row /= sum;
    }
    logits
}

fn metrics_for(probs: &Array2<f32>, targets: &[usize]) -> EvalMetrics {
    let mut correct = 0usize;
    let mut loss = 0.0f32;
    for (row, &target) in probs.rows().into_iter().zip(targets) {
        if argmax(&row.to_vec()) == Some(target) {
            correct += 1;
        }
        loss -= row[target].max(LOG_EPSILON).ln();
    }
    let n = targets.len().max(1) as f32;
    EvalMetrics {
        accuracy: correct as f32 / n,
        loss: loss / n,
    }
}

/// Index of the largest entry; the first one wins ties.
pub fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

// ═══════════════════════════════════════════════════════════
// Training types
// ═══════════════════════════════════════════════════════════

/// Labeled tensors: one row per image, `targets[i]` indexes the label mapping.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    features: Array2<f32>,
    targets: Vec<usize>,
}

impl TrainingSet {
    pub fn new(features: Array2<f32>, targets: Vec<usize>) -> Result<Self, ClassifierError> {
        if features.nrows() != targets.len() {
            return Err(ClassifierError::ShapeMismatch {
                expected: features.nrows(),
                actual: targets.len(),
            });
        }
        Ok(Self { features, targets })
    }

    /// Stack `[1, features]` rows into one set.
    pub fn from_rows(rows: &[Array2<f32>], targets: Vec<usize>) -> Result<Self, ClassifierError> {
        let views: Vec<_> = rows.iter().map(|r| r.view()).collect();
        let features = ndarray::concatenate(Axis(0), &views)
            .map_err(|e| ClassifierError::InvalidShape(format!("cannot stack training rows: {e}")))?;
        Self::new(features, targets)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn features(&self) -> &Array2<f32> {
        &self.features
    }

    pub fn targets(&self) -> &[usize] {
        &self.targets
    }

    fn select(&self, indices: &[usize]) -> TrainingSet {
        TrainingSet {
            features: self.features.select(Axis(0), indices),
            targets: indices.iter().map(|&i| self.targets[i]).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub epochs: usize,
    pub validation_split: f32,
    pub learning_rate: f32,
    pub batch_size: usize,
    pub seed: u64,
}

impl TrainOptions {
    /// Samples held out for validation. At least one sample always trains.
    pub fn holdout_len(&self, total: usize) -> usize {
        let split = self.validation_split.clamp(0.0, 1.0);
        let holdout = (total as f32 * split).floor() as usize;
        holdout.min(total.saturating_sub(1))
    }
}

impl Default for TrainOptions {
    fn default() -> Self {
        TrainOptions::from(&RetrainConfig::default())
    }
}

impl From<&RetrainConfig> for TrainOptions {
    fn from(config: &RetrainConfig) -> Self {
        Self {
            epochs: config.epochs,
            validation_split: config.validation_split,
            learning_rate: config.learning_rate,
            batch_size: config.batch_size,
            seed: config.seed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EvalMetrics {
    pub accuracy: f32,
    pub loss: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingMetrics {
    pub epochs: usize,
    pub train_samples: usize,
    pub holdout_samples: usize,
    /// Final-epoch metrics on the training portion.
    pub train: EvalMetrics,
    pub validation: Option<EvalMetrics>,
}

/// Output of `Classifier::retrain`: a candidate not yet installed anywhere.
#[derive(Debug)]
pub struct Retrained {
    pub candidate: Classifier,
    pub metrics: TrainingMetrics,
    /// The held-out samples, for comparing candidate and active models.
    pub holdout: Option<TrainingSet>,
}
