use serde::Serialize;

use super::model::argmax;
use super::LabelMapping;
use crate::config::DEFAULT_CONFIDENCE_THRESHOLD;
use crate::models::Condition;

/// Converts a probability vector into the label shown to clinicians.
///
/// Arg-max wins unless the top probability is below `threshold`, in which
/// case the label is `Unknown`. Pure: the same vector always yields the same
/// result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionGate {
    threshold: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GatedPrediction {
    pub label: Condition,
    /// Arg-max class before thresholding.
    pub arg_max: Option<Condition>,
    /// Top probability rounded to 2 decimals, in [0, 1].
    pub confidence: f32,
    /// `confidence` × 100 rounded to 2 decimals.
    pub confidence_percent: f32,
}

impl DecisionGate {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn decide(&self, probabilities: &[f32], mapping: &LabelMapping) -> GatedPrediction {
        let top = argmax(probabilities);
        let max = top.map(|i| probabilities[i]).unwrap_or(0.0);
        let arg_max = top.and_then(|i| mapping.label_at(i));

        let label = match arg_max {
            Some(label) if max >= self.threshold => label,
            _ => Condition::Unknown,
        };
        let confidence = round2(max.clamp(0.0, 1.0));

        GatedPrediction {
            label,
            arg_max,
            confidence,
            confidence_percent: round2(confidence * 100.0),
        }
    }
}

impl Default for DecisionGate {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

fn round2(v: f32) -> f32 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confident_prediction_uses_argmax() {
        let gate = DecisionGate::default();
        let out = gate.decide(&[0.02, 0.01, 0.03, 0.94], &LabelMapping::canonical());
        assert_eq!(out.label, Condition::Normal);
        assert_eq!(out.confidence, 0.94);
        assert_eq!(out.confidence_percent, 94.0);
    }

    #[test]
    fn below_threshold_is_unknown_regardless_of_argmax() {
        let gate = DecisionGate::default();
        let out = gate.decide(&[0.89, 0.05, 0.03, 0.03], &LabelMapping::canonical());
        assert_eq!(out.label, Condition::Unknown);
        assert_eq!(out.arg_max, Some(Condition::ChoroidalNeovascularization));
        assert_eq!(out.confidence, 0.89);
    }

    #[test]
    fn threshold_is_inclusive() {
        let gate = DecisionGate::new(0.9);
        let out = gate.decide(&[0.9, 0.1, 0.0, 0.0], &LabelMapping::canonical());
        assert_eq!(out.label, Condition::ChoroidalNeovascularization);
    }

    #[test]
    fn raw_value_decides_not_rounded() {
        // 0.897 rounds to 0.90 for display but is still below the threshold.
        let gate = DecisionGate::new(0.9);
        let out = gate.decide(&[0.897, 0.103, 0.0, 0.0], &LabelMapping::canonical());
        assert_eq!(out.label, Condition::Unknown);
        assert_eq!(out.confidence, 0.9);
    }

    #[test]
    fn same_vector_same_result() {
        let gate = DecisionGate::new(0.5);
        let mapping = LabelMapping::canonical();
        let vectors: [[f32; 4]; 4] = [
            [0.25, 0.25, 0.25, 0.25],
            [0.1, 0.6, 0.2, 0.1],
            [0.0, 0.0, 1.0, 0.0],
            [0.49, 0.01, 0.49, 0.01],
        ];
        for v in vectors {
            assert_eq!(gate.decide(&v, &mapping), gate.decide(&v, &mapping));
        }
    }

    #[test]
    fn empty_vector_is_unknown() {
        let out = DecisionGate::default().decide(&[], &LabelMapping::canonical());
        assert_eq!(out.label, Condition::Unknown);
        assert_eq!(out.confidence, 0.0);
    }
}
