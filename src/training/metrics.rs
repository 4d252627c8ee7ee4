use ndarray::ArrayView1;
use serde::Serialize;

/// Binary classification scores; an undefined ratio counts as 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
}

impl ClassificationMetrics {
    pub fn from_probabilities(probabilities: ArrayView1<f32>, labels: ArrayView1<f32>, threshold: f32) -> Self {
        let (mut tp, mut fp, mut tn, mut fn_) = (0usize, 0usize, 0usize, 0usize);
        for (&p, &y) in probabilities.iter().zip(labels.iter()) {
            match (p >= threshold, y > 0.5) {
                (true, true) => tp += 1,
                (true, false) => fp += 1,
                (false, false) => tn += 1,
                (false, true) => fn_ += 1,
            }
        }

        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1_score = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            accuracy: ratio(tp + tn, tp + fp + tn + fn_),
            precision,
            recall,
            f1_score,
        }
    }

    pub fn is_finite(&self) -> bool {
        [self.accuracy, self.precision, self.recall, self.f1_score]
            .iter()
            .all(|v| v.is_finite())
    }
}
