//! Column-wise affine scalers fitted on the training rows.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScalerKind {
    /// Median / inter-quartile range.
    RobustScaler,
    /// Mean / population standard deviation.
    StandardScaler,
    /// Min / max into `[0, 1]`.
    MinMaxScaler,
}

/// A fitted scaler. `stats[i]` holds `(median, iqr)`, `(mean, std)` or
/// `(min, max)` for feature `i` depending on `kind`.
#[derive(Debug, Clone)]
pub struct Scaler {
    kind: ScalerKind,
    stats: Vec<(f64, f64)>,
}

/// Serialized form of one feature's scaling parameters.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum FeatureParams {
    Robust { median: f64, scale: f64 },
    Standard { mean: f64, std: f64 },
    MinMax { min: f64, max: f64 },
}

/// Serialized form of a whole scaler, as stored in `preprocessing_params.json`.
#[derive(Debug, Clone, Serialize)]
pub struct ScalerParams {
    #[serde(rename = "type")]
    pub kind: ScalerKind,
    pub features: Vec<String>,
    pub parameters: Vec<FeatureParams>,
}

impl Scaler {
    pub fn fit(kind: ScalerKind, data: ArrayView2<f64>) -> Self {
        let stats = data
            .axis_iter(Axis(1))
            .map(|column| match kind {
                ScalerKind::RobustScaler => {
                    let sorted = sorted_values(column);
                    let iqr = quantile_sorted(&sorted, 0.75) - quantile_sorted(&sorted, 0.25);
                    (quantile_sorted(&sorted, 0.5), iqr)
                }
                ScalerKind::StandardScaler => {
                    let n = column.len().max(1) as f64;
                    let mean = column.sum() / n;
                    let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                    (mean, var.sqrt())
                }
                ScalerKind::MinMaxScaler => {
                    let min = column.iter().copied().fold(f64::INFINITY, f64::min);
                    let max = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    (min, max)
                }
            })
            .collect();
        Self { kind, stats }
    }

    /// `(offset, divisor)` such that `scaled = (x - offset) / divisor`.
    /// A zero or non-finite spread is replaced by 1.
    fn affine(&self, feature: usize) -> (f64, f64) {
        let (a, b) = self.stats[feature];
        let (offset, spread) = match self.kind {
            ScalerKind::RobustScaler | ScalerKind::StandardScaler => (a, b),
            ScalerKind::MinMaxScaler => (a, b - a),
        };
        let divisor = if spread.is_finite() && spread.abs() > f64::EPSILON {
            spread
        } else {
            1.0
        };
        (offset, divisor)
    }

    pub fn transform(&self, data: ArrayView2<f64>) -> Array2<f32> {
        let mut out = Array2::<f32>::zeros(data.raw_dim());
        for (feature, (src, mut dst)) in data
            .axis_iter(Axis(1))
            .zip(out.axis_iter_mut(Axis(1)))
            .enumerate()
        {
            let (offset, divisor) = self.affine(feature);
            for (d, s) in dst.iter_mut().zip(src.iter()) {
                *d = ((s - offset) / divisor) as f32;
            }
        }
        out
    }

    pub fn params(&self, features: &[&str]) -> ScalerParams {
        let parameters = self
            .stats
            .iter()
            .enumerate()
            .map(|(i, &(a, b))| match self.kind {
                ScalerKind::RobustScaler => FeatureParams::Robust {
                    median: a,
                    scale: self.affine(i).1,
                },
                ScalerKind::StandardScaler => FeatureParams::Standard {
                    mean: a,
                    std: self.affine(i).1,
                },
                ScalerKind::MinMaxScaler => FeatureParams::MinMax { min: a, max: b },
            })
            .collect();
        ScalerParams {
            kind: self.kind,
            features: features.iter().map(|f| f.to_string()).collect(),
            parameters,
        }
    }
}

fn sorted_values(column: ArrayView1<f64>) -> Vec<f64> {
    let mut values: Vec<f64> = column.iter().copied().filter(|v| v.is_finite()).collect();
    values.sort_by(|a, b| a.total_cmp(b));
    values
}

/// Linear-interpolated quantile of an ascending slice; NaN when empty.
pub(crate) fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        }
    }
}

/// Linear-interpolated quantile of unsorted finite values; NaN when empty.
pub(crate) fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    quantile_sorted(&sorted, q)
}
