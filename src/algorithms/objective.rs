//! The PPO clipped-surrogate loss and its gradient with respect to the model outputs.

use ndarray::{Array1, ArrayView1, Zip};

use crate::error::{PpoError, Result};
use crate::model::{Evaluation, OutputGradients};

/// Weights of the three loss terms and the clipping range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossCoefficients {
    pub eps_clip: f32,
    pub value_coef: f32,
    pub entropy_coef: f32,
}

impl Default for LossCoefficients {
    fn default() -> Self {
        LossCoefficients {
            eps_clip: 0.2,
            value_coef: 0.5,
            entropy_coef: 0.01,
        }
    }
}

/// Scalar summaries of one loss evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossTerms {
    /// Mean of the per-sample total loss
    pub total: f32,
    /// Mean of `-min(surr1, surr2)`
    pub policy: f32,
    /// Mean squared error between values and returns
    pub value: f32,
    /// Mean distribution entropy
    pub entropy: f32,
    /// Mean of `old_log_prob - log_prob`
    pub approx_kl: f32,
    /// Share of samples whose ratio left `[1 - eps, 1 + eps]`
    pub clip_fraction: f32,
}

/// `ratio` clamped into `[1 - eps_clip, 1 + eps_clip]`.
pub fn clip_ratio(ratio: f32, eps_clip: f32) -> f32 {
    ratio.clamp(1.0 - eps_clip, 1.0 + eps_clip)
}

/// The pessimistic PPO bound `min(ratio * A, clip(ratio) * A)` for one sample.
pub fn clipped_surrogate(ratio: f32, advantage: f32, eps_clip: f32) -> f32 {
    let surr1 = ratio * advantage;
    let surr2 = clip_ratio(ratio, eps_clip) * advantage;
    surr1.min(surr2)
}

/// Evaluate `mean(-min(surr1, surr2) + value_coef * mse(V, R) - entropy_coef * H)`.
///
/// `old_log_probs` and `returns` are constants. Advantages are `returns - values`
/// with the values treated as constants too; the critic only receives gradient
/// through the regression term. The mse is a batch scalar added to every
/// sample's loss before the final mean.
pub fn clipped_surrogate_loss(
    evaluation: &Evaluation,
    old_log_probs: ArrayView1<f32>,
    returns: ArrayView1<f32>,
    coefficients: &LossCoefficients,
) -> Result<(LossTerms, OutputGradients)> {
    let n = evaluation.len();
    if n == 0 {
        return Err(PpoError::EmptyBuffer("cannot compute a loss over zero samples".to_string()));
    }
    if old_log_probs.len() != n || returns.len() != n {
        return Err(PpoError::dimension_mismatch(
            format!("{} old log-probs and returns", n),
            format!("{} and {}", old_log_probs.len(), returns.len()),
        ));
    }
    let inv_n = 1.0 / n as f32;
    let LossCoefficients { eps_clip, value_coef, entropy_coef } = *coefficients;

    let mse = Zip::from(&evaluation.values)
        .and(&returns)
        .fold(0.0f32, |acc, &v, &r| acc + (v - r) * (v - r))
        * inv_n;

    let mut grad_log_probs = Array1::zeros(n);
    let mut policy = 0.0f32;
    let mut approx_kl = 0.0f32;
    let mut clipped = 0usize;

    for i in 0..n {
        let log_ratio = evaluation.log_probs[i] - old_log_probs[i];
        let ratio = log_ratio.exp();
        let advantage = returns[i] - evaluation.values[i];

        let surr1 = ratio * advantage;
        let surr2 = clip_ratio(ratio, eps_clip) * advantage;
        policy -= surr1.min(surr2);
        approx_kl -= log_ratio;
        if (ratio - 1.0).abs() > eps_clip {
            clipped += 1;
        }

        // The clipped branch is flat in the ratio whenever it is the smaller one.
        let d_surrogate_d_ratio = if surr1 <= surr2 { advantage } else { 0.0 };
        grad_log_probs[i] = -d_surrogate_d_ratio * ratio * inv_n;
    }

    let entropy = evaluation.entropy.sum() * inv_n;
    let policy = policy * inv_n;
    let terms = LossTerms {
        total: policy + value_coef * mse - entropy_coef * entropy,
        policy,
        value: mse,
        entropy,
        approx_kl: approx_kl * inv_n,
        clip_fraction: clipped as f32 * inv_n,
    };
    if !terms.total.is_finite() {
        return Err(PpoError::NumericalError(format!("non-finite PPO loss: {:?}", terms)));
    }

    let grad_values = Zip::from(&evaluation.values)
        .and(&returns)
        .map_collect(|&v, &r| 2.0 * value_coef * (v - r) * inv_n);

    Ok((
        terms,
        OutputGradients {
            log_probs: grad_log_probs,
            values: grad_values,
            entropy: Array1::from_elem(n, -entropy_coef * inv_n),
        },
    ))
}
