//! Monte-Carlo return estimation.

use ndarray::Array1;

/// Discounted returns computed backwards over the rollout.
///
/// The running return is reset to zero at every terminal step *before* that
/// step's reward is folded in, so no reward leaks across an episode boundary.
/// The result is in chronological order and as long as `rewards`.
pub fn discounted_returns(rewards: &[f32], is_terminals: &[bool], gamma: f32) -> Vec<f32> {
    let mut returns = vec![0.0; rewards.len()];
    let mut discounted_reward = 0.0;
    for (i, (&reward, &is_terminal)) in rewards.iter().zip(is_terminals.iter()).enumerate().rev() {
        if is_terminal {
            discounted_reward = 0.0;
        }
        discounted_reward = reward + gamma * discounted_reward;
        returns[i] = discounted_reward;
    }
    returns
}

/// Standardise to zero mean and unit variance: `(x - mean) / (std + epsilon)`.
///
/// `std` is the sample standard deviation (Bessel-corrected). A single-element
/// batch has no spread and is treated as zero-variance. Returns the normalised
/// values and the standard deviation that was used.
pub fn normalize(values: &[f32], epsilon: f32) -> (Array1<f32>, f32) {
    let values = Array1::from(values.to_vec());
    let n = values.len();
    if n == 0 {
        return (values, 0.0);
    }
    let mean = values.sum() / n as f32;
    let std = if n > 1 {
        (values.iter().map(|&v| (v - mean).powi(2)).sum::<f32>() / (n - 1) as f32).sqrt()
    } else {
        0.0
    };
    (values.mapv(|v| (v - mean) / (std + epsilon)), std)
}
