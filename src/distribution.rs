//! Categorical distribution over a discrete action space.
//!
//! A [`Categorical`] is a plain value built from one row of policy logits.
//! Nothing persists between calls: every act/evaluate builds a fresh one.

use ndarray::{Array1, ArrayView1};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::error::{PpoError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Categorical {
    probs: Array1<f32>,
    log_probs: Array1<f32>,
}

impl Categorical {
    /// Normalise unbounded logits with a max-shifted log-softmax.
    pub fn from_logits(logits: ArrayView1<f32>) -> Result<Self> {
        if logits.is_empty() {
            return Err(PpoError::dimension_mismatch("at least one logit", "0"));
        }
        let max_logit = logits.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        if !max_logit.is_finite() {
            return Err(PpoError::NumericalError(format!("non-finite policy logits: {}", logits)));
        }
        let shifted = logits.mapv(|x| x - max_logit);
        let log_norm = shifted.mapv(f32::exp).sum().ln();
        let log_probs = shifted.mapv(|x| x - log_norm);
        let probs = log_probs.mapv(f32::exp);
        Ok(Categorical { probs, log_probs })
    }

    /// Number of outcomes
    pub fn len(&self) -> usize {
        self.probs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probs.is_empty()
    }

    pub fn probs(&self) -> ArrayView1<'_, f32> {
        self.probs.view()
    }

    pub fn log_probs(&self) -> ArrayView1<'_, f32> {
        self.log_probs.view()
    }

    /// Draw one action index.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<usize> {
        let index = WeightedIndex::new(self.probs.iter())
            .map_err(|e| PpoError::NumericalError(format!("cannot sample from {}: {}", self.probs, e)))?;
        Ok(index.sample(rng))
    }

    pub fn log_prob(&self, action: usize) -> Result<f32> {
        self.log_probs
            .get(action)
            .copied()
            .ok_or(PpoError::InvalidAction { action, max_actions: self.len() })
    }

    /// Shannon entropy in nats.
    pub fn entropy(&self) -> f32 {
        -self
            .probs
            .iter()
            .zip(self.log_probs.iter())
            .map(|(&p, &lp)| p * lp)
            .sum::<f32>()
    }

    /// Gradient of `log_prob(action)` with respect to the logits: `onehot(action) - probs`.
    pub fn log_prob_grad(&self, action: usize) -> Result<Array1<f32>> {
        if action >= self.len() {
            return Err(PpoError::InvalidAction { action, max_actions: self.len() });
        }
        let mut grad = -&self.probs;
        grad[action] += 1.0;
        Ok(grad)
    }

    /// Gradient of the entropy with respect to the logits: `-p * (log p + H)`.
    pub fn entropy_grad(&self) -> Array1<f32> {
        let entropy = self.entropy();
        let mut grad = Array1::zeros(self.len());
        for ((g, &p), &lp) in grad.iter_mut().zip(self.probs.iter()).zip(self.log_probs.iter()) {
            *g = -p * (lp + entropy);
        }
        grad
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_uniform_logits() {
        let dist = Categorical::from_logits(array![0.0, 0.0, 0.0, 0.0].view()).unwrap();
        assert!(dist.probs().iter().all(|&p| (p - 0.25).abs() < 1e-6));
        assert!((dist.entropy() - 4.0f32.ln()).abs() < 1e-5);
        assert!((dist.log_prob(2).unwrap() - 0.25f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn test_large_logits_stay_finite() {
        let dist = Categorical::from_logits(array![1000.0, 0.0].view()).unwrap();
        assert!(dist.entropy().is_finite());
        assert_eq!(dist.log_prob(0).unwrap(), 0.0);
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..20 {
            assert_eq!(dist.sample(&mut rng).unwrap(), 0);
        }
    }

    #[test]
    fn test_out_of_range_action() {
        let dist = Categorical::from_logits(array![0.1, 0.2].view()).unwrap();
        assert_eq!(dist.log_prob(2), Err(PpoError::InvalidAction { action: 2, max_actions: 2 }));
        assert!(dist.log_prob_grad(5).is_err());
    }

    #[test]
    fn test_sampling_follows_probabilities() {
        let dist = Categorical::from_logits(array![0.0, 2.0f32.ln()].view()).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let ones = (0..3000).filter(|_| dist.sample(&mut rng).unwrap() == 1).count();
        let freq = ones as f32 / 3000.0;
        assert!((freq - 2.0 / 3.0).abs() < 0.05, "frequency {}", freq);
    }

    #[test]
    fn test_logit_gradients_match_finite_differences() {
        let logits = array![0.3f32, -1.2, 0.8];
        let dist = Categorical::from_logits(logits.view()).unwrap();
        let analytic_lp = dist.log_prob_grad(1).unwrap();
        let analytic_h = dist.entropy_grad();
        let eps = 1e-2;
        for k in 0..3 {
            let mut plus = logits.clone();
            plus[k] += eps;
            let mut minus = logits.clone();
            minus[k] -= eps;
            let dp = Categorical::from_logits(plus.view()).unwrap();
            let dm = Categorical::from_logits(minus.view()).unwrap();
            let numeric_lp = (dp.log_prob(1).unwrap() - dm.log_prob(1).unwrap()) / (2.0 * eps);
            let numeric_h = (dp.entropy() - dm.entropy()) / (2.0 * eps);
            assert!((numeric_lp - analytic_lp[k]).abs() < 1e-3, "log-prob grad {}", k);
            assert!((numeric_h - analytic_h[k]).abs() < 1e-3, "entropy grad {}", k);
        }
    }
}
