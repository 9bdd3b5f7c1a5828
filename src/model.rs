//! The actor-critic pair.
//!
//! Actor and critic are two independent [`ConvNetwork`] towers reading the same
//! state. There is no undifferentiated `forward`: acting goes
//! through [`ActorCritic::act`], which only needs `&self` and records nothing,
//! and training goes through [`ActorCritic::evaluate`], which records the pass
//! and returns an [`Evaluation`] that [`ActorCritic::backward`] consumes.

use ndarray::{Array1, Array2, ArrayView4, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::EncoderConfig;
use crate::distribution::Categorical;
use crate::error::{PpoError, Result};
use crate::network::{ConvNetwork, NetworkGradients, ParameterSet};
use crate::optimizer::OptimizerWrapper;

const ACTOR_PREFIX: &str = "actor.";
const CRITIC_PREFIX: &str = "critic.";

#[derive(Serialize, Deserialize, Clone)]
pub struct ActorCritic {
    pub actor: ConvNetwork,
    pub critic: ConvNetwork,
    pub action_dim: usize,
}

/// Result of a gradient-tracked evaluation of a batch.
///
/// Only meaningful for the model that produced it, and only until that model
/// runs another cached pass.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Log-probability of each given action
    pub log_probs: Array1<f32>,
    /// Critic estimate for each state
    pub values: Array1<f32>,
    /// Entropy of each action distribution
    pub entropy: Array1<f32>,
    distributions: Vec<Categorical>,
    actions: Vec<usize>,
}

/// dLoss with respect to each per-sample output of an [`Evaluation`].
#[derive(Debug, Clone)]
pub struct OutputGradients {
    pub log_probs: Array1<f32>,
    pub values: Array1<f32>,
    pub entropy: Array1<f32>,
}

/// Parameter gradients for both towers.
#[derive(Debug, Clone)]
pub struct ModelGradients {
    pub actor: NetworkGradients,
    pub critic: NetworkGradients,
}

impl ActorCritic {
    pub fn new<R: Rng + ?Sized>(
        state_shape: (usize, usize, usize),
        action_dim: usize,
        encoder: &EncoderConfig,
        rng: &mut R,
    ) -> Result<Self> {
        if action_dim == 0 {
            return Err(PpoError::invalid_parameter("action_dim", "must be positive"));
        }
        Ok(ActorCritic {
            actor: ConvNetwork::new(state_shape, encoder, action_dim, rng)?,
            critic: ConvNetwork::new(state_shape, encoder, 1, rng)?,
            action_dim,
        })
    }

    pub fn state_shape(&self) -> (usize, usize, usize) {
        self.actor.input_shape
    }

    fn distributions(logits: &Array2<f32>) -> Result<Vec<Categorical>> {
        logits.outer_iter().map(Categorical::from_logits).collect()
    }

    /// Action probabilities for a batch of states, without gradient tracking.
    pub fn action_probabilities(&self, states: ArrayView4<f32>) -> Result<Array2<f32>> {
        let logits = self.actor.forward(states)?;
        let mut probs = Array2::zeros(logits.dim());
        for (mut row, dist) in probs.outer_iter_mut().zip(Self::distributions(&logits)?) {
            row.assign(&dist.probs());
        }
        Ok(probs)
    }

    /// Critic estimates for a batch of states, without gradient tracking.
    pub fn state_values(&self, states: ArrayView4<f32>) -> Result<Array1<f32>> {
        Ok(self.critic.forward(states)?.column(0).to_owned())
    }

    /// Sample an action for one state `[1, C, H, W]` and return it with its log-probability.
    ///
    /// Plain numbers come back; nothing here can feed a gradient.
    pub fn act<R: Rng + ?Sized>(&self, state: ArrayView4<f32>, rng: &mut R) -> Result<(usize, f32)> {
        if state.dim().0 != 1 {
            return Err(PpoError::dimension_mismatch(
                "a single state [1, C, H, W]".to_string(),
                format!("{:?}", state.shape()),
            ));
        }
        let logits = self.actor.forward(state)?;
        let dist = Categorical::from_logits(logits.row(0))?;
        let action = dist.sample(rng)?;
        Ok((action, dist.log_prob(action)?))
    }

    /// Gradient-tracked evaluation of given actions on a batch of states.
    pub fn evaluate(&mut self, states: ArrayView4<f32>, actions: &[usize]) -> Result<Evaluation> {
        if states.dim().0 != actions.len() {
            return Err(PpoError::dimension_mismatch(
                format!("{} actions", states.dim().0),
                format!("{}", actions.len()),
            ));
        }
        let logits = self.actor.forward_cached(states)?;
        let values = self.critic.forward_cached(states)?.column(0).to_owned();
        let distributions = Self::distributions(&logits)?;

        let log_probs = distributions
            .iter()
            .zip(actions)
            .map(|(d, &a)| d.log_prob(a))
            .collect::<Result<Vec<f32>>>()?;
        let entropy = distributions.iter().map(Categorical::entropy).collect::<Vec<f32>>();

        Ok(Evaluation {
            log_probs: Array1::from(log_probs),
            values,
            entropy: Array1::from(entropy),
            distributions,
            actions: actions.to_vec(),
        })
    }

    /// Backpropagate per-sample output gradients through both towers.
    pub fn backward(&self, evaluation: &Evaluation, output: &OutputGradients) -> Result<ModelGradients> {
        let batch = evaluation.actions.len();
        if output.log_probs.len() != batch || output.values.len() != batch || output.entropy.len() != batch {
            return Err(PpoError::dimension_mismatch(
                format!("{} per-sample gradients", batch),
                format!(
                    "{}/{}/{}",
                    output.log_probs.len(),
                    output.values.len(),
                    output.entropy.len()
                ),
            ));
        }

        let mut logit_grads = Array2::zeros((batch, self.action_dim));
        for (i, (dist, &action)) in evaluation.distributions.iter().zip(&evaluation.actions).enumerate() {
            let grad = dist.log_prob_grad(action)? * output.log_probs[i] + dist.entropy_grad() * output.entropy[i];
            logit_grads.row_mut(i).assign(&grad);
        }
        let value_grads = output.values.view().insert_axis(Axis(1));

        Ok(ModelGradients {
            actor: self.actor.backward(logit_grads.view())?,
            critic: self.critic.backward(value_grads)?,
        })
    }

    /// Apply one optimiser step's worth of updates, actor and critic at their own rates.
    pub fn apply_gradients(
        &mut self,
        gradients: &ModelGradients,
        optimizer: &mut OptimizerWrapper,
        lr_actor: f32,
        lr_critic: f32,
    ) -> Result<()> {
        self.actor.apply_gradients(ACTOR_PREFIX, &gradients.actor, optimizer, lr_actor)?;
        self.critic.apply_gradients(CRITIC_PREFIX, &gradients.critic, optimizer, lr_critic)
    }

    /// Deep copy of every parameter, keyed `actor.*` / `critic.*`.
    pub fn state_dict(&self) -> ParameterSet {
        let mut set = ParameterSet::new();
        self.actor.snapshot_into(ACTOR_PREFIX, &mut set);
        self.critic.snapshot_into(CRITIC_PREFIX, &mut set);
        set
    }

    /// Replace every parameter with the snapshot. Both towers are validated before either is written.
    pub fn load_state_dict(&mut self, set: &ParameterSet) -> Result<()> {
        self.actor.validate_parameters(ACTOR_PREFIX, set)?;
        self.critic.validate_parameters(CRITIC_PREFIX, set)?;
        self.actor.load_parameters(ACTOR_PREFIX, set)?;
        self.critic.load_parameters(CRITIC_PREFIX, set)
    }

    pub fn parameter_count(&self) -> usize {
        self.actor.parameter_count() + self.critic.parameter_count()
    }

    /// Release the batch activations held for backpropagation.
    pub fn clear_cache(&mut self) {
        self.actor.clear_cache();
        self.critic.clear_cache();
    }
}

impl Evaluation {
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
