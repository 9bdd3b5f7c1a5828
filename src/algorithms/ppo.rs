use std::fs;
use std::path::Path;

use log::{debug, info, warn};
use ndarray::{Array3, ArrayView1, ArrayView3, ArrayView4, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::algorithms::objective::{clipped_surrogate_loss, LossCoefficients};
use crate::algorithms::returns::{discounted_returns, normalize};
use crate::config::{EncoderConfig, PpoConfig};
use crate::error::{PpoError, Result};
use crate::model::ActorCritic;
use crate::network::ParameterSet;
use crate::optimizer::{Adam, GradientClipper, Optimizer, OptimizerWrapper};
use crate::rollout_buffer::{RolloutBatch, RolloutBuffer};

/// Returns whose spread falls below this are reported as degenerate.
const DEGENERATE_RETURN_STD: f32 = 1e-6;

/// Proximal Policy Optimization agent
///
/// Holds two copies of the actor-critic. `policy_old` is the behavior model:
/// it picks every action and its log-probabilities go into the buffer.
/// `policy` is the live model the optimiser trains. At the end of each
/// [`PpoAgent::update`] the live weights are hard-copied into the behavior
/// model, so between updates the two always hold equal parameters.
pub struct PpoAgent {
    config: PpoConfig,
    policy: ActorCritic,
    policy_old: ActorCritic,
    optimizer: OptimizerWrapper,
    clipper: GradientClipper,
    buffer: RolloutBuffer,
    rng: StdRng,
}

/// Diagnostics for one call to [`PpoAgent::update`].
///
/// Loss terms are averaged over the epochs. `approx_kl` and `clip_fraction`
/// describe the last epoch, i.e. how far the live policy moved away from the
/// behavior policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateStats {
    pub epochs: usize,
    pub samples: usize,
    pub total_loss: f32,
    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy: f32,
    pub approx_kl: f32,
    pub clip_fraction: f32,
    /// Gradient norm before clipping, averaged over the epochs
    pub grad_norm: f32,
}

/// Merge a stack of frames `[frames, height, width, channels]` into one state
/// `[frames * channels, height, width]`.
///
/// Channel `f * channels + c` of the result is channel `c` of frame `f`, so
/// every output plane is an intact image. For multi-channel frames this is
/// not the same as reinterpreting the `[F, H, W, C]` buffer as
/// `[F * C, H, W]`, which would interleave pixels across planes; with
/// `C == 1` the two agree.
pub fn stack_frames(frames: ArrayView4<f32>) -> Result<Array3<f32>> {
    let (f, h, w, c) = frames.dim();
    if f == 0 || h == 0 || w == 0 || c == 0 {
        return Err(PpoError::dimension_mismatch(
            "non-empty frames [F, H, W, C]".to_string(),
            format!("{:?}", frames.shape()),
        ));
    }
    let channels_first = frames.permuted_axes([0, 3, 1, 2]).as_standard_layout().into_owned();
    Ok(channels_first.into_shape((f * c, h, w))?)
}

impl PpoAgent {
    /// Build an agent with an Adam optimiser.
    pub fn new(config: PpoConfig) -> Result<Self> {
        Self::with_optimizer(config, OptimizerWrapper::Adam(Adam::default()))
    }

    pub fn with_optimizer(config: PpoConfig, optimizer: OptimizerWrapper) -> Result<Self> {
        config.validate()?;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let policy = ActorCritic::new(config.state_shape(), config.action_dim, &config.encoder, &mut rng)?;
        let policy_old = policy.clone();

        info!(
            "PPO agent: state {:?}, {} actions, {} parameters per model, {} epochs per update",
            config.state_shape(),
            config.action_dim,
            policy.parameter_count(),
            config.k_epochs
        );

        Ok(PpoAgent {
            clipper: GradientClipper::from_max_norm(config.max_grad_norm),
            config,
            policy,
            policy_old,
            optimizer,
            buffer: RolloutBuffer::new(),
            rng,
        })
    }

    pub fn config(&self) -> &PpoConfig {
        &self.config
    }

    /// The live model trained by [`PpoAgent::update`].
    pub fn policy(&self) -> &ActorCritic {
        &self.policy
    }

    /// The behavior model that selects actions.
    pub fn policy_old(&self) -> &ActorCritic {
        &self.policy_old
    }

    pub fn optimizer(&self) -> &OptimizerWrapper {
        &self.optimizer
    }

    /// Swap the optimiser. Any moment state of the previous one is discarded.
    pub fn set_optimizer(&mut self, optimizer: OptimizerWrapper) {
        self.optimizer = optimizer;
    }

    pub fn buffer(&self) -> &RolloutBuffer {
        &self.buffer
    }

    /// The driver records rewards, terminal flags and (together with
    /// [`PpoAgent::select_action`]) states, actions and log-probabilities here.
    pub fn buffer_mut(&mut self) -> &mut RolloutBuffer {
        &mut self.buffer
    }

    fn loss_coefficients(&self) -> LossCoefficients {
        LossCoefficients {
            eps_clip: self.config.eps_clip,
            value_coef: self.config.value_coef,
            entropy_coef: self.config.entropy_coef,
        }
    }

    /// Choose an action for a stack of raw frames `[F, H, W, C]` with the behavior model.
    ///
    /// Returns the action and its log-probability; the buffer is not touched.
    pub fn select_action(&mut self, frames: ArrayView4<f32>) -> Result<(usize, f32)> {
        let state = stack_frames(frames)?;
        self.select_action_state(state.view())
    }

    /// Choose an action for an already encoded state `[C, H, W]`.
    pub fn select_action_state(&mut self, state: ArrayView3<f32>) -> Result<(usize, f32)> {
        let batch = state.insert_axis(Axis(0));
        self.policy_old.act(batch, &mut self.rng)
    }

    /// Choose an action for raw frames and record state, action and
    /// log-probability in the buffer. The reward and terminal flag of the step
    /// must be pushed by the caller once the environment has answered.
    pub fn act(&mut self, frames: ArrayView4<f32>) -> Result<usize> {
        let state = stack_frames(frames)?;
        let (action, log_prob) = self.select_action_state(state.view())?;
        self.buffer.states.push(state);
        self.buffer.actions.push(action);
        self.buffer.log_probs.push(log_prob);
        Ok(action)
    }

    /// Run `k_epochs` clipped-surrogate updates over the whole buffer, copy
    /// the live weights into the behavior model and empty the buffer.
    ///
    /// On error the agent is left as it was: buffer, both models and the
    /// optimiser state are restored.
    pub fn update(&mut self) -> Result<UpdateStats> {
        let batch = self.buffer.to_batch()?;
        let expected = self.policy.state_shape();
        let (_, c, h, w) = batch.states.dim();
        if (c, h, w) != expected {
            return Err(PpoError::dimension_mismatch(
                format!("buffered states of shape {:?}", expected),
                format!("{:?}", (c, h, w)),
            ));
        }
        if let Some(&action) = batch.actions.iter().find(|&&a| a >= self.config.action_dim) {
            return Err(PpoError::InvalidAction { action, max_actions: self.config.action_dim });
        }

        let raw_returns = discounted_returns(&batch.rewards, &batch.is_terminals, self.config.gamma);
        let (returns, std) = normalize(&raw_returns, self.config.return_epsilon);
        if std < DEGENERATE_RETURN_STD {
            warn!(
                "returns of {} transitions have no spread (std {:.3e}); normalised returns are all zero",
                raw_returns.len(),
                std
            );
        }

        let policy_snapshot = self.policy.state_dict();
        let optimizer_snapshot = self.optimizer.clone();
        let mut stats = match self.run_epochs(&batch, returns.view()) {
            Ok(stats) => stats,
            Err(e) => {
                self.policy.clear_cache();
                self.policy.load_state_dict(&policy_snapshot)?;
                self.optimizer = optimizer_snapshot;
                warn!("update failed after optimiser steps, rolled back: {}", e);
                return Err(e);
            }
        };
        self.policy.clear_cache();

        let epochs = stats.epochs as f32;
        stats.total_loss /= epochs;
        stats.policy_loss /= epochs;
        stats.value_loss /= epochs;
        stats.entropy /= epochs;
        stats.grad_norm /= epochs;

        self.policy_old.load_state_dict(&self.policy.state_dict())?;
        self.buffer.clear();

        info!(
            "update over {} transitions: loss {:.5}, value {:.5}, entropy {:.4}, kl {:.2e}, clipped {:.3}",
            stats.samples, stats.total_loss, stats.value_loss, stats.entropy, stats.approx_kl, stats.clip_fraction
        );
        Ok(stats)
    }

    /// The optimisation passes of [`PpoAgent::update`]. Loss terms are summed,
    /// not yet averaged.
    fn run_epochs(&mut self, batch: &RolloutBatch, returns: ArrayView1<f32>) -> Result<UpdateStats> {
        let coefficients = self.loss_coefficients();
        let mut stats = UpdateStats { samples: batch.actions.len(), ..Default::default() };

        for epoch in 0..self.config.k_epochs {
            let evaluation = self.policy.evaluate(batch.states.view(), &batch.actions)?;
            let (terms, output_grads) =
                clipped_surrogate_loss(&evaluation, batch.log_probs.view(), returns, &coefficients)?;
            let mut grads = self.policy.backward(&evaluation, &output_grads)?;
            let grad_norm = self.clipper.clip(&mut [&mut grads.actor, &mut grads.critic]);

            self.optimizer.begin_step();
            self.policy.apply_gradients(
                &grads,
                &mut self.optimizer,
                self.config.lr_actor,
                self.config.lr_critic,
            )?;

            debug!(
                "epoch {}/{}: loss {:.5}, policy {:.5}, value {:.5}, entropy {:.4}, kl {:.2e}, clipped {:.3}, grad norm {:.4}",
                epoch + 1,
                self.config.k_epochs,
                terms.total,
                terms.policy,
                terms.value,
                terms.entropy,
                terms.approx_kl,
                terms.clip_fraction,
                grad_norm
            );

            stats.epochs += 1;
            stats.total_loss += terms.total;
            stats.policy_loss += terms.policy;
            stats.value_loss += terms.value;
            stats.entropy += terms.entropy;
            stats.grad_norm += grad_norm;
            stats.approx_kl = terms.approx_kl;
            stats.clip_fraction = terms.clip_fraction;
        }
        Ok(stats)
    }

    /// Write the behavior model's parameters to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = bincode::serialize(&self.policy_old.state_dict())?;
        fs::write(path, bytes)?;
        info!("saved checkpoint to {}", path.display());
        Ok(())
    }

    /// Read parameters from `path` into both the behavior and the live model.
    ///
    /// The checkpoint is checked against the model before anything is written,
    /// so a failed load leaves both models as they were.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let parameters: ParameterSet = bincode::deserialize(&bytes)?;
        self.policy_old.load_state_dict(&parameters)?;
        self.policy.load_state_dict(&parameters)?;
        info!("loaded {} tensors from {}", parameters.len(), path.display());
        Ok(())
    }
}

/// Builder for [`PpoAgent`]
pub struct PpoBuilder {
    config: PpoConfig,
    optimizer: Option<OptimizerWrapper>,
}

impl PpoBuilder {
    pub fn new(state_dim: usize, action_dim: usize) -> Self {
        PpoBuilder {
            config: PpoConfig {
                state_dim,
                action_dim,
                ..Default::default()
            },
            optimizer: None,
        }
    }

    pub fn from_config(config: PpoConfig) -> Self {
        PpoBuilder { config, optimizer: None }
    }

    pub fn frame_size(mut self, height: usize, width: usize) -> Self {
        self.config.frame_height = height;
        self.config.frame_width = width;
        self
    }

    pub fn lr_actor(mut self, lr: f32) -> Self {
        self.config.lr_actor = lr;
        self
    }

    pub fn lr_critic(mut self, lr: f32) -> Self {
        self.config.lr_critic = lr;
        self
    }

    pub fn gamma(mut self, gamma: f32) -> Self {
        self.config.gamma = gamma;
        self
    }

    pub fn k_epochs(mut self, k_epochs: usize) -> Self {
        self.config.k_epochs = k_epochs;
        self
    }

    pub fn eps_clip(mut self, eps_clip: f32) -> Self {
        self.config.eps_clip = eps_clip;
        self
    }

    pub fn value_coef(mut self, coef: f32) -> Self {
        self.config.value_coef = coef;
        self
    }

    pub fn entropy_coef(mut self, coef: f32) -> Self {
        self.config.entropy_coef = coef;
        self
    }

    pub fn max_grad_norm(mut self, max_norm: f32) -> Self {
        self.config.max_grad_norm = Some(max_norm);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn encoder(mut self, encoder: EncoderConfig) -> Self {
        self.config.encoder = encoder;
        self
    }

    pub fn optimizer(mut self, optimizer: OptimizerWrapper) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    pub fn build(self) -> Result<PpoAgent> {
        let optimizer = self.optimizer.unwrap_or_else(|| OptimizerWrapper::Adam(Adam::default()));
        PpoAgent::with_optimizer(self.config, optimizer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activations::Activation;
    use ndarray::Array4;

    fn tiny_builder() -> PpoBuilder {
        PpoBuilder::new(2, 3)
            .frame_size(6, 6)
            .encoder(conv_encoder!((3, 3, 1); Some(8), Activation::Relu))
            .k_epochs(3)
            .seed(11)
    }

    fn frames(value: f32) -> Array4<f32> {
        Array4::from_shape_fn((2, 6, 6, 1), |(f, h, w, _)| value + 0.1 * f as f32 - 0.05 * (h * w) as f32)
    }

    #[test]
    fn test_stack_frames_keeps_planes_intact() {
        let raw = Array4::from_shape_fn((2, 2, 3, 2), |(f, h, w, c)| (f * 1000 + c * 100 + h * 10 + w) as f32);
        let state = stack_frames(raw.view()).unwrap();
        assert_eq!(state.dim(), (4, 2, 3));
        // Frame 1, channel 0 lands in plane 2
        assert_eq!(state[[2, 1, 2]], 1012.0);
        // Frame 0, channel 1 lands in plane 1
        assert_eq!(state[[1, 0, 1]], 101.0);

        assert!(stack_frames(Array4::<f32>::zeros((0, 2, 2, 1)).view()).is_err());

        // Single-channel frames stack exactly like a flat reshape
        let gray = Array4::from_shape_fn((3, 2, 3, 1), |(f, h, w, _)| (f * 100 + h * 10 + w) as f32);
        let flat = gray.clone().into_shape((3, 2, 3)).unwrap();
        assert_eq!(stack_frames(gray.view()).unwrap(), flat);
    }

    #[test]
    fn test_models_start_identical() {
        let agent = tiny_builder().build().unwrap();
        assert_eq!(agent.policy().state_dict(), agent.policy_old().state_dict());
        assert!(agent.buffer().is_empty());
    }

    #[test]
    fn test_select_action_leaves_buffer_alone() {
        let mut agent = tiny_builder().build().unwrap();
        let (action, log_prob) = agent.select_action(frames(0.0).view()).unwrap();
        assert!(action < 3);
        assert!(log_prob <= 0.0);
        assert!(agent.buffer().is_empty());

        let wrong = Array4::<f32>::zeros((3, 6, 6, 1));
        assert!(matches!(agent.select_action(wrong.view()), Err(PpoError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_seeded_agents_agree() {
        let mut a = tiny_builder().build().unwrap();
        let mut b = tiny_builder().build().unwrap();
        assert_eq!(a.policy().state_dict(), b.policy().state_dict());
        for i in 0..5 {
            let obs = frames(i as f32);
            assert_eq!(a.select_action(obs.view()).unwrap().0, b.select_action(obs.view()).unwrap().0);
        }
    }

    #[test]
    fn test_update_syncs_and_clears() {
        let mut agent = tiny_builder().build().unwrap();
        let before = agent.policy_old().state_dict();
        for step in 0..4 {
            agent.act(frames(step as f32).view()).unwrap();
            agent.buffer_mut().rewards.push(if step == 3 { 1.0 } else { 0.0 });
            agent.buffer_mut().is_terminals.push(step == 3);
        }

        let stats = agent.update().unwrap();
        assert_eq!(stats.epochs, 3);
        assert_eq!(stats.samples, 4);
        assert!(stats.total_loss.is_finite());
        assert!(agent.buffer().is_empty());
        assert_eq!(agent.optimizer().steps(), 3);
        assert_eq!(agent.policy().state_dict(), agent.policy_old().state_dict());
        assert_ne!(agent.policy_old().state_dict(), before);
    }

    #[test]
    fn test_first_epoch_ratio_is_one() {
        let mut agent = tiny_builder().k_epochs(1).build().unwrap();
        for step in 0..6 {
            agent.act(frames(step as f32 * 0.5).view()).unwrap();
            agent.buffer_mut().rewards.push(step as f32);
            agent.buffer_mut().is_terminals.push(step == 5);
        }
        // The live model scores the buffered actions exactly as the behavior model did
        let batch = agent.buffer().to_batch().unwrap();
        let mut live = agent.policy().clone();
        let evaluation = live.evaluate(batch.states.view(), &batch.actions).unwrap();
        assert_eq!(evaluation.log_probs, batch.log_probs);

        let stats = agent.update().unwrap();
        assert_eq!(stats.approx_kl, 0.0);
        assert_eq!(stats.clip_fraction, 0.0);
    }

    #[test]
    fn test_diverging_update_rolls_back() {
        let mut agent = tiny_builder().k_epochs(5).lr_actor(1e30).lr_critic(1e30).build().unwrap();
        for step in 0..6 {
            agent.act(frames(step as f32).view()).unwrap();
            agent.buffer_mut().rewards.push(step as f32 - 2.0);
            agent.buffer_mut().is_terminals.push(step == 5);
        }
        let before = agent.policy().state_dict();

        assert!(agent.update().is_err());
        assert_eq!(agent.policy().state_dict(), before);
        assert_eq!(agent.policy_old().state_dict(), before);
        assert_eq!(agent.optimizer().steps(), 0);
        assert_eq!(agent.buffer().len(), 6);
    }

    #[test]
    fn test_failed_update_keeps_state() {
        let mut agent = tiny_builder().build().unwrap();
        assert!(matches!(agent.update(), Err(PpoError::EmptyBuffer(_))));

        agent.act(frames(0.0).view()).unwrap();
        agent.buffer_mut().rewards.push(1.0);
        // Terminal flag missing
        let before = agent.policy_old().state_dict();
        assert!(matches!(agent.update(), Err(PpoError::MisalignedBuffer { .. })));
        assert_eq!(agent.buffer().len(), 1);
        assert_eq!(agent.optimizer().steps(), 0);
        assert_eq!(agent.policy_old().state_dict(), before);
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        assert!(tiny_builder().gamma(2.0).build().is_err());
        assert!(tiny_builder().frame_size(2, 2).build().is_err());
        assert!(PpoBuilder::new(2, 0).frame_size(84, 84).build().is_err());
    }
}
