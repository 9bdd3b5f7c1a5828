//! Trajectory storage for one rollout.
//!
//! The driver appends one [`Transition`] per environment step; the agent
//! consumes the whole buffer in `update` and then empties it.

use ndarray::{Array1, Array3, Array4, ArrayView3, Axis};

use crate::error::{PpoError, Result};

/// One environment step as seen by the behavior policy.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    /// Encoded state `[channels, height, width]`
    pub state: Array3<f32>,
    pub action: usize,
    /// Log-probability of `action` under the behavior policy
    pub log_prob: f32,
    pub reward: f32,
    pub is_terminal: bool,
}

/// Parallel, index-aligned sequences of transition fields.
#[derive(Clone, Debug, Default)]
pub struct RolloutBuffer {
    pub actions: Vec<usize>,
    pub states: Vec<Array3<f32>>,
    pub log_probs: Vec<f32>,
    pub rewards: Vec<f32>,
    pub is_terminals: Vec<bool>,
}

/// The buffer stacked into batch tensors for one update.
#[derive(Clone, Debug)]
pub struct RolloutBatch {
    /// `[batch, channels, height, width]`
    pub states: Array4<f32>,
    pub actions: Vec<usize>,
    pub log_probs: Array1<f32>,
    pub rewards: Vec<f32>,
    pub is_terminals: Vec<bool>,
}

impl RolloutBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entry to every sequence.
    pub fn push(&mut self, transition: Transition) {
        self.states.push(transition.state);
        self.actions.push(transition.action);
        self.log_probs.push(transition.log_prob);
        self.rewards.push(transition.reward);
        self.is_terminals.push(transition.is_terminal);
    }

    /// Append one entry to every sequence from borrowed fields.
    pub fn add(&mut self, state: ArrayView3<f32>, action: usize, log_prob: f32, reward: f32, is_terminal: bool) {
        self.push(Transition {
            state: state.to_owned(),
            action,
            log_prob,
            reward,
            is_terminal,
        });
    }

    /// Empty every sequence. Clearing an empty buffer is a no-op.
    pub fn clear(&mut self) {
        self.actions.clear();
        self.states.clear();
        self.log_probs.clear();
        self.rewards.clear();
        self.is_terminals.clear();
    }

    /// Number of complete transitions, i.e. the length of the state sequence.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
            && self.actions.is_empty()
            && self.log_probs.is_empty()
            && self.rewards.is_empty()
            && self.is_terminals.is_empty()
    }

    /// Fail unless every sequence is non-empty and of the same length.
    pub fn check_aligned(&self) -> Result<usize> {
        let expected = self.states.len();
        let lengths = [
            ("actions", self.actions.len()),
            ("log_probs", self.log_probs.len()),
            ("rewards", self.rewards.len()),
            ("is_terminals", self.is_terminals.len()),
        ];
        for (field, actual) in lengths {
            if actual != expected {
                return Err(PpoError::MisalignedBuffer { field, expected, actual });
            }
        }
        if expected == 0 {
            return Err(PpoError::EmptyBuffer("rollout buffer holds no transitions".to_string()));
        }
        Ok(expected)
    }

    /// Stack the buffer into batch tensors without modifying it.
    pub fn to_batch(&self) -> Result<RolloutBatch> {
        self.check_aligned()?;
        let first = self.states[0].dim();
        if let Some(bad) = self.states.iter().find(|s| s.dim() != first) {
            return Err(PpoError::dimension_mismatch(format!("{:?}", first), format!("{:?}", bad.dim())));
        }
        let views: Vec<ArrayView3<f32>> = self.states.iter().map(|s| s.view()).collect();
        let states = ndarray::stack(Axis(0), &views)?;

        Ok(RolloutBatch {
            states,
            actions: self.actions.clone(),
            log_probs: Array1::from(self.log_probs.clone()),
            rewards: self.rewards.clone(),
            is_terminals: self.is_terminals.clone(),
        })
    }
}
