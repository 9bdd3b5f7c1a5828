//! # pixel-ppo - Proximal Policy Optimization for pixel observations
//!
//! A PPO engine for discrete action spaces whose states are stacks of image
//! frames. Actor and critic are small convolutional networks trained with
//! hand-written backpropagation on top of `ndarray`.
//!
//! ## Key Features
//!
//! - **Clipped surrogate objective** with a value regression term and an entropy bonus
//! - **Behavior/live model pair**: actions come from a frozen snapshot, training
//!   touches only the live model, and a hard copy re-synchronises them after every update
//! - **Monte-Carlo returns** with per-episode resets and batch normalisation
//! - **Adam** with separate actor and critic learning rates
//! - **Checkpoints** as a named map of tensors, serialised with `bincode`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pixel_ppo::algorithms::PpoAgent;
//! use pixel_ppo::config::PpoConfig;
//!
//! let mut config = PpoConfig::new(4, 6, 84, 84);
//! config.k_epochs = 4;
//! let mut agent = PpoAgent::new(config).unwrap();
//!
//! let frames = ndarray::Array4::<f32>::zeros((4, 84, 84, 1));
//! let (action, log_prob) = agent.select_action(frames.view()).unwrap();
//! # let _ = (action, log_prob);
//! ```
//!
//! ## Module Organization
//!
//! - [`activations`] - Activation functions and their derivatives
//! - [`algorithms`] - Returns, the PPO objective and the agent
//! - [`config`] - Hyperparameters and encoder topology
//! - [`distribution`] - Categorical action distribution
//! - [`error`] - Error types and result handling
//! - [`layers`] - Convolution and dense layers with cached backward passes
//! - [`model`] - The actor-critic pair
//! - [`network`] - Convolutional encoder plus dense head
//! - [`optimizer`] - SGD, Adam and gradient clipping
//! - [`rollout_buffer`] - Trajectory storage

#[macro_use]
pub mod macros;

pub mod activations;
pub mod algorithms;
pub mod config;
pub mod distribution;
pub mod error;
pub mod layers;
pub mod model;
pub mod network;
pub mod optimizer;
pub mod rollout_buffer;

#[cfg(test)]
mod tests;
