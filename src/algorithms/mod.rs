//! # PPO update machinery
//!
//! - [`returns`] turns a rollout's rewards into discounted, normalised returns.
//! - [`objective`] evaluates the clipped surrogate loss and its output gradients.
//! - [`ppo`] owns the behavior/live model pair, the optimiser and the buffer,
//!   and runs the collect-then-update cycle.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use pixel_ppo::algorithms::PpoBuilder;
//! use pixel_ppo::optimizer::{Adam, OptimizerWrapper};
//!
//! // Four stacked grayscale 84x84 frames, six actions
//! let mut agent = PpoBuilder::new(4, 6)
//!     .frame_size(84, 84)
//!     .k_epochs(4)
//!     .optimizer(OptimizerWrapper::Adam(Adam::default()))
//!     .build()
//!     .unwrap();
//!
//! let frames = ndarray::Array4::<f32>::zeros((4, 84, 84, 1));
//! let action = agent.act(frames.view()).unwrap();
//! agent.buffer_mut().rewards.push(1.0);
//! agent.buffer_mut().is_terminals.push(true);
//! let stats = agent.update().unwrap();
//! println!("took action {}, loss {}", action, stats.total_loss);
//! ```

pub mod objective;
pub mod ppo;
pub mod returns;

pub use objective::{clip_ratio, clipped_surrogate, clipped_surrogate_loss, LossCoefficients, LossTerms};
pub use ppo::{stack_frames, PpoAgent, PpoBuilder, UpdateStats};
pub use returns::{discounted_returns, normalize};
