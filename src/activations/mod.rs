//! # Activation Functions Module
//!
//! Element-wise non-linearities used inside the encoder towers. Each activation
//! works on tensors of any dimensionality so the same value can follow a
//! convolution (`[N, C, H, W]`) or a fully-connected layer (`[N, F]`).
//!
//! - **ReLU**: `max(0, x)` - the default for every hidden layer
//! - **LeakyReLU**: ReLU with a small negative slope
//! - **Tanh**: hyperbolic tangent, outputs between -1 and 1
//! - **Linear**: identity, used on the policy logits and the value output
//!
//! Softmax is not an activation here: the policy head emits logits and the
//! [`crate::distribution::Categorical`] normalises them.

pub mod functions;

pub use functions::Activation;
