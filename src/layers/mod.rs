//! Layers the encoder towers are assembled from.
//!
//! Every layer offers two forward passes: `forward` is pure and keeps nothing
//! around, `forward_cached` records what `backward` needs. Acting goes through
//! the former, optimisation through the latter.

pub mod traits;
pub mod dense;
pub mod conv;
pub mod initialization;

pub use traits::Layer;
pub use dense::{DenseGradients, DenseLayer};
pub use conv::{Conv2DGradients, Conv2DLayer};
pub use initialization::WeightInit;
