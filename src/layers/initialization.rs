use ndarray::{Array, Dimension, ShapeBuilder};
use rand_distr::{Normal, Uniform};
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::activations::Activation;
use crate::error::{PpoError, Result};

/// Weight initialization strategies
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum WeightInit {
    /// Xavier/Glorot uniform initialization
    XavierUniform,

    /// Xavier/Glorot normal initialization
    XavierNormal,

    /// He/Kaiming uniform initialization (for ReLU)
    HeUniform,

    /// He/Kaiming normal initialization (for ReLU)
    HeNormal,

    /// Uniform distribution with custom range
    Uniform { min: f32, max: f32 },

    /// All zeros
    Zeros,
}

impl WeightInit {
    /// Draw a weight tensor of the given shape.
    ///
    /// `fan_in` and `fan_out` count the connections feeding into and out of one
    /// unit; for a convolution that is `channels * kernel_height * kernel_width`.
    pub fn initialize<Sh, D, R>(&self, shape: Sh, fan_in: usize, fan_out: usize, rng: &mut R) -> Result<Array<f32, D>>
    where
        Sh: ShapeBuilder<Dim = D>,
        D: Dimension,
        R: Rng + ?Sized,
    {
        let weights = match *self {
            WeightInit::XavierUniform => {
                let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
                Array::random_using(shape, Uniform::new(-limit, limit), rng)
            }
            WeightInit::XavierNormal => {
                let std = (2.0 / (fan_in + fan_out) as f32).sqrt();
                Array::random_using(shape, normal(std)?, rng)
            }
            WeightInit::HeUniform => {
                let limit = (6.0 / fan_in as f32).sqrt();
                Array::random_using(shape, Uniform::new(-limit, limit), rng)
            }
            WeightInit::HeNormal => {
                let std = (2.0 / fan_in as f32).sqrt();
                Array::random_using(shape, normal(std)?, rng)
            }
            WeightInit::Uniform { min, max } => {
                if min >= max {
                    return Err(PpoError::invalid_parameter(
                        "weight_init".to_string(),
                        format!("uniform range [{}, {}) is empty", min, max),
                    ));
                }
                Array::random_using(shape, Uniform::new(min, max), rng)
            }
            WeightInit::Zeros => Array::zeros(shape),
        };
        Ok(weights)
    }

    /// Get the recommended initialization for an activation function
    pub fn for_activation(activation: &Activation) -> Self {
        match activation {
            Activation::Relu | Activation::LeakyRelu { .. } => WeightInit::HeNormal,
            Activation::Tanh | Activation::Linear => WeightInit::XavierNormal,
        }
    }
}

fn normal(std: f32) -> Result<Normal<f32>> {
    Normal::new(0.0, std).map_err(|e| PpoError::NumericalError(format!("invalid normal std {}: {}", std, e)))
}
