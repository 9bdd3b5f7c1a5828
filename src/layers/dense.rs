use ndarray::{Array1, Array2, ArrayView2, ArrayViewD, ArrayViewMutD, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::initialization::WeightInit;
use super::traits::Layer;
use crate::activations::Activation;
use crate::error::{PpoError, Result};

/// A fully connected (dense) layer: `activation(inputs · weights + biases)`.
#[derive(Serialize, Deserialize, Clone)]
pub struct DenseLayer {
    /// Weight matrix `[input_size, output_size]`
    pub weights: Array2<f32>,
    pub biases: Array1<f32>,
    pub activation: Activation,
    #[serde(skip)]
    inputs: Option<Array2<f32>>,
    #[serde(skip)]
    pre_activation_output: Option<Array2<f32>>,
}

/// Gradients produced by [`DenseLayer::backward`].
#[derive(Debug, Clone)]
pub struct DenseGradients {
    /// Gradient with respect to the layer inputs, `[batch, input_size]`
    pub input: Array2<f32>,
    pub weights: Array2<f32>,
    pub biases: Array1<f32>,
}

impl DenseLayer {
    /// Create a new dense layer. Weights are drawn from `init`, biases start at zero.
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        output_size: usize,
        activation: Activation,
        init: WeightInit,
        rng: &mut R,
    ) -> Result<Self> {
        let weights = init.initialize((input_size, output_size), input_size, output_size, rng)?;
        Ok(DenseLayer {
            weights,
            biases: Array1::zeros(output_size),
            activation,
            inputs: None,
            pre_activation_output: None,
        })
    }

    pub fn with_weights(mut self, weights: Array2<f32>) -> Result<Self> {
        if weights.dim() != self.weights.dim() {
            return Err(PpoError::dimension_mismatch(
                format!("{:?}", self.weights.dim()),
                format!("{:?}", weights.dim()),
            ));
        }
        self.weights = weights;
        Ok(self)
    }

    pub fn input_size(&self) -> usize {
        self.weights.nrows()
    }

    pub fn output_size(&self) -> usize {
        self.weights.ncols()
    }

    fn pre_activation(&self, inputs: ArrayView2<f32>) -> Result<Array2<f32>> {
        if inputs.ncols() != self.input_size() {
            return Err(PpoError::dimension_mismatch(
                format!("[batch, {}]", self.input_size()),
                format!("{:?}", inputs.shape()),
            ));
        }
        Ok(inputs.dot(&self.weights) + &self.biases.view().insert_axis(Axis(0)))
    }

    /// Forward pass for a batch without recording anything for backpropagation.
    pub fn forward(&self, inputs: ArrayView2<f32>) -> Result<Array2<f32>> {
        let mut outputs = self.pre_activation(inputs)?;
        self.activation.apply(&mut outputs);
        Ok(outputs)
    }

    /// Forward pass that stores inputs and pre-activations for [`DenseLayer::backward`].
    pub fn forward_cached(&mut self, inputs: ArrayView2<f32>) -> Result<Array2<f32>> {
        let pre_activation = self.pre_activation(inputs)?;
        let mut outputs = pre_activation.clone();
        self.activation.apply(&mut outputs);
        self.inputs = Some(inputs.to_owned());
        self.pre_activation_output = Some(pre_activation);
        Ok(outputs)
    }

    /// Backpropagate `output_errors` (dLoss/dOutput) through the most recent cached forward pass.
    pub fn backward(&self, output_errors: ArrayView2<f32>) -> Result<DenseGradients> {
        let (inputs, pre_activation) = match (&self.inputs, &self.pre_activation_output) {
            (Some(i), Some(p)) => (i, p),
            _ => {
                return Err(PpoError::TrainingError(
                    "forward_cached() must be called before backward()".to_string(),
                ))
            }
        };
        if output_errors.dim() != pre_activation.dim() {
            return Err(PpoError::dimension_mismatch(
                format!("{:?}", pre_activation.dim()),
                format!("{:?}", output_errors.dim()),
            ));
        }

        let mut adjusted_error = output_errors.to_owned();
        self.activation.backprop(&mut adjusted_error, pre_activation.view());

        Ok(DenseGradients {
            input: adjusted_error.dot(&self.weights.t()),
            weights: inputs.t().dot(&adjusted_error),
            biases: adjusted_error.sum_axis(Axis(0)),
        })
    }
}

impl Layer for DenseLayer {
    fn parameters(&self) -> Vec<(&'static str, ArrayViewD<'_, f32>)> {
        vec![
            ("weight", self.weights.view().into_dyn()),
            ("bias", self.biases.view().into_dyn()),
        ]
    }

    fn parameters_mut(&mut self) -> Vec<(&'static str, ArrayViewMutD<'_, f32>)> {
        vec![
            ("weight", self.weights.view_mut().into_dyn()),
            ("bias", self.biases.view_mut().into_dyn()),
        ]
    }

    fn clear_cache(&mut self) {
        self.inputs = None;
        self.pre_activation_output = None;
    }
}
