use std::collections::BTreeMap;

use ndarray::{Array2, Array4, ArrayD, ArrayView2, ArrayView4, ArrayViewD};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::activations::Activation;
use crate::config::EncoderConfig;
use crate::error::{PpoError, Result};
use crate::layers::{Conv2DLayer, DenseLayer, Layer, WeightInit};
use crate::optimizer::{Optimizer, OptimizerWrapper};

/// A named snapshot of trainable tensors: parameter name to value.
///
/// This is the unit of synchronisation between the live and behavior models
/// and the payload of a checkpoint file.
pub type ParameterSet = BTreeMap<String, ArrayD<f32>>;

/// Gradients for every parameter of a [`ConvNetwork`], in [`ConvNetwork::parameters`] order.
pub type NetworkGradients = Vec<ArrayD<f32>>;

/// A convolutional tower: conv stack, flatten, then a dense stack ending in a linear head.
///
/// Inputs are `[batch, channels, height, width]` and must match the
/// `input_shape` the tower was built for.
#[derive(Serialize, Deserialize, Clone)]
pub struct ConvNetwork {
    pub convs: Vec<Conv2DLayer>,
    pub dense: Vec<DenseLayer>,
    /// Expected `(channels, height, width)` of one observation
    pub input_shape: (usize, usize, usize),
    /// Shape of the last conv feature map, `(channels, height, width)`
    feature_shape: (usize, usize, usize),
}

impl ConvNetwork {
    /// Build a tower from an encoder description with `output_size` linear outputs.
    pub fn new<R: Rng + ?Sized>(
        input_shape: (usize, usize, usize),
        encoder: &EncoderConfig,
        output_size: usize,
        rng: &mut R,
    ) -> Result<Self> {
        let (mut channels, mut height, mut width) = input_shape;
        let init = WeightInit::for_activation(&encoder.activation);

        let mut convs = Vec::with_capacity(encoder.conv_layers.len());
        for spec in &encoder.conv_layers {
            let layer = Conv2DLayer::new(
                channels,
                spec.out_channels,
                (spec.kernel_size, spec.kernel_size),
                (spec.stride, spec.stride),
                (spec.padding, spec.padding),
                encoder.activation,
                init,
                rng,
            )?;
            let (h, w) = layer.output_size(height, width).ok_or_else(|| {
                PpoError::invalid_parameter(
                    "encoder".to_string(),
                    format!(
                        "kernel {} does not fit a {}x{} feature map",
                        spec.kernel_size, height, width
                    ),
                )
            })?;
            channels = spec.out_channels;
            height = h;
            width = w;
            convs.push(layer);
        }

        let flat = channels * height * width;
        let mut dense = Vec::new();
        let mut fan_in = flat;
        if let Some(hidden) = encoder.hidden_size {
            dense.push(DenseLayer::new(fan_in, hidden, encoder.activation, init, rng)?);
            fan_in = hidden;
        }
        dense.push(DenseLayer::new(
            fan_in,
            output_size,
            Activation::Linear,
            WeightInit::XavierUniform,
            rng,
        )?);

        Ok(ConvNetwork {
            convs,
            dense,
            input_shape,
            feature_shape: (channels, height, width),
        })
    }

    pub fn output_size(&self) -> usize {
        self.dense.last().map(|l| l.output_size()).unwrap_or(0)
    }

    fn check_input(&self, input: &ArrayView4<f32>) -> Result<()> {
        let (_, c, h, w) = input.dim();
        if (c, h, w) != self.input_shape {
            let (ec, eh, ew) = self.input_shape;
            return Err(PpoError::dimension_mismatch(
                format!("[batch, {}, {}, {}]", ec, eh, ew),
                format!("{:?}", input.shape()),
            ));
        }
        Ok(())
    }

    fn flatten(features: Array4<f32>) -> Result<Array2<f32>> {
        let (batch, c, h, w) = features.dim();
        Ok(features.into_shape((batch, c * h * w))?)
    }

    /// Forward pass with nothing recorded. Used for acting.
    pub fn forward(&self, input: ArrayView4<f32>) -> Result<Array2<f32>> {
        self.check_input(&input)?;
        let mut features = input.as_standard_layout().into_owned();
        for conv in &self.convs {
            features = conv.forward(features.view())?;
        }
        let mut hidden = Self::flatten(features)?;
        for layer in &self.dense {
            hidden = layer.forward(hidden.view())?;
        }
        Ok(hidden)
    }

    /// Forward pass that records every layer's cache for [`ConvNetwork::backward`].
    pub fn forward_cached(&mut self, input: ArrayView4<f32>) -> Result<Array2<f32>> {
        self.check_input(&input)?;
        let mut features = input.as_standard_layout().into_owned();
        for conv in &mut self.convs {
            features = conv.forward_cached(features.view())?;
        }
        let mut hidden = Self::flatten(features)?;
        for layer in &mut self.dense {
            hidden = layer.forward_cached(hidden.view())?;
        }
        Ok(hidden)
    }

    /// Backpropagate dLoss/dOutput through the cached pass and return parameter gradients.
    pub fn backward(&self, output_errors: ArrayView2<f32>) -> Result<NetworkGradients> {
        let mut dense_grads = Vec::with_capacity(self.dense.len());
        let mut error = output_errors.to_owned();
        for layer in self.dense.iter().rev() {
            let grads = layer.backward(error.view())?;
            error = grads.input;
            dense_grads.push((grads.weights, grads.biases));
        }
        dense_grads.reverse();

        let (c, h, w) = self.feature_shape;
        let mut feature_error = error
            .as_standard_layout()
            .into_owned()
            .into_shape((output_errors.nrows(), c, h, w))?;
        let mut conv_grads = Vec::with_capacity(self.convs.len());
        for conv in self.convs.iter().rev() {
            let grads = conv.backward(feature_error.view())?;
            feature_error = grads.input;
            conv_grads.push((grads.kernels, grads.biases));
        }
        conv_grads.reverse();

        let mut gradients = Vec::with_capacity(2 * (self.convs.len() + self.dense.len()));
        for (k, b) in conv_grads {
            gradients.push(k.into_dyn());
            gradients.push(b.into_dyn());
        }
        for (wt, b) in dense_grads {
            gradients.push(wt.into_dyn());
            gradients.push(b.into_dyn());
        }
        Ok(gradients)
    }

    fn layers(&self) -> impl Iterator<Item = (String, &dyn Layer)> {
        let convs = self.convs.iter().enumerate().map(|(i, l)| (format!("conv{}", i), l as &dyn Layer));
        let dense = self.dense.iter().enumerate().map(|(i, l)| (format!("fc{}", i), l as &dyn Layer));
        convs.chain(dense)
    }

    fn layers_mut(&mut self) -> impl Iterator<Item = (String, &mut dyn Layer)> {
        let convs = self.convs.iter_mut().enumerate().map(|(i, l)| (format!("conv{}", i), l as &mut dyn Layer));
        let dense = self.dense.iter_mut().enumerate().map(|(i, l)| (format!("fc{}", i), l as &mut dyn Layer));
        convs.chain(dense)
    }

    /// Drop activations recorded by the last cached pass.
    pub fn clear_cache(&mut self) {
        for (_, layer) in self.layers_mut() {
            layer.clear_cache();
        }
    }

    /// Named views of every trainable tensor, e.g. `conv0.weight`, `fc1.bias`.
    pub fn parameters(&self) -> Vec<(String, ArrayViewD<'_, f32>)> {
        let mut params = Vec::new();
        for (prefix, layer) in self.layers() {
            for (name, view) in layer.parameters() {
                params.push((format!("{}.{}", prefix, name), view));
            }
        }
        params
    }

    pub fn parameter_count(&self) -> usize {
        self.layers().map(|(_, l)| l.parameter_count()).sum()
    }

    /// Deep copy of every parameter under `prefix`.
    pub fn snapshot_into(&self, prefix: &str, set: &mut ParameterSet) {
        for (name, view) in self.parameters() {
            set.insert(format!("{}{}", prefix, name), view.to_owned());
        }
    }

    /// Check that `set` holds a correctly shaped tensor for every parameter under `prefix`.
    pub fn validate_parameters(&self, prefix: &str, set: &ParameterSet) -> Result<()> {
        for (name, view) in self.parameters() {
            let key = format!("{}{}", prefix, name);
            let value = set.get(&key).ok_or_else(|| PpoError::MissingParameter(key.clone()))?;
            if value.shape() != view.shape() {
                return Err(PpoError::dimension_mismatch(
                    format!("{} with shape {:?}", key, view.shape()),
                    format!("{:?}", value.shape()),
                ));
            }
        }
        Ok(())
    }

    /// Overwrite every parameter from `set`. Nothing is written unless all of them validate.
    pub fn load_parameters(&mut self, prefix: &str, set: &ParameterSet) -> Result<()> {
        self.validate_parameters(prefix, set)?;
        for (layer_prefix, layer) in self.layers_mut() {
            for (name, mut view) in layer.parameters_mut() {
                let key = format!("{}{}.{}", prefix, layer_prefix, name);
                if let Some(value) = set.get(&key) {
                    view.assign(value);
                }
            }
            layer.clear_cache();
        }
        Ok(())
    }

    /// Apply one optimiser update to every parameter with the given learning rate.
    pub fn apply_gradients(
        &mut self,
        prefix: &str,
        gradients: &[ArrayD<f32>],
        optimizer: &mut OptimizerWrapper,
        learning_rate: f32,
    ) -> Result<()> {
        let mut grads = gradients.iter();
        for (layer_prefix, layer) in self.layers_mut() {
            for (name, param) in layer.parameters_mut() {
                let key = format!("{}{}.{}", prefix, layer_prefix, name);
                let grad = grads.next().ok_or_else(|| {
                    PpoError::TrainingError(format!("no gradient supplied for '{}'", key))
                })?;
                optimizer.update(&key, param, grad.view(), learning_rate)?;
            }
        }
        if grads.next().is_some() {
            return Err(PpoError::TrainingError("more gradients than parameters".to_string()));
        }
        Ok(())
    }
}
