//! 2D convolution for image-shaped observations.
//!
//! The convolution is evaluated per sample as a matrix product over unfolded
//! patches (im2col): a `[out_h * out_w, in_channels * kh * kw]` patch matrix
//! against the kernels viewed as `[out_channels, in_channels * kh * kw]`.

use ndarray::{s, Array1, Array2, Array3, Array4, ArrayView2, ArrayView3, ArrayView4, ArrayViewD, ArrayViewMutD, Axis, Zip};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::initialization::WeightInit;
use super::traits::Layer;
use crate::activations::Activation;
use crate::error::{PpoError, Result};

/// 2D Convolutional Layer
///
/// Inputs and outputs are laid out `[batch, channels, height, width]`.
#[derive(Serialize, Deserialize, Clone)]
pub struct Conv2DLayer {
    /// Convolution kernels/filters [out_channels, in_channels, kernel_height, kernel_width]
    pub kernels: Array4<f32>,

    /// Bias terms for each output channel
    pub biases: Array1<f32>,

    pub activation: Activation,

    pub stride: (usize, usize),

    /// Zero padding added to each spatial border
    pub padding: (usize, usize),

    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: (usize, usize),

    /// Cached input for backward pass
    #[serde(skip)]
    cached_input: Option<Array4<f32>>,

    /// Cached pre-activation output
    #[serde(skip)]
    cached_pre_activation: Option<Array4<f32>>,
}

/// Gradients produced by [`Conv2DLayer::backward`].
#[derive(Debug, Clone)]
pub struct Conv2DGradients {
    /// Gradient with respect to the layer input, same shape as the input
    pub input: Array4<f32>,
    pub kernels: Array4<f32>,
    pub biases: Array1<f32>,
}

impl Conv2DLayer {
    /// Create a new 2D convolutional layer
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        kernel_size: (usize, usize),
        stride: (usize, usize),
        padding: (usize, usize),
        activation: Activation,
        init: WeightInit,
        rng: &mut R,
    ) -> Result<Self> {
        if stride.0 == 0 || stride.1 == 0 {
            return Err(PpoError::invalid_parameter("stride", "must be positive"));
        }
        if kernel_size.0 == 0 || kernel_size.1 == 0 {
            return Err(PpoError::invalid_parameter("kernel_size", "must be positive"));
        }
        let fan_in = in_channels * kernel_size.0 * kernel_size.1;
        let fan_out = out_channels * kernel_size.0 * kernel_size.1;
        let kernels = init.initialize(
            (out_channels, in_channels, kernel_size.0, kernel_size.1),
            fan_in,
            fan_out,
            rng,
        )?;

        Ok(Conv2DLayer {
            kernels,
            biases: Array1::zeros(out_channels),
            activation,
            stride,
            padding,
            in_channels,
            out_channels,
            kernel_size,
            cached_input: None,
            cached_pre_activation: None,
        })
    }

    /// Spatial output size for an input of `(height, width)`, or `None` if the kernel does not fit.
    pub fn output_size(&self, height: usize, width: usize) -> Option<(usize, usize)> {
        let padded_h = height + 2 * self.padding.0;
        let padded_w = width + 2 * self.padding.1;
        if padded_h < self.kernel_size.0 || padded_w < self.kernel_size.1 {
            return None;
        }
        Some((
            (padded_h - self.kernel_size.0) / self.stride.0 + 1,
            (padded_w - self.kernel_size.1) / self.stride.1 + 1,
        ))
    }

    fn fan_in(&self) -> usize {
        self.in_channels * self.kernel_size.0 * self.kernel_size.1
    }

    fn kernel_matrix(&self) -> Result<ArrayView2<'_, f32>> {
        Ok(self.kernels.view().into_shape((self.out_channels, self.fan_in()))?)
    }

    fn check_input(&self, input: &ArrayView4<f32>) -> Result<(usize, usize)> {
        let (_, channels, height, width) = input.dim();
        if channels != self.in_channels {
            return Err(PpoError::dimension_mismatch(
                format!("{} input channels", self.in_channels),
                format!("{} (input shape {:?})", channels, input.shape()),
            ));
        }
        self.output_size(height, width).ok_or_else(|| {
            PpoError::dimension_mismatch(
                format!("spatial size of at least {:?}", self.kernel_size),
                format!("{:?}", (height, width)),
            )
        })
    }

    /// Pad a single image with zeros
    fn pad(&self, image: ArrayView3<f32>) -> Array3<f32> {
        if self.padding == (0, 0) {
            return image.to_owned();
        }
        let (channels, height, width) = image.dim();
        let mut padded = Array3::zeros((channels, height + 2 * self.padding.0, width + 2 * self.padding.1));
        padded
            .slice_mut(s![.., self.padding.0..self.padding.0 + height, self.padding.1..self.padding.1 + width])
            .assign(&image);
        padded
    }

    /// Unfold a padded image into one row per output position.
    fn im2col(&self, padded: ArrayView3<f32>, out_h: usize, out_w: usize) -> Array2<f32> {
        let (kh, kw) = self.kernel_size;
        let mut cols = Array2::zeros((out_h * out_w, self.fan_in()));
        for oh in 0..out_h {
            for ow in 0..out_w {
                let h0 = oh * self.stride.0;
                let w0 = ow * self.stride.1;
                let patch = padded.slice(s![.., h0..h0 + kh, w0..w0 + kw]);
                let mut row = cols.row_mut(oh * out_w + ow);
                for (dst, &src) in row.iter_mut().zip(patch.iter()) {
                    *dst = src;
                }
            }
        }
        cols
    }

    /// Fold patch gradients back onto a padded image, accumulating overlaps.
    fn col2im(&self, cols: ArrayView2<f32>, padded_dim: (usize, usize, usize), out_h: usize, out_w: usize) -> Array3<f32> {
        let (kh, kw) = self.kernel_size;
        let mut image = Array3::zeros(padded_dim);
        for oh in 0..out_h {
            for ow in 0..out_w {
                let h0 = oh * self.stride.0;
                let w0 = ow * self.stride.1;
                let row = cols.row(oh * out_w + ow);
                let mut patch = image.slice_mut(s![.., h0..h0 + kh, w0..w0 + kw]);
                for (dst, &src) in patch.iter_mut().zip(row.iter()) {
                    *dst += src;
                }
            }
        }
        image
    }

    fn convolve(&self, input: ArrayView4<f32>) -> Result<Array4<f32>> {
        let (out_h, out_w) = self.check_input(&input)?;
        let kernel_matrix = self.kernel_matrix()?;
        let bias = self.biases.view().insert_axis(Axis(1));
        let mut output = Array4::zeros((input.dim().0, self.out_channels, out_h, out_w));

        Zip::from(output.outer_iter_mut())
            .and(input.outer_iter())
            .par_for_each(|mut out, image| {
                let cols = self.im2col(self.pad(image).view(), out_h, out_w);
                let result = kernel_matrix.dot(&cols.t()) + &bias;
                for (dst, &src) in out.iter_mut().zip(result.iter()) {
                    *dst = src;
                }
            });

        Ok(output)
    }

    /// Forward pass without recording anything for backpropagation.
    pub fn forward(&self, input: ArrayView4<f32>) -> Result<Array4<f32>> {
        let mut output = self.convolve(input)?;
        self.activation.apply(&mut output);
        Ok(output)
    }

    /// Forward pass that stores the input and pre-activation for [`Conv2DLayer::backward`].
    pub fn forward_cached(&mut self, input: ArrayView4<f32>) -> Result<Array4<f32>> {
        let pre_activation = self.convolve(input)?;
        let mut output = pre_activation.clone();
        self.activation.apply(&mut output);
        self.cached_input = Some(input.to_owned());
        self.cached_pre_activation = Some(pre_activation);
        Ok(output)
    }

    /// Backpropagate `output_gradient` (dLoss/dOutput) through the last cached forward pass.
    pub fn backward(&self, output_gradient: ArrayView4<f32>) -> Result<Conv2DGradients> {
        let (input, pre_activation) = match (&self.cached_input, &self.cached_pre_activation) {
            (Some(i), Some(p)) => (i, p),
            _ => {
                return Err(PpoError::TrainingError(
                    "forward_cached() must be called before backward()".to_string(),
                ))
            }
        };
        if output_gradient.dim() != pre_activation.dim() {
            return Err(PpoError::dimension_mismatch(
                format!("{:?}", pre_activation.dim()),
                format!("{:?}", output_gradient.dim()),
            ));
        }

        let mut grad = output_gradient.to_owned();
        self.activation.backprop(&mut grad, pre_activation.view());

        let (batch, _, out_h, out_w) = grad.dim();
        let (_, _, in_h, in_w) = input.dim();
        let padded_dim = (self.in_channels, in_h + 2 * self.padding.0, in_w + 2 * self.padding.1);
        let kernel_matrix = self.kernel_matrix()?;

        let mut kernel_grads = Array2::<f32>::zeros((self.out_channels, self.fan_in()));
        let mut bias_grads = Array1::<f32>::zeros(self.out_channels);
        let mut input_grads = Array4::<f32>::zeros(input.dim());

        for b in 0..batch {
            let cols = self.im2col(self.pad(input.index_axis(Axis(0), b)).view(), out_h, out_w);
            let g = grad
                .index_axis(Axis(0), b)
                .to_owned()
                .into_shape((self.out_channels, out_h * out_w))?;

            kernel_grads += &g.dot(&cols);
            bias_grads += &g.sum_axis(Axis(1));

            let col_grads = g.t().dot(&kernel_matrix);
            let padded = self.col2im(col_grads.view(), padded_dim, out_h, out_w);
            input_grads
                .index_axis_mut(Axis(0), b)
                .assign(&padded.slice(s![.., self.padding.0..self.padding.0 + in_h, self.padding.1..self.padding.1 + in_w]));
        }

        Ok(Conv2DGradients {
            input: input_grads,
            kernels: kernel_grads.into_shape(self.kernels.dim())?,
            biases: bias_grads,
        })
    }
}

impl Layer for Conv2DLayer {
    fn parameters(&self) -> Vec<(&'static str, ArrayViewD<'_, f32>)> {
        vec![
            ("weight", self.kernels.view().into_dyn()),
            ("bias", self.biases.view().into_dyn()),
        ]
    }

    fn parameters_mut(&mut self) -> Vec<(&'static str, ArrayViewMutD<'_, f32>)> {
        vec![
            ("weight", self.kernels.view_mut().into_dyn()),
            ("bias", self.biases.view_mut().into_dyn()),
        ]
    }

    fn clear_cache(&mut self) {
        self.cached_input = None;
        self.cached_pre_activation = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ones_layer(stride: (usize, usize), padding: (usize, usize)) -> Conv2DLayer {
        let mut rng = StdRng::seed_from_u64(0);
        let mut layer = Conv2DLayer::new(1, 1, (2, 2), stride, padding, Activation::Linear, WeightInit::Zeros, &mut rng).unwrap();
        layer.kernels.fill(1.0);
        layer
    }

    #[test]
    fn test_conv2d_forward_sums_patches() {
        let layer = ones_layer((1, 1), (0, 0));
        let input = Array4::from_shape_vec((1, 1, 3, 3), (1..=9).map(|v| v as f32).collect()).unwrap();
        let output = layer.forward(input.view()).unwrap();
        assert_eq!(output.dim(), (1, 1, 2, 2));
        assert_eq!(output.iter().cloned().collect::<Vec<_>>(), vec![12.0, 16.0, 24.0, 28.0]);
    }

    #[test]
    fn test_conv2d_stride_and_padding_shapes() {
        let layer = ones_layer((2, 2), (1, 1));
        assert_eq!(layer.output_size(4, 4), Some((3, 3)));
        assert_eq!(ones_layer((1, 1), (0, 0)).output_size(1, 5), None);
    }

    #[test]
    fn test_conv2d_rejects_wrong_channels() {
        let layer = ones_layer((1, 1), (0, 0));
        let input = Array4::<f32>::zeros((1, 3, 4, 4));
        assert!(matches!(layer.forward(input.view()), Err(PpoError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_conv2d_backward_counts_patch_overlaps() {
        let mut layer = ones_layer((1, 1), (0, 0));
        let input = Array4::<f32>::ones((1, 1, 3, 3));
        let output = layer.forward_cached(input.view()).unwrap();
        let grads = layer.backward(Array4::ones(output.dim()).view()).unwrap();

        // The centre pixel is covered by all four windows, corners by one.
        assert_eq!(grads.input[[0, 0, 1, 1]], 4.0);
        assert_eq!(grads.input[[0, 0, 0, 0]], 1.0);
        assert_eq!(grads.biases[0], 4.0);
        assert!(grads.kernels.iter().all(|&g| g == 4.0));
    }
}
