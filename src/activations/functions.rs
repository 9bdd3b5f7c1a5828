use ndarray::{Array, ArrayView, Dimension};
use serde::{Deserialize, Serialize};

/// An enumeration of the activation functions a layer can apply to its pre-activation output.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, PartialEq)]
pub enum Activation {
    #[default]
    Relu,
    Linear,
    Tanh,
    LeakyRelu { alpha: f32 },
}

impl Activation {
    /// Apply the activation function to an array in-place.
    pub fn apply<D: Dimension>(&self, input: &mut Array<f32, D>) {
        match self {
            Activation::Relu => input.mapv_inplace(|v| v.max(0.0)),
            Activation::Linear => {}
            Activation::Tanh => input.mapv_inplace(|v| v.tanh()),
            Activation::LeakyRelu { alpha } => {
                let a = *alpha;
                input.mapv_inplace(|v| if v > 0.0 { v } else { a * v });
            }
        }
    }

    /// Derivative of the activation evaluated at the stored pre-activation values.
    pub fn derivative<D: Dimension>(&self, pre_activation: ArrayView<f32, D>) -> Array<f32, D> {
        match self {
            Activation::Relu => pre_activation.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            Activation::Linear => Array::ones(pre_activation.raw_dim()),
            Activation::Tanh => pre_activation.mapv(|v| {
                let t = v.tanh();
                1.0 - t * t
            }),
            Activation::LeakyRelu { alpha } => {
                let a = *alpha;
                pre_activation.mapv(|v| if v > 0.0 { 1.0 } else { a })
            }
        }
    }

    /// Multiply an upstream gradient by the activation derivative in-place.
    pub fn backprop<D: Dimension>(&self, grad: &mut Array<f32, D>, pre_activation: ArrayView<f32, D>) {
        if let Activation::Linear = self {
            return;
        }
        let deriv = self.derivative(pre_activation);
        *grad *= &deriv;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array4};

    #[test]
    fn test_relu_on_images() {
        let mut x = Array4::from_shape_vec((1, 1, 2, 2), vec![-1.0, 0.5, 0.0, 2.0]).unwrap();
        Activation::Relu.apply(&mut x);
        assert_eq!(x.iter().cloned().collect::<Vec<_>>(), vec![0.0, 0.5, 0.0, 2.0]);
    }

    #[test]
    fn test_backprop_masks_inactive_units() {
        let pre = array![[-1.0, 3.0], [2.0, -0.5]];
        let mut grad = array![[1.0, 1.0], [1.0, 1.0]];
        Activation::Relu.backprop(&mut grad, pre.view());
        assert_eq!(grad, array![[0.0, 1.0], [1.0, 0.0]]);

        let mut grad = array![[2.0, 2.0]];
        Activation::Linear.backprop(&mut grad, array![[-4.0, 4.0]].view());
        assert_eq!(grad, array![[2.0, 2.0]]);
    }

    #[test]
    fn test_tanh_derivative_at_zero() {
        let d = Activation::Tanh.derivative(array![0.0f32].view());
        assert!((d[0] - 1.0).abs() < 1e-6);
    }
}
