use ndarray::{Array2, Array4, ArrayD};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::activations::Activation;
use crate::layers::{Conv2DLayer, DenseLayer, Layer, WeightInit};

const EPS: f32 = 1e-2;

/// Central difference of `f` with respect to element `flat` of parameter `index`.
fn numeric_grad<L, F>(layer: &mut L, index: usize, flat: usize, f: F) -> f32
where
    L: Layer,
    F: Fn(&L) -> f32,
{
    let bump = |layer: &mut L, delta: f32| {
        let mut params = layer.parameters_mut();
        let (_, view) = &mut params[index];
        *view.iter_mut().nth(flat).unwrap() += delta;
    };
    bump(layer, EPS);
    let up = f(layer);
    bump(layer, -2.0 * EPS);
    let down = f(layer);
    bump(layer, EPS);
    (up - down) / (2.0 * EPS)
}

fn assert_grads_match<L, F>(layer: &mut L, analytic: &[ArrayD<f32>], f: F)
where
    L: Layer,
    F: Fn(&L) -> f32,
{
    for (index, grad) in analytic.iter().enumerate() {
        for flat in [0, grad.len() / 2, grad.len() - 1] {
            let numeric = numeric_grad(layer, index, flat, &f);
            let expected = *grad.iter().nth(flat).unwrap();
            assert!(
                (numeric - expected).abs() < 1e-2,
                "param {} element {}: numeric {} vs analytic {}",
                index,
                flat,
                numeric,
                expected
            );
        }
    }
}

#[test]
fn test_dense_backward_matches_finite_differences() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut layer = DenseLayer::new(4, 3, Activation::Tanh, WeightInit::XavierNormal, &mut rng).unwrap();
    layer.biases.assign(&ndarray::arr1(&[0.1, -0.2, 0.05]));
    let inputs = Array2::from_shape_fn((5, 4), |(i, j)| ((i * 4 + j) as f32 * 0.37).sin());
    let weights = Array2::from_shape_fn((5, 3), |(i, j)| ((i + 2 * j) as f32 * 0.61).cos());

    layer.forward_cached(inputs.view()).unwrap();
    let grads = layer.backward(weights.view()).unwrap();
    assert_eq!(grads.input.dim(), (5, 4));

    let analytic = vec![grads.weights.into_dyn(), grads.biases.into_dyn()];
    assert_grads_match(&mut layer, &analytic, |l| (l.forward(inputs.view()).unwrap() * &weights).sum());
}

#[test]
fn test_conv_backward_matches_finite_differences() {
    let mut rng = StdRng::seed_from_u64(4);
    let mut layer = Conv2DLayer::new(
        2,
        3,
        (3, 3),
        (2, 2),
        (1, 1),
        Activation::Linear,
        WeightInit::HeNormal,
        &mut rng,
    )
    .unwrap();
    let input = Array4::from_shape_fn((2, 2, 5, 5), |(b, c, h, w)| ((b * 50 + c * 25 + h * 5 + w) as f32 * 0.13).sin());

    let output = layer.forward_cached(input.view()).unwrap();
    let (_, oc, oh, ow) = output.dim();
    assert_eq!((oc, oh, ow), (3, 3, 3));
    let weights = Array4::from_shape_fn(output.dim(), |(b, c, h, w)| ((b + c + h * 3 + w) as f32 * 0.29).cos());
    let grads = layer.backward(weights.view()).unwrap();

    let analytic = vec![grads.kernels.into_dyn(), grads.biases.into_dyn()];
    assert_grads_match(&mut layer, &analytic, |l| (l.forward(input.view()).unwrap() * &weights).sum());

    // Input gradient for a linear conv: perturb one pixel
    let pixel = [1usize, 0, 2, 3];
    let mut plus = input.clone();
    plus[pixel] += EPS;
    let mut minus = input.clone();
    minus[pixel] -= EPS;
    let numeric = ((layer.forward(plus.view()).unwrap() * &weights).sum()
        - (layer.forward(minus.view()).unwrap() * &weights).sum())
        / (2.0 * EPS);
    assert!((numeric - grads.input[pixel]).abs() < 1e-2);
}

#[test]
fn test_backward_without_cache_fails() {
    let mut rng = StdRng::seed_from_u64(5);
    let mut layer = DenseLayer::new(2, 2, Activation::Relu, WeightInit::HeUniform, &mut rng).unwrap();
    assert!(layer.backward(Array2::zeros((1, 2)).view()).is_err());

    layer.forward_cached(Array2::ones((1, 2)).view()).unwrap();
    assert!(layer.backward(Array2::zeros((1, 2)).view()).is_ok());
    layer.clear_cache();
    assert!(layer.backward(Array2::zeros((1, 2)).view()).is_err());
}

#[test]
fn test_parameter_names_and_counts() {
    let mut rng = StdRng::seed_from_u64(6);
    let conv = Conv2DLayer::new(4, 16, (8, 8), (4, 4), (0, 0), Activation::Relu, WeightInit::HeNormal, &mut rng).unwrap();
    let names: Vec<&str> = conv.parameters().iter().map(|(n, _)| *n).collect();
    assert_eq!(names, vec!["weight", "bias"]);
    assert_eq!(conv.parameter_count(), 16 * 4 * 8 * 8 + 16);
    assert_eq!(conv.output_size(84, 84), Some((20, 20)));
}
