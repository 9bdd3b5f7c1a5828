//! Gradient-descent optimisers.
//!
//! Parameters are addressed by their global name (`actor.conv0.weight`, ...),
//! so per-parameter state such as Adam's moment estimates survives across
//! updates and is shared by nothing else. A step is bracketed by one
//! [`Optimizer::begin_step`] followed by one [`Optimizer::update`] per parameter.

pub mod gradient_clipper;

use std::collections::HashMap;

use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{PpoError, Result};

pub use gradient_clipper::GradientClipper;

pub trait Optimizer {
    /// Open a new optimisation step.
    fn begin_step(&mut self);

    /// Apply `grad` to `param` for the step opened by the last `begin_step`.
    fn update(&mut self, name: &str, param: ArrayViewMutD<'_, f32>, grad: ArrayViewD<'_, f32>, learning_rate: f32) -> Result<()>;

    /// Number of steps opened so far.
    fn steps(&self) -> usize;
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum OptimizerWrapper {
    SGD(SGD),
    Adam(Adam),
}

impl Optimizer for OptimizerWrapper {
    fn begin_step(&mut self) {
        match self {
            OptimizerWrapper::SGD(optimizer) => optimizer.begin_step(),
            OptimizerWrapper::Adam(optimizer) => optimizer.begin_step(),
        }
    }

    fn update(&mut self, name: &str, param: ArrayViewMutD<'_, f32>, grad: ArrayViewD<'_, f32>, learning_rate: f32) -> Result<()> {
        match self {
            OptimizerWrapper::SGD(optimizer) => optimizer.update(name, param, grad, learning_rate),
            OptimizerWrapper::Adam(optimizer) => optimizer.update(name, param, grad, learning_rate),
        }
    }

    fn steps(&self) -> usize {
        match self {
            OptimizerWrapper::SGD(optimizer) => optimizer.steps(),
            OptimizerWrapper::Adam(optimizer) => optimizer.steps(),
        }
    }
}

fn check_shapes(name: &str, param: &ArrayViewMutD<'_, f32>, grad: &ArrayViewD<'_, f32>) -> Result<()> {
    if param.shape() != grad.shape() {
        return Err(PpoError::dimension_mismatch(
            format!("gradient for '{}' with shape {:?}", name, param.shape()),
            format!("{:?}", grad.shape()),
        ));
    }
    Ok(())
}

/// Plain stochastic gradient descent.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SGD {
    steps: usize,
}

impl SGD {
    pub fn new() -> SGD {
        SGD { steps: 0 }
    }
}

impl Optimizer for SGD {
    fn begin_step(&mut self) {
        self.steps += 1;
    }

    fn update(&mut self, name: &str, mut param: ArrayViewMutD<'_, f32>, grad: ArrayViewD<'_, f32>, learning_rate: f32) -> Result<()> {
        check_shapes(name, &param, &grad)?;
        param.zip_mut_with(&grad, |w, &g| *w -= learning_rate * g);
        Ok(())
    }

    fn steps(&self) -> usize {
        self.steps
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct Moments {
    m: ArrayD<f32>,
    v: ArrayD<f32>,
}

/// Adam with bias-corrected first and second moment estimates.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Adam {
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    moments: HashMap<String, Moments>,
    pub t: usize,
}

impl Adam {
    pub fn new(beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Adam {
            beta1,
            beta2,
            epsilon,
            moments: HashMap::new(),
            t: 0,
        }
    }

    /// Number of parameters with moment state
    pub fn tracked_parameters(&self) -> usize {
        self.moments.len()
    }
}

impl Default for Adam {
    fn default() -> Self {
        Self::new(0.9, 0.999, 1e-8)
    }
}

impl Optimizer for Adam {
    fn begin_step(&mut self) {
        self.t += 1;
    }

    fn update(&mut self, name: &str, mut param: ArrayViewMutD<'_, f32>, grad: ArrayViewD<'_, f32>, learning_rate: f32) -> Result<()> {
        check_shapes(name, &param, &grad)?;
        if self.t == 0 {
            return Err(PpoError::TrainingError("Adam::update called before begin_step".to_string()));
        }

        let moments = self.moments.entry(name.to_string()).or_insert_with(|| Moments {
            m: ArrayD::zeros(grad.raw_dim()),
            v: ArrayD::zeros(grad.raw_dim()),
        });
        if moments.m.shape() != grad.shape() {
            return Err(PpoError::dimension_mismatch(
                format!("moment state for '{}' with shape {:?}", name, moments.m.shape()),
                format!("{:?}", grad.shape()),
            ));
        }

        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);
        let bias1 = 1.0 - beta1.powi(self.t as i32);
        let bias2 = 1.0 - beta2.powi(self.t as i32);

        Zip::from(&mut param)
            .and(&mut moments.m)
            .and(&mut moments.v)
            .and(&grad)
            .for_each(|w, m, v, &g| {
                *m = beta1 * *m + (1.0 - beta1) * g;
                *v = beta2 * *v + (1.0 - beta2) * g * g;
                let m_hat = *m / bias1;
                let v_hat = *v / bias2;
                *w -= learning_rate * m_hat / (v_hat.sqrt() + epsilon);
            });
        Ok(())
    }

    fn steps(&self) -> usize {
        self.t
    }
}
