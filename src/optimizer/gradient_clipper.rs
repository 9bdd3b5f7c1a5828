use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

/// Gradient clipping methods
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum GradientClipper {
    /// Rescale all gradients together so their joint L2 norm is at most `max_norm`
    ClipByGlobalNorm { max_norm: f32 },

    /// No clipping
    None,
}

impl GradientClipper {
    pub fn from_max_norm(max_norm: Option<f32>) -> Self {
        match max_norm {
            Some(max_norm) => GradientClipper::ClipByGlobalNorm { max_norm },
            None => GradientClipper::None,
        }
    }

    /// Compute global norm of all gradients
    pub fn global_norm<'a, I>(gradients: I) -> f32
    where
        I: IntoIterator<Item = &'a ArrayD<f32>>,
    {
        gradients
            .into_iter()
            .map(|g| g.iter().map(|&x| x * x).sum::<f32>())
            .sum::<f32>()
            .sqrt()
    }

    /// Clip gradient groups in place. Returns the global norm measured before clipping.
    pub fn clip(&self, groups: &mut [&mut Vec<ArrayD<f32>>]) -> f32 {
        let norm = Self::global_norm(groups.iter().flat_map(|g| g.iter()));
        match *self {
            GradientClipper::ClipByGlobalNorm { max_norm } => {
                if norm > max_norm {
                    let scale = max_norm / norm;
                    for grad in groups.iter_mut().flat_map(|g| g.iter_mut()) {
                        grad.mapv_inplace(|x| x * scale);
                    }
                }
            }
            GradientClipper::None => {}
        }
        norm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, ArrayD};

    fn grads(values: &[f32]) -> Vec<ArrayD<f32>> {
        vec![arr1(values).into_dyn()]
    }

    #[test]
    fn test_global_norm_spans_groups() {
        let mut actor = grads(&[3.0]);
        let mut critic = grads(&[4.0]);
        let norm = GradientClipper::ClipByGlobalNorm { max_norm: 1.0 }.clip(&mut [&mut actor, &mut critic]);
        assert_eq!(norm, 5.0);
        assert!((actor[0][0] - 0.6).abs() < 1e-6);
        assert!((critic[0][0] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_none_leaves_gradients() {
        let mut actor = grads(&[30.0, 40.0]);
        GradientClipper::from_max_norm(None).clip(&mut [&mut actor]);
        assert_eq!(actor[0], arr1(&[30.0, 40.0]).into_dyn());
    }
}
