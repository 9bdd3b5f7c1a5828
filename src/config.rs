//! Hyperparameters and encoder topology.
//!
//! A [`PpoConfig`] is the whole constructor surface of the agent. It can be
//! built in code, through [`crate::algorithms::PpoBuilder`], or read from JSON.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::activations::Activation;
use crate::error::{PpoError, Result};

/// Where tensors live. Only host memory is available to the ndarray backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
}

/// One convolution of the encoder. Kernels and strides are square.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvSpec {
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    #[serde(default)]
    pub padding: usize,
}

/// Feature extractor shared in shape (not in weights) by the actor and the critic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub conv_layers: Vec<ConvSpec>,
    /// Width of the fully-connected layer after the convolutions; `None` feeds
    /// the flattened feature map straight into the output head.
    pub hidden_size: Option<usize>,
    pub activation: Activation,
}

impl Default for EncoderConfig {
    /// Mnih et al. (2016): 16 filters 8x8 stride 4, 32 filters 4x4 stride 2, 256 hidden units.
    fn default() -> Self {
        EncoderConfig {
            conv_layers: vec![
                ConvSpec { out_channels: 16, kernel_size: 8, stride: 4, padding: 0 },
                ConvSpec { out_channels: 32, kernel_size: 4, stride: 2, padding: 0 },
            ],
            hidden_size: Some(256),
            activation: Activation::Relu,
        }
    }
}

impl EncoderConfig {
    /// Spatial size of the last feature map for a `height` x `width` input, if every kernel fits.
    pub fn feature_map_size(&self, height: usize, width: usize) -> Option<(usize, usize)> {
        self.conv_layers.iter().try_fold((height, width), |(h, w), spec| {
            if spec.stride == 0 {
                return None;
            }
            let (ph, pw) = (h + 2 * spec.padding, w + 2 * spec.padding);
            if ph < spec.kernel_size || pw < spec.kernel_size {
                return None;
            }
            Some(((ph - spec.kernel_size) / spec.stride + 1, (pw - spec.kernel_size) / spec.stride + 1))
        })
    }
}

/// PPO hyperparameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PpoConfig {
    /// Input channels after frame stacking (`frames * channels`)
    pub state_dim: usize,
    /// Number of discrete actions
    pub action_dim: usize,
    pub frame_height: usize,
    pub frame_width: usize,
    pub lr_actor: f32,
    pub lr_critic: f32,
    /// Discount factor
    pub gamma: f32,
    /// Optimisation passes over the whole rollout per update
    pub k_epochs: usize,
    /// Ratio clipping range
    pub eps_clip: f32,
    /// Weight of the value regression term
    pub value_coef: f32,
    /// Weight of the entropy bonus
    pub entropy_coef: f32,
    /// Added to the standard deviation when normalising returns
    pub return_epsilon: f32,
    /// Global gradient-norm cap; `None` disables clipping
    pub max_grad_norm: Option<f32>,
    pub device: Device,
    /// Seeds weight initialisation and action sampling
    pub seed: Option<u64>,
    pub encoder: EncoderConfig,
}

impl Default for PpoConfig {
    fn default() -> Self {
        PpoConfig {
            state_dim: 4,
            action_dim: 2,
            frame_height: 105,
            frame_width: 80,
            lr_actor: 0.0003,
            lr_critic: 0.001,
            gamma: 0.99,
            k_epochs: 80,
            eps_clip: 0.2,
            value_coef: 0.5,
            entropy_coef: 0.01,
            return_epsilon: 1e-7,
            max_grad_norm: None,
            device: Device::Cpu,
            seed: None,
            encoder: EncoderConfig::default(),
        }
    }
}

impl PpoConfig {
    pub fn new(state_dim: usize, action_dim: usize, frame_height: usize, frame_width: usize) -> Self {
        PpoConfig {
            state_dim,
            action_dim,
            frame_height,
            frame_width,
            ..Default::default()
        }
    }

    /// `(channels, height, width)` of one encoded state.
    pub fn state_shape(&self) -> (usize, usize, usize) {
        (self.state_dim, self.frame_height, self.frame_width)
    }

    /// Check every hyperparameter, failing on the first invalid one.
    pub fn validate(&self) -> Result<()> {
        fn invalid(name: &str, reason: String) -> Result<()> {
            Err(PpoError::invalid_parameter(name.to_string(), reason))
        }

        if self.state_dim == 0 {
            return invalid("state_dim", "must be positive".to_string());
        }
        if self.action_dim == 0 {
            return invalid("action_dim", "must be positive".to_string());
        }
        if self.frame_height == 0 || self.frame_width == 0 {
            return invalid(
                "frame_size",
                format!("{}x{} has no pixels", self.frame_height, self.frame_width),
            );
        }
        if !(self.lr_actor > 0.0 && self.lr_actor.is_finite()) {
            return invalid("lr_actor", format!("{} is not a positive learning rate", self.lr_actor));
        }
        if !(self.lr_critic > 0.0 && self.lr_critic.is_finite()) {
            return invalid("lr_critic", format!("{} is not a positive learning rate", self.lr_critic));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return invalid("gamma", format!("{} must lie in [0, 1]", self.gamma));
        }
        if self.k_epochs == 0 {
            return invalid("k_epochs", "at least one epoch is required".to_string());
        }
        if !(self.eps_clip > 0.0 && self.eps_clip.is_finite()) {
            return invalid("eps_clip", format!("{} must be positive", self.eps_clip));
        }
        if !(self.value_coef >= 0.0) || !(self.entropy_coef >= 0.0) {
            return invalid("loss_coefficients", "value_coef and entropy_coef must be non-negative".to_string());
        }
        if !(self.return_epsilon > 0.0) {
            return invalid("return_epsilon", format!("{} must be positive", self.return_epsilon));
        }
        if let Some(norm) = self.max_grad_norm {
            if !(norm > 0.0) {
                return invalid("max_grad_norm", format!("{} must be positive", norm));
            }
        }
        if self.encoder.conv_layers.iter().any(|c| c.out_channels == 0 || c.kernel_size == 0) {
            return invalid("encoder", "convolutions need at least one filter of non-zero size".to_string());
        }
        if self.encoder.hidden_size == Some(0) {
            return invalid("encoder", "hidden_size must be positive".to_string());
        }
        if self.encoder.feature_map_size(self.frame_height, self.frame_width).is_none() {
            return invalid(
                "encoder",
                format!(
                    "convolutions do not fit a {}x{} frame",
                    self.frame_height, self.frame_width
                ),
            );
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PpoConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
