/// A macro to describe a convolutional encoder.
///
/// # Examples
///
/// ```
/// use pixel_ppo::activations::Activation;
/// use pixel_ppo::conv_encoder;
///
/// let encoder = conv_encoder!((16, 8, 4), (32, 4, 2); Some(256), Activation::Relu);
/// assert_eq!(encoder, pixel_ppo::config::EncoderConfig::default());
/// ```
///
/// Each tuple is `(out_channels, kernel_size, stride)` with no padding. After
/// the semicolon come the hidden layer width and the activation.
#[macro_export]
macro_rules! conv_encoder {
    ($(($out:expr, $kernel:expr, $stride:expr)),* $(,)?; $hidden:expr, $activation:expr) => {
        $crate::config::EncoderConfig {
            conv_layers: vec![$($crate::config::ConvSpec {
                out_channels: $out,
                kernel_size: $kernel,
                stride: $stride,
                padding: 0,
            }),*],
            hidden_size: $hidden,
            activation: $activation,
        }
    };
}
