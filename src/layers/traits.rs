use ndarray::{ArrayViewD, ArrayViewMutD};

/// Parameter access shared by every trainable layer.
///
/// Parameters are exposed as dynamic-dimensional views under short local names
/// (`"weight"`, `"bias"`); the owning network prefixes them to build the
/// globally unique names used by optimiser state and checkpoints.
pub trait Layer: Send + Sync {
    /// Views of the trainable tensors, in a fixed order.
    fn parameters(&self) -> Vec<(&'static str, ArrayViewD<'_, f32>)>;

    /// Mutable views of the trainable tensors, in the same order as [`Layer::parameters`].
    fn parameters_mut(&mut self) -> Vec<(&'static str, ArrayViewMutD<'_, f32>)>;

    /// Drop whatever the last cached forward pass recorded.
    fn clear_cache(&mut self);

    /// Total number of scalar parameters.
    fn parameter_count(&self) -> usize {
        self.parameters().iter().map(|(_, p)| p.len()).sum()
    }
}
