use std::fmt;

/// Result type for pixel-ppo operations
pub type Result<T> = std::result::Result<T, PpoError>;

/// Main error type for the PPO engine
#[derive(Debug, Clone, PartialEq)]
pub enum PpoError {
    /// Tensor shape does not match what the model was built for
    DimensionMismatch {
        expected: String,
        actual: String,
    },

    /// Invalid hyperparameter or constructor argument
    InvalidParameter {
        name: String,
        reason: String,
    },

    /// IO errors (checkpoint files, config files)
    IoError(String),

    /// Serialization/deserialization errors
    SerializationError(String),

    /// Numerical computation errors
    NumericalError(String),

    /// Update requested on a buffer with no transitions
    EmptyBuffer(String),

    /// Parallel buffer sequences disagree in length
    MisalignedBuffer {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Action index outside the discrete action space
    InvalidAction {
        action: usize,
        max_actions: usize,
    },

    /// A parameter expected by the model is absent from a parameter set
    MissingParameter(String),

    /// Training error
    TrainingError(String),
}

impl fmt::Display for PpoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PpoError::DimensionMismatch { expected, actual } => {
                write!(f, "Dimension mismatch: expected {}, got {}", expected, actual)
            }
            PpoError::InvalidParameter { name, reason } => {
                write!(f, "Invalid parameter '{}': {}", name, reason)
            }
            PpoError::IoError(msg) => write!(f, "IO error: {}", msg),
            PpoError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            PpoError::NumericalError(msg) => write!(f, "Numerical error: {}", msg),
            PpoError::EmptyBuffer(msg) => write!(f, "Empty buffer: {}", msg),
            PpoError::MisalignedBuffer { field, expected, actual } => {
                write!(
                    f,
                    "Misaligned buffer: '{}' holds {} entries, expected {}",
                    field, actual, expected
                )
            }
            PpoError::InvalidAction { action, max_actions } => {
                write!(f, "Invalid action {}: must be less than {}", action, max_actions)
            }
            PpoError::MissingParameter(name) => write!(f, "Missing parameter '{}'", name),
            PpoError::TrainingError(msg) => write!(f, "Training error: {}", msg),
        }
    }
}

impl std::error::Error for PpoError {}

impl From<std::io::Error> for PpoError {
    fn from(err: std::io::Error) -> Self {
        PpoError::IoError(err.to_string())
    }
}

impl From<bincode::Error> for PpoError {
    fn from(err: bincode::Error) -> Self {
        PpoError::SerializationError(err.to_string())
    }
}

impl From<serde_json::Error> for PpoError {
    fn from(err: serde_json::Error) -> Self {
        PpoError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for PpoError {
    fn from(err: ndarray::ShapeError) -> Self {
        PpoError::DimensionMismatch {
            expected: "a compatible memory layout".to_string(),
            actual: err.to_string(),
        }
    }
}

// Helper functions for common error patterns
impl PpoError {
    pub fn dimension_mismatch<S: Into<String>>(expected: S, actual: S) -> Self {
        PpoError::DimensionMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn invalid_parameter<S: Into<String>>(name: S, reason: S) -> Self {
        PpoError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
