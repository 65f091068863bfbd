use thiserror::Error;

/// The error type for `deeplab-burn` operations.
///
/// Structured forward passes cannot fail; every variant here comes from
/// external weights, mode strings, or configuration supplied by the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeepLabError {
    /// A functional stage looked up a weight key that the mapping does not hold.
    /// This usually means the mapping was built with a different naming scheme.
    #[error("Missing weight key: {key}")]
    MissingWeightKey {
        /// The key that was not found.
        key: String,
    },

    /// A weight tensor does not have the shape its consumer requires.
    #[error("Shape mismatch for {key}: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// The key of the offending tensor.
        key: String,
        /// The required shape.
        expected: String,
        /// The shape that was supplied.
        actual: String,
    },

    /// A train mode string that is not one of `conv_3_4_5`, `conv_4_5` or `all`.
    #[error("Unknown train mode: {mode}")]
    UnknownTrainMode {
        /// The string that failed to parse.
        mode: String,
    },

    /// Error for when an invalid model configuration is provided.
    #[error("Invalid model configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },
}

/// A specialized `Result` type for `deeplab-burn` operations.
pub type DeepLabResult<T> = Result<T, DeepLabError>;
