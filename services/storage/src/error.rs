use thiserror::Error;

/// Errors raised by the key and identifier codec
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// Image ID does not split into `{type}-{timestamp}-{random}`
    #[error("Invalid image ID format: {0}")]
    InvalidFormat(String),

    /// Image type name is not one of the known variants
    #[error("Unknown image type: {0}")]
    UnknownImageType(String),
}
