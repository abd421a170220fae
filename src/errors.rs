// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the privacy-mask engine

use std::fmt;

/// Result type alias using MaskError
pub type MaskResult<T> = Result<T, MaskError>;

/// Error kind without the attached message
///
/// Configuration front-ends map this to a status code instead of
/// matching on message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    BufferAllocation,
    DspOperation,
    Configuration,
    Other,
}

/// Main error type for mask configuration, recomputation and blending
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaskError {
    /// Malformed polygon, out-of-range value or unsupported query type
    InvalidArgument(String),
    /// Unknown mask id or no analytics entry matching a query
    NotFound(String),
    /// Buffer pool exhausted or backing allocation failed
    BufferAllocation(String),
    /// The blend unit rejected or failed the operation
    DspOperation(String),
    /// Internally inconsistent configuration or buffer sizing
    Configuration(String),
    /// Generic error with message
    Other(String),
}

impl MaskError {
    /// Get the kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            MaskError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            MaskError::NotFound(_) => ErrorKind::NotFound,
            MaskError::BufferAllocation(_) => ErrorKind::BufferAllocation,
            MaskError::DspOperation(_) => ErrorKind::DspOperation,
            MaskError::Configuration(_) => ErrorKind::Configuration,
            MaskError::Other(_) => ErrorKind::Other,
        }
    }

    /// Whether this error reports an absent mask or analytics entry
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl fmt::Display for MaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaskError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            MaskError::NotFound(msg) => write!(f, "Not found: {}", msg),
            MaskError::BufferAllocation(msg) => write!(f, "Buffer allocation failed: {}", msg),
            MaskError::DspOperation(msg) => write!(f, "Blend operation failed: {}", msg),
            MaskError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            MaskError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for MaskError {}

impl From<serde_json::Error> for MaskError {
    fn from(e: serde_json::Error) -> Self {
        MaskError::Configuration(e.to_string())
    }
}

impl From<std::io::Error> for MaskError {
    fn from(e: std::io::Error) -> Self {
        MaskError::Other(format!("I/O error: {}", e))
    }
}
