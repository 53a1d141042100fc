//! Error types for qaui settings resolution

use thiserror::Error;

/// Result type alias using the settings validation error
pub type Result<T> = std::result::Result<T, ValidationError>;

/// Configuration errors surfaced while resolving run settings.
///
/// All of these are fatal at resolution time: a run with invalid settings
/// never starts a single case.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unsupported browser {value:?}; expected one of [chromium, firefox, webkit]")]
    UnsupportedBrowser { value: String },

    #[error("Invalid {field} mode {value:?}; expected one of [off, on, on-failure]")]
    InvalidMode { field: String, value: String },

    #[error("Viewport must be WIDTHxHEIGHT, got {value:?}")]
    InvalidViewport { value: String },

    #[error("Viewport dimensions must be > 0, got {value:?}")]
    ZeroViewport { value: String },

    #[error("Invalid integer for {field}: {value:?}")]
    InvalidInteger { field: String, value: String },

    #[error("{field} must be >= 0, got {value}")]
    NegativeInteger { field: String, value: i64 },

    #[error("Invalid boolean for {field}: {value:?}")]
    InvalidBoolean { field: String, value: String },
}

impl ValidationError {
    /// Name of the setting that failed validation
    pub fn field(&self) -> &str {
        match self {
            ValidationError::UnsupportedBrowser { .. } => "browser",
            ValidationError::InvalidMode { field, .. } => field,
            ValidationError::InvalidViewport { .. } | ValidationError::ZeroViewport { .. } => {
                "viewport"
            }
            ValidationError::InvalidInteger { field, .. } => field,
            ValidationError::NegativeInteger { field, .. } => field,
            ValidationError::InvalidBoolean { field, .. } => field,
        }
    }
}
