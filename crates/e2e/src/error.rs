//! Error types for E2E testing

use std::path::PathBuf;
use thiserror::Error;

use crate::artifacts::{ArtifactKind, ArtifactState};

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Invalid settings: {0}")]
    Validation(#[from] qaui_common::ValidationError),

    #[error("Playwright not found. Install with: npx playwright install")]
    PlaywrightNotFound,

    #[error("Playwright error: {0}")]
    Playwright(String),

    #[error("Test spec parse error: {0}")]
    SpecParse(String),

    #[error("Step failed: {step} - {reason}")]
    StepFailed { step: String, reason: String },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Invalid artifact state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: ArtifactState,
        to: ArtifactState,
    },

    #[error("Unknown test case: {0}")]
    UnknownCase(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl E2eError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, E2eError::Timeout(_))
    }
}

pub type E2eResult<T> = Result<T, E2eError>;

/// A diagnostic capture that could not be written.
///
/// Logged and dropped; never fails the case.
#[derive(Error, Debug)]
#[error("{kind} capture failed: {source}")]
pub struct CaptureError {
    pub kind: ArtifactKind,
    #[source]
    pub source: E2eError,
}

/// A stale artifact or empty directory that could not be removed.
///
/// Logged and dropped; never propagated.
#[derive(Error, Debug)]
#[error("cleanup of {} failed: {source}", path.display())]
pub struct CleanupError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}
