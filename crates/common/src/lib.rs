//! qaui Common Library
//!
//! Run settings, retention modes and configuration validation shared by the
//! qaui browser test harness.

pub mod error;
pub mod settings;
pub mod types;

pub use error::{Result, ValidationError};
pub use settings::{resolve, CliValues, RunContext, RunSettings, SettingsDefaults};
pub use types::*;

/// qaui version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
