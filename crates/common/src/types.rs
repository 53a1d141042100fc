//! Core types for qaui run settings

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, ValidationError};

/// Browser engine driven by the harness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserName {
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserName {
    pub const ALL: [BrowserName; 3] = [
        BrowserName::Chromium,
        BrowserName::Firefox,
        BrowserName::Webkit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserName::Chromium => "chromium",
            BrowserName::Firefox => "firefox",
            BrowserName::Webkit => "webkit",
        }
    }
}

impl Default for BrowserName {
    fn default() -> Self {
        Self::Chromium
    }
}

impl fmt::Display for BrowserName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BrowserName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        BrowserName::ALL
            .into_iter()
            .find(|b| b.as_str() == normalized)
            .ok_or(ValidationError::UnsupportedBrowser {
                value: normalized,
            })
    }
}

/// Retention policy for a captured diagnostic artifact.
///
/// Spelled `on`, `off` and `on-failure` on the command line and in the
/// environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetentionMode {
    #[serde(rename = "on")]
    Always,
    #[serde(rename = "off")]
    Never,
    #[serde(rename = "on-failure")]
    OnFailure,
}

impl RetentionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionMode::Always => "on",
            RetentionMode::Never => "off",
            RetentionMode::OnFailure => "on-failure",
        }
    }

    /// Whether an artifact captured under this mode survives the case
    pub fn should_persist(self, failed: bool) -> bool {
        match self {
            RetentionMode::Always => true,
            RetentionMode::Never => false,
            RetentionMode::OnFailure => failed,
        }
    }

    /// Whether the browser should record this kind of artifact at all
    pub fn is_enabled(self) -> bool {
        self != RetentionMode::Never
    }

    /// Parse a mode string, naming `field` in the error
    pub fn parse(value: &str, field: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "on" => Ok(RetentionMode::Always),
            "off" => Ok(RetentionMode::Never),
            "on-failure" => Ok(RetentionMode::OnFailure),
            _ => Err(ValidationError::InvalidMode {
                field: field.to_string(),
                value: value.to_string(),
            }),
        }
    }
}

impl Default for RetentionMode {
    fn default() -> Self {
        Self::OnFailure
    }
}

impl fmt::Display for RetentionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Browser viewport dimensions, both strictly positive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /// Parse a `WIDTHxHEIGHT` string (case-insensitive separator)
    pub fn parse(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        let (width_str, height_str) =
            normalized
                .split_once('x')
                .ok_or_else(|| ValidationError::InvalidViewport {
                    value: value.to_string(),
                })?;

        let width = parse_dimension(width_str, "viewport width")?;
        let height = parse_dimension(height_str, "viewport height")?;
        if width == 0 || height == 0 {
            return Err(ValidationError::ZeroViewport {
                value: value.to_string(),
            });
        }

        Ok(Self { width, height })
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Viewport {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn parse_dimension(raw: &str, field: &str) -> Result<u32> {
    let value = crate::settings::parse_uint(raw, field)?;
    u32::try_from(value).map_err(|_| ValidationError::InvalidInteger {
        field: field.to_string(),
        value: raw.to_string(),
    })
}
