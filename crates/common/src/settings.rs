//! Run settings resolution
//!
//! Each field is resolved independently with the precedence
//! explicit CLI value > environment variable > built-in default.
//! Environment values count only when they are non-blank after trimming.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Result, ValidationError};
use crate::types::{BrowserName, RetentionMode, Viewport};

pub const DEFAULT_BASE_URL: &str = "https://demo.playwright.dev/todomvc/";
pub const DEFAULT_ARTIFACTS_DIR: &str = "artifacts";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_LOCALE: &str = "en-US";
pub const DEFAULT_TIMEZONE_ID: &str = "UTC";

/// Environment variable names, one per setting
pub mod env {
    pub const BASE_URL: &str = "BASE_URL";
    pub const BROWSER: &str = "BROWSER";
    pub const HEADLESS: &str = "HEADLESS";
    pub const SLOWMO_MS: &str = "SLOWMO_MS";
    pub const VIEWPORT: &str = "VIEWPORT";
    pub const ARTIFACTS_DIR: &str = "ARTIFACTS_DIR";
    pub const TRACE: &str = "TRACE";
    pub const VIDEO: &str = "VIDEO";
    pub const SCREENSHOT: &str = "SCREENSHOT";
    pub const TIMEOUT_MS: &str = "TIMEOUT_MS";
    pub const LOCALE: &str = "LOCALE";
    pub const TIMEZONE_ID: &str = "TIMEZONE_ID";
    pub const METRICS_PATH: &str = "METRICS_PATH";
    pub const WORKER_ID: &str = "WORKER_ID";
    pub const GITHUB_SHA: &str = "GITHUB_SHA";
}

/// Immutable configuration shared by every case in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSettings {
    pub base_url: String,
    pub browser_name: BrowserName,
    pub headless: bool,
    pub slow_motion_ms: u64,
    pub viewport: Viewport,
    pub artifacts_dir: PathBuf,
    pub default_timeout_ms: u64,
    pub trace_mode: RetentionMode,
    pub video_mode: RetentionMode,
    pub screenshot_mode: RetentionMode,
    pub locale: String,
    pub timezone_id: String,
}

impl RunSettings {
    pub fn headed(&self) -> bool {
        !self.headless
    }
}

/// Values supplied on the command line; `None` means "not provided"
#[derive(Debug, Clone, Default)]
pub struct CliValues {
    pub base_url: Option<String>,
    pub browser: Option<String>,
    pub headless: Option<bool>,
    pub slow_motion_ms: Option<u64>,
    pub viewport: Option<String>,
    pub artifacts_dir: Option<PathBuf>,
    pub timeout_ms: Option<u64>,
    pub trace: Option<String>,
    pub video: Option<String>,
    pub screenshot: Option<String>,
    pub locale: Option<String>,
    pub timezone_id: Option<String>,
}

/// Built-in defaults, the last layer of resolution
#[derive(Debug, Clone)]
pub struct SettingsDefaults {
    pub base_url: String,
    pub browser_name: BrowserName,
    pub headless: bool,
    pub slow_motion_ms: u64,
    pub viewport: Viewport,
    pub artifacts_dir: PathBuf,
    pub default_timeout_ms: u64,
    pub trace_mode: RetentionMode,
    pub video_mode: RetentionMode,
    pub screenshot_mode: RetentionMode,
    pub locale: String,
    pub timezone_id: String,
}

impl Default for SettingsDefaults {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            browser_name: BrowserName::Chromium,
            headless: true,
            slow_motion_ms: 0,
            viewport: Viewport::default(),
            artifacts_dir: PathBuf::from(DEFAULT_ARTIFACTS_DIR),
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            trace_mode: RetentionMode::OnFailure,
            video_mode: RetentionMode::OnFailure,
            screenshot_mode: RetentionMode::OnFailure,
            locale: DEFAULT_LOCALE.to_string(),
            timezone_id: DEFAULT_TIMEZONE_ID.to_string(),
        }
    }
}

/// Environment lookup used during resolution
pub type EnvLookup = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Read a variable from the process environment
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Look up `name`, treating unset and blank values alike
pub fn env_value(lookup: &EnvLookup, name: &str) -> Option<String> {
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a boolean token (`1/true/yes/y/on`, `0/false/no/n/off`)
pub fn parse_bool(value: &str, field: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "no" | "n" | "off" => Ok(false),
        _ => Err(ValidationError::InvalidBoolean {
            field: field.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Parse a non-negative integer
pub fn parse_uint(value: &str, field: &str) -> Result<u64> {
    let trimmed = value.trim();
    let parsed: i64 = trimmed.parse().map_err(|_| ValidationError::InvalidInteger {
        field: field.to_string(),
        value: value.to_string(),
    })?;
    if parsed < 0 {
        return Err(ValidationError::NegativeInteger {
            field: field.to_string(),
            value: parsed,
        });
    }
    Ok(parsed as u64)
}

fn pick<T>(cli: Option<T>, env: Option<T>, default: T) -> T {
    cli.or(env).unwrap_or(default)
}

/// Merge CLI values, environment and defaults into one settings snapshot
pub fn resolve(
    cli: &CliValues,
    lookup: &EnvLookup,
    defaults: &SettingsDefaults,
) -> Result<RunSettings> {
    let base_url = pick(
        cli.base_url.clone(),
        env_value(lookup, env::BASE_URL),
        defaults.base_url.clone(),
    );

    let browser_name = match cli.browser.clone().or_else(|| env_value(lookup, env::BROWSER)) {
        Some(raw) => raw.parse::<BrowserName>()?,
        None => defaults.browser_name,
    };

    let headless = match (cli.headless, env_value(lookup, env::HEADLESS)) {
        (Some(v), _) => v,
        (None, Some(raw)) => parse_bool(&raw, env::HEADLESS)?,
        (None, None) => defaults.headless,
    };

    let slow_motion_ms = match (cli.slow_motion_ms, env_value(lookup, env::SLOWMO_MS)) {
        (Some(v), _) => v,
        (None, Some(raw)) => parse_uint(&raw, env::SLOWMO_MS)?,
        (None, None) => defaults.slow_motion_ms,
    };

    let viewport = match cli.viewport.clone().or_else(|| env_value(lookup, env::VIEWPORT)) {
        Some(raw) => Viewport::parse(&raw)?,
        None => defaults.viewport,
    };

    let artifacts_dir = pick(
        cli.artifacts_dir.clone(),
        env_value(lookup, env::ARTIFACTS_DIR).map(PathBuf::from),
        defaults.artifacts_dir.clone(),
    );

    let default_timeout_ms = match (cli.timeout_ms, env_value(lookup, env::TIMEOUT_MS)) {
        (Some(v), _) => v,
        (None, Some(raw)) => parse_uint(&raw, env::TIMEOUT_MS)?,
        (None, None) => defaults.default_timeout_ms,
    };

    let trace_mode = resolve_mode(
        cli.trace.as_deref(),
        lookup,
        env::TRACE,
        "trace",
        defaults.trace_mode,
    )?;
    let video_mode = resolve_mode(
        cli.video.as_deref(),
        lookup,
        env::VIDEO,
        "video",
        defaults.video_mode,
    )?;
    let screenshot_mode = resolve_mode(
        cli.screenshot.as_deref(),
        lookup,
        env::SCREENSHOT,
        "screenshot",
        defaults.screenshot_mode,
    )?;

    let locale = pick(
        cli.locale.clone(),
        env_value(lookup, env::LOCALE),
        defaults.locale.clone(),
    );
    let timezone_id = pick(
        cli.timezone_id.clone(),
        env_value(lookup, env::TIMEZONE_ID),
        defaults.timezone_id.clone(),
    );

    Ok(RunSettings {
        base_url,
        browser_name,
        headless,
        slow_motion_ms,
        viewport,
        artifacts_dir,
        default_timeout_ms,
        trace_mode,
        video_mode,
        screenshot_mode,
        locale,
        timezone_id,
    })
}

fn resolve_mode(
    cli: Option<&str>,
    lookup: &EnvLookup,
    var: &str,
    field: &str,
    default: RetentionMode,
) -> Result<RetentionMode> {
    match cli.map(str::to_string).or_else(|| env_value(lookup, var)) {
        Some(raw) => RetentionMode::parse(&raw, field),
        None => Ok(default),
    }
}

/// One run's view of its configuration.
///
/// Resolution happens at most once; every later call hands out the same
/// `Arc`, so fixtures, hooks and the reporter observe one snapshot.
pub struct RunContext {
    cli: CliValues,
    defaults: SettingsDefaults,
    lookup: Box<EnvLookup>,
    settings: OnceCell<Arc<RunSettings>>,
}

impl RunContext {
    /// Context backed by the process environment and built-in defaults
    pub fn new(cli: CliValues) -> Self {
        Self::with_env(cli, process_env)
    }

    /// Context with an injected environment lookup
    pub fn with_env<F>(cli: CliValues, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            cli,
            defaults: SettingsDefaults::default(),
            lookup: Box::new(lookup),
            settings: OnceCell::new(),
        }
    }

    pub fn with_defaults(mut self, defaults: SettingsDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Resolved settings, cached for the lifetime of this context
    pub fn settings(&self) -> Result<Arc<RunSettings>> {
        self.settings
            .get_or_try_init(|| -> Result<Arc<RunSettings>> {
                let settings = resolve(&self.cli, self.lookup.as_ref(), &self.defaults)?;
                debug!(
                    browser = %settings.browser_name,
                    base_url = %settings.base_url,
                    headless = settings.headless,
                    "Resolved run settings"
                );
                Ok(Arc::new(settings))
            })
            .cloned()
    }

    /// Non-blank environment value through this context's lookup
    pub fn env_var(&self, name: &str) -> Option<String> {
        env_value(self.lookup.as_ref(), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use test_case::test_case;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + Send + Sync + 'static {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn resolve_with(cli: &CliValues, pairs: &[(&str, &str)]) -> Result<RunSettings> {
        let lookup = env_of(pairs);
        resolve(cli, &lookup, &SettingsDefaults::default())
    }

    #[test]
    fn test_defaults_when_nothing_set() {
        let settings = resolve_with(&CliValues::default(), &[]).unwrap();
        assert_eq!(settings.base_url, DEFAULT_BASE_URL);
        assert_eq!(settings.browser_name, BrowserName::Chromium);
        assert!(settings.headless);
        assert_eq!(settings.slow_motion_ms, 0);
        assert_eq!(settings.viewport, Viewport { width: 1280, height: 720 });
        assert_eq!(settings.artifacts_dir, PathBuf::from("artifacts"));
        assert_eq!(settings.default_timeout_ms, 10_000);
        assert_eq!(settings.trace_mode, RetentionMode::OnFailure);
        assert_eq!(settings.video_mode, RetentionMode::OnFailure);
        assert_eq!(settings.screenshot_mode, RetentionMode::OnFailure);
        assert_eq!(settings.locale, "en-US");
        assert_eq!(settings.timezone_id, "UTC");
    }

    #[test]
    fn test_cli_beats_env_for_every_field() {
        let cli = CliValues {
            base_url: Some("http://cli.local/".into()),
            browser: Some("webkit".into()),
            headless: Some(false),
            slow_motion_ms: Some(25),
            viewport: Some("800x600".into()),
            artifacts_dir: Some(PathBuf::from("cli-artifacts")),
            timeout_ms: Some(5),
            trace: Some("on".into()),
            video: Some("off".into()),
            screenshot: Some("on".into()),
            locale: Some("de-DE".into()),
            timezone_id: Some("Europe/Berlin".into()),
        };
        let env = [
            ("BASE_URL", "http://env.local/"),
            ("BROWSER", "firefox"),
            ("HEADLESS", "true"),
            ("SLOWMO_MS", "99"),
            ("VIEWPORT", "1920x1080"),
            ("ARTIFACTS_DIR", "env-artifacts"),
            ("TIMEOUT_MS", "77"),
            ("TRACE", "off"),
            ("VIDEO", "on"),
            ("SCREENSHOT", "off"),
            ("LOCALE", "fr-FR"),
            ("TIMEZONE_ID", "Asia/Tokyo"),
        ];
        let s = resolve_with(&cli, &env).unwrap();
        assert_eq!(s.base_url, "http://cli.local/");
        assert_eq!(s.browser_name, BrowserName::Webkit);
        assert!(!s.headless);
        assert_eq!(s.slow_motion_ms, 25);
        assert_eq!(s.viewport, Viewport { width: 800, height: 600 });
        assert_eq!(s.artifacts_dir, PathBuf::from("cli-artifacts"));
        assert_eq!(s.default_timeout_ms, 5);
        assert_eq!(s.trace_mode, RetentionMode::Always);
        assert_eq!(s.video_mode, RetentionMode::Never);
        assert_eq!(s.screenshot_mode, RetentionMode::Always);
        assert_eq!(s.locale, "de-DE");
        assert_eq!(s.timezone_id, "Europe/Berlin");
    }

    #[test]
    fn test_env_used_when_cli_absent() {
        let env = [
            ("BASE_URL", "  http://env.local/  "),
            ("BROWSER", "Firefox"),
            ("HEADLESS", "no"),
            ("SLOWMO_MS", "99"),
            ("VIEWPORT", "1920x1080"),
            ("ARTIFACTS_DIR", "env-artifacts"),
            ("TIMEOUT_MS", "77"),
            ("TRACE", "off"),
            ("VIDEO", "on"),
            ("SCREENSHOT", "off"),
            ("LOCALE", "fr-FR"),
            ("TIMEZONE_ID", "Asia/Tokyo"),
        ];
        let s = resolve_with(&CliValues::default(), &env).unwrap();
        assert_eq!(s.base_url, "http://env.local/");
        assert_eq!(s.browser_name, BrowserName::Firefox);
        assert!(!s.headless);
        assert_eq!(s.slow_motion_ms, 99);
        assert_eq!(s.viewport, Viewport { width: 1920, height: 1080 });
        assert_eq!(s.artifacts_dir, PathBuf::from("env-artifacts"));
        assert_eq!(s.default_timeout_ms, 77);
        assert_eq!(s.trace_mode, RetentionMode::Never);
        assert_eq!(s.video_mode, RetentionMode::Always);
        assert_eq!(s.screenshot_mode, RetentionMode::Never);
        assert_eq!(s.locale, "fr-FR");
        assert_eq!(s.timezone_id, "Asia/Tokyo");
    }

    #[test]
    fn test_precedence_is_per_field() {
        let cli = CliValues {
            browser: Some("firefox".into()),
            ..Default::default()
        };
        let s = resolve_with(
            &cli,
            &[("BASE_URL", "http://env.local/"), ("BROWSER", "webkit")],
        )
        .unwrap();
        assert_eq!(s.browser_name, BrowserName::Firefox);
        assert_eq!(s.base_url, "http://env.local/");
        assert_eq!(s.locale, DEFAULT_LOCALE);
    }

    #[test]
    fn test_blank_env_falls_through_to_default() {
        let s = resolve_with(
            &CliValues::default(),
            &[("BROWSER", "   "), ("TIMEOUT_MS", ""), ("HEADLESS", "\t")],
        )
        .unwrap();
        assert_eq!(s.browser_name, BrowserName::Chromium);
        assert_eq!(s.default_timeout_ms, DEFAULT_TIMEOUT_MS);
        assert!(s.headless);
    }

    #[test_case("1", true)]
    #[test_case("TRUE", true)]
    #[test_case("yes", true)]
    #[test_case("Y", true)]
    #[test_case("on", true)]
    #[test_case("0", false)]
    #[test_case("False", false)]
    #[test_case("no", false)]
    #[test_case("n", false)]
    #[test_case("OFF", false)]
    fn test_parse_bool_tokens(raw: &str, expected: bool) {
        assert_eq!(parse_bool(raw, "HEADLESS").unwrap(), expected);
    }

    #[test]
    fn test_invalid_bool_fails() {
        let err = resolve_with(&CliValues::default(), &[("HEADLESS", "maybe")]).unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidBoolean {
                field: "HEADLESS".into(),
                value: "maybe".into()
            }
        );
    }

    #[test_case("SLOWMO_MS", "fast" ; "slowmo not numeric")]
    #[test_case("TIMEOUT_MS", "-1" ; "timeout negative")]
    #[test_case("TIMEOUT_MS", "1.5" ; "timeout fractional")]
    fn test_invalid_integer_fails(var: &str, raw: &str) {
        let err = resolve_with(&CliValues::default(), &[(var, raw)]).unwrap_err();
        assert_eq!(err.field(), var);
    }

    #[test]
    fn test_invalid_browser_and_mode_fail() {
        let err = resolve_with(&CliValues::default(), &[("BROWSER", "netscape")]).unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedBrowser { .. }));

        let cli = CliValues {
            video: Some("sometimes".into()),
            ..Default::default()
        };
        let err = resolve_with(&cli, &[]).unwrap_err();
        assert_eq!(err.field(), "video");
    }

    #[test]
    fn test_invalid_viewport_fails() {
        let err = resolve_with(&CliValues::default(), &[("VIEWPORT", "0x720")]).unwrap_err();
        assert!(matches!(err, ValidationError::ZeroViewport { .. }));
    }

    #[test]
    fn test_run_context_caches_one_instance() {
        let ctx = RunContext::with_env(CliValues::default(), env_of(&[("BROWSER", "webkit")]));
        let first = ctx.settings().unwrap();
        let second = ctx.settings().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*first, *second);
        assert_eq!(first.browser_name, BrowserName::Webkit);
    }

    #[test]
    fn test_run_context_does_not_cache_failures() {
        let ctx = RunContext::with_env(CliValues::default(), env_of(&[("VIEWPORT", "big")]));
        assert!(ctx.settings().is_err());
        assert!(ctx.settings().is_err());
    }

    #[test]
    fn test_custom_defaults() {
        let defaults = SettingsDefaults {
            locale: "nl-NL".into(),
            ..Default::default()
        };
        let ctx = RunContext::with_env(CliValues::default(), env_of(&[])).with_defaults(defaults);
        assert_eq!(ctx.settings().unwrap().locale, "nl-NL");
    }

    #[test]
    fn test_env_var_trims_and_filters_blank() {
        let ctx = RunContext::with_env(
            CliValues::default(),
            env_of(&[("METRICS_PATH", " /tmp/m.prom "), ("WORKER_ID", " ")]),
        );
        assert_eq!(ctx.env_var("METRICS_PATH").as_deref(), Some("/tmp/m.prom"));
        assert_eq!(ctx.env_var("WORKER_ID"), None);
    }
}
