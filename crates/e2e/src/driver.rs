//! Browser session seam
//!
//! The harness never talks to a browser directly. Everything it needs, from
//! clicking a selector to saving a trace, goes through [`BrowserSession`], so
//! the lifecycle code can be exercised against an in-memory fake.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use qaui_common::RunSettings;

use crate::error::E2eResult;

/// What a waiting assertion expects of a locator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expectation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
}

impl Expectation {
    pub fn visible() -> Self {
        Self {
            visible: Some(true),
            ..Default::default()
        }
    }

    pub fn count(count: usize) -> Self {
        Self {
            count: Some(count),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_none()
            && self.text.is_none()
            && self.count.is_none()
            && self.checked.is_none()
    }
}

/// Console and uncaught page errors observed during a case
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDiagnostics {
    #[serde(default)]
    pub console_errors: Vec<String>,
    #[serde(default)]
    pub page_errors: Vec<String>,
}

impl PageDiagnostics {
    pub fn is_empty(&self) -> bool {
        self.console_errors.is_empty() && self.page_errors.is_empty()
    }

    /// One line per error, tagged by origin
    pub fn lines(&self) -> Vec<String> {
        self.console_errors
            .iter()
            .map(|msg| format!("[console] {}", msg))
            .chain(self.page_errors.iter().map(|msg| format!("[pageerror] {}", msg)))
            .collect()
    }
}

/// One open page inside an isolated browser context
#[async_trait]
pub trait BrowserSession: Send {
    async fn goto(&mut self, url: &str, timeout_ms: u64) -> E2eResult<()>;
    async fn reload(&mut self) -> E2eResult<()>;

    async fn click(&mut self, selector: &str) -> E2eResult<()>;
    async fn dblclick(&mut self, selector: &str) -> E2eResult<()>;
    async fn fill(&mut self, selector: &str, value: &str) -> E2eResult<()>;
    async fn press(&mut self, selector: &str, key: &str) -> E2eResult<()>;
    async fn check(&mut self, selector: &str) -> E2eResult<()>;
    async fn uncheck(&mut self, selector: &str) -> E2eResult<()>;
    async fn hover(&mut self, selector: &str) -> E2eResult<()>;

    /// Wait until `selector` satisfies `expectation` or `timeout_ms` elapses
    async fn expect(
        &mut self,
        selector: &str,
        expectation: &Expectation,
        timeout_ms: u64,
    ) -> E2eResult<()>;

    /// Wait until the page URL ends with `suffix`
    async fn expect_url_suffix(&mut self, suffix: &str, timeout_ms: u64) -> E2eResult<()>;

    async fn count(&mut self, selector: &str) -> E2eResult<usize>;
    async fn inner_text(&mut self, selector: &str) -> E2eResult<String>;
    async fn is_checked(&mut self, selector: &str) -> E2eResult<bool>;
    async fn url(&mut self) -> E2eResult<String>;

    /// Full-page screenshot written to `path`
    async fn screenshot(&mut self, path: &Path) -> E2eResult<()>;

    /// Stop the tracing session, saving it to `path` when given.
    ///
    /// Must be called whenever tracing was started, even if the trace is
    /// not kept.
    async fn stop_tracing(&mut self, path: Option<&Path>) -> E2eResult<()>;

    /// Where the browser is recording video for this page, if it is
    async fn video_path(&mut self) -> E2eResult<Option<PathBuf>>;

    async fn diagnostics(&mut self) -> E2eResult<PageDiagnostics>;

    /// Close the context; video files are only complete after this
    async fn close(&mut self) -> E2eResult<()>;
}

/// Opens one session per case
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(
        &self,
        settings: &RunSettings,
        case_dir: &Path,
    ) -> E2eResult<Box<dyn BrowserSession>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_lines_tag_origin() {
        let diag = PageDiagnostics {
            console_errors: vec!["boom".into()],
            page_errors: vec!["ReferenceError: x".into()],
        };
        assert_eq!(
            diag.lines(),
            vec!["[console] boom".to_string(), "[pageerror] ReferenceError: x".to_string()]
        );
        assert!(PageDiagnostics::default().is_empty());
    }

    #[test]
    fn test_expectation_serializes_only_set_fields() {
        let json = serde_json::to_value(Expectation::count(2)).unwrap();
        assert_eq!(json, serde_json::json!({ "count": 2 }));
        assert!(Expectation::default().is_empty());
    }
}
