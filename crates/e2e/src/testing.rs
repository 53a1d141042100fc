//! Scripted in-memory browser for deterministic harness tests.
//!
//! [`MockBrowser`] is a [`SessionFactory`] whose sessions record every call
//! and write small placeholder files where a real browser would write
//! screenshots, traces and videos.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use qaui_common::RunSettings;

use crate::driver::{BrowserSession, Expectation, PageDiagnostics, SessionFactory};
use crate::error::{E2eError, E2eResult};

/// Shared, cloneable handle to the scripted browser
#[derive(Debug, Clone, Default)]
pub struct MockBrowser {
    state: Arc<Mutex<MockState>>,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<String>,
    sessions_opened: usize,
    fail_open: bool,
    goto_timeouts: usize,
    failing_selectors: HashSet<String>,
    flaky_selectors: HashMap<String, usize>,
    counts: HashMap<String, usize>,
    texts: HashMap<String, String>,
    checked: HashSet<String>,
    url: String,
    screenshot_fails: bool,
    trace_fails: bool,
    diagnostics: PageDiagnostics,
}

impl MockBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `open` fail, as if the browser could not launch
    pub fn fail_open(self) -> Self {
        self.state.lock().fail_open = true;
        self
    }

    /// The next `n` navigations time out
    pub fn goto_timeouts(self, n: usize) -> Self {
        self.state.lock().goto_timeouts = n;
        self
    }

    /// Any interaction or assertion on `selector` fails
    pub fn failing_selector(self, selector: &str) -> Self {
        self.state.lock().failing_selectors.insert(selector.to_string());
        self
    }

    /// Assertions on `selector` fail `times` times, then pass
    pub fn flaky_selector(self, selector: &str, times: usize) -> Self {
        self.state
            .lock()
            .flaky_selectors
            .insert(selector.to_string(), times);
        self
    }

    pub fn with_count(self, selector: &str, count: usize) -> Self {
        self.state.lock().counts.insert(selector.to_string(), count);
        self
    }

    pub fn with_text(self, selector: &str, text: &str) -> Self {
        self.state
            .lock()
            .texts
            .insert(selector.to_string(), text.to_string());
        self
    }

    pub fn with_checked(self, selector: &str) -> Self {
        self.state.lock().checked.insert(selector.to_string());
        self
    }

    pub fn screenshot_fails(self) -> Self {
        self.state.lock().screenshot_fails = true;
        self
    }

    pub fn trace_fails(self) -> Self {
        self.state.lock().trace_fails = true;
        self
    }

    pub fn with_diagnostics(self, console_errors: &[&str], page_errors: &[&str]) -> Self {
        self.state.lock().diagnostics = PageDiagnostics {
            console_errors: console_errors.iter().map(|s| s.to_string()).collect(),
            page_errors: page_errors.iter().map(|s| s.to_string()).collect(),
        };
        self
    }

    /// Every call made so far, formatted as `op:arg`
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn sessions_opened(&self) -> usize {
        self.state.lock().sessions_opened
    }

    /// Open a session directly, bypassing settings
    pub fn session(&self, case_dir: &Path, record_video: bool) -> MockSession {
        let video = record_video.then(|| case_dir.join("video.webm"));
        if let Some(path) = &video {
            let _ = std::fs::write(path, b"webm");
        }
        self.state.lock().sessions_opened += 1;
        MockSession {
            browser: self.clone(),
            video,
        }
    }

    fn record(&self, call: String) {
        self.state.lock().calls.push(call);
    }

    fn check_selector(&self, selector: &str) -> E2eResult<()> {
        let mut state = self.state.lock();
        if state.failing_selectors.contains(selector) {
            return Err(E2eError::AssertionFailed(format!("{} did not match", selector)));
        }
        if let Some(remaining) = state.flaky_selectors.get_mut(selector) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(E2eError::AssertionFailed(format!("{} flaked", selector)));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SessionFactory for MockBrowser {
    async fn open(
        &self,
        settings: &RunSettings,
        case_dir: &Path,
    ) -> E2eResult<Box<dyn BrowserSession>> {
        if self.state.lock().fail_open {
            return Err(E2eError::Playwright("browser failed to launch".into()));
        }
        Ok(Box::new(
            self.session(case_dir, settings.video_mode.is_enabled()),
        ))
    }
}

/// One scripted page
#[derive(Debug)]
pub struct MockSession {
    browser: MockBrowser,
    video: Option<PathBuf>,
}

#[async_trait]
impl BrowserSession for MockSession {
    async fn goto(&mut self, url: &str, _timeout_ms: u64) -> E2eResult<()> {
        self.browser.record(format!("goto:{}", url));
        let mut state = self.browser.state.lock();
        if state.goto_timeouts > 0 {
            state.goto_timeouts -= 1;
            return Err(E2eError::Timeout(format!("navigation to {}", url)));
        }
        state.url = url.to_string();
        Ok(())
    }

    async fn reload(&mut self) -> E2eResult<()> {
        self.browser.record("reload".into());
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> E2eResult<()> {
        self.browser.record(format!("click:{}", selector));
        self.browser.check_selector(selector)
    }

    async fn dblclick(&mut self, selector: &str) -> E2eResult<()> {
        self.browser.record(format!("dblclick:{}", selector));
        self.browser.check_selector(selector)
    }

    async fn fill(&mut self, selector: &str, value: &str) -> E2eResult<()> {
        self.browser.record(format!("fill:{}={}", selector, value));
        self.browser.check_selector(selector)
    }

    async fn press(&mut self, selector: &str, key: &str) -> E2eResult<()> {
        self.browser.record(format!("press:{}={}", selector, key));
        self.browser.check_selector(selector)
    }

    async fn check(&mut self, selector: &str) -> E2eResult<()> {
        self.browser.record(format!("check:{}", selector));
        self.browser.check_selector(selector)?;
        self.browser.state.lock().checked.insert(selector.to_string());
        Ok(())
    }

    async fn uncheck(&mut self, selector: &str) -> E2eResult<()> {
        self.browser.record(format!("uncheck:{}", selector));
        self.browser.check_selector(selector)?;
        self.browser.state.lock().checked.remove(selector);
        Ok(())
    }

    async fn hover(&mut self, selector: &str) -> E2eResult<()> {
        self.browser.record(format!("hover:{}", selector));
        self.browser.check_selector(selector)
    }

    async fn expect(
        &mut self,
        selector: &str,
        expectation: &Expectation,
        _timeout_ms: u64,
    ) -> E2eResult<()> {
        self.browser.record(format!("expect:{}", selector));
        self.browser.check_selector(selector)?;

        let state = self.browser.state.lock();
        if let Some(expected) = expectation.count {
            let actual = state.counts.get(selector).copied().unwrap_or(0);
            if actual != expected {
                return Err(E2eError::AssertionFailed(format!(
                    "{}: expected count {}, got {}",
                    selector, expected, actual
                )));
            }
        }
        if let Some(expected) = &expectation.text {
            let actual = state.texts.get(selector).cloned().unwrap_or_default();
            if &actual != expected {
                return Err(E2eError::AssertionFailed(format!(
                    "{}: expected text {:?}, got {:?}",
                    selector, expected, actual
                )));
            }
        }
        if let Some(expected) = expectation.checked {
            if state.checked.contains(selector) != expected {
                return Err(E2eError::AssertionFailed(format!(
                    "{}: expected checked={}",
                    selector, expected
                )));
            }
        }
        Ok(())
    }

    async fn expect_url_suffix(&mut self, suffix: &str, _timeout_ms: u64) -> E2eResult<()> {
        self.browser.record(format!("expect_url:{}", suffix));
        let url = self.browser.state.lock().url.clone();
        if url.ends_with(suffix) {
            Ok(())
        } else {
            Err(E2eError::AssertionFailed(format!(
                "url {:?} does not end with {:?}",
                url, suffix
            )))
        }
    }

    async fn count(&mut self, selector: &str) -> E2eResult<usize> {
        Ok(self.browser.state.lock().counts.get(selector).copied().unwrap_or(0))
    }

    async fn inner_text(&mut self, selector: &str) -> E2eResult<String> {
        Ok(self
            .browser
            .state
            .lock()
            .texts
            .get(selector)
            .cloned()
            .unwrap_or_default())
    }

    async fn is_checked(&mut self, selector: &str) -> E2eResult<bool> {
        Ok(self.browser.state.lock().checked.contains(selector))
    }

    async fn url(&mut self) -> E2eResult<String> {
        Ok(self.browser.state.lock().url.clone())
    }

    async fn screenshot(&mut self, path: &Path) -> E2eResult<()> {
        self.browser.record("screenshot".into());
        if self.browser.state.lock().screenshot_fails {
            return Err(E2eError::Playwright("screenshot target closed".into()));
        }
        std::fs::write(path, b"png")?;
        Ok(())
    }

    async fn stop_tracing(&mut self, path: Option<&Path>) -> E2eResult<()> {
        self.browser.record(format!("stop_tracing:{}", path.is_some()));
        if self.browser.state.lock().trace_fails {
            return Err(E2eError::Playwright("tracing was not started".into()));
        }
        if let Some(path) = path {
            std::fs::write(path, b"zip")?;
        }
        Ok(())
    }

    async fn video_path(&mut self) -> E2eResult<Option<PathBuf>> {
        Ok(self.video.clone())
    }

    async fn diagnostics(&mut self) -> E2eResult<PageDiagnostics> {
        Ok(self.browser.state.lock().diagnostics.clone())
    }

    async fn close(&mut self) -> E2eResult<()> {
        self.browser.record("close".into());
        Ok(())
    }
}
