//! Base page helper shared by every page a case drives

use tracing::warn;

use qaui_common::RunSettings;

use crate::driver::{BrowserSession, Expectation};
use crate::error::E2eResult;

/// Navigation and waiting bound to one session and the run's settings
pub struct BasePage<'a> {
    session: &'a mut (dyn BrowserSession + 'a),
    base_url: &'a str,
    timeout_ms: u64,
}

impl<'a> BasePage<'a> {
    pub fn new(session: &'a mut (dyn BrowserSession + 'a), settings: &'a RunSettings) -> Self {
        Self {
            session,
            base_url: &settings.base_url,
            timeout_ms: settings.default_timeout_ms,
        }
    }

    /// `path` joined onto the base URL; absolute URLs pass through
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            format!("{}/", base)
        } else {
            format!("{}/{}", base, path)
        }
    }

    /// Navigate, retrying once if the first attempt times out
    pub async fn goto(&mut self, path: &str) -> E2eResult<()> {
        let url = self.url_for(path);
        match self.session.goto(&url, self.timeout_ms).await {
            Err(e) if e.is_timeout() => {
                warn!(url = %url, "Navigation timed out, retrying once");
                self.session.goto(&url, self.timeout_ms).await
            }
            other => other,
        }
    }

    pub async fn expect_visible(&mut self, selector: &str) -> E2eResult<()> {
        self.session
            .expect(selector, &Expectation::visible(), self.timeout_ms)
            .await
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn session(&mut self) -> &mut (dyn BrowserSession + 'a) {
        &mut *self.session
    }
}
