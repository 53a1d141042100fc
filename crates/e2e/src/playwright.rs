//! Playwright-backed browser sessions
//!
//! Each session is a `node` process running a generated driver script. The
//! script launches the browser from the run settings, then serves one JSON
//! request per stdin line and answers with one JSON response per stdout
//! line, matched by `id`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tracing::{debug, warn};

use async_trait::async_trait;
use qaui_common::{RunSettings, Viewport};

use crate::driver::{BrowserSession, Expectation, PageDiagnostics, SessionFactory};
use crate::error::{E2eError, E2eResult};

/// How long the browser may take to launch
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Slack on top of the in-page timeout before the driver itself is presumed hung
const RESPONSE_GRACE: Duration = Duration::from_secs(5);

/// Time allowed for the driver to exit after SIGTERM
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

const DRIVER_TEMPLATE: &str = r#"
const path = require('path');
const readline = require('readline');
const { createRequire } = require('module');
const playwright = createRequire(path.join(process.cwd(), 'package.json'))('playwright');

const CONFIG = __CONFIG__;

function send(message) {
  process.stdout.write(JSON.stringify(message) + '\n');
}

function failure(id, error) {
  const kind = error && error.name === 'TimeoutError'
    ? 'timeout'
    : (error && error.assertion ? 'assertion' : 'error');
  send({ id, ok: false, kind, error: String((error && error.message) || error) });
}

function assertionError(message) {
  const error = new Error(message);
  error.assertion = true;
  return error;
}

async function poll(timeout, check) {
  const deadline = Date.now() + timeout;
  for (;;) {
    const problem = await check();
    if (!problem) return;
    if (Date.now() >= deadline) throw assertionError(problem);
    await new Promise((resolve) => setTimeout(resolve, 100));
  }
}

(async () => {
  let browser;
  let context;
  let page;
  const consoleErrors = [];
  const pageErrors = [];

  try {
    browser = await playwright[CONFIG.browser].launch({ headless: CONFIG.headless, slowMo: CONFIG.slowMo });
    const options = { viewport: CONFIG.viewport, locale: CONFIG.locale, timezoneId: CONFIG.timezoneId };
    if (CONFIG.videoDir) options.recordVideo = { dir: CONFIG.videoDir, size: CONFIG.viewport };
    context = await browser.newContext(options);
    context.setDefaultTimeout(CONFIG.timeout);
    context.setDefaultNavigationTimeout(CONFIG.timeout);
    if (CONFIG.trace) await context.tracing.start({ screenshots: true, snapshots: true, sources: true });
    page = await context.newPage();
    page.on('console', (msg) => { if (msg.type() === 'error') consoleErrors.push(msg.text()); });
    page.on('pageerror', (err) => pageErrors.push(String(err)));
    send({ id: 0, ok: true, value: 'ready' });
  } catch (error) {
    failure(0, error);
    if (browser) await browser.close().catch(() => {});
    process.exit(1);
  }

  const loc = (selector) => page.locator(selector);
  const handlers = {
    goto: (r) => page.goto(r.url, { timeout: r.timeout }).then(() => null),
    reload: () => page.reload().then(() => null),
    click: (r) => loc(r.selector).click(),
    dblclick: (r) => loc(r.selector).dblclick(),
    fill: (r) => loc(r.selector).fill(r.value),
    press: (r) => loc(r.selector).press(r.key),
    check: (r) => loc(r.selector).check(),
    uncheck: (r) => loc(r.selector).uncheck(),
    hover: (r) => loc(r.selector).hover(),
    expect: async (r) => {
      const e = r.expectation;
      if (e.visible !== undefined) {
        await loc(r.selector).first().waitFor({ state: e.visible ? 'visible' : 'hidden', timeout: r.timeout });
      }
      if (e.count !== undefined) {
        await poll(r.timeout, async () => {
          const n = await loc(r.selector).count();
          return n === e.count ? null : `${r.selector}: expected count ${e.count}, got ${n}`;
        });
      }
      if (e.text !== undefined) {
        await poll(r.timeout, async () => {
          const texts = await loc(r.selector).allInnerTexts();
          const actual = texts.length ? texts[0].trim() : null;
          return actual === e.text ? null : `${r.selector}: expected text ${JSON.stringify(e.text)}, got ${JSON.stringify(actual)}`;
        });
      }
      if (e.checked !== undefined) {
        await poll(r.timeout, async () => {
          if ((await loc(r.selector).count()) === 0) return `${r.selector}: no element`;
          const actual = await loc(r.selector).first().isChecked();
          return actual === e.checked ? null : `${r.selector}: expected checked=${e.checked}`;
        });
      }
    },
    expect_url: (r) => poll(r.timeout, async () => {
      const url = page.url();
      return url.endsWith(r.suffix) ? null : `url ${JSON.stringify(url)} does not end with ${JSON.stringify(r.suffix)}`;
    }),
    count: (r) => loc(r.selector).count(),
    inner_text: (r) => loc(r.selector).first().innerText(),
    is_checked: (r) => loc(r.selector).first().isChecked(),
    url: () => page.url(),
    screenshot: (r) => page.screenshot({ path: r.path, fullPage: true }).then(() => null),
    stop_tracing: (r) => context.tracing.stop(r.path ? { path: r.path } : {}),
    video_path: () => (page.video() ? page.video().path() : null),
    diagnostics: () => ({ console_errors: consoleErrors, page_errors: pageErrors }),
    close: async () => {
      await context.close();
      await browser.close();
    },
  };

  const rl = readline.createInterface({ input: process.stdin });
  for await (const line of rl) {
    if (!line.trim()) continue;
    const request = JSON.parse(line);
    try {
      const handler = handlers[request.op];
      if (!handler) throw new Error(`unknown op ${request.op}`);
      const value = await handler(request);
      send({ id: request.id, ok: true, value: value === undefined ? null : value });
    } catch (error) {
      failure(request.id, error);
    }
    if (request.op === 'close') process.exit(0);
  }
  if (browser) await browser.close().catch(() => {});
})();
"#;

/// Launch parameters embedded into the driver script
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverConfig {
    pub browser: String,
    pub headless: bool,
    pub slow_mo: u64,
    pub viewport: Viewport,
    pub locale: String,
    pub timezone_id: String,
    pub timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_dir: Option<PathBuf>,
    pub trace: bool,
}

impl DriverConfig {
    pub fn from_settings(settings: &RunSettings, case_dir: &Path) -> Self {
        Self {
            browser: settings.browser_name.to_string(),
            headless: settings.headless,
            slow_mo: settings.slow_motion_ms,
            viewport: settings.viewport,
            locale: settings.locale.clone(),
            timezone_id: settings.timezone_id.clone(),
            timeout: settings.default_timeout_ms,
            video_dir: settings
                .video_mode
                .is_enabled()
                .then(|| case_dir.to_path_buf()),
            trace: settings.trace_mode.is_enabled(),
        }
    }
}

/// Render the driver script for one session
pub fn build_script(config: &DriverConfig) -> E2eResult<String> {
    let config = serde_json::to_string(config)?;
    Ok(DRIVER_TEMPLATE.replace("__CONFIG__", &config))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum FailureKind {
    Timeout,
    Assertion,
    Error,
}

#[derive(Debug, Deserialize)]
struct DriverResponse {
    id: u64,
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    kind: Option<FailureKind>,
    #[serde(default)]
    error: Option<String>,
}

impl DriverResponse {
    fn into_result(self, op: &str) -> E2eResult<Value> {
        if self.ok {
            return Ok(self.value);
        }
        let message = self.error.unwrap_or_else(|| format!("{} failed", op));
        Err(match self.kind.unwrap_or(FailureKind::Error) {
            FailureKind::Timeout => E2eError::Timeout(message),
            FailureKind::Assertion => E2eError::AssertionFailed(message),
            FailureKind::Error => E2eError::Playwright(message),
        })
    }
}

/// Opens [`PlaywrightSession`]s through `node`
#[derive(Debug, Clone)]
pub struct PlaywrightLauncher {
    node: PathBuf,
    working_dir: PathBuf,
}

impl PlaywrightLauncher {
    /// Launcher resolving `playwright` from the current directory
    pub fn new() -> Self {
        Self {
            node: PathBuf::from("node"),
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    pub fn with_node(mut self, node: impl Into<PathBuf>) -> Self {
        self.node = node.into();
        self
    }

    /// Directory whose `node_modules` provides `playwright`
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Check if Playwright is installed
    pub fn check_playwright_installed(&self) -> E2eResult<()> {
        let status = Command::new("npx")
            .args(["playwright", "--version"])
            .current_dir(&self.working_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }
}

impl Default for PlaywrightLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionFactory for PlaywrightLauncher {
    async fn open(
        &self,
        settings: &RunSettings,
        case_dir: &Path,
    ) -> E2eResult<Box<dyn BrowserSession>> {
        let config = DriverConfig::from_settings(settings, case_dir);
        let script = build_script(&config)?;

        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("driver.js");
        std::fs::write(&script_path, script)?;

        debug!(
            script = %script_path.display(),
            browser = %config.browser,
            "Starting Playwright driver"
        );

        let mut command = TokioCommand::new(&self.node);
        command.arg(&script_path).current_dir(&self.working_dir);

        let mut session =
            PlaywrightSession::spawn(command, script_dir, settings.default_timeout_ms)?;
        match session.handshake(LAUNCH_TIMEOUT).await {
            Ok(()) => Ok(Box::new(session)),
            Err(e) => {
                session.shutdown().await;
                Err(e)
            }
        }
    }
}

/// One browser context and page owned by a driver process
pub struct PlaywrightSession {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
    timeout_ms: u64,
    response_grace: Duration,
    closed: bool,
    _script_dir: tempfile::TempDir,
}

impl PlaywrightSession {
    /// Start the driver process; `script_dir` lives as long as the session
    fn spawn(
        mut command: TokioCommand,
        script_dir: tempfile::TempDir,
        timeout_ms: u64,
    ) -> E2eResult<Self> {
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| E2eError::Playwright("driver stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::Playwright("driver stdout unavailable".into()))?;

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: 1,
            timeout_ms,
            response_grace: RESPONSE_GRACE,
            closed: false,
            _script_dir: script_dir,
        })
    }

    /// Wait for the driver's `id: 0` ready line
    async fn handshake(&mut self, wait: Duration) -> E2eResult<()> {
        self.read_response(0, Some(wait)).await.map(|_| ())
    }

    /// How long to wait for an answer to a request carrying `timeout_ms`.
    ///
    /// `0` disables the in-page timeout, so there is no deadline either.
    fn response_deadline(&self, timeout_ms: u64) -> Option<Duration> {
        (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms) + self.response_grace)
    }

    async fn call(&mut self, op: &str, args: Value) -> E2eResult<Value> {
        let timeout_ms = self.timeout_ms;
        self.call_with_timeout(op, args, timeout_ms).await
    }

    async fn call_with_timeout(
        &mut self,
        op: &str,
        args: Value,
        timeout_ms: u64,
    ) -> E2eResult<Value> {
        let id = self.next_id;
        self.next_id += 1;

        let mut request = match args {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        request.insert("id".into(), json!(id));
        request.insert("op".into(), json!(op));

        let mut line = serde_json::to_string(&request)?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        let wait = self.response_deadline(timeout_ms);
        self.read_response(id, wait).await?.into_result(op)
    }

    async fn read_response(
        &mut self,
        id: u64,
        wait: Option<Duration>,
    ) -> E2eResult<DriverResponse> {
        let response = match wait {
            Some(wait) => tokio::time::timeout(wait, self.next_response(id))
                .await
                .map_err(|_| E2eError::Timeout(format!("driver response {}", id)))??,
            None => self.next_response(id).await?,
        };

        if id == 0 && !response.ok {
            // Launch failures arrive as the handshake response
            return Err(response
                .into_result("launch")
                .err()
                .unwrap_or_else(|| E2eError::Playwright("launch failed".into())));
        }
        Ok(response)
    }

    async fn next_response(&mut self, id: u64) -> E2eResult<DriverResponse> {
        loop {
            let line = self
                .stdout
                .next_line()
                .await?
                .ok_or_else(|| E2eError::Playwright("driver exited".into()))?;
            match serde_json::from_str::<DriverResponse>(&line) {
                Ok(response) if response.id == id => return Ok(response),
                Ok(response) => {
                    debug!(expected = id, got = response.id, "Discarding stale driver response")
                }
                Err(_) => debug!(line = %line, "Driver output"),
            }
        }
    }

    async fn call_unit(&mut self, op: &str, args: Value) -> E2eResult<()> {
        self.call(op, args).await.map(|_| ())
    }

    async fn call_unit_with_timeout(
        &mut self,
        op: &str,
        args: Value,
        timeout_ms: u64,
    ) -> E2eResult<()> {
        self.call_with_timeout(op, args, timeout_ms)
            .await
            .map(|_| ())
    }

    /// SIGTERM the driver, then kill it if it lingers
    async fn shutdown(&mut self) {
        self.closed = true;
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = self.child.id() {
                if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
                    && tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await.is_ok()
                {
                    return;
                }
            }
        }

        let _ = self.child.kill().await;
    }
}

#[async_trait]
impl BrowserSession for PlaywrightSession {
    async fn goto(&mut self, url: &str, timeout_ms: u64) -> E2eResult<()> {
        self.call_unit_with_timeout(
            "goto",
            json!({ "url": url, "timeout": timeout_ms }),
            timeout_ms,
        )
        .await
    }

    async fn reload(&mut self) -> E2eResult<()> {
        self.call_unit("reload", json!({})).await
    }

    async fn click(&mut self, selector: &str) -> E2eResult<()> {
        self.call_unit("click", json!({ "selector": selector })).await
    }

    async fn dblclick(&mut self, selector: &str) -> E2eResult<()> {
        self.call_unit("dblclick", json!({ "selector": selector })).await
    }

    async fn fill(&mut self, selector: &str, value: &str) -> E2eResult<()> {
        self.call_unit("fill", json!({ "selector": selector, "value": value }))
            .await
    }

    async fn press(&mut self, selector: &str, key: &str) -> E2eResult<()> {
        self.call_unit("press", json!({ "selector": selector, "key": key }))
            .await
    }

    async fn check(&mut self, selector: &str) -> E2eResult<()> {
        self.call_unit("check", json!({ "selector": selector })).await
    }

    async fn uncheck(&mut self, selector: &str) -> E2eResult<()> {
        self.call_unit("uncheck", json!({ "selector": selector })).await
    }

    async fn hover(&mut self, selector: &str) -> E2eResult<()> {
        self.call_unit("hover", json!({ "selector": selector })).await
    }

    async fn expect(
        &mut self,
        selector: &str,
        expectation: &Expectation,
        timeout_ms: u64,
    ) -> E2eResult<()> {
        self.call_unit_with_timeout(
            "expect",
            json!({ "selector": selector, "expectation": expectation, "timeout": timeout_ms }),
            timeout_ms,
        )
        .await
    }

    async fn expect_url_suffix(&mut self, suffix: &str, timeout_ms: u64) -> E2eResult<()> {
        self.call_unit_with_timeout(
            "expect_url",
            json!({ "suffix": suffix, "timeout": timeout_ms }),
            timeout_ms,
        )
        .await
    }

    async fn count(&mut self, selector: &str) -> E2eResult<usize> {
        let value = self.call("count", json!({ "selector": selector })).await?;
        value
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| E2eError::Playwright(format!("count returned {}", value)))
    }

    async fn inner_text(&mut self, selector: &str) -> E2eResult<String> {
        let value = self.call("inner_text", json!({ "selector": selector })).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn is_checked(&mut self, selector: &str) -> E2eResult<bool> {
        let value = self.call("is_checked", json!({ "selector": selector })).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn url(&mut self) -> E2eResult<String> {
        let value = self.call("url", json!({})).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn screenshot(&mut self, path: &Path) -> E2eResult<()> {
        self.call_unit("screenshot", json!({ "path": path })).await
    }

    async fn stop_tracing(&mut self, path: Option<&Path>) -> E2eResult<()> {
        self.call_unit("stop_tracing", json!({ "path": path })).await
    }

    async fn video_path(&mut self) -> E2eResult<Option<PathBuf>> {
        let value = self.call("video_path", json!({})).await?;
        Ok(value.as_str().map(PathBuf::from))
    }

    async fn diagnostics(&mut self) -> E2eResult<PageDiagnostics> {
        let value = self.call("diagnostics", json!({})).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn close(&mut self) -> E2eResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = self.call_unit("close", json!({})).await;
        if tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await.is_err() {
            self.shutdown().await;
        }
        result
    }
}

impl Drop for PlaywrightSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        warn!("Playwright session dropped without close");

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = self.child.id() {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
        }
        let _ = self.child.start_kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qaui_common::{CliValues, RetentionMode};

    fn settings(cli: CliValues) -> RunSettings {
        let no_env = |_: &str| -> Option<String> { None };
        qaui_common::resolve(&cli, &no_env, &Default::default()).unwrap()
    }

    #[test]
    fn test_driver_config_follows_settings() {
        let settings = settings(CliValues {
            browser: Some("webkit".into()),
            headless: Some(false),
            slow_motion_ms: Some(250),
            viewport: Some("1920x1080".into()),
            video: Some("off".into()),
            trace: Some("on".into()),
            ..Default::default()
        });
        let config = DriverConfig::from_settings(&settings, Path::new("artifacts/case"));

        assert_eq!(config.browser, "webkit");
        assert!(!config.headless);
        assert_eq!(config.slow_mo, 250);
        assert_eq!(config.viewport, Viewport { width: 1920, height: 1080 });
        assert!(config.video_dir.is_none());
        assert!(config.trace);
        assert_eq!(settings.video_mode, RetentionMode::Never);
    }

    #[test]
    fn test_script_embeds_config_as_json() {
        let settings = settings(CliValues::default());
        let config = DriverConfig::from_settings(&settings, Path::new("artifacts/case"));
        let script = build_script(&config).unwrap();

        assert!(!script.contains("__CONFIG__"));
        assert!(script.contains(r#""browser":"chromium""#));
        assert!(script.contains(r#""viewport":{"width":1280,"height":720}"#));
        assert!(script.contains(r#""videoDir":"artifacts/case""#));
        assert!(script.contains(r#""timezoneId":"UTC""#));
        assert!(script.contains(r#""timeout":10000"#));
    }

    #[test]
    fn test_response_kinds_map_to_errors() {
        let parse = |line: &str| serde_json::from_str::<DriverResponse>(line).unwrap();

        let ok = parse(r#"{"id":3,"ok":true,"value":2}"#).into_result("count").unwrap();
        assert_eq!(ok, json!(2));

        let timeout =
            parse(r#"{"id":4,"ok":false,"kind":"timeout","error":"Timeout 10000ms exceeded"}"#);
        assert!(timeout.into_result("goto").unwrap_err().is_timeout());

        let assertion =
            parse(r#"{"id":5,"ok":false,"kind":"assertion","error":"expected count 1, got 0"}"#);
        assert!(matches!(
            assertion.into_result("expect").unwrap_err(),
            E2eError::AssertionFailed(_)
        ));

        let other = parse(r#"{"id":6,"ok":false}"#);
        match other.into_result("click").unwrap_err() {
            E2eError::Playwright(msg) => assert_eq!(msg, "click failed"),
            e => panic!("unexpected error: {e}"),
        }
    }

    /// Driver stand-in that answers every request `ok` after `delay_secs`
    #[cfg(unix)]
    async fn slow_driver(delay_secs: u64, timeout_ms: u64) -> PlaywrightSession {
        let script = format!(
            r#"echo '{{"id":0,"ok":true}}'
while read line; do
  sleep {delay_secs}
  id=$(printf '%s' "$line" | sed 's/.*"id":\([0-9]*\).*/\1/')
  echo "{{\"id\":$id,\"ok\":true}}"
done"#
        );
        let mut command = TokioCommand::new("sh");
        command.arg("-c").arg(script);

        let mut session =
            PlaywrightSession::spawn(command, tempfile::tempdir().unwrap(), timeout_ms).unwrap();
        session.response_grace = Duration::from_millis(200);
        session.handshake(Duration::from_secs(10)).await.unwrap();
        session
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_call_timeout_sets_driver_deadline() {
        let mut session = slow_driver(1, 100).await;

        // longer than the default timeout plus grace, within its own
        session
            .expect(".slow", &Expectation::visible(), 3_000)
            .await
            .unwrap();

        let err = session.click(".fast").await.unwrap_err();
        assert!(err.is_timeout(), "{err}");

        session.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_zero_timeout_has_no_deadline() {
        let mut session = slow_driver(1, 0).await;
        assert_eq!(session.response_deadline(0), None);
        assert_eq!(
            session.response_deadline(50),
            Some(Duration::from_millis(250))
        );

        session.goto("http://app.local/", 0).await.unwrap();
        session.reload().await.unwrap();

        session.shutdown().await;
    }

    #[test]
    fn test_launcher_builder() {
        let launcher = PlaywrightLauncher::new()
            .with_node("/usr/local/bin/node")
            .with_working_dir("/srv/qa");
        assert_eq!(launcher.node, PathBuf::from("/usr/local/bin/node"));
        assert_eq!(launcher.working_dir, PathBuf::from("/srv/qa"));
    }
}
