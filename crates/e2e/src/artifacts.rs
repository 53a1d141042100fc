//! Per-case artifact directories and retention
//!
//! Each case owns `<artifacts_dir>/<sanitized-test-id>/`. Diagnostics are
//! captured at teardown, once the case outcome is final, and only the kinds
//! whose retention mode says so survive. A directory left with nothing in it
//! is removed so passing `on-failure` runs leave no residue.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

use qaui_common::{RetentionMode, RunSettings};

use crate::driver::BrowserSession;
use crate::error::{CaptureError, CleanupError, E2eError, E2eResult};

pub const SCREENSHOT_FILE: &str = "screenshot.png";
pub const TRACE_FILE: &str = "trace.zip";
pub const CONSOLE_ERRORS_FILE: &str = "console-errors.txt";

/// Directory name used when a test id sanitizes to nothing
pub const PLACEHOLDER_DIR: &str = "test";

static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.\-]+").expect("static regex"));

/// Turn a test id into a filesystem-safe directory name.
///
/// Runs of characters outside `[A-Za-z0-9_.-]` become `__`, then leading and
/// trailing `.`/`_` are trimmed. Never returns an empty string.
pub fn sanitize_test_id(test_id: &str) -> String {
    let replaced = UNSAFE_CHARS.replace_all(test_id, "__");
    let trimmed = replaced.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        PLACEHOLDER_DIR.to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Screenshot,
    Trace,
    Video,
    ConsoleErrors,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Screenshot => "screenshot",
            ArtifactKind::Trace => "trace",
            ArtifactKind::Video => "video",
            ArtifactKind::ConsoleErrors => "console_errors",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retention modes for the kinds that have one.
///
/// Console errors have no mode: they are kept exactly when the case failed
/// and at least one error was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub screenshot: RetentionMode,
    pub trace: RetentionMode,
    pub video: RetentionMode,
}

impl RetentionPolicy {
    pub fn from_settings(settings: &RunSettings) -> Self {
        Self {
            screenshot: settings.screenshot_mode,
            trace: settings.trace_mode,
            video: settings.video_mode,
        }
    }

    /// Same mode for every kind
    pub fn uniform(mode: RetentionMode) -> Self {
        Self {
            screenshot: mode,
            trace: mode,
            video: mode,
        }
    }

    pub fn mode(&self, kind: ArtifactKind) -> Option<RetentionMode> {
        match kind {
            ArtifactKind::Screenshot => Some(self.screenshot),
            ArtifactKind::Trace => Some(self.trace),
            ArtifactKind::Video => Some(self.video),
            ArtifactKind::ConsoleErrors => None,
        }
    }

    /// Which kinds survive a case with the given outcome
    pub fn decide(&self, failed: bool) -> RetentionDecision {
        RetentionDecision {
            failed,
            screenshot: self.screenshot.should_persist(failed),
            trace: self.trace.should_persist(failed),
            video: self.video.should_persist(failed),
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::uniform(RetentionMode::OnFailure)
    }
}

/// Retention computed from a final case outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionDecision {
    pub failed: bool,
    pub screenshot: bool,
    pub trace: bool,
    pub video: bool,
}

/// Where a case's artifact handling is.
///
/// `Created -> Capturing -> Decided -> {Persisted | Discarded}`. A case whose
/// browser never opened goes straight from `Created` to `Decided`. Nothing
/// reaches a terminal state without passing through `Decided`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactState {
    Created,
    Capturing,
    Decided,
    Persisted,
    Discarded,
}

impl ArtifactState {
    pub fn can_advance_to(self, next: ArtifactState) -> bool {
        use ArtifactState::*;
        matches!(
            (self, next),
            (Created, Capturing)
                | (Created, Decided)
                | (Capturing, Decided)
                | (Decided, Persisted)
                | (Decided, Discarded)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ArtifactState::Persisted | ArtifactState::Discarded)
    }
}

/// Artifacts belonging to one case
#[derive(Debug, Clone)]
pub struct TestArtifactSet {
    test_id: String,
    directory: PathBuf,
    captured: BTreeMap<ArtifactKind, PathBuf>,
    state: ArtifactState,
    decision: Option<RetentionDecision>,
}

impl TestArtifactSet {
    fn new(test_id: &str, directory: PathBuf) -> Self {
        Self {
            test_id: test_id.to_string(),
            directory,
            captured: BTreeMap::new(),
            state: ArtifactState::Created,
            decision: None,
        }
    }

    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn captured(&self) -> &BTreeMap<ArtifactKind, PathBuf> {
        &self.captured
    }

    pub fn state(&self) -> ArtifactState {
        self.state
    }

    pub fn decision(&self) -> Option<RetentionDecision> {
        self.decision
    }

    pub fn advance(&mut self, next: ArtifactState) -> E2eResult<()> {
        if !self.state.can_advance_to(next) {
            return Err(E2eError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(test_id = %self.test_id, from = ?self.state, to = ?next, "Artifact state change");
        self.state = next;
        Ok(())
    }
}

/// Owns the artifact set of every case in the run, keyed by test id
#[derive(Debug)]
pub struct ArtifactManager {
    root: PathBuf,
    policy: RetentionPolicy,
    cases: HashMap<String, TestArtifactSet>,
}

impl ArtifactManager {
    pub fn new(root: impl Into<PathBuf>, policy: RetentionPolicy) -> Self {
        Self {
            root: root.into(),
            policy,
            cases: HashMap::new(),
        }
    }

    pub fn from_settings(settings: &RunSettings) -> Self {
        Self::new(&settings.artifacts_dir, RetentionPolicy::from_settings(settings))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Directory a case's artifacts go to; does not touch the filesystem
    pub fn case_dir(&self, test_id: &str) -> PathBuf {
        self.root.join(sanitize_test_id(test_id))
    }

    /// Create the case directory and a fresh artifact set.
    ///
    /// A rerun of the same id replaces the previous attempt's set.
    pub fn begin_case(&mut self, test_id: &str) -> E2eResult<&TestArtifactSet> {
        let directory = self.case_dir(test_id);
        std::fs::create_dir_all(&directory)?;

        if let Some(previous) = self.cases.get(test_id) {
            if !previous.state.is_terminal() {
                warn!(target: "qa", test_id, state = ?previous.state, "artifact_set_replaced");
            }
        }
        if let Some(other) = self.live_owner(&directory, test_id) {
            warn!(
                target: "qa",
                test_id,
                other,
                directory = %directory.display(),
                "artifact_dir_shared"
            );
        }

        let set = TestArtifactSet::new(test_id, directory);
        self.cases.insert(test_id.to_string(), set);
        self.get(test_id)
            .ok_or_else(|| E2eError::UnknownCase(test_id.to_string()))
    }

    /// Another unfinished case already writing into `directory`
    fn live_owner(&self, directory: &Path, test_id: &str) -> Option<&str> {
        self.cases
            .values()
            .find(|set| {
                set.test_id != test_id && !set.state.is_terminal() && set.directory == directory
            })
            .map(|set| set.test_id.as_str())
    }

    /// Mark that the browser has started recording for this case
    pub fn start_capturing(&mut self, test_id: &str) -> E2eResult<()> {
        self.get_mut(test_id)?.advance(ArtifactState::Capturing)
    }

    pub fn get(&self, test_id: &str) -> Option<&TestArtifactSet> {
        self.cases.get(test_id)
    }

    fn get_mut(&mut self, test_id: &str) -> E2eResult<&mut TestArtifactSet> {
        self.cases
            .get_mut(test_id)
            .ok_or_else(|| E2eError::UnknownCase(test_id.to_string()))
    }

    /// Apply retention for a finished case and return what was kept.
    ///
    /// `session` is `None` when the browser never opened. Capture and cleanup
    /// failures are logged per kind and never abort the other kinds; only an
    /// unknown id or an illegal state transition is an error.
    pub async fn end_case(
        &mut self,
        test_id: &str,
        failed: bool,
        session: Option<&mut (dyn BrowserSession + '_)>,
    ) -> E2eResult<BTreeMap<ArtifactKind, PathBuf>> {
        let policy = self.policy;
        let set = self.get_mut(test_id)?;

        set.advance(ArtifactState::Decided)?;
        let decision = policy.decide(failed);
        set.decision = Some(decision);

        let mut captured = BTreeMap::new();
        let mut stale_video = None;

        if let Some(session) = session {
            let dir = set.directory.clone();

            if decision.screenshot {
                let path = dir.join(SCREENSHOT_FILE);
                match session.screenshot(&path).await {
                    Ok(()) => {
                        captured.insert(ArtifactKind::Screenshot, path);
                    }
                    Err(e) => log_capture(test_id, CaptureError {
                        kind: ArtifactKind::Screenshot,
                        source: e,
                    }),
                }
            }

            // The recording must be stopped whatever the decision; only the
            // save is conditional.
            if policy.trace.is_enabled() {
                let path = dir.join(TRACE_FILE);
                let target = decision.trace.then_some(path.as_path());
                match session.stop_tracing(target).await {
                    Ok(()) => {
                        if decision.trace {
                            captured.insert(ArtifactKind::Trace, path);
                        }
                    }
                    Err(e) => log_capture(test_id, CaptureError {
                        kind: ArtifactKind::Trace,
                        source: e,
                    }),
                }
            }

            if decision.failed {
                match write_console_errors(&mut *session, &dir).await {
                    Ok(Some(path)) => {
                        captured.insert(ArtifactKind::ConsoleErrors, path);
                    }
                    Ok(None) => {}
                    Err(e) => log_capture(test_id, CaptureError {
                        kind: ArtifactKind::ConsoleErrors,
                        source: e,
                    }),
                }
            }

            match session.video_path().await {
                Ok(Some(path)) if decision.video => {
                    captured.insert(ArtifactKind::Video, path);
                }
                Ok(Some(path)) => stale_video = Some(path),
                Ok(None) => {}
                Err(e) => log_capture(test_id, CaptureError {
                    kind: ArtifactKind::Video,
                    source: e,
                }),
            }

            if let Err(e) = session.close().await {
                warn!(target: "qa", test_id, error = %e, "session_close_failed");
            }
        }

        if let Some(path) = stale_video {
            if let Err(e) = safe_remove(&path) {
                log_cleanup(test_id, &e);
            }
        }

        set.captured = captured.clone();
        if captured.is_empty() {
            if let Err(e) = safe_remove(&set.directory) {
                log_cleanup(test_id, &e);
            }
            set.advance(ArtifactState::Discarded)?;
        } else {
            set.advance(ArtifactState::Persisted)?;
        }

        Ok(captured)
    }

    /// Forget a finished case
    pub fn remove(&mut self, test_id: &str) -> Option<TestArtifactSet> {
        self.cases.remove(test_id)
    }
}

async fn write_console_errors(
    session: &mut (dyn BrowserSession + '_),
    dir: &Path,
) -> E2eResult<Option<PathBuf>> {
    let diagnostics = session.diagnostics().await?;
    if diagnostics.is_empty() {
        return Ok(None);
    }
    let path = dir.join(CONSOLE_ERRORS_FILE);
    let mut body = diagnostics.lines().join("\n");
    body.push('\n');
    std::fs::write(&path, body)?;
    Ok(Some(path))
}

/// Remove a file or directory tree; a missing path is not an error
pub fn safe_remove(path: &Path) -> Result<(), CleanupError> {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(CleanupError {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn log_capture(test_id: &str, err: CaptureError) {
    warn!(
        target: "qa",
        test_id,
        kind = %err.kind,
        error = %err.source,
        "{}_capture_failed",
        err.kind
    );
}

fn log_cleanup(test_id: &str, err: &CleanupError) {
    error!(
        target: "qa",
        test_id,
        path = %err.path.display(),
        error = %err.source,
        "artifact_cleanup_failed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBrowser;
    use tempfile::TempDir;
    use test_case::test_case;

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test_case("tests/test_todo.py::test_add_todo", "tests__test_todo.py__test_add_todo" ; "node id")]
    #[test_case("plain", "plain" ; "already safe")]
    #[test_case("__init__.py", "init__.py" ; "trimmed underscores")]
    #[test_case("..hidden..", "hidden" ; "trimmed dots")]
    #[test_case("case[param one]", "case__param__one" ; "brackets and spaces")]
    #[test_case("///", "test" ; "placeholder")]
    #[test_case("", "test" ; "empty")]
    fn test_sanitize_test_id(raw: &str, expected: &str) {
        assert_eq!(sanitize_test_id(raw), expected);
    }

    #[test]
    fn test_sanitize_is_idempotent_and_never_empty() {
        for raw in [
            "a b/c::d",
            "._.",
            "ünïcödé",
            "x__y",
            "-lead",
            "specs/login.yaml::login flow",
        ] {
            let once = sanitize_test_id(raw);
            assert!(!once.is_empty());
            assert_eq!(sanitize_test_id(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn test_transitions_cannot_skip_decided() {
        use ArtifactState::*;
        assert!(Created.can_advance_to(Capturing));
        assert!(Capturing.can_advance_to(Decided));
        assert!(Decided.can_advance_to(Discarded));
        assert!(!Capturing.can_advance_to(Persisted));
        assert!(!Capturing.can_advance_to(Discarded));
        assert!(!Created.can_advance_to(Persisted));
        assert!(!Persisted.can_advance_to(Decided));
    }

    #[test]
    fn test_policy_follows_settings() {
        let cli = qaui_common::CliValues {
            artifacts_dir: Some(PathBuf::from("out")),
            screenshot: Some("on".into()),
            video: Some("off".into()),
            ..Default::default()
        };
        let no_env = |_: &str| -> Option<String> { None };
        let settings = qaui_common::resolve(&cli, &no_env, &Default::default()).unwrap();
        let manager = ArtifactManager::from_settings(&settings);

        assert_eq!(manager.root(), Path::new("out"));
        let policy = manager.policy();
        assert_eq!(policy.mode(ArtifactKind::Screenshot), Some(RetentionMode::Always));
        assert_eq!(policy.mode(ArtifactKind::Video), Some(RetentionMode::Never));
        assert_eq!(policy.mode(ArtifactKind::Trace), Some(RetentionMode::OnFailure));
        assert_eq!(policy.mode(ArtifactKind::ConsoleErrors), None);

        let passed = policy.decide(false);
        assert!(passed.screenshot && !passed.video && !passed.trace);
        let failed = policy.decide(true);
        assert!(failed.screenshot && !failed.video && failed.trace);
    }

    #[test]
    fn test_begin_case_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let mut manager =
            ArtifactManager::new(tmp.path().join("nested/root"), RetentionPolicy::default());
        let set = manager.begin_case("suite::case one").unwrap();
        assert!(set.directory().is_dir());
        assert_eq!(set.state(), ArtifactState::Created);
        assert!(set.directory().ends_with("suite__case__one"));

        // idempotent on an existing directory
        manager.begin_case("suite::case one").unwrap();
    }

    #[test]
    fn test_colliding_ids_are_detected() {
        let tmp = TempDir::new().unwrap();
        let mut manager = ArtifactManager::new(tmp.path(), RetentionPolicy::default());
        assert_eq!(manager.case_dir("a b"), manager.case_dir("a/b"));

        manager.begin_case("a b").unwrap();
        let shared = manager.case_dir("a/b");
        assert_eq!(manager.live_owner(&shared, "a/b"), Some("a b"));
        assert_eq!(manager.live_owner(&shared, "a b"), None);

        manager.begin_case("a/b").unwrap();
        assert_eq!(manager.live_owner(&shared, "a b"), Some("a/b"));
        assert_eq!(manager.live_owner(&manager.case_dir("other"), "other"), None);
    }

    #[tokio::test]
    async fn test_passing_case_on_failure_leaves_no_directory() {
        let tmp = TempDir::new().unwrap();
        let browser = MockBrowser::new().with_diagnostics(&["noise"], &[]);
        let mut manager =
            ArtifactManager::new(tmp.path(), RetentionPolicy::uniform(RetentionMode::OnFailure));

        let dir = manager.begin_case("passing").unwrap().directory().to_path_buf();
        manager.start_capturing("passing").unwrap();
        let mut session = browser.session(&dir, true);
        assert!(dir.join("video.webm").exists());

        let kept = manager.end_case("passing", false, Some(&mut session)).await.unwrap();

        assert!(kept.is_empty());
        assert!(!dir.exists());
        assert_eq!(manager.get("passing").unwrap().state(), ArtifactState::Discarded);
        // tracing stopped without saving, screenshot never taken
        assert_eq!(browser.calls(), vec!["stop_tracing:false".to_string(), "close".to_string()]);
    }

    #[tokio::test]
    async fn test_failing_case_keeps_only_screenshot() {
        let tmp = TempDir::new().unwrap();
        let browser = MockBrowser::new();
        let policy = RetentionPolicy {
            screenshot: RetentionMode::OnFailure,
            trace: RetentionMode::Never,
            video: RetentionMode::Never,
        };
        let mut manager = ArtifactManager::new(tmp.path(), policy);

        let dir = manager.begin_case("failing").unwrap().directory().to_path_buf();
        manager.start_capturing("failing").unwrap();
        let mut session = browser.session(&dir, false);

        let kept = manager.end_case("failing", true, Some(&mut session)).await.unwrap();

        assert_eq!(kept.keys().copied().collect::<Vec<_>>(), vec![ArtifactKind::Screenshot]);
        assert_eq!(entries(&dir), vec![SCREENSHOT_FILE.to_string()]);
        assert_eq!(manager.get("failing").unwrap().state(), ArtifactState::Persisted);
    }

    #[tokio::test]
    async fn test_always_mode_keeps_everything_on_pass_but_no_console_log() {
        let tmp = TempDir::new().unwrap();
        let browser = MockBrowser::new().with_diagnostics(&["boom"], &["TypeError"]);
        let mut manager =
            ArtifactManager::new(tmp.path(), RetentionPolicy::uniform(RetentionMode::Always));

        let dir = manager.begin_case("always").unwrap().directory().to_path_buf();
        manager.start_capturing("always").unwrap();
        let mut session = browser.session(&dir, true);

        let kept = manager.end_case("always", false, Some(&mut session)).await.unwrap();

        assert!(kept.contains_key(&ArtifactKind::Screenshot));
        assert!(kept.contains_key(&ArtifactKind::Trace));
        assert!(kept.contains_key(&ArtifactKind::Video));
        assert!(!kept.contains_key(&ArtifactKind::ConsoleErrors));
        assert_eq!(
            entries(&dir),
            vec![SCREENSHOT_FILE.to_string(), TRACE_FILE.to_string(), "video.webm".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failing_case_writes_console_errors() {
        let tmp = TempDir::new().unwrap();
        let browser = MockBrowser::new().with_diagnostics(&["boom"], &["TypeError: x"]);
        let mut manager =
            ArtifactManager::new(tmp.path(), RetentionPolicy::uniform(RetentionMode::Never));

        let dir = manager.begin_case("noisy").unwrap().directory().to_path_buf();
        manager.start_capturing("noisy").unwrap();
        let mut session = browser.session(&dir, false);

        let kept = manager.end_case("noisy", true, Some(&mut session)).await.unwrap();

        let log = std::fs::read_to_string(&kept[&ArtifactKind::ConsoleErrors]).unwrap();
        assert_eq!(log, "[console] boom\n[pageerror] TypeError: x\n");
    }

    #[tokio::test]
    async fn test_failing_case_without_errors_writes_no_log() {
        let tmp = TempDir::new().unwrap();
        let browser = MockBrowser::new();
        let mut manager =
            ArtifactManager::new(tmp.path(), RetentionPolicy::uniform(RetentionMode::Never));

        let dir = manager.begin_case("quiet").unwrap().directory().to_path_buf();
        let mut session = browser.session(&dir, false);
        let kept = manager.end_case("quiet", true, Some(&mut session)).await.unwrap();

        assert!(kept.is_empty());
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_screenshot_failure_does_not_block_other_kinds() {
        let tmp = TempDir::new().unwrap();
        let browser = MockBrowser::new().screenshot_fails();
        let mut manager =
            ArtifactManager::new(tmp.path(), RetentionPolicy::uniform(RetentionMode::OnFailure));

        let dir = manager.begin_case("partial").unwrap().directory().to_path_buf();
        manager.start_capturing("partial").unwrap();
        let mut session = browser.session(&dir, true);

        let kept = manager.end_case("partial", true, Some(&mut session)).await.unwrap();

        assert!(!kept.contains_key(&ArtifactKind::Screenshot));
        assert!(kept.contains_key(&ArtifactKind::Trace));
        assert!(kept.contains_key(&ArtifactKind::Video));
        assert!(browser.calls().contains(&"close".to_string()));
    }

    #[tokio::test]
    async fn test_trace_failure_is_swallowed() {
        let tmp = TempDir::new().unwrap();
        let browser = MockBrowser::new().trace_fails();
        let mut manager =
            ArtifactManager::new(tmp.path(), RetentionPolicy::uniform(RetentionMode::Always));

        let dir = manager.begin_case("trace").unwrap().directory().to_path_buf();
        let mut session = browser.session(&dir, false);
        let kept = manager.end_case("trace", false, Some(&mut session)).await.unwrap();

        assert!(!kept.contains_key(&ArtifactKind::Trace));
        assert!(kept.contains_key(&ArtifactKind::Screenshot));
    }

    #[tokio::test]
    async fn test_trace_off_is_never_stopped() {
        let tmp = TempDir::new().unwrap();
        let browser = MockBrowser::new();
        let policy = RetentionPolicy {
            trace: RetentionMode::Never,
            ..RetentionPolicy::uniform(RetentionMode::Always)
        };
        let mut manager = ArtifactManager::new(tmp.path(), policy);

        let dir = manager.begin_case("no-trace").unwrap().directory().to_path_buf();
        let mut session = browser.session(&dir, false);
        manager.end_case("no-trace", true, Some(&mut session)).await.unwrap();

        assert!(!browser.calls().iter().any(|c| c.starts_with("stop_tracing")));
    }

    #[tokio::test]
    async fn test_case_without_session_is_discarded() {
        let tmp = TempDir::new().unwrap();
        let mut manager =
            ArtifactManager::new(tmp.path(), RetentionPolicy::uniform(RetentionMode::Always));

        let dir = manager.begin_case("setup-error").unwrap().directory().to_path_buf();
        let kept = manager.end_case("setup-error", true, None).await.unwrap();

        assert!(kept.is_empty());
        assert!(!dir.exists());
        let set = manager.get("setup-error").unwrap();
        assert_eq!(set.state(), ArtifactState::Discarded);
        assert_eq!(set.decision().map(|d| d.failed), Some(true));
    }

    #[tokio::test]
    async fn test_end_case_twice_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut manager = ArtifactManager::new(tmp.path(), RetentionPolicy::default());
        manager.begin_case("once").unwrap();
        manager.end_case("once", false, None).await.unwrap();

        let err = manager.end_case("once", false, None).await.unwrap_err();
        assert!(matches!(err, E2eError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_unknown_case_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let mut manager = ArtifactManager::new(tmp.path(), RetentionPolicy::default());
        let err = manager.end_case("missing", false, None).await.unwrap_err();
        assert!(matches!(err, E2eError::UnknownCase(_)));
    }

    #[test]
    fn test_safe_remove_missing_path_is_ok() {
        let tmp = TempDir::new().unwrap();
        assert!(safe_remove(&tmp.path().join("nope")).is_ok());
    }
}
