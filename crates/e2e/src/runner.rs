//! Case runner driving setup, call and teardown for every spec

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use qaui_common::settings::env;
use qaui_common::{RunContext, RunSettings};

use crate::artifacts::{ArtifactKind, ArtifactManager};
use crate::driver::{BrowserSession, Expectation, SessionFactory};
use crate::error::{E2eError, E2eResult};
use crate::pages::BasePage;
use crate::reporter::{
    CaseContext, CaseOutcome, LifecycleReporter, Phase, PhaseOutcome, PhaseReport, SessionSummary,
};
use crate::spec::{TestSpec, TestStep};

/// Worker id when not running under a parallel distributor
pub const DEFAULT_WORKER: &str = "master";

/// Commit recorded when `GITHUB_SHA` is absent
pub const LOCAL_COMMIT: &str = "local";

pub const RESULTS_FILE: &str = "test-results.json";

/// Result of executing a test step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    pub step_name: String,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Result of running a single case, after any reruns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub test_id: String,
    pub name: String,
    pub outcome: CaseOutcome,
    /// Attempts made, reruns included
    pub attempts: u32,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(default)]
    pub artifacts: BTreeMap<ArtifactKind, PathBuf>,
}

/// Environment a run executed in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub base_url: String,
    pub browser: String,
    pub headless: bool,
    pub viewport: String,
    pub timeout_ms: u64,
    pub commit: String,
    pub worker: String,
    pub started_at: DateTime<Utc>,
}

impl RunMetadata {
    pub fn new(settings: &RunSettings, commit: &str, worker: &str) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            browser: settings.browser_name.to_string(),
            headless: settings.headless,
            viewport: settings.viewport.to_string(),
            timeout_ms: settings.default_timeout_ms,
            commit: commit.to_string(),
            worker: worker.to_string(),
            started_at: Utc::now(),
        }
    }
}

/// Result of running all cases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub metadata: RunMetadata,
    pub summary: SessionSummary,
    pub results: Vec<TestResult>,
}

impl TestSuiteResult {
    /// No case failed or errored
    pub fn success(&self) -> bool {
        self.results.iter().all(|r| !r.outcome.is_failure())
    }
}

/// Configuration for the test runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub specs_dir: PathBuf,
    pub tag: Option<String>,
    pub name: Option<String>,
    /// Extra attempts for a failing case
    pub reruns: u32,
    /// Worker id for lifecycle events; `WORKER_ID` or `master` when unset
    pub worker: Option<String>,
    /// Results file; `<artifacts_dir>/test-results.json` when unset
    pub results_path: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            specs_dir: PathBuf::from("tests/specs"),
            tag: None,
            name: None,
            reruns: 0,
            worker: None,
            results_path: None,
        }
    }
}

struct AttemptResult {
    outcome: CaseOutcome,
    steps: Vec<StepResult>,
    error: Option<String>,
    artifacts: BTreeMap<ArtifactKind, PathBuf>,
}

/// Main E2E test runner
pub struct TestRunner<F: SessionFactory> {
    settings: Arc<RunSettings>,
    factory: F,
    artifacts: ArtifactManager,
    reporter: LifecycleReporter,
    config: RunnerConfig,
    worker: String,
    commit: String,
}

impl<F: SessionFactory> TestRunner<F> {
    /// Resolve settings through `ctx` and prepare the artifacts root
    pub fn new(ctx: &RunContext, factory: F, config: RunnerConfig) -> E2eResult<Self> {
        let settings = ctx.settings()?;
        std::fs::create_dir_all(&settings.artifacts_dir)?;

        let worker = config
            .worker
            .clone()
            .or_else(|| ctx.env_var(env::WORKER_ID))
            .unwrap_or_else(|| DEFAULT_WORKER.to_string());
        let commit = ctx
            .env_var(env::GITHUB_SHA)
            .map(|sha| sha.chars().take(12).collect())
            .unwrap_or_else(|| LOCAL_COMMIT.to_string());

        Ok(Self {
            artifacts: ArtifactManager::from_settings(&settings),
            settings,
            factory,
            reporter: LifecycleReporter::new(),
            config,
            worker,
            commit,
        })
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn reporter(&self) -> &LifecycleReporter {
        &self.reporter
    }

    pub fn artifacts(&self) -> &ArtifactManager {
        &self.artifacts
    }

    /// Load specs from the configured directory and run those that match
    /// the tag and name filters
    pub async fn run_all(&mut self) -> E2eResult<TestSuiteResult> {
        let specs = TestSpec::load_all(&self.config.specs_dir)?;
        let selected =
            TestSpec::filter(&specs, self.config.tag.as_deref(), self.config.name.as_deref());
        self.run_specs(&selected).await
    }

    /// Run a list of specs as one session
    pub async fn run_specs(&mut self, specs: &[&TestSpec]) -> E2eResult<TestSuiteResult> {
        let metadata = RunMetadata::new(&self.settings, &self.commit, &self.worker);
        self.reporter.on_collection(specs.len());

        info!("Running {} test(s)...", specs.len());

        let mut results = Vec::with_capacity(specs.len());
        for spec in specs {
            let result = self.run_case(spec).await?;
            match result.outcome {
                CaseOutcome::Passed => info!("✓ {} ({} ms)", result.test_id, result.duration_ms),
                CaseOutcome::Skipped => info!(
                    "- {} skipped: {}",
                    result.test_id,
                    result.skip_reason.as_deref().unwrap_or("")
                ),
                _ => error!(
                    "✗ {} - {}",
                    result.test_id,
                    result.error.as_deref().unwrap_or("unknown error")
                ),
            }
            results.push(result);
        }

        let summary = self.reporter.on_session_end();
        info!(
            "Test Results: {} passed, {} failed, {} skipped, {} flaky ({:.1} s)",
            summary.passed, summary.failed, summary.skipped, summary.flaky, summary.duration_seconds
        );

        Ok(TestSuiteResult {
            metadata,
            summary,
            results,
        })
    }

    /// Run one spec, rerunning a failing call while attempts remain
    pub async fn run_case(&mut self, spec: &TestSpec) -> E2eResult<TestResult> {
        let test_id = spec.test_id();
        let start = Instant::now();
        let max_attempts = if spec.skip.is_some() {
            1
        } else {
            1 + self.config.reruns
        };

        let mut attempt = 0;
        loop {
            let last = attempt + 1 >= max_attempts;
            let result = self.run_attempt(spec, &test_id, attempt, last).await?;
            attempt += 1;

            if result.outcome != CaseOutcome::Rerun {
                return Ok(TestResult {
                    test_id,
                    name: spec.name.clone(),
                    outcome: result.outcome,
                    attempts: attempt,
                    duration_ms: start.elapsed().as_millis() as u64,
                    steps: result.steps,
                    error: result.error,
                    skip_reason: spec.skip.clone(),
                    artifacts: result.artifacts,
                });
            }
            warn!(test_id = %test_id, attempt, "Rerunning failed case");
        }
    }

    async fn run_attempt(
        &mut self,
        spec: &TestSpec,
        test_id: &str,
        attempt: u32,
        last: bool,
    ) -> E2eResult<AttemptResult> {
        let settings = Arc::clone(&self.settings);
        let case_dir = self.artifacts.case_dir(test_id);
        self.reporter.on_case_start(
            test_id,
            CaseContext::new(&settings, &self.worker, case_dir.clone(), attempt),
        );

        let mut error = None;
        let mut session: Option<Box<dyn BrowserSession>> = None;

        // setup
        let began = self.artifacts.begin_case(test_id).map(|_| ());
        let case_started = began.is_ok();
        let setup = match began {
            Err(e) => {
                error = Some(e.to_string());
                PhaseOutcome::Failed
            }
            Ok(_) if spec.skip.is_some() => PhaseOutcome::Skipped,
            Ok(_) => match self.factory.open(&settings, &case_dir).await {
                Ok(opened) => {
                    self.artifacts.start_capturing(test_id)?;
                    session = Some(opened);
                    PhaseOutcome::Passed
                }
                Err(e) => {
                    error = Some(e.to_string());
                    PhaseOutcome::Failed
                }
            },
        };
        self.reporter
            .on_case_report(&PhaseReport::new(test_id, Phase::Setup, setup));

        // call
        let mut steps = Vec::new();
        let mut call = None;
        if let Some(session) = session.as_mut() {
            let failure =
                execute_steps(&mut **session, &settings, &spec.steps, &mut steps).await;
            let outcome = match failure {
                None => PhaseOutcome::Passed,
                Some(reason) => {
                    error = Some(reason);
                    if last {
                        PhaseOutcome::Failed
                    } else {
                        PhaseOutcome::Rerun
                    }
                }
            };
            self.reporter
                .on_case_report(&PhaseReport::new(test_id, Phase::Call, outcome));
            call = Some(outcome);
        }

        // teardown
        let failed = setup == PhaseOutcome::Failed || call == Some(PhaseOutcome::Failed);
        let artifacts = if case_started {
            self.artifacts
                .end_case(test_id, failed, session.as_deref_mut())
                .await?
        } else {
            BTreeMap::new()
        };
        if let Some(set) = self.artifacts.remove(test_id) {
            debug!(test_id, state = ?set.state(), kept = artifacts.len(), "Artifacts settled");
        }

        // Teardown reports always derive an outcome
        let outcome = self
            .reporter
            .on_case_report(&PhaseReport::new(test_id, Phase::Teardown, PhaseOutcome::Passed))
            .unwrap_or(CaseOutcome::Error);
        let duration_ms = self.reporter.elapsed_ms(test_id);
        self.reporter.on_case_end(test_id, outcome, duration_ms);

        Ok(AttemptResult {
            outcome,
            steps,
            error,
            artifacts,
        })
    }

    /// Write results as pretty JSON; returns the path written
    pub fn write_results(&self, results: &TestSuiteResult) -> E2eResult<PathBuf> {
        let path = self
            .config
            .results_path
            .clone()
            .unwrap_or_else(|| self.settings.artifacts_dir.join(RESULTS_FILE));
        write_results(&path, results)?;
        Ok(path)
    }
}

/// Write test results to a JSON file
pub fn write_results(path: &Path, results: &TestSuiteResult) -> E2eResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(path, json)?;

    info!("Results written to: {}", path.display());
    Ok(())
}

/// Run steps in order, stopping at the first failure.
///
/// Returns the failure message, if any.
async fn execute_steps(
    session: &mut (dyn BrowserSession + '_),
    settings: &RunSettings,
    steps: &[TestStep],
    results: &mut Vec<StepResult>,
) -> Option<String> {
    let mut page = BasePage::new(session, settings);

    for step in steps {
        let start = Instant::now();
        let step_name = step.label();
        debug!("Executing step: {}", step_name);

        let outcome = execute_step(&mut page, step).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => results.push(StepResult {
                success: true,
                step_name,
                duration_ms,
                error: None,
            }),
            Err(e) => {
                let reason = E2eError::StepFailed {
                    step: step_name.clone(),
                    reason: e.to_string(),
                }
                .to_string();
                results.push(StepResult {
                    success: false,
                    step_name,
                    duration_ms,
                    error: Some(e.to_string()),
                });
                return Some(reason);
            }
        }
    }
    None
}

async fn execute_step(page: &mut BasePage<'_>, step: &TestStep) -> E2eResult<()> {
    let timeout_ms = page.timeout_ms();
    match step {
        TestStep::Navigate {
            url,
            wait_for_selector,
        } => {
            page.goto(url).await?;
            if let Some(selector) = wait_for_selector {
                page.expect_visible(selector).await?;
            }
            Ok(())
        }
        TestStep::Reload => page.session().reload().await,
        TestStep::Click { selector } => page.session().click(selector).await,
        TestStep::Dblclick { selector } => page.session().dblclick(selector).await,
        TestStep::Fill { selector, value } => page.session().fill(selector, value).await,
        TestStep::Press { selector, key } => page.session().press(selector, key).await,
        TestStep::Check { selector } => page.session().check(selector).await,
        TestStep::Uncheck { selector } => page.session().uncheck(selector).await,
        TestStep::Hover { selector } => page.session().hover(selector).await,
        TestStep::Wait {
            selector,
            timeout_ms: wait_ms,
        } => {
            page.session()
                .expect(selector, &Expectation::visible(), wait_ms.unwrap_or(timeout_ms))
                .await
        }
        TestStep::Assert {
            selector,
            timeout_ms: assert_ms,
            ..
        } => {
            let expectation = step.expectation().unwrap_or_default();
            page.session()
                .expect(selector, &expectation, assert_ms.unwrap_or(timeout_ms))
                .await
        }
        TestStep::AssertUrl { suffix } => {
            page.session().expect_url_suffix(suffix, timeout_ms).await
        }
        TestStep::Log { message } => {
            info!("[TEST LOG] {}", message);
            Ok(())
        }
    }
}
