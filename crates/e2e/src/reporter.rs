//! Test lifecycle reporting
//!
//! Emits one structured start and one structured end event per case and
//! keeps the run's pass/fail/skip/flaky tally. Hosts call
//! [`LifecycleReporter::on_case_report`] once per phase, possibly more than
//! once; each case is still counted exactly once.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

use qaui_common::RunSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Setup,
    Call,
    Teardown,
}

/// Result of a single phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseOutcome {
    Passed,
    Failed,
    Skipped,
    /// The call failed and the case will be executed again
    Rerun,
}

/// One canonical outcome per case attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseOutcome {
    Passed,
    Failed,
    Skipped,
    Error,
    Rerun,
}

impl CaseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseOutcome::Passed => "passed",
            CaseOutcome::Failed => "failed",
            CaseOutcome::Skipped => "skipped",
            CaseOutcome::Error => "error",
            CaseOutcome::Rerun => "rerun",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, CaseOutcome::Failed | CaseOutcome::Error)
    }
}

impl fmt::Display for CaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<PhaseOutcome> for CaseOutcome {
    fn from(outcome: PhaseOutcome) -> Self {
        match outcome {
            PhaseOutcome::Passed => CaseOutcome::Passed,
            PhaseOutcome::Failed => CaseOutcome::Failed,
            PhaseOutcome::Skipped => CaseOutcome::Skipped,
            PhaseOutcome::Rerun => CaseOutcome::Rerun,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseReport {
    pub test_id: String,
    pub phase: Phase,
    pub outcome: PhaseOutcome,
}

impl PhaseReport {
    pub fn new(test_id: &str, phase: Phase, outcome: PhaseOutcome) -> Self {
        Self {
            test_id: test_id.to_string(),
            phase,
            outcome,
        }
    }
}

/// Derive a case's outcome from its phase results.
///
/// Setup failure wins, then the call result, then a skipped setup, then
/// whatever the current phase says (a failing teardown reads as `error`).
pub fn derive_outcome(
    setup: Option<PhaseOutcome>,
    call: Option<PhaseOutcome>,
    current: PhaseOutcome,
) -> CaseOutcome {
    if setup == Some(PhaseOutcome::Failed) {
        return CaseOutcome::Error;
    }
    if let Some(call) = call {
        return call.into();
    }
    if setup == Some(PhaseOutcome::Skipped) {
        return CaseOutcome::Skipped;
    }
    match current {
        PhaseOutcome::Failed => CaseOutcome::Error,
        other => other.into(),
    }
}

/// Fields attached to every lifecycle event for a case
#[derive(Debug, Clone, Serialize)]
pub struct CaseContext {
    pub browser: String,
    pub base_url: String,
    pub headless: bool,
    pub worker: String,
    pub artifact_dir: PathBuf,
    pub retries: u32,
}

impl CaseContext {
    pub fn new(settings: &RunSettings, worker: &str, artifact_dir: PathBuf, retries: u32) -> Self {
        Self {
            browser: settings.browser_name.to_string(),
            base_url: settings.base_url.clone(),
            headless: settings.headless,
            worker: worker.to_string(),
            artifact_dir,
            retries,
        }
    }
}

/// Aggregate handed to the metrics exporter at run end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub flaky: usize,
    pub duration_seconds: f64,
}

/// Run-scoped pass/fail/skip/flaky tally
#[derive(Debug)]
pub struct SessionOutcomeCounters {
    passed: usize,
    failed: usize,
    skipped: usize,
    collected: Option<usize>,
    seen: HashSet<String>,
    counted: HashSet<String>,
    flaky: HashSet<String>,
    started: Instant,
}

impl SessionOutcomeCounters {
    pub fn new() -> Self {
        Self {
            passed: 0,
            failed: 0,
            skipped: 0,
            collected: None,
            seen: HashSet::new(),
            counted: HashSet::new(),
            flaky: HashSet::new(),
            started: Instant::now(),
        }
    }

    /// Fold one phase report in; returns whether it moved a terminal counter
    pub fn record(&mut self, report: &PhaseReport) -> bool {
        self.seen.insert(report.test_id.clone());

        let counter = match report.outcome {
            PhaseOutcome::Rerun => {
                self.flaky.insert(report.test_id.clone());
                return false;
            }
            PhaseOutcome::Passed => &mut self.passed,
            PhaseOutcome::Failed => &mut self.failed,
            PhaseOutcome::Skipped => &mut self.skipped,
        };

        let countable = match report.phase {
            Phase::Call => true,
            Phase::Setup => report.outcome == PhaseOutcome::Skipped,
            Phase::Teardown => false,
        };
        if !countable || !self.counted.insert(report.test_id.clone()) {
            return false;
        }

        *counter += 1;
        true
    }

    pub fn set_collected(&mut self, collected: usize) {
        self.collected = Some(collected);
    }

    pub fn passed(&self) -> usize {
        self.passed
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn flaky(&self) -> usize {
        self.flaky.len()
    }

    /// Collected cases when known, otherwise every case seen so far
    pub fn total(&self) -> usize {
        self.collected.unwrap_or(self.seen.len())
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            total: self.total(),
            passed: self.passed,
            failed: self.failed,
            skipped: self.skipped,
            flaky: self.flaky(),
            duration_seconds: self.started.elapsed().as_secs_f64(),
        }
    }
}

impl Default for SessionOutcomeCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct CasePhases {
    setup: Option<PhaseOutcome>,
    call: Option<PhaseOutcome>,
}

/// Emits lifecycle events and owns the run's [`SessionOutcomeCounters`]
#[derive(Debug, Default)]
pub struct LifecycleReporter {
    counters: SessionOutcomeCounters,
    phases: HashMap<String, CasePhases>,
    started: HashMap<String, Instant>,
    contexts: HashMap<String, CaseContext>,
    summary: Option<SessionSummary>,
}

impl LifecycleReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cases the run intends to execute
    pub fn on_collection(&mut self, collected: usize) {
        self.counters.set_collected(collected);
    }

    pub fn on_case_start(&mut self, test_id: &str, context: CaseContext) {
        info!(
            target: "qa",
            event = "test_start",
            test_id,
            browser = %context.browser,
            base_url = %context.base_url,
            headless = context.headless,
            worker = %context.worker,
            artifact_dir = %context.artifact_dir.display(),
            retries = context.retries,
            "test_start"
        );
        self.started.insert(test_id.to_string(), Instant::now());
        self.phases.insert(test_id.to_string(), CasePhases::default());
        self.contexts.insert(test_id.to_string(), context);
    }

    /// Record one phase result.
    ///
    /// Returns the derived case outcome once the teardown report arrives.
    pub fn on_case_report(&mut self, report: &PhaseReport) -> Option<CaseOutcome> {
        self.counters.record(report);

        let phases = self.phases.entry(report.test_id.clone()).or_default();
        match report.phase {
            Phase::Setup => {
                phases.setup = Some(report.outcome);
                None
            }
            Phase::Call => {
                phases.call = Some(report.outcome);
                None
            }
            Phase::Teardown => Some(derive_outcome(phases.setup, phases.call, report.outcome)),
        }
    }

    /// Milliseconds since `on_case_start` for this case
    pub fn elapsed_ms(&self, test_id: &str) -> Option<u64> {
        self.started
            .get(test_id)
            .map(|start| start.elapsed().as_millis() as u64)
    }

    pub fn on_case_end(&mut self, test_id: &str, outcome: CaseOutcome, duration_ms: Option<u64>) {
        let context = self.contexts.get(test_id);
        info!(
            target: "qa",
            event = "test_end",
            test_id,
            outcome = %outcome,
            duration_ms,
            browser = context.map(|c| c.browser.as_str()),
            base_url = context.map(|c| c.base_url.as_str()),
            headless = context.map(|c| c.headless),
            worker = context.map(|c| c.worker.as_str()),
            artifact_dir = context.map(|c| c.artifact_dir.display().to_string()),
            retries = context.map(|c| c.retries),
            "test_end"
        );
        self.started.remove(test_id);
    }

    pub fn counters(&self) -> &SessionOutcomeCounters {
        &self.counters
    }

    /// Summarize the run. Computed on the first call; later calls return
    /// the same summary.
    pub fn on_session_end(&mut self) -> SessionSummary {
        if let Some(summary) = &self.summary {
            return summary.clone();
        }
        let summary = self.counters.summary();
        info!(
            target: "qa",
            event = "session_end",
            total = summary.total,
            passed = summary.passed,
            failed = summary.failed,
            skipped = summary.skipped,
            flaky = summary.flaky,
            duration_seconds = summary.duration_seconds,
            "session_end"
        );
        self.summary = Some(summary.clone());
        summary
    }
}
