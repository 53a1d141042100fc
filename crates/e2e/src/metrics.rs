//! Prometheus textfile export of the run summary
//!
//! The file is picked up by a node-exporter style textfile collector, so it
//! is replaced atomically: written next to the target, then renamed over it.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

use qaui_common::settings::env;
use qaui_common::RunContext;

use crate::error::E2eResult;
use crate::reporter::SessionSummary;

/// Sink for the end-of-run summary
pub trait MetricsExporter {
    fn write(&self, path: &Path, summary: &SessionSummary) -> E2eResult<()>;
}

/// Writes gauges in the Prometheus text exposition format
#[derive(Debug, Clone, Copy, Default)]
pub struct TextfileExporter;

impl TextfileExporter {
    pub fn new() -> Self {
        Self
    }

    /// Render the summary without touching the filesystem
    pub fn render(&self, summary: &SessionSummary) -> String {
        let gauges: [(&str, &str, String); 6] = [
            ("qa_tests_total", "Total tests collected", summary.total.to_string()),
            ("qa_tests_passed", "Tests passed", summary.passed.to_string()),
            ("qa_tests_failed", "Tests failed", summary.failed.to_string()),
            ("qa_tests_skipped", "Tests skipped", summary.skipped.to_string()),
            ("qa_tests_flaky", "Tests that needed a rerun", summary.flaky.to_string()),
            (
                "qa_test_session_duration_seconds",
                "Wall clock duration of the test session",
                format!("{:.3}", summary.duration_seconds),
            ),
        ];

        let mut out = String::new();
        for (name, help, value) in gauges {
            // Writing to a String cannot fail
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} gauge", name);
            let _ = writeln!(out, "{} {}", name, value);
        }
        out
    }
}

impl MetricsExporter for TextfileExporter {
    fn write(&self, path: &Path, summary: &SessionSummary) -> E2eResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, self.render(summary))?;
        std::fs::rename(&tmp, path)?;

        info!(target: "qa", event = "metrics_written", path = %path.display(), "metrics_written");
        Ok(())
    }
}

/// Metrics destination from `METRICS_PATH`; `None` disables export
pub fn metrics_path(ctx: &RunContext) -> Option<PathBuf> {
    ctx.env_var(env::METRICS_PATH).map(PathBuf::from)
}

/// Export the summary if a destination is configured.
///
/// Returns the path written to, or `None` when export is disabled.
pub fn export_summary(
    ctx: &RunContext,
    exporter: &dyn MetricsExporter,
    summary: &SessionSummary,
) -> E2eResult<Option<PathBuf>> {
    match metrics_path(ctx) {
        Some(path) => {
            exporter.write(&path, summary)?;
            Ok(Some(path))
        }
        None => Ok(None),
    }
}
