//! Structured JSON logging
//!
//! One JSON object per line on stderr. Event fields are flattened into the
//! record next to `timestamp`, `level` and `target`, so a `test_end` line
//! carries `outcome` and `duration_ms` at the top level.

use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

/// JSON formatting layer writing to `make_writer`
pub fn json_layer<S, W>(make_writer: W) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(false)
        .with_span_list(false)
        .with_target(true)
        .with_writer(make_writer)
}

/// `RUST_LOG` if set, otherwise `info` (or `debug` when asked)
pub fn env_filter(debug: bool) -> EnvFilter {
    if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global subscriber.
///
/// Returns `false` if one was already installed.
pub fn init(debug: bool) -> bool {
    tracing_subscriber::registry()
        .with(json_layer(std::io::stderr))
        .with(env_filter(debug))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io;
    use std::path::PathBuf;
    use std::sync::Arc;

    use crate::reporter::{CaseContext, CaseOutcome, LifecycleReporter};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(f: impl FnOnce()) -> Vec<serde_json::Value> {
        let buf = SharedBuf::default();
        let writer = buf.clone();
        let subscriber = tracing_subscriber::registry().with(json_layer(move || writer.clone()));
        tracing::subscriber::with_default(subscriber, f);

        let bytes = buf.0.lock().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn context() -> CaseContext {
        CaseContext {
            browser: "firefox".into(),
            base_url: "http://localhost:3000/".into(),
            headless: true,
            worker: "gw1".into(),
            artifact_dir: PathBuf::from("artifacts/todo.yaml__adds"),
            retries: 1,
        }
    }

    #[test]
    fn test_start_and_end_events_are_flat_json() {
        let records = capture(|| {
            let mut reporter = LifecycleReporter::new();
            reporter.on_case_start("todo.yaml::adds", context());
            reporter.on_case_end("todo.yaml::adds", CaseOutcome::Failed, Some(42));
        });

        assert_eq!(records.len(), 2);
        let start = &records[0];
        assert_eq!(start["event"], "test_start");
        assert_eq!(start["target"], "qa");
        assert_eq!(start["level"], "INFO");
        assert_eq!(start["test_id"], "todo.yaml::adds");
        assert_eq!(start["browser"], "firefox");
        assert_eq!(start["base_url"], "http://localhost:3000/");
        assert_eq!(start["headless"], true);
        assert_eq!(start["worker"], "gw1");
        assert_eq!(start["artifact_dir"], "artifacts/todo.yaml__adds");
        assert_eq!(start["retries"], 1);
        assert!(start["timestamp"].is_string());

        let end = &records[1];
        assert_eq!(end["event"], "test_end");
        assert_eq!(end["outcome"], "failed");
        assert_eq!(end["duration_ms"], 42);
        assert_eq!(end["worker"], "gw1");
    }

    #[test]
    fn test_env_filter_debug_override() {
        assert_eq!(env_filter(true).to_string(), "debug");
    }
}
