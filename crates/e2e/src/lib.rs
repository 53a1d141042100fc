//! qaui E2E Test Framework
//!
//! This crate runs declarative browser cases against a web application:
//! - Resolves one settings snapshot per run (CLI > env > defaults)
//! - Opens one Playwright-backed browser session per case
//! - Keeps or discards screenshots, traces, videos and console logs per
//!   retention mode once each case's outcome is final
//! - Emits JSON lifecycle events and a Prometheus textfile summary
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    E2E Test Runner (Rust)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestRunner                                                 │
//! │    ├── setup:    on_case_start, begin_case, open session    │
//! │    ├── call:     execute steps through BasePage             │
//! │    ├── teardown: end_case (retention), on_case_end          │
//! │    └── session:  on_session_end -> SessionSummary           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ArtifactManager      Created -> Capturing -> Decided       │
//! │                                 -> Persisted | Discarded    │
//! │  LifecycleReporter    phase reports -> one outcome per case │
//! │  TextfileExporter     SessionSummary -> qa_tests_* gauges   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  BrowserSession (trait)                                     │
//! │    ├── PlaywrightSession  node driver, JSON lines           │
//! │    └── MockSession        scripted, in-memory               │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod artifacts;
pub mod driver;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pages;
pub mod playwright;
pub mod reporter;
pub mod runner;
pub mod spec;
pub mod testing;

pub use artifacts::{ArtifactKind, ArtifactManager, ArtifactState, RetentionPolicy};
pub use driver::{BrowserSession, SessionFactory};
pub use error::{E2eError, E2eResult};
pub use metrics::{MetricsExporter, TextfileExporter};
pub use reporter::{CaseOutcome, LifecycleReporter, SessionSummary};
pub use runner::{RunnerConfig, TestRunner, TestSuiteResult};
pub use spec::{TestSpec, TestStep};
