//! qaui-e2e: runs YAML browser cases through Playwright
//!
//! Exit codes: 0 when no case failed, 1 when any case failed or errored,
//! 2 when the run could not start (invalid settings, missing Playwright,
//! unreadable specs).

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use qaui_common::{CliValues, RunContext};
use qaui_e2e::metrics::export_summary;
use qaui_e2e::playwright::PlaywrightLauncher;
use qaui_e2e::{logging, RunnerConfig, TestRunner, TextfileExporter};

#[derive(Parser, Debug)]
#[command(name = "qaui-e2e")]
#[command(about = "Browser E2E runner with artifact retention and run metrics")]
#[command(version)]
struct Args {
    /// Path to case specs directory
    #[arg(short, long, default_value = "tests/specs")]
    specs: PathBuf,

    /// Run only cases carrying this tag
    #[arg(short, long)]
    tag: Option<String>,

    /// Run only cases whose name contains this text
    #[arg(short, long)]
    name: Option<String>,

    /// Extra attempts for a failing case
    #[arg(long, default_value = "0")]
    reruns: u32,

    /// Results file [default: <artifacts-dir>/test-results.json]
    #[arg(long)]
    results: Option<PathBuf>,

    /// Application base URL [env: BASE_URL]
    #[arg(long)]
    base_url: Option<String>,

    /// Browser engine: chromium, firefox or webkit [env: BROWSER]
    #[arg(long)]
    browser: Option<String>,

    /// Show the browser window [env: HEADLESS=false]
    #[arg(long, conflicts_with = "headless")]
    headed: bool,

    /// Hide the browser window [env: HEADLESS=true]
    #[arg(long)]
    headless: bool,

    /// Delay between browser operations in ms [env: SLOWMO_MS]
    #[arg(long)]
    slowmo_ms: Option<u64>,

    /// Viewport as WIDTHxHEIGHT [env: VIEWPORT]
    #[arg(long)]
    viewport: Option<String>,

    /// Root directory for per-case artifacts [env: ARTIFACTS_DIR]
    #[arg(long)]
    artifacts_dir: Option<PathBuf>,

    /// Trace retention: on, off or on-failure [env: TRACE]
    #[arg(long = "pw-trace", alias = "playwright-trace")]
    trace: Option<String>,

    /// Video retention: on, off or on-failure [env: VIDEO]
    #[arg(long)]
    video: Option<String>,

    /// Screenshot retention: on, off or on-failure [env: SCREENSHOT]
    #[arg(long)]
    screenshot: Option<String>,

    /// Default timeout for browser actions in ms [env: TIMEOUT_MS]
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Browser locale [env: LOCALE]
    #[arg(long)]
    locale: Option<String>,

    /// Browser timezone id [env: TIMEZONE_ID]
    #[arg(long)]
    timezone_id: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn cli_values(&self) -> CliValues {
        let headless = if self.headed {
            Some(false)
        } else if self.headless {
            Some(true)
        } else {
            None
        };

        CliValues {
            base_url: self.base_url.clone(),
            browser: self.browser.clone(),
            headless,
            slow_motion_ms: self.slowmo_ms,
            viewport: self.viewport.clone(),
            artifacts_dir: self.artifacts_dir.clone(),
            timeout_ms: self.timeout_ms,
            trace: self.trace.clone(),
            video: self.video.clone(),
            screenshot: self.screenshot.clone(),
            locale: self.locale.clone(),
            timezone_id: self.timezone_id.clone(),
        }
    }

    fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            specs_dir: self.specs.clone(),
            tag: self.tag.clone(),
            name: self.name.clone(),
            reruns: self.reruns,
            worker: None,
            results_path: self.results.clone(),
        }
    }
}

fn main() {
    let args = Args::parse();
    logging::init(args.debug);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to create tokio runtime");
            std::process::exit(2);
        }
    };

    match rt.block_on(async_main(args)) {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!(error = %format!("{:#}", e), "Run aborted");
            std::process::exit(2);
        }
    }
}

async fn async_main(args: Args) -> anyhow::Result<bool> {
    let ctx = RunContext::new(args.cli_values());

    // Surface configuration errors before anything touches the browser
    let settings = ctx.settings()?;
    info!(
        browser = %settings.browser_name,
        base_url = %settings.base_url,
        headless = settings.headless,
        viewport = %settings.viewport,
        trace = %settings.trace_mode,
        video = %settings.video_mode,
        screenshot = %settings.screenshot_mode,
        "qaui-e2e v{}",
        qaui_common::VERSION
    );

    let launcher = PlaywrightLauncher::new();
    launcher.check_playwright_installed()?;

    let mut runner = TestRunner::new(&ctx, launcher, args.runner_config())?;
    let results = runner.run_all().await?;
    runner.write_results(&results)?;

    if let Some(path) = export_summary(&ctx, &TextfileExporter::new(), &results.summary)? {
        info!(path = %path.display(), "Metrics exported");
    }

    Ok(results.success())
}
