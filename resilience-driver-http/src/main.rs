//! `resilience-driver` command-line runner.
//!
//! Runs one attempt loop per simulated user against an HTTP backend and prints the collected
//! metrics as a JSON array on stdout. Ctrl-C stops every run and reports partial metrics.
//! `--request` takes bounds and policy from an orchestrator request body instead of flags.

use anyhow::{Context, Result};
use clap::Parser;
use futures::FutureExt;
use resilience_driver::config::PolicyConfig;
use resilience_driver::{PolicyExecutor, RequestDriver};
use resilience_driver_http::{report, HttpConfig, HttpTransport, RunPlan, DEFAULT_STATUS_PATH};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "resilience-driver", version, about = "Drive policy-wrapped calls against a backend")]
struct Cli {
    /// Backend base URL, e.g. http://backend:8080
    #[arg(long, env = "RESILIENCE_BACKEND_URL")]
    base_url: String,

    /// Path appended to the base URL for every call
    #[arg(long, env = "RESILIENCE_STATUS_PATH", default_value = DEFAULT_STATUS_PATH)]
    status_path: String,

    /// Successful attempts each user aims for
    #[arg(long, default_value_t = 10)]
    target: usize,

    /// Attempt ceiling per user
    #[arg(long, default_value_t = 100)]
    max: usize,

    /// Concurrent simulated users
    #[arg(long, default_value_t = 1)]
    users: u64,

    /// JSON policy document; pass-through when omitted
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Orchestrator request body (`maxRequestsAllowed`, `targetSuccessfulRequests`, `params`)
    #[arg(long, conflicts_with_all = ["target", "max", "policy"])]
    request: Option<PathBuf>,

    /// Client-side timeout for each HTTP request
    #[arg(long)]
    request_timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let plan = match &cli.request {
        Some(path) => RunPlan::from_json(&read(path, "run request")?)
            .with_context(|| format!("loading run request {}", path.display()))?,
        None => {
            let policy = match &cli.policy {
                Some(path) => PolicyConfig::from_json(&read(path, "policy")?)?,
                None => PolicyConfig::None,
            }
            .build()
            .context("building policy")?;
            RunPlan { target: cli.target, max: cli.max, policy }
        }
    };

    let mut config = HttpConfig::new(cli.base_url).with_status_path(cli.status_path);
    if let Some(ms) = cli.request_timeout_ms {
        config = config.with_request_timeout(Duration::from_millis(ms));
    }
    let transport = HttpTransport::new(&config)?;
    tracing::info!(
        url = %transport.url(),
        policy = plan.policy.name(),
        users = cli.users,
        target = plan.target,
        max = plan.max,
        "starting runs"
    );

    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            tracing::warn!("ctrl-c handler unavailable; runs cannot be interrupted");
            std::future::pending::<()>().await;
        }
    }
    .boxed()
    .shared();

    let subjects: Vec<u64> = (1..=cli.users).collect();
    let driver = RequestDriver::new(transport);
    let results = driver
        .run_subjects_until(&plan.policy, subjects.iter().copied(), plan.target, plan.max, |_| {
            ctrl_c.clone()
        })
        .await;

    println!("{}", serde_json::to_string_pretty(&report(&subjects, &results))?);
    Ok(())
}

fn read(path: &Path, what: &str) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {what} file {}", path.display()))
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}
