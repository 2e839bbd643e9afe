//! # Twinplane CLI
//!
//! Command-line entry point for the twinplane module supervisor.
//!
//! # Usage
//!
//! ```bash
//! twinplane --plane-url http://plane-a:8080,http://plane-b:8080 --site plant-7
//! ```
//!
//! # Environment Variables
//!
//! All CLI arguments can also be set via environment variables:
//!
//! - `TWIN_PLANE_URLS`: Comma-separated management plane URLs
//! - `TWIN_API`: URL of the local twin runtime
//! - `TWIN_SITE`: Site tag reported at registration
//! - `TWIN_ROLE`: Role the module registers under
//!
//! See `--help` for the full list of options.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use twinplane::{
    ActivationReconciler, Config, EndpointSettingsApplier, HttpPlaneClient, HttpTwinServices,
    ShutdownSignal, Supervisor,
};

/// Command-line arguments for the twinplane module.
#[derive(Parser, Debug)]
#[command(name = "twinplane", author, version, about = "Edge twin module supervisor")]
struct Args {
    /// Comma-separated candidate management plane URLs, probed in order
    #[arg(long = "plane-url", env = "TWIN_PLANE_URLS")]
    plane_urls: Option<String>,

    /// URL of the local twin runtime
    #[arg(long = "twin-api", env = "TWIN_API", default_value = "")]
    twin_api: String,

    /// Site tag reported at registration
    #[arg(long, env = "TWIN_SITE")]
    site: Option<String>,

    /// Role the module registers under
    #[arg(long, env = "TWIN_ROLE", default_value = "supervisor")]
    role: String,

    /// Module type reported at registration
    #[arg(long = "module-type", env = "TWIN_MODULE_TYPE", default_value = "OpcTwin")]
    module_type: String,

    /// Interval between desired-state polls (seconds)
    #[arg(long, env = "TWIN_POLL_INTERVAL_SECS", default_value_t = 10)]
    poll_interval_secs: u64,

    /// Timeout for every HTTP request (seconds)
    #[arg(long, env = "TWIN_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,

    /// First delay after a faulted session (milliseconds)
    #[arg(long, env = "TWIN_RESTART_BACKOFF_MS", default_value_t = 200)]
    restart_backoff_ms: u64,

    /// Upper bound for the restart delay (milliseconds)
    #[arg(long, env = "TWIN_RESTART_BACKOFF_MAX_MS", default_value_t = 30_000)]
    restart_backoff_max_ms: u64,

    /// Keep activation directives whose call failed for the next pass
    #[arg(long, env = "TWIN_RETAIN_FAILED_DIRECTIVES", default_value_t = false)]
    retain_failed_directives: bool,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(error = %format!("{err:#}"), "twinplane failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_tracing();

    let args = Args::parse();

    let mut cfg = Config {
        role: args.role,
        site: args.site,
        module_type: args.module_type,
        plane_urls: split_csv(args.plane_urls),
        twin_api: args.twin_api,
        poll_interval: Duration::from_secs(args.poll_interval_secs),
        request_timeout: Duration::from_secs(args.request_timeout_secs),
        restart_backoff: Duration::from_millis(args.restart_backoff_ms),
        restart_backoff_max: Duration::from_millis(args.restart_backoff_max_ms),
        retain_failed_directives: args.retain_failed_directives,
    };
    cfg.apply_defaults();

    let twin = Arc::new(HttpTwinServices::new(&cfg).context("create twin runtime client")?);
    let reconciler = Arc::new(
        ActivationReconciler::new(twin.clone()).with_retain_failed(cfg.retain_failed_directives),
    );
    let applier = Arc::new(EndpointSettingsApplier::new(twin));
    let plane = Arc::new(
        HttpPlaneClient::new(&cfg, reconciler, applier)
            .context("create management plane client")?,
    );

    let shutdown = ShutdownSignal::new();
    let supervisor = Supervisor::new(&cfg, plane.clone(), plane, shutdown.clone());

    tokio::spawn(async move {
        match wait_for_termination().await {
            Ok(()) => info!("termination requested, shutting down"),
            Err(err) => error!(error = %err, "failed to listen for termination signals"),
        }
        shutdown.trigger();
    });

    info!(
        role = %cfg.role,
        site = ?cfg.site,
        planes = cfg.plane_urls.len(),
        "twinplane started"
    );
    let report = supervisor.run().await;
    info!(
        sessions = report.sessions,
        faults = report.faults,
        "twinplane stopped"
    );

    Ok(())
}

/// Resolves on ctrl+c or, on unix, SIGTERM.
async fn wait_for_termination() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("wait for ctrl+c"),
            _ = term.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("wait for ctrl+c")
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}

fn split_csv(input: Option<String>) -> Vec<String> {
    input
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
