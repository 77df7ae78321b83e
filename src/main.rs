use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use hostwatch::config::WatchDefinition;
use hostwatch::runtime::Runtime;

/// Pluggable host telemetry agent.
#[derive(Parser)]
#[command(name = "hostwatch", about)]
struct Cli {
    /// Path to the YAML definition file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level, overriding the definition (trace, debug,
    /// info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Validate the definition and initialize components, then exit.
    #[arg(long)]
    check: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

/// Build-time version info.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

/// How long a failed start gets to unwind before the process exits.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Version) = &cli.command {
        println!("hostwatch {}", version::full());
        return Ok(());
    }

    let config_path = cli
        .config
        .clone()
        .context("--config is required (use --help for usage)")?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async {
        let definition = WatchDefinition::load(&config_path).await?;

        init_logging(&cli, &definition)?;

        tracing::info!(
            version = version::RELEASE,
            commit = version::git_commit(),
            config = %config_path.display(),
            "starting hostwatch",
        );

        run(cli, definition).await
    })
}

/// Initialize the global subscriber from the definition's logging
/// settings, with the CLI level taking precedence.
fn init_logging(cli: &Cli, definition: &WatchDefinition) -> Result<()> {
    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(&definition.config.log_level);

    let filter =
        EnvFilter::try_new(level).with_context(|| format!("invalid log level: {level}"))?;

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(definition.config.log_colors);

    if definition.config.log_times {
        builder.init();
    } else {
        builder.without_time().init();
    }

    Ok(())
}

async fn run(cli: Cli, definition: WatchDefinition) -> Result<()> {
    let mut runtime = Runtime::new();
    runtime.init(&definition)?;

    if cli.check {
        tracing::info!("definition is valid");
        return Ok(());
    }

    // Set up signal handling.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    tracing::error!(error = %e, "failed to register SIGTERM handler");
                    return;
                }
            };

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
            }
        }

        let _ = shutdown_tx.send(());
    });

    if let Err(e) = runtime.start().await {
        // Give whatever did start a bounded window to unwind.
        if tokio::time::timeout(SHUTDOWN_GRACE, runtime.stop())
            .await
            .is_err()
        {
            tracing::warn!("shutdown grace period elapsed");
        }
        return Err(e.context("starting runtime"));
    }

    // Wait for shutdown signal.
    let _ = shutdown_rx.await;

    runtime.stop().await?;

    tracing::info!("hostwatch stopped");

    Ok(())
}
