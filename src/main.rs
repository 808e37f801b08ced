#![forbid(unsafe_code)]

//! `agentmux`: PTY session multiplexer binary.
//!
//! Loads configuration, starts the idle monitor, and serves the NDJSON
//! control bridge on stdin/stdout. Logs go to stderr so they never mix with
//! bridge traffic.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use agentmux::config::GlobalConfig;
use agentmux::orchestrator::idle_monitor::IdleMonitor;
use agentmux::{ipc, AppError, Result, SessionManager};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agentmux", about = "PTY session multiplexer for agent CLIs", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agentmux bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    info!(
        buffer_max_bytes = config.buffer.max_bytes,
        idle_enabled = config.idle.enabled,
        "configuration loaded"
    );

    let manager = SessionManager::from_config(&config);
    let ct = CancellationToken::new();

    // ── Start idle monitor ──────────────────────────────
    let idle_handle = config.idle.enabled.then(|| {
        IdleMonitor::new(
            manager.clone(),
            config.idle_threshold(),
            config.sweep_interval(),
            ct.child_token(),
        )
        .spawn()
    });

    // ── Serve the control bridge ────────────────────────
    let bridge_ct = ct.clone();
    let bridge_manager = manager.clone();
    let mut bridge_handle = tokio::spawn(async move {
        if let Err(err) = ipc::serve(
            bridge_manager,
            tokio::io::stdin(),
            tokio::io::stdout(),
            bridge_ct,
        )
        .await
        {
            error!(%err, "control bridge failed");
        }
    });

    info!("agentmux ready");

    // ── Wait for shutdown signal or bridge EOF ──────────
    tokio::select! {
        () = shutdown_signal() => {
            info!("shutdown signal received");
            ct.cancel();
            let _ = (&mut bridge_handle).await;
        }
        _ = &mut bridge_handle => {
            info!("control bridge closed");
            ct.cancel();
        }
    }

    manager.shutdown().await;
    if let Some(handle) = idle_handle {
        handle.await_completion().await;
    }
    info!("agentmux shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
