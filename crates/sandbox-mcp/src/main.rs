//! Sandbox MCP Server entry point.
//!
//! ## Modes
//!
//! Exactly one mode flag is required:
//!
//! - **--pull [--force]**: fetch the default sandbox definitions, then exit
//! - **--build**: build an image for every sandbox, then exit
//! - **--sse**: serve tools over HTTP/SSE
//! - **--stdio**: serve tools over stdin/stdout

use anyhow::Context;
use clap::{ArgGroup, Parser};
use sandbox_core::{build_all, load_sandbox_configs, pull_sandboxes, DockerRuntime, TracingReporter};
use sandbox_mcp::{serve, AppConfig, SandboxServer, Transport};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Expose Docker sandboxes as MCP tools.
#[derive(Debug, Parser)]
#[command(name = "sandbox-mcp", version, about)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["pull", "build", "sse", "stdio"])
))]
struct Cli {
    /// Pull the default sandboxes into the sandboxes directory and exit
    #[arg(long)]
    pull: bool,

    /// With --pull, overwrite sandboxes that already exist
    #[arg(long, requires = "pull")]
    force: bool,

    /// Build Docker images for all sandboxes and exit
    #[arg(long)]
    build: bool,

    /// Serve over HTTP/SSE
    #[arg(long)]
    sse: bool,

    /// Serve over stdin/stdout
    #[arg(long)]
    stdio: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr (stdout is the MCP transport in stdio mode)
    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("sandbox_mcp=info".parse()?)
                .add_directive("sandbox_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = AppConfig::from_env().context("Failed to load sandbox-mcp configuration")?;
    tracing::info!(?config, "Configuration loaded");

    if cli.pull {
        let report = pull_sandboxes(&config.sandboxes_path, cli.force, &config.pull_url)
            .await
            .context("Failed to pull sandboxes")?;
        tracing::info!(
            installed = report.installed.len(),
            replaced = report.replaced.len(),
            skipped = report.skipped.len(),
            path = %config.sandboxes_path.display(),
            "Pull complete"
        );
        return Ok(());
    }

    config.validate_warn();
    let configs = load_sandbox_configs(&config.sandboxes_path)
        .context("Failed to load sandbox configs")?;

    if cli.build {
        let runtime = DockerRuntime::connect()
            .await
            .context("Failed to connect to Docker daemon")?;
        tracing::info!(count = configs.len(), "Building Docker images for all sandboxes");

        let cancel = CancellationToken::new();
        let on_ctrl_c = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling builds");
                on_ctrl_c.cancel();
            }
        });

        let summary = build_all(
            &runtime,
            &configs,
            &config.sandboxes_path,
            &cancel,
            &mut TracingReporter,
        )
        .await;

        tracing::info!(
            built = summary.built.len(),
            failed = summary.failed.len(),
            "Build pass finished"
        );
        if !summary.all_succeeded() {
            let failed: Vec<_> = summary.failed.iter().map(|(id, _)| id.as_str()).collect();
            anyhow::bail!("failed to build {}", failed.join(", "));
        }
        return Ok(());
    }

    let transport = if cli.sse {
        Transport::Sse(config.http_addr)
    } else {
        Transport::Stdio
    };

    // Tools are served even when the daemon is down; each call then
    // reports the runtime as unreachable.
    let runtime = DockerRuntime::connect_lazy().context("Failed to configure Docker client")?;
    if let Err(e) = runtime.ping().await {
        tracing::warn!(error = %e, "Docker daemon not reachable, sandbox calls will fail until it is");
    }

    let server = SandboxServer::new(configs, Arc::new(runtime));
    let shutdown = async {
        let _ = signal::ctrl_c().await;
        tracing::info!("Received shutdown signal");
    };

    serve(server, transport, shutdown)
        .await
        .context("Transport failed")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}
