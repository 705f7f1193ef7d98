use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;

use bookforge::app::{Services, http};
use bookforge::config::Settings;

#[derive(Debug, Parser)]
#[command(author, version, about = "HTTP server for the book production pipeline")]
struct AppArgs {
    /// YAML settings file (default: `$BOOKFORGE_CONFIG`, then built-in defaults).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `addr` from the settings.
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Overrides `data_dir` from the settings.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Overrides `max_concurrency` from the settings.
    #[arg(long)]
    max_concurrency: Option<usize>,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    bookforge::logging::init()?;

    let args = AppArgs::parse();
    tracing::info!(?args, "starting bookforge-app");

    let mut settings = Settings::load(args.config.as_deref()).context("load settings")?;
    if let Some(addr) = args.addr {
        settings.addr = addr;
    }
    if let Some(data_dir) = args.data_dir {
        settings.data_dir = data_dir;
    }
    if let Some(max_concurrency) = args.max_concurrency {
        settings.max_concurrency = max_concurrency;
    }
    if settings.webhook_token.is_none() {
        tracing::warn!("webhook_token is not set; payment webhooks will be refused");
    }
    if settings.admin_token.is_none() {
        tracing::warn!("admin_token is not set; admin routes are disabled");
    }

    let addr = settings.addr;
    let services = Services::from_settings(settings)?;
    let app = http::router(services);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| anyhow::anyhow!("bind {addr}: {err}"))?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(err = ?err, "listen for shutdown signal failed");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested; in-flight pipeline runs stop with the process");
}
