mod config;
mod error;
mod routes;
mod sources;
mod stats;

use std::net::IpAddr;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use config::{Config, RouteGroup};
use error::{AppError, AppResult};
use routes::backend::{NetlinkBackend, RouteBackend};
use routes::dispatcher::Dispatcher;
use stats::Recorder;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error reading configuration: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging; RUST_LOG directives win over the configured level
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.log_level).into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::info!("Route loader starting...");

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let backend = Arc::new(NetlinkBackend::connect().context("failed to open rtnetlink socket")?);

    if config.configure_primary_interface {
        if let Some(primary) = config.primary() {
            tracing::info!("Setting gateway IP on interface {}", primary.interface);
            let gateway: IpAddr = primary
                .gateway
                .parse()
                .map_err(|_| AppError::InvalidGateway(primary.gateway.clone()))?;
            backend
                .prepare_interface(&primary.interface, gateway)
                .await
                .with_context(|| format!("failed to set up interface {}", primary.interface))?;
        }
    }

    let recorder = Arc::new(Recorder::spawn(config.duplicates.clone()));
    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let dispatcher = Dispatcher::new(
        backend,
        recorder.clone(),
        config.concurrency,
        config.debug,
        shutdown.clone(),
    );

    let result = install_all(&dispatcher, &config.groups, &shutdown).await;

    // The report goes out whether we finished, were interrupted or hit a fatal error.
    recorder.close().await;
    println!("\n{}", recorder.report());

    if let Err(e) = result {
        if e.is_config() {
            tracing::error!("{}", e.user_message());
        }
        return Err(e.into());
    }
    Ok(())
}

async fn install_all<B: RouteBackend>(
    dispatcher: &Dispatcher<B>,
    groups: &[RouteGroup],
    shutdown: &CancellationToken,
) -> AppResult<()> {
    if groups.is_empty() {
        tracing::warn!("No gateway/interface pair configured - nothing to do");
    }

    for group in groups {
        if shutdown.is_cancelled() {
            break;
        }

        tracing::info!("Adding {} routes for interface: {}", group.label, group.interface);

        let files = match sources::discover(&group.routes_dir) {
            Ok(Some(files)) => files,
            Ok(None) => {
                tracing::warn!("Directory {} does not exist - skipping", group.routes_dir.display());
                continue;
            }
            Err(e) => {
                tracing::error!("Error reading folder {}: {}", group.routes_dir.display(), e);
                continue;
            }
        };

        if files.is_empty() {
            tracing::warn!("No route files found in {} - skipping", group.routes_dir.display());
            continue;
        }

        for path in files {
            if shutdown.is_cancelled() {
                break;
            }

            tracing::info!("Processing: {}", path.display());
            let batch = match sources::load(&path) {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!("Error loading route file {}: {}", path.display(), e);
                    continue;
                }
            };

            let report = dispatcher.run(&batch, &group.gateway, &group.interface).await?;
            if report.interrupted {
                tracing::warn!(
                    "{} interrupted after dispatching {} of {} destinations",
                    report.name,
                    report.dispatched,
                    batch.destinations.len()
                );
            } else {
                tracing::info!("Finished {} ({} destinations)", report.name, report.dispatched);
            }
        }
    }

    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
async fn watch_signals(shutdown: CancellationToken) {
    let mut terminate =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => Some(signal),
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                None
            }
        };

    let sigterm = async {
        match terminate.as_mut() {
            Some(signal) => {
                signal.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!("Cannot listen for Ctrl-C: {}", e);
                return;
            }
        }
        _ = sigterm => {}
    }

    tracing::info!("Received interrupt signal, shutting down...");
    shutdown.cancel();
}
