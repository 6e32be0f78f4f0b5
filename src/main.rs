use std::{process, sync::Arc};

use sportello::{
    cache::SwrCache,
    config,
    infra::{
        error::InfraError,
        http::{AppState, CachePolicies, build_router},
        telemetry,
        upstream::HttpUpstream,
    },
};
use thiserror::Error;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[derive(Debug, Error)]
enum RunError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] config::LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("server error: {0}")]
    Server(std::io::Error),
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &RunError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), RunError> {
    // `serve` is the only command; overrides were already folded into the
    // settings during load.
    let (_cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    serve(settings).await
}

async fn serve(settings: config::Settings) -> Result<(), RunError> {
    let upstream = Arc::new(HttpUpstream::new(&settings.upstream)?);

    let state = AppState {
        upstream,
        cache: SwrCache::new(),
        policies: CachePolicies::from(&settings.cache),
    };

    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| RunError::Infra(InfraError::from(err)))?;

    info!(
        target = "sportello::serve",
        addr = %settings.server.addr,
        upstream = %settings.upstream.base_url,
        "Proxy listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(RunError::Server)?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to install ctrl-c handler");
        return;
    }
    info!(target = "sportello::serve", "Shutdown signal received");
}
