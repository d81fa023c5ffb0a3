//! The per-host agent: lists local containers and runs scans on request.

pub mod api;
pub mod docker;
pub mod lifecycle;
pub mod scanner;

use std::sync::Arc;

use crate::config::AgentConfig;
use docker::{DockerRuntime, RuntimeError};
use lifecycle::ScanLifecycle;
use scanner::TrivyScanner;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("Unable to bind agent listener: {0}")]
    Io(#[from] std::io::Error),
}

pub async fn run(config: &AgentConfig) -> Result<(), AgentError> {
    let runtime = DockerRuntime::connect()?;
    let scanner = TrivyScanner::new(&config.scanner_binary);
    let lifecycle = ScanLifecycle::new(
        Arc::new(runtime),
        Arc::new(scanner),
        config.scan_concurrency,
    );

    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    log::info!(
        "Agent listening on {} with {} concurrent scan(s)",
        config.listen,
        config.scan_concurrency
    );
    crate::signals::notify_ready();

    axum::serve(listener, api::router(lifecycle))
        .with_graceful_shutdown(crate::signals::shutdown_signal())
        .await?;
    Ok(())
}
