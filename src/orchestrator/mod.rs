//! The central service: registered hosts, durable scan history and the
//! reporting and remediation endpoints built on top of it.

pub mod agent_client;
pub mod api;
pub mod error;
pub mod ingestion;
pub mod remediation;
pub mod report;
pub mod scans;
pub mod store;

use std::sync::Arc;

use crate::config::OrchestratorConfig;
use agent_client::HttpAgentClient;
use api::AppState;
use remediation::Remediation;
use scans::ScanCoordinator;
use store::{Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Unable to bind orchestrator listener: {0}")]
    Io(#[from] std::io::Error),
}

pub async fn run(config: &OrchestratorConfig) -> Result<(), OrchestratorError> {
    let store = Store::open(&config.database).await?;
    let agent = Arc::new(HttpAgentClient::new(config.timeouts()));

    let state = Arc::new(AppState {
        scans: ScanCoordinator::new(store.clone(), agent),
        remediation: Remediation::new(store.clone(), config.remediation_parallelism),
        store,
    });

    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    log::info!("Orchestrator listening on {}", config.listen);
    crate::signals::notify_ready();

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(crate::signals::shutdown_signal())
        .await?;
    Ok(())
}
