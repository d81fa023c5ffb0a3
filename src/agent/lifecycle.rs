//! Scan lifecycle on the agent.
//!
//! Every scan lives in an in-memory table keyed by its scan id for the lifetime
//! of the process. `start_scan` records a pending entry and hands execution to
//! a background task; the task waits for a slot in the concurrency gate, runs
//! the scanner and records the terminal state. Nothing here survives a
//! restart.

use std::{collections::HashMap, num::NonZeroUsize, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, Semaphore};
use uuid::Uuid;

use crate::agent::{
    docker::{ContainerRuntime, RuntimeError},
    scanner::Scanner,
};
use crate::wire::{AgentScanRecord, ContainerInfo, ScanStatus};

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Container {0} not found")]
    ContainerNotFound(String),
    #[error("Scan {0} not found")]
    ScanNotFound(String),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// State of one scan. The finish time only exists on terminal variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanState {
    Pending,
    Running,
    Completed {
        finished_at: DateTime<Utc>,
        results: serde_json::Value,
    },
    Error {
        finished_at: DateTime<Utc>,
        message: String,
    },
}

impl ScanState {
    pub fn status(&self) -> ScanStatus {
        match self {
            Self::Pending => ScanStatus::Pending,
            Self::Running => ScanStatus::Running,
            Self::Completed { .. } => ScanStatus::Completed,
            Self::Error { .. } => ScanStatus::Error,
        }
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Completed { finished_at, .. } | Self::Error { finished_at, .. } => {
                Some(*finished_at)
            }
            Self::Pending | Self::Running => None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self::Error {
            finished_at: Utc::now(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanRecord {
    pub scan_id: String,
    pub container_id: String,
    pub started_at: DateTime<Utc>,
    pub state: ScanState,
}

impl From<&ScanRecord> for AgentScanRecord {
    fn from(record: &ScanRecord) -> Self {
        let (results, error) = match &record.state {
            ScanState::Completed { results, .. } => (Some(results.clone()), None),
            ScanState::Error { message, .. } => (None, Some(message.clone())),
            ScanState::Pending | ScanState::Running => (None, None),
        };
        AgentScanRecord {
            scan_id: record.scan_id.clone(),
            container_id: record.container_id.clone(),
            status: record.state.status(),
            started_at: record.started_at,
            finished_at: record.state.finished_at(),
            results,
            error,
        }
    }
}

#[derive(Clone)]
pub struct ScanLifecycle {
    runtime: Arc<dyn ContainerRuntime>,
    scanner: Arc<dyn Scanner>,
    gate: Arc<Semaphore>,
    scans: Arc<RwLock<HashMap<String, ScanRecord>>>,
}

impl ScanLifecycle {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        scanner: Arc<dyn Scanner>,
        concurrency: NonZeroUsize,
    ) -> Self {
        Self {
            runtime,
            scanner,
            gate: Arc::new(Semaphore::new(concurrency.get())),
            scans: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn list_containers(&self) -> Result<Vec<ContainerInfo>, ScanError> {
        Ok(self.runtime.list_containers().await?)
    }

    /// Registers a pending scan and schedules it. Returns without waiting for
    /// a concurrency slot.
    pub async fn start_scan(&self, container_id: &str) -> Result<AgentScanRecord, ScanError> {
        let image = self
            .runtime
            .container_image(container_id)
            .await?
            .ok_or_else(|| ScanError::ContainerNotFound(container_id.to_string()))?;

        let scan_id = Uuid::new_v4().to_string();
        let record = ScanRecord {
            scan_id: scan_id.clone(),
            container_id: container_id.to_string(),
            started_at: Utc::now(),
            state: ScanState::Pending,
        };
        let view = AgentScanRecord::from(&record);
        self.scans.write().await.insert(scan_id.clone(), record);
        log::info!("Scan {scan_id} queued for container {container_id} ({image})");

        tokio::spawn(self.clone().execute(scan_id, image));
        Ok(view)
    }

    pub async fn get_scan_status(&self, scan_id: &str) -> Result<AgentScanRecord, ScanError> {
        self.scans
            .read()
            .await
            .get(scan_id)
            .map(AgentScanRecord::from)
            .ok_or_else(|| ScanError::ScanNotFound(scan_id.to_string()))
    }

    /// Applies `next` only if it moves the scan forward.
    async fn transition(&self, scan_id: &str, next: ScanState) -> bool {
        let mut scans = self.scans.write().await;
        let Some(record) = scans.get_mut(scan_id) else {
            log::warn!("Scan {scan_id} vanished from the scan table");
            return false;
        };
        let current = record.state.status();
        if !current.can_advance_to(next.status()) {
            log::warn!(
                "Ignoring transition of scan {scan_id} from {current} to {}",
                next.status()
            );
            return false;
        }
        log::info!("Scan {scan_id}: {current} -> {}", next.status());
        record.state = next;
        true
    }

    async fn execute(self, scan_id: String, image: String) {
        let _permit = match Arc::clone(&self.gate).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                log::error!("Concurrency gate closed before scan {scan_id} could run: {e}");
                self.transition(&scan_id, ScanState::failed(e.to_string()))
                    .await;
                return;
            }
        };

        self.transition(&scan_id, ScanState::Running).await;

        // The scanner runs in its own task so that a panic is observed as a
        // join error instead of leaving the scan running forever.
        let scanner = Arc::clone(&self.scanner);
        let outcome = tokio::spawn(async move { scanner.scan(&image).await }).await;

        let next = match outcome {
            Ok(Ok(results)) => ScanState::Completed {
                finished_at: Utc::now(),
                results,
            },
            Ok(Err(failure)) => {
                log::error!("Scan {scan_id} failed: {failure}");
                ScanState::failed(failure.to_string())
            }
            Err(e) => {
                log::error!("Scan {scan_id} aborted unexpectedly: {e}");
                ScanState::failed(format!("Scan task failed: {e}"))
            }
        };
        self.transition(&scan_id, next).await;
    }

    #[cfg(test)]
    async fn scan_count(&self) -> usize {
        self.scans.read().await.len()
    }
}
