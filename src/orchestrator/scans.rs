//! Bridges durable scan history to the agents' in-memory scans.
//!
//! No store transaction is open while an agent call is in flight. A failed
//! dispatch is terminal, a failed poll is not: the next poll retries.

use std::sync::Arc;

use super::agent_client::AgentApi;
use super::error::ApiError;
use super::ingestion;
use super::report::ScanReport;
use super::store::{Container, ScanHistory, Store};
use crate::wire::ScanStatus;

#[derive(Clone)]
pub struct ScanCoordinator {
    store: Store,
    agent: Arc<dyn AgentApi>,
}

impl ScanCoordinator {
    pub fn new(store: Store, agent: Arc<dyn AgentApi>) -> Self {
        Self { store, agent }
    }

    /// Stored containers of a host, optionally resynced from its agent first.
    /// An unreachable agent falls back to the stored list.
    pub async fn containers(&self, host_id: &str, refresh: bool) -> Result<Vec<Container>, ApiError> {
        let host = self.store.get_host(host_id).await?;

        if refresh {
            match self.agent.list_containers(&host).await {
                Ok(reported) => return Ok(self.store.sync_containers(host_id, &reported).await?),
                Err(e) => log::warn!(
                    "Unable to refresh containers of host {host_id} ({}:{}): {e}",
                    host.address,
                    host.port
                ),
            }
        }

        Ok(self.store.list_containers(host_id).await?)
    }

    pub async fn request_scan(
        &self,
        host_id: &str,
        container_id: &str,
    ) -> Result<ScanHistory, ApiError> {
        let host = self.store.get_host(host_id).await?;
        self.store.get_container(host_id, container_id).await?;

        let scan = self.store.create_scan(host_id, container_id).await?;
        log::info!(
            "Scan {} created for container {container_id} on host {host_id}",
            scan.scan_id
        );

        match self.agent.start_scan(&host, container_id).await {
            Ok(remote) => match self
                .store
                .attach_agent_scan(&scan.scan_id, &remote.scan_id)
                .await
            {
                Ok(()) => log::info!(
                    "Scan {} dispatched, agent scan id {}",
                    scan.scan_id,
                    remote.scan_id
                ),
                // Without the agent's id the scan can never be polled.
                Err(e) => {
                    log::error!(
                        "Unable to record agent scan id {} for scan {}: {e}",
                        remote.scan_id,
                        scan.scan_id
                    );
                    self.store.fail_scan(&scan.scan_id).await?;
                    log::info!("Scan {}: pending -> error", scan.scan_id);
                }
            },
            Err(e) => {
                log::warn!(
                    "Dispatching scan {} to {}:{} failed: {e}",
                    scan.scan_id,
                    host.address,
                    host.port
                );
                self.store.fail_scan(&scan.scan_id).await?;
                log::info!("Scan {}: pending -> error", scan.scan_id);
            }
        }

        Ok(self.store.get_scan(&scan.scan_id).await?)
    }

    /// Mirrors the agent's view of a scan. Terminal scans are returned as
    /// stored without contacting the agent.
    pub async fn poll_scan(&self, scan_id: &str) -> Result<ScanHistory, ApiError> {
        let scan = self.store.get_scan(scan_id).await?;
        if scan.status.is_terminal() {
            return Ok(scan);
        }
        let Some(agent_scan_id) = scan.agent_scan_id.as_deref() else {
            log::debug!("Scan {scan_id} has no agent scan id yet");
            return Ok(scan);
        };

        let host = self.store.get_host(&scan.host_id).await?;
        let remote = match self.agent.get_scan(&host, agent_scan_id).await {
            Ok(remote) => remote,
            Err(e) => {
                log::warn!("Polling scan {scan_id} on host {}: {e}", scan.host_id);
                return Ok(scan);
            }
        };

        match remote.status {
            ScanStatus::Pending => {}
            ScanStatus::Running => {
                if self.store.mark_scan_running(scan_id).await? {
                    log::info!("Scan {scan_id}: pending -> running");
                }
            }
            ScanStatus::Completed => {
                let report = remote.results.unwrap_or_default();
                let findings = ingestion::normalize(&report);
                match self.store.complete_scan(scan_id, &findings).await {
                    Ok(true) => log::info!(
                        "Scan {scan_id}: {} -> completed with {} vulnerabilities",
                        scan.status,
                        findings.len()
                    ),
                    Ok(false) => log::debug!("Scan {scan_id} was already finalized"),
                    Err(e) => {
                        log::error!("Ingestion of scan {scan_id} rolled back: {e}")
                    }
                }
            }
            ScanStatus::Error => {
                if self.store.fail_scan(scan_id).await? {
                    log::info!(
                        "Scan {scan_id}: {} -> error: {}",
                        scan.status,
                        remote.error.as_deref().unwrap_or("no message")
                    );
                }
            }
        }

        Ok(self.store.get_scan(scan_id).await?)
    }

    /// Polls the scan and attaches its vulnerabilities.
    pub async fn scan_report(&self, scan_id: &str) -> Result<ScanReport, ApiError> {
        let scan = self.poll_scan(scan_id).await?;
        let vulnerabilities = self.store.scan_vulnerabilities(scan_id).await?;
        Ok(ScanReport {
            scan,
            vulnerabilities,
        })
    }
}
