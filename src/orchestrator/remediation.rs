//! Remediation strategies and downtime estimates.
//!
//! Applying a strategy only records the intent in the log. No container is
//! patched or restarted.

use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Strategy {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// Seconds one batch of containers is expected to take.
    pub estimated_time: u32,
}

pub static STRATEGIES: [Strategy; 3] = [
    Strategy {
        id: "hot-patch",
        name: "Hot Patch",
        description: "Apply the patch without restarting the container",
        estimated_time: 60,
    },
    Strategy {
        id: "rolling-update",
        name: "Rolling Update",
        description: "Update containers one at a time to keep downtime low",
        estimated_time: 180,
    },
    Strategy {
        id: "restart",
        name: "Restart",
        description: "Stop the container and start it again from the updated image",
        estimated_time: 120,
    },
];

pub fn find_strategy(id: &str) -> Result<&'static Strategy, ApiError> {
    STRATEGIES
        .iter()
        .find(|strategy| strategy.id == id)
        .ok_or_else(|| ApiError::Validation(format!("Unknown strategy: {id}")))
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemediationRequest {
    pub scan_id: String,
    #[serde(default)]
    pub vulnerability_id: Option<String>,
    pub strategy: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Estimate {
    pub estimated_time: u64,
    pub affected_containers: u32,
    pub strategy: &'static str,
    pub batches: u32,
}

/// `ceil(affected / parallelism)` batches, each taking the strategy's time.
pub fn estimate(strategy: &'static Strategy, affected: u32, parallelism: NonZeroU32) -> Estimate {
    let batches = affected.div_ceil(parallelism.get());
    Estimate {
        estimated_time: u64::from(batches) * u64::from(strategy.estimated_time),
        affected_containers: affected,
        strategy: strategy.name,
        batches,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AffectedVulnerability {
    pub id: String,
    pub cve_id: String,
    pub severity: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledRemediation {
    pub scan_id: String,
    pub container_id: String,
    pub container_name: String,
    pub strategy: &'static str,
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vulnerability: Option<AffectedVulnerability>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyOutcome {
    pub success: bool,
    pub message: String,
    pub details: ScheduledRemediation,
}

#[derive(Clone)]
pub struct Remediation {
    store: Store,
    parallelism: NonZeroU32,
}

impl Remediation {
    pub fn new(store: Store, parallelism: NonZeroU32) -> Self {
        Self { store, parallelism }
    }

    /// Looks up the named vulnerability, which must belong to `scan_id`.
    async fn scan_vulnerability(
        &self,
        scan_id: &str,
        vulnerability_id: &str,
    ) -> Result<AffectedVulnerability, ApiError> {
        let vulnerability = self.store.get_vulnerability(vulnerability_id).await?;
        if vulnerability.scan_id != scan_id {
            return Err(ApiError::NotFound(format!(
                "Vulnerability {vulnerability_id} in scan {scan_id}"
            )));
        }
        Ok(AffectedVulnerability {
            id: vulnerability.id,
            cve_id: vulnerability.cve_id,
            severity: vulnerability.severity,
        })
    }

    pub async fn estimate(&self, request: &RemediationRequest) -> Result<Estimate, ApiError> {
        let strategy = find_strategy(&request.strategy)?;
        self.store.get_scan(&request.scan_id).await?;

        let affected = match &request.vulnerability_id {
            None => 1,
            Some(vulnerability_id) => {
                let vulnerability = self
                    .scan_vulnerability(&request.scan_id, vulnerability_id)
                    .await?;
                self.store
                    .count_containers_with_cve(&vulnerability.cve_id)
                    .await?
            }
        };

        Ok(estimate(strategy, affected, self.parallelism))
    }

    pub async fn apply(&self, request: &RemediationRequest) -> Result<ApplyOutcome, ApiError> {
        let strategy = find_strategy(&request.strategy)?;
        let scan = self.store.get_scan(&request.scan_id).await?;
        let container = self
            .store
            .get_container(&scan.host_id, &scan.container_id)
            .await?;
        let vulnerability = match &request.vulnerability_id {
            Some(id) => Some(self.scan_vulnerability(&scan.scan_id, id).await?),
            None => None,
        };

        let message = format!(
            "Remediation using {} strategy has been scheduled",
            strategy.id
        );
        log::info!(
            "{message} for container {} on host {} (scan {})",
            container.container_id,
            container.host_id,
            scan.scan_id
        );

        Ok(ApplyOutcome {
            success: true,
            message: format!("Started applying {} remediation", strategy.name),
            details: ScheduledRemediation {
                scan_id: scan.scan_id,
                container_id: container.container_id,
                container_name: container.name,
                strategy: strategy.id,
                status: "scheduled",
                message,
                vulnerability,
            },
        })
    }
}
