use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

use crate::wire::ScanStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Host {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHost {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub description: Option<String>,
}

/// Fields left as `None` keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostUpdate {
    pub name: Option<String>,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ContainerStatus {
    Idle,
    Scanning,
    Scanned,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Container {
    pub container_id: String,
    pub host_id: String,
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScanHistory {
    pub scan_id: String,
    pub host_id: String,
    pub container_id: String,
    /// Identifier the agent assigned when it accepted the scan.
    pub agent_scan_id: Option<String>,
    pub status: ScanStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Vulnerability {
    pub id: String,
    pub scan_id: String,
    pub cve_id: String,
    pub cvss: Option<String>,
    pub severity: Option<String>,
    pub description: Option<String>,
    pub recommendation: Option<String>,
    /// The scanner's finding, verbatim.
    pub details: Json<serde_json::Value>,
}

/// A normalized finding waiting to be attached to a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct NewVulnerability {
    pub cve_id: String,
    pub cvss: Option<String>,
    pub severity: Option<String>,
    pub description: Option<String>,
    pub recommendation: Option<String>,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct VulnerabilityFilter {
    pub scan_id: Option<String>,
    pub host_id: Option<String>,
    pub container_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Page {
    pub skip: u32,
    pub limit: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self { skip: 0, limit: 100 }
    }
}
