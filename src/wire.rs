//! Agent HTTP protocol.
//!
//! These types travel between the orchestrator and the agent running on
//! each host. The agent serializes them, the orchestrator deserializes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One container as reported by `GET /containers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: String,
}

/// Body of `POST /scan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartScanRequest {
    pub container_id: String,
}

/// Lifecycle of a scan. Transitions only move forward:
/// `pending -> running -> completed | error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl ScanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Completed | Self::Error => 2,
        }
    }

    /// Whether moving from `self` to `next` respects the monotonic lifecycle.
    /// Staying in the same non-terminal state is allowed.
    pub fn can_advance_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() >= self.rank()
    }
}

impl AsRef<str> for ScanStatus {
    fn as_ref(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// A scan as reported by `POST /scan` and `GET /scan/{scan_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentScanRecord {
    pub scan_id: String,
    pub container_id: String,
    pub status: ScanStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Raw scanner report, present once completed.
    #[serde(default)]
    pub results: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}
