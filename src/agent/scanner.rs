use std::{
    path::PathBuf,
    process::{ExitStatus, Stdio},
};

use async_trait::async_trait;
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum ScanFailure {
    #[error("Failed to invoke scanner: {0}")]
    Spawn(#[from] std::io::Error),
    /// Displays as the captured stderr.
    #[error("{}", exit_message(.code, .stderr))]
    ExitStatus { code: Option<i32>, stderr: String },
    #[error("Error parsing scanner output: {0}")]
    Malformed(#[from] serde_json::Error),
}

fn exit_message(code: &Option<i32>, stderr: &str) -> String {
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    match code {
        Some(code) => format!("Scanner exited with code {code}"),
        None => "Scanner was terminated by a signal".to_string(),
    }
}

/// Runs a vulnerability scan against an image and returns the raw report.
#[async_trait]
pub trait Scanner: Send + Sync {
    async fn scan(&self, image: &str) -> Result<serde_json::Value, ScanFailure>;
}

/// Scans with the `trivy` command line tool.
#[derive(Debug, Clone)]
pub struct TrivyScanner {
    binary: PathBuf,
}

impl TrivyScanner {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl Scanner for TrivyScanner {
    async fn scan(&self, image: &str) -> Result<serde_json::Value, ScanFailure> {
        log::info!("Running {:?} against image {image}", self.binary);
        let output = Command::new(&self.binary)
            .arg("image")
            .args(["--format", "json"])
            .arg("--quiet")
            .arg(image)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        parse_report(output.status, &output.stdout, &output.stderr)
    }
}

fn parse_report(
    status: ExitStatus,
    stdout: &[u8],
    stderr: &[u8],
) -> Result<serde_json::Value, ScanFailure> {
    if !status.success() {
        return Err(ScanFailure::ExitStatus {
            code: status.code(),
            stderr: String::from_utf8_lossy(stderr).trim().to_string(),
        });
    }
    Ok(serde_json::from_slice(stdout)?)
}
