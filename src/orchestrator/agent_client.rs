use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use url::Url;

use super::store::Host;
use crate::config::AgentTimeouts;
use crate::wire::{AgentScanRecord, ContainerInfo, StartScanRequest};

#[derive(Debug, thiserror::Error)]
pub enum AgentClientError {
    #[error("Invalid agent address: {0}")]
    Url(#[from] url::ParseError),
    #[error("Agent request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Agent answered with HTTP {0}")]
    Status(u16),
}

/// The calls the orchestrator makes against a host's agent.
#[async_trait]
pub trait AgentApi: Send + Sync {
    async fn list_containers(&self, host: &Host) -> Result<Vec<ContainerInfo>, AgentClientError>;

    async fn start_scan(
        &self,
        host: &Host,
        container_id: &str,
    ) -> Result<AgentScanRecord, AgentClientError>;

    async fn get_scan(
        &self,
        host: &Host,
        agent_scan_id: &str,
    ) -> Result<AgentScanRecord, AgentClientError>;
}

#[derive(Clone)]
pub struct HttpAgentClient {
    http: reqwest::Client,
    timeouts: AgentTimeouts,
}

impl HttpAgentClient {
    pub fn new(timeouts: AgentTimeouts) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeouts,
        }
    }
}

fn endpoint(host: &Host, segments: &[&str]) -> Result<Url, AgentClientError> {
    let mut url = Url::parse(&format!("http://{}:{}/", host.address, host.port))?;
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    Ok(url)
}

async fn read_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<T, AgentClientError> {
    let response = request.timeout(timeout).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(AgentClientError::Status(status.as_u16()));
    }
    Ok(response.json().await?)
}

#[async_trait]
impl AgentApi for HttpAgentClient {
    async fn list_containers(&self, host: &Host) -> Result<Vec<ContainerInfo>, AgentClientError> {
        let url = endpoint(host, &["containers"])?;
        log::debug!("Listing containers via {url}");
        read_json(self.http.get(url), self.timeouts.list).await
    }

    async fn start_scan(
        &self,
        host: &Host,
        container_id: &str,
    ) -> Result<AgentScanRecord, AgentClientError> {
        let url = endpoint(host, &["scan"])?;
        log::debug!("Requesting scan of {container_id} via {url}");
        let body = StartScanRequest {
            container_id: container_id.to_string(),
        };
        read_json(self.http.post(url).json(&body), self.timeouts.request).await
    }

    async fn get_scan(
        &self,
        host: &Host,
        agent_scan_id: &str,
    ) -> Result<AgentScanRecord, AgentClientError> {
        let url = endpoint(host, &["scan", agent_scan_id])?;
        read_json(self.http.get(url), self.timeouts.poll).await
    }
}
