use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid value {value:?} for environment variable {name}")]
    Env { name: &'static str, value: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AegisConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub listen: SocketAddr,
    /// Maximum number of scans executing at the same time.
    pub scan_concurrency: NonZeroUsize,
    pub scanner_binary: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 5000)),
            scan_concurrency: NonZeroUsize::new(2).unwrap_or(NonZeroUsize::MIN),
            scanner_binary: PathBuf::from("trivy"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub listen: SocketAddr,
    /// Path to the SQLite database file.
    pub database: PathBuf,
    /// Seconds to wait for an agent to accept a scan.
    pub request_timeout: u64,
    /// Seconds to wait for an agent to report scan status.
    pub poll_timeout: u64,
    /// Seconds to wait for an agent to list its containers.
    pub list_timeout: u64,
    /// Number of containers remediated in one batch.
    pub remediation_parallelism: NonZeroU32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8000)),
            database: PathBuf::from("aegis.db"),
            request_timeout: 30,
            poll_timeout: 10,
            list_timeout: 10,
            remediation_parallelism: NonZeroU32::new(2).unwrap_or(NonZeroU32::MIN),
        }
    }
}

impl OrchestratorConfig {
    pub fn timeouts(&self) -> AgentTimeouts {
        AgentTimeouts {
            request: Duration::from_secs(self.request_timeout),
            poll: Duration::from_secs(self.poll_timeout),
            list: Duration::from_secs(self.list_timeout),
        }
    }
}

/// Upper bounds for each kind of orchestrator-to-agent call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentTimeouts {
    pub request: Duration,
    pub poll: Duration,
    pub list: Duration,
}

fn override_from<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    target: &mut T,
) -> Result<(), ConfigError> {
    if let Some(value) = lookup(name) {
        *target = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Env { name, value })?;
    }
    Ok(())
}

impl AegisConfig {
    fn try_init_from_string(val: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(val)?)
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let agent = &mut self.agent;
        override_from(&lookup, "AEGIS_AGENT_LISTEN", &mut agent.listen)?;
        override_from(&lookup, "SCAN_CONCURRENCY", &mut agent.scan_concurrency)?;
        override_from(&lookup, "AEGIS_SCANNER_BINARY", &mut agent.scanner_binary)?;

        let orchestrator = &mut self.orchestrator;
        override_from(&lookup, "AEGIS_ORCHESTRATOR_LISTEN", &mut orchestrator.listen)?;
        override_from(&lookup, "AEGIS_DATABASE", &mut orchestrator.database)?;
        override_from(&lookup, "AEGIS_REQUEST_TIMEOUT", &mut orchestrator.request_timeout)?;
        override_from(&lookup, "AEGIS_POLL_TIMEOUT", &mut orchestrator.poll_timeout)?;
        override_from(&lookup, "AEGIS_LIST_TIMEOUT", &mut orchestrator.list_timeout)?;
        override_from(
            &lookup,
            "REMEDIATION_PARALLELISM",
            &mut orchestrator.remediation_parallelism,
        )?;
        Ok(())
    }

    /// Reads the config file (missing file means defaults) and then applies
    /// environment overrides, including any `.env` file in the working dir.
    pub fn try_init(path: &Path) -> Result<Self, ConfigError> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(contents) => Self::try_init_from_string(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No config file at {path:?}, using defaults");
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = dotenv::dotenv() {
            log::debug!("No .env file loaded: {e}");
        }
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = AegisConfig::try_init_from_string("").expect("Failed to parse config");
        assert_eq!(config.agent.scan_concurrency.get(), 2);
        assert_eq!(config.agent.listen.port(), 5000);
        assert_eq!(config.agent.scanner_binary, PathBuf::from("trivy"));
        assert_eq!(config.orchestrator.listen.port(), 8000);
        assert_eq!(config.orchestrator.remediation_parallelism.get(), 2);
        assert_eq!(
            config.orchestrator.timeouts(),
            AgentTimeouts {
                request: Duration::from_secs(30),
                poll: Duration::from_secs(10),
                list: Duration::from_secs(10),
            }
        );
    }

    #[test]
    fn test_config_file_values() {
        let input = r#"
            [agent]
            listen = "127.0.0.1:6000"
            scan_concurrency = 4

            [orchestrator]
            database = "/var/lib/aegis/aegis.db"
            poll_timeout = 3
        "#;
        let config = AegisConfig::try_init_from_string(input).expect("Failed to parse config");
        assert_eq!(config.agent.listen, "127.0.0.1:6000".parse().unwrap());
        assert_eq!(config.agent.scan_concurrency.get(), 4);
        assert_eq!(
            config.orchestrator.database,
            PathBuf::from("/var/lib/aegis/aegis.db")
        );
        assert_eq!(config.orchestrator.poll_timeout, 3);
        // Untouched keys keep their defaults
        assert_eq!(config.orchestrator.request_timeout, 30);
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let input = r#"
            [agent]
            scan_concurrency = 0
        "#;
        let res = AegisConfig::try_init_from_string(input);
        assert!(matches!(res, Err(ConfigError::Toml(_))), "{:?}", res);
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SCAN_CONCURRENCY", "5"),
            ("REMEDIATION_PARALLELISM", " 3 "),
            ("AEGIS_REQUEST_TIMEOUT", "45"),
        ]);
        let mut config = AegisConfig::default();
        config
            .apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .expect("Failed to apply overrides");

        assert_eq!(config.agent.scan_concurrency.get(), 5);
        assert_eq!(config.orchestrator.remediation_parallelism.get(), 3);
        assert_eq!(config.orchestrator.request_timeout, 45);
        assert_eq!(config.orchestrator.poll_timeout, 10);
    }

    #[test]
    fn test_invalid_environment_override() {
        let mut config = AegisConfig::default();
        let res = config.apply_overrides(|name| {
            (name == "SCAN_CONCURRENCY").then(|| "zero".to_string())
        });
        assert!(
            matches!(
                res,
                Err(ConfigError::Env {
                    name: "SCAN_CONCURRENCY",
                    ..
                })
            ),
            "{:?}",
            res
        );
    }
}
