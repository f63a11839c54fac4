use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::time::Duration;

use crate::poller::PollerConfig;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub node: NodeSettings,
    #[serde(default)]
    pub mining: MiningSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8090".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct MiningSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub max_poll_attempts: Option<u32>,
    #[serde(default = "default_transport_failure_limit")]
    pub transport_failure_limit: u32,
}

impl Default for MiningSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: None,
            transport_failure_limit: default_transport_failure_limit(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

// Status endpoints are expected to stay up once a job exists.
fn default_transport_failure_limit() -> u32 {
    1
}

impl MiningSettings {
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.max_poll_attempts,
            transport_failure_limit: self.transport_failure_limit,
        }
    }
}

impl Settings {
    /// Loads `config.*` (optional) and then `NODE__*` / `MINING__*`
    /// environment overrides.
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(Environment::default().separator("__"))
            .set_default("node.base_url", default_base_url())?
            .set_default("node.request_timeout_ms", default_request_timeout_ms() as i64)?
            .set_default("mining.poll_interval_ms", default_poll_interval_ms() as i64)?
            .set_default(
                "mining.transport_failure_limit",
                default_transport_failure_limit() as i64,
            )?
            .build()?;

        config.try_deserialize()
    }
}
