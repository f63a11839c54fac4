use anyhow::{anyhow, Result};

use crate::config::settings::{MiningSettings, NodeSettings, Settings};
use crate::node_api::parse_base_url;

pub fn validate_settings(settings: &Settings) -> Result<()> {
    validate_node_settings(&settings.node)?;
    validate_mining_settings(&settings.mining)?;
    Ok(())
}

pub fn validate_node_settings(settings: &NodeSettings) -> Result<()> {
    parse_base_url(&settings.base_url)
        .map_err(|e| anyhow!("node.base_url is not usable: {}", e))?;

    if settings.request_timeout_ms == 0 {
        return Err(anyhow!("node.request_timeout_ms must be greater than 0"));
    }

    Ok(())
}

pub fn validate_mining_settings(settings: &MiningSettings) -> Result<()> {
    if settings.poll_interval_ms == 0 {
        return Err(anyhow!("mining.poll_interval_ms must be greater than 0"));
    }

    if settings.transport_failure_limit == 0 {
        return Err(anyhow!(
            "mining.transport_failure_limit must be at least 1"
        ));
    }

    if settings.max_poll_attempts == Some(0) {
        return Err(anyhow!(
            "mining.max_poll_attempts must be at least 1 when set"
        ));
    }

    Ok(())
}
