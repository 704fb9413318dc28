// Gateway settings, read from the environment
use anyhow::{Context, Result};
use elite_common::config::BrokerConfig;
use std::net::SocketAddr;

pub const DEFAULT_GATEWAY_ADDR: &str = "0.0.0.0:3000";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub addr: SocketAddr,
    pub broker: BrokerConfig,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let raw_addr = lookup("GATEWAY_ADDR").unwrap_or_else(|| DEFAULT_GATEWAY_ADDR.to_string());
        let addr = raw_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("GATEWAY_ADDR is not a socket address: {}", raw_addr))?;

        Ok(Self {
            addr,
            broker: BrokerConfig::from_lookup(lookup),
        })
    }
}
