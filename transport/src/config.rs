//! Configuration for the transport layer

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Which broker adapter a session uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    /// In-process broker reached through the registry
    Direct,
    /// Remote broker reached over the wire protocol
    Channel,
}

/// Transport security parameters, passed through to the link layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityParams {
    /// Path to the key repository
    pub key_repository: String,
    /// Negotiated cipher suite name
    pub cipher_spec: String,
    /// Expected peer distinguished name
    pub peer_name: Option<String>,
}

/// Transport session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Broker target: a registry name for `direct`, `host:port` for
    /// `channel`
    pub target: String,
    /// Adapter selection
    pub kind: BrokerKind,
    /// Transport security, when the link requires it
    pub security: Option<SecurityParams>,
    /// How long a plain get waits for a matching message (milliseconds)
    pub wait_interval_ms: u64,
    /// How long a group get waits for the next member (milliseconds)
    pub group_wait_ms: u64,
    /// Redelivery-count threshold for dead-letter escalation; 0 disables
    pub auto_abandon: u32,
    /// Destination for dead-lettered messages
    pub backout_queue: String,
    /// Mirror successful retrievals here; unset disables
    pub backup_queue: Option<String>,
    /// Send retry policy
    pub retry: RetryPolicy,
    /// Application name stamped on sends by default
    pub application_name: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            target: String::new(),
            kind: BrokerKind::Direct,
            security: None,
            wait_interval_ms: 500,
            group_wait_ms: 30_000,
            auto_abandon: 0,
            backout_queue: "DEAD.LETTER".to_string(),
            backup_queue: None,
            retry: RetryPolicy::default(),
            application_name: "conduit".to_string(),
        }
    }
}

impl TransportConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;
        let config: TransportConfig = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = TransportConfig::default();

        if let Ok(target) = std::env::var("TRANSPORT_TARGET") {
            config.target = target;
        }
        if let Ok(kind) = std::env::var("TRANSPORT_KIND") {
            config.kind = match kind.as_str() {
                "direct" => BrokerKind::Direct,
                "channel" => BrokerKind::Channel,
                other => {
                    return Err(crate::Error::Config(format!(
                        "Invalid TRANSPORT_KIND: {}",
                        other
                    )))
                }
            };
        }
        if let Ok(wait) = std::env::var("TRANSPORT_WAIT_INTERVAL_MS") {
            config.wait_interval_ms = wait
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid TRANSPORT_WAIT_INTERVAL_MS: {}", e)))?;
        }
        if let Ok(wait) = std::env::var("TRANSPORT_GROUP_WAIT_MS") {
            config.group_wait_ms = wait
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid TRANSPORT_GROUP_WAIT_MS: {}", e)))?;
        }
        if let Ok(threshold) = std::env::var("TRANSPORT_AUTO_ABANDON") {
            config.auto_abandon = threshold
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid TRANSPORT_AUTO_ABANDON: {}", e)))?;
        }
        if let Ok(queue) = std::env::var("TRANSPORT_BACKOUT_QUEUE") {
            config.backout_queue = queue;
        }
        if let Ok(queue) = std::env::var("TRANSPORT_BACKUP_QUEUE") {
            config.backup_queue = Some(queue).filter(|q| !q.is_empty());
        }
        if let Ok(name) = std::env::var("TRANSPORT_APPLICATION_NAME") {
            config.application_name = name;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TransportConfig::default();
        assert_eq!(config.kind, BrokerKind::Direct);
        assert_eq!(config.wait_interval_ms, 500);
        assert_eq!(config.group_wait_ms, 30_000);
        assert_eq!(config.auto_abandon, 0);
        assert_eq!(config.backout_queue, "DEAD.LETTER");
        assert!(config.backup_queue.is_none());
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            target = "qm.settlement"
            kind = "direct"
            wait_interval_ms = 100
            group_wait_ms = 5000
            auto_abandon = 3
            backout_queue = "SETTLE.BACKOUT"
            application_name = "settlement-connector"

            [retry]
            max_attempts = 5
            delay_ms = 50
        "#;
        let config: TransportConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.target, "qm.settlement");
        assert_eq!(config.auto_abandon, 3);
        assert_eq!(config.retry.max_attempts, 5);
    }
}
