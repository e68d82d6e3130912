//! Configuration for the work pool

use serde::{Deserialize, Serialize};

/// Work pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Outstanding-item ceiling for producer threads that never call
    /// `reserve` (items queued but not yet consumed)
    pub default_reservation: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            default_reservation: 10,
        }
    }
}

impl PoolConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;
        let config: PoolConfig = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = PoolConfig::default();

        if let Ok(reservation) = std::env::var("POOL_DEFAULT_RESERVATION") {
            config.default_reservation = reservation
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid POOL_DEFAULT_RESERVATION: {}", e)))?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.default_reservation, 10);
    }
}
