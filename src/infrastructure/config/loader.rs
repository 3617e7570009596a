//! Configuration loading with hierarchical merging.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::{BridgePolicy, SwarmConfig};

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_concurrent: {0}. Must be between 1 and 256")]
    InvalidMaxConcurrent(u32),

    #[error("Invalid heartbeat_interval_ms: {0}. Must be positive")]
    InvalidHeartbeatInterval(u64),

    #[error(
        "Invalid membership timeouts: suspicion ({suspicion}) < offline ({offline}) < expire ({expire}) required"
    )]
    InvalidTimeoutOrder {
        suspicion: u64,
        offline: u64,
        expire: u64,
    },

    #[error("Invalid election_interval_ms: {0}. Must be positive")]
    InvalidElectionInterval(u64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Capability tags cannot be empty strings")]
    EmptyCapability,

    #[error("Transport is not embedded but no broker URLs are configured")]
    NoTransportUrls,

    #[error("Cross-HID policy 'auth' requires an authorizer; wildcard export needs an explicit entry")]
    InvalidBridgeConfig,
}

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .nydus/config.yaml (project config)
    /// 3. .nydus/local.yaml (local overrides, optional)
    /// 4. Environment variables (NYDUS_* prefix, highest priority)
    pub fn load() -> Result<SwarmConfig> {
        let config: SwarmConfig = Figment::new()
            .merge(Serialized::defaults(SwarmConfig::default()))
            .merge(Yaml::file(".nydus/config.yaml"))
            .merge(Yaml::file(".nydus/local.yaml"))
            .merge(Env::prefixed("NYDUS_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<SwarmConfig> {
        let config: SwarmConfig = Figment::new()
            .merge(Serialized::defaults(SwarmConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(config: &SwarmConfig) -> Result<(), ConfigError> {
        if config.max_concurrent == 0 || config.max_concurrent > 256 {
            return Err(ConfigError::InvalidMaxConcurrent(config.max_concurrent));
        }

        let m = &config.membership;
        if m.heartbeat_interval_ms == 0 {
            return Err(ConfigError::InvalidHeartbeatInterval(m.heartbeat_interval_ms));
        }
        if !(m.suspicion_timeout_ms < m.offline_timeout_ms
            && m.offline_timeout_ms < m.expire_timeout_ms)
        {
            return Err(ConfigError::InvalidTimeoutOrder {
                suspicion: m.suspicion_timeout_ms,
                offline: m.offline_timeout_ms,
                expire: m.expire_timeout_ms,
            });
        }

        if config.election.enabled && config.election.election_interval_ms == 0 {
            return Err(ConfigError::InvalidElectionInterval(
                config.election.election_interval_ms,
            ));
        }

        if config.capabilities.iter().any(String::is_empty) {
            return Err(ConfigError::EmptyCapability);
        }

        if !config.transport.embedded && config.transport.urls.is_empty() {
            return Err(ConfigError::NoTransportUrls);
        }

        // Wildcard membership must be spelled out, never implied by policy.
        let x = &config.cross_hid;
        if x.default_export_policy == BridgePolicy::Allow && x.exported_hids.is_empty() {
            return Err(ConfigError::InvalidBridgeConfig);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SwarmConfig::default();
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_zero_heartbeat_rejected() {
        let mut config = SwarmConfig::default();
        config.membership.heartbeat_interval_ms = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidHeartbeatInterval(0))
        ));
    }

    #[test]
    fn test_timeout_order_enforced() {
        let mut config = SwarmConfig::default();
        config.membership.offline_timeout_ms = config.membership.suspicion_timeout_ms;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidTimeoutOrder { .. })
        ));
    }

    #[test]
    fn test_external_transport_needs_urls() {
        let mut config = SwarmConfig::default();
        config.transport.embedded = false;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::NoTransportUrls)
        ));
        config.transport.urls = vec!["broker://localhost:4222".to_string()];
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_allow_export_policy_needs_entries() {
        let mut config = SwarmConfig::default();
        config.cross_hid.default_export_policy = BridgePolicy::Allow;
        assert!(ConfigLoader::validate(&config).is_err());
        config.cross_hid.exported_hids = vec!["*".to_string()];
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_load_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "hid: home\nmax_concurrent: 8\nmembership:\n  heartbeat_interval_ms: 250\n  suspicion_timeout_ms: 750\n  offline_timeout_ms: 1500\n  expire_timeout_ms: 7500\n",
        )
        .unwrap();
        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.hid, "home");
        assert_eq!(config.max_concurrent, 8);
        assert_eq!(config.membership.heartbeat_interval_ms, 250);
    }
}
