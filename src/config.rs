//! Configuration handling for vpn-routes

use crate::vpn::{MetricPolicy, TunnelRoutes};
use crate::vpn::routing::{
    DEFAULT_METRIC_REJECTED_CODE, DEFAULT_METRIC_RETRY_STEP, DEFAULT_OVERRIDE_METRIC,
};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Config file name looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "vpn-routes.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("Invalid subnet {subnet}: {reason}")]
    InvalidSubnet { subnet: String, reason: String },
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub vpn: VpnConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpnConfig {
    /// Next hop of the default-route override
    pub gateway: Ipv4Addr,
    /// Tunnel interface name
    pub interface: String,
    /// The tunnel's own connected network, kept across reconnects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_network: Option<String>,
    /// Split-tunnel subnets in CIDR notation
    #[serde(default)]
    pub subnets: Vec<String>,
    /// Next hop for subnet routes; on-link when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_gateway: Option<Ipv4Addr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub override_metric: u32,
    /// Added to a rejected metric for the single retry; must be non-zero
    pub metric_retry_step: u32,
    /// Install error code meaning "metric too low". On Windows this is the
    /// IP Helper return code. On Linux and macOS it is the exit status of
    /// `ip`/`route`, which is the same for every failure (`ip` exits 2), so
    /// the default 106 never matches there and a rejected metric is not
    /// retried.
    pub metric_rejected_code: u32,
    pub subnet_metric: u32,
    /// Override with 0.0.0.0/1 + 128.0.0.0/1 instead of a second default
    /// route; always on for macOS
    pub split_override: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            override_metric: DEFAULT_OVERRIDE_METRIC,
            metric_retry_step: DEFAULT_METRIC_RETRY_STEP,
            metric_rejected_code: DEFAULT_METRIC_REJECTED_CODE,
            subnet_metric: DEFAULT_OVERRIDE_METRIC,
            split_override: false,
        }
    }
}

impl From<&RoutingConfig> for MetricPolicy {
    fn from(config: &RoutingConfig) -> Self {
        Self {
            override_metric: config.override_metric,
            retry_step: config.metric_retry_step,
            rejected_code: config.metric_rejected_code,
            subnet_metric: config.subnet_metric,
            split_override: config.split_override,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vpn: VpnConfig {
                gateway: Ipv4Addr::new(10, 8, 0, 1),
                interface: "tun0".to_string(),
                link_network: None,
                subnets: vec![],
                subnet_gateway: None,
            },
            routing: RoutingConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.routing.metric_retry_step == 0 {
            return Err(ConfigError::InvalidValue {
                field: "routing.metric_retry_step",
                reason: "must be greater than 0".to_string(),
            });
        }
        self.subnets()?;
        self.link_network()?;
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from `explicit`, else `./vpn-routes.toml`, else the user config
    /// directory, else defaults
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            debug!("Loading config from {}", path.display());
            return Self::load(path);
        }

        let mut candidates = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("vpn-routes").join("config.toml"));
        }

        for path in candidates {
            if path.exists() {
                debug!("Loading config from {}", path.display());
                return Self::load(&path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Config::default())
    }

    pub fn subnets(&self) -> Result<Vec<Ipv4Network>, ConfigError> {
        self.vpn.subnets.iter().map(|s| parse_subnet(s)).collect()
    }

    pub fn link_network(&self) -> Result<Option<Ipv4Network>, ConfigError> {
        self.vpn.link_network.as_deref().map(parse_subnet).transpose()
    }

    /// Tunnel description; the interface index is left at 0 for the caller
    /// to resolve from `vpn.interface`
    pub fn tunnel_routes(&self) -> Result<TunnelRoutes, ConfigError> {
        Ok(TunnelRoutes {
            gateway: self.vpn.gateway,
            interface_index: 0,
            link_network: self.link_network()?,
            subnets: self.subnets()?,
            subnet_gateway: self.vpn.subnet_gateway,
        })
    }

    pub fn metric_policy(&self) -> MetricPolicy {
        MetricPolicy::from(&self.routing)
    }
}

fn parse_subnet(s: &str) -> Result<Ipv4Network, ConfigError> {
    s.parse::<Ipv4Network>()
        .map_err(|e| ConfigError::InvalidSubnet {
            subnet: s.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.vpn.interface, "tun0");
        assert_eq!(config.routing.override_metric, 93);
        assert_eq!(config.routing.metric_rejected_code, 106);
        assert_eq!(config.metric_policy(), MetricPolicy::default());
    }

    #[test]
    fn test_parse_minimal_config_fills_routing_defaults() {
        let config: Config = toml::from_str(
            r#"
            [vpn]
            gateway = "10.9.0.1"
            interface = "wg0"
            "#,
        )
        .unwrap();
        assert_eq!(config.vpn.gateway, Ipv4Addr::new(10, 9, 0, 1));
        assert!(config.vpn.subnets.is_empty());
        assert!(config.vpn.subnet_gateway.is_none());
        assert_eq!(config.routing.metric_retry_step, 10);
    }

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(
            r#"
            [vpn]
            gateway = "10.8.0.1"
            interface = "tun0"
            subnets = ["10.20.0.0/16", "172.16.0.0/12"]
            subnet_gateway = "10.8.0.1"

            [routing]
            override_metric = 5
            metric_rejected_code = 87
            "#,
        )
        .unwrap();

        let tunnel = config.tunnel_routes().unwrap();
        assert_eq!(tunnel.subnets.len(), 2);
        assert_eq!(tunnel.subnets[1].prefix(), 12);
        assert_eq!(tunnel.subnet_gateway, Some(Ipv4Addr::new(10, 8, 0, 1)));

        let policy = config.metric_policy();
        assert_eq!(policy.override_metric, 5);
        assert_eq!(policy.rejected_code, 87);
        assert_eq!(policy.retry_step, 10);
    }

    #[test]
    fn test_invalid_subnet() {
        let mut config = Config::default();
        config.vpn.subnets = vec!["10.0.0.0/40".to_string()];
        let err = config.tunnel_routes().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSubnet { .. }));
        assert!(err.to_string().contains("10.0.0.0/40"));
    }

    #[test]
    fn test_zero_retry_step_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[vpn]\ngateway = \"10.8.0.1\"\ninterface = \"tun0\"\n\n[routing]\nmetric_retry_step = 0\n",
        )
        .unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "routing.metric_retry_step",
                ..
            }
        ));
    }

    #[test]
    fn test_link_network_and_split_override() {
        let config: Config = toml::from_str(
            r#"
            [vpn]
            gateway = "10.8.0.1"
            interface = "utun3"
            link_network = "10.8.0.0/24"

            [routing]
            split_override = true
            "#,
        )
        .unwrap();
        config.validate().unwrap();

        let tunnel = config.tunnel_routes().unwrap();
        assert_eq!(tunnel.link_network, Some("10.8.0.0/24".parse().unwrap()));
        assert!(config.metric_policy().split_override);

        let mut bad = config.clone();
        bad.vpn.link_network = Some("10.8.0.0/33".to_string());
        assert!(matches!(
            bad.validate().unwrap_err(),
            ConfigError::InvalidSubnet { .. }
        ));
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.vpn.subnets = vec!["10.20.0.0/16".to_string()];
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.vpn.subnets, config.vpn.subnets);
        assert_eq!(loaded.vpn.gateway, config.vpn.gateway);
    }

    #[test]
    fn test_discover_explicit_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[vpn]\ngateway = \"10.1.0.1\"\ninterface = \"utun4\"\n",
        )
        .unwrap();

        let config = Config::discover(Some(&path)).unwrap();
        assert_eq!(config.vpn.interface, "utun4");
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = Config::load(&temp_dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError(_)));
    }

    #[test]
    fn test_load_malformed_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.toml");
        std::fs::write(&path, "[vpn\ngateway =").unwrap();
        assert!(matches!(
            Config::load(&path).unwrap_err(),
            ConfigError::ParseError(_)
        ));
    }
}
