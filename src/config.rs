use crate::error::{LagError, Result};
use crate::kafka::GroupListing;
use crate::kafka::sasl::SaslConfig;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Protocol type reported by groups that use the Kafka consumer protocol.
pub const CONSUMER_PROTOCOL_TYPE: &str = "consumer";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub exporter: ExporterConfig,
    pub kafka: KafkaConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExporterConfig {
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
    #[serde(default = "default_http_host")]
    pub http_host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Also export the committed offset of every reported partition.
    #[serde(default)]
    pub enable_current_offset: bool,
    /// Number of cycles after which every gauge series is dropped and rebuilt.
    #[serde(default = "default_series_reset_cycles")]
    pub series_reset_cycles: u32,
    #[serde(default = "default_max_concurrent_watermarks")]
    pub max_concurrent_watermarks: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub protocol: FetchProtocol,
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
    #[serde(default)]
    pub group_pattern: Option<String>,
    #[serde(default)]
    pub group_state: GroupStateFilter,
    #[serde(default)]
    pub sasl: SaslConfig,
    /// Extra librdkafka properties, applied last.
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

/// Offset fetch protocol, chosen once at startup.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FetchProtocol {
    /// One offset request per group and topic, naming every partition.
    /// Works against old brokers.
    #[default]
    Compat,
    /// One offset request per group returning everything it committed.
    Optimized,
}

/// Which groups to report, based on their reported protocol type.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GroupStateFilter {
    #[default]
    All,
    /// Only groups running the consumer protocol.
    Active,
    /// Only groups that do not report the consumer protocol.
    Inactive,
}

impl GroupStateFilter {
    pub fn matches(self, protocol_type: &str) -> bool {
        let active = protocol_type == CONSUMER_PROTOCOL_TYPE;
        match self {
            Self::All => true,
            Self::Active => active,
            Self::Inactive => !active,
        }
    }
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    7979
}

fn default_series_reset_cycles() -> u32 {
    99
}

fn default_max_concurrent_watermarks() -> usize {
    10
}

fn default_client_id() -> String {
    "kafka-offset-lag-exporter".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            http_host: default_http_host(),
            http_port: default_http_port(),
            enable_current_offset: false,
            series_reset_cycles: default_series_reset_cycles(),
            max_concurrent_watermarks: default_max_concurrent_watermarks(),
        }
    }
}

impl Config {
    pub fn load(path: Option<&str>) -> Result<Config> {
        let config_path = path.unwrap_or("config.toml");

        if !Path::new(config_path).exists() {
            return Err(LagError::Config(format!(
                "Configuration file not found: {}",
                config_path
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let content = Self::substitute_env_vars(&content)?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| LagError::Config(format!("TOML parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    fn substitute_env_vars(content: &str) -> Result<String> {
        // Supports:
        // - ${VAR} - replaced with env var value, empty string if not set
        // - ${VAR:-default} - replaced with env var value, or "default" if not set
        // - ${?VAR} - same as ${VAR}
        let re = Regex::new(r"\$\{\??([^}:-]+)(?::-([^}]*))?\}")?;
        Ok(re
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
                std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
            })
            .to_string())
    }

    pub fn validate(&self) -> Result<()> {
        self.exporter.validate()?;
        self.kafka.validate()
    }
}

impl ExporterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(LagError::Config(
                "poll_interval must be greater than zero".to_string(),
            ));
        }

        if self.series_reset_cycles == 0 {
            return Err(LagError::Config(
                "series_reset_cycles must be at least 1".to_string(),
            ));
        }

        if self.max_concurrent_watermarks == 0 {
            return Err(LagError::Config(
                "max_concurrent_watermarks must be at least 1".to_string(),
            ));
        }

        self.listen_addr()?;
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.http_host, self.http_port)
            .parse()
            .map_err(|e| {
                LagError::Config(format!(
                    "Invalid listen address {}:{}: {}",
                    self.http_host, self.http_port, e
                ))
            })
    }
}

impl KafkaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.broker_list().is_empty() {
            return Err(LagError::Config(
                "bootstrap_servers cannot be empty".to_string(),
            ));
        }

        self.sasl.validate()?;
        self.compile_group_filter()?;
        Ok(())
    }

    /// Comma separated bootstrap list with blanks removed.
    pub fn broker_list(&self) -> Vec<&str> {
        self.bootstrap_servers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn compile_group_filter(&self) -> Result<GroupFilter> {
        let pattern = self
            .group_pattern
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(Regex::new)
            .transpose()?;

        Ok(GroupFilter {
            state: self.group_state,
            pattern,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct GroupFilter {
    pub state: GroupStateFilter,
    pub pattern: Option<Regex>,
}

impl GroupFilter {
    pub fn matches(&self, group: &GroupListing) -> bool {
        if !self.state.matches(&group.protocol_type) {
            return false;
        }
        self.pattern
            .as_ref()
            .is_none_or(|re| re.is_match(&group.name))
    }
}
