// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Node Configuration Types
//
// Defines the configuration schema for a Switchboard node, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Transport fabric sizing, enqueue timeout and publish backoff
// - Heartbeat health thresholds
// - Director deadlines and retry budget
// - Admission quotas (resource profiles × tiers)
// - Statically declared agents
// - Logging and metrics settings

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::domain::admission::{QuotaTable, DEFAULT_TIER};
use crate::domain::agent::{AgentDescriptor, AgentId, Rung};
use crate::domain::health::HealthPolicy;

pub const API_VERSION: &str = "switchboard/v1";
pub const KIND: &str = "SwitchboardConfig";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid apiVersion: '{0}'. Must be 'switchboard/v1'")]
    UnsupportedVersion(String),

    #[error("Invalid kind: '{0}'. Must be 'SwitchboardConfig'")]
    UnsupportedKind(String),

    #[error("{0}")]
    Invalid(String),
}

/// Top-level Kubernetes-style node configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchboardConfigManifest {
    /// API version (must be "switchboard/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "SwitchboardConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: SwitchboardSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable node name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwitchboardSpec {
    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub health: HealthPolicy,

    #[serde(default)]
    pub director: DirectorConfig,

    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Agents hosted by this node
    #[serde(default)]
    pub agents: Vec<AgentSpec>,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Per-subscriber queue depth
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Longest a publish may wait on one full subscriber queue
    #[serde(with = "humantime_serde", default = "default_enqueue_timeout")]
    pub enqueue_timeout: Duration,

    #[serde(default)]
    pub backoff: BackoffPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            enqueue_timeout: default_enqueue_timeout(),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Exponential backoff for transient transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    #[serde(with = "humantime_serde", default = "default_base_delay")]
    pub base_delay: Duration,

    #[serde(with = "humantime_serde", default = "default_max_delay")]
    pub max_delay: Duration,

    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based): `base × 2^(attempt-1)`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectorConfig {
    /// Identity the director publishes and listens under
    #[serde(default = "default_director_id")]
    pub agent_id: AgentId,

    /// Per-attempt deadline for a dispatched request
    #[serde(with = "humantime_serde", default = "default_request_deadline")]
    pub request_deadline: Duration,

    /// Timeout retries against the same still-online agent
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Aggregate deadline for fan-out collection
    #[serde(with = "humantime_serde", default = "default_fan_out_deadline")]
    pub fan_out_deadline: Duration,
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            agent_id: default_director_id(),
            request_deadline: default_request_deadline(),
            max_retries: default_max_retries(),
            fan_out_deadline: default_fan_out_deadline(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Tier assumed when a caller does not name one
    #[serde(default = "default_tier")]
    pub default_tier: String,

    #[serde(flatten)]
    pub quotas: QuotaTable,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            default_tier: default_tier(),
            quotas: QuotaTable::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub id: AgentId,

    #[serde(default)]
    pub rung: Rung,

    #[serde(default)]
    pub capabilities: Vec<String>,

    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

impl AgentSpec {
    pub fn descriptor(&self) -> AgentDescriptor {
        AgentDescriptor::new(self.id.clone(), self.rung, self.confidence_threshold)
            .with_capabilities(self.capabilities.iter().cloned())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("compact" or "json")
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prometheus exporter port
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_true() -> bool {
    true
}

fn default_channel_capacity() -> usize {
    256
}

fn default_enqueue_timeout() -> Duration {
    Duration::from_millis(100)
}

fn default_base_delay() -> Duration {
    Duration::from_millis(50)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_attempts() -> u32 {
    5
}

fn default_director_id() -> AgentId {
    AgentId::new("director")
}

fn default_request_deadline() -> Duration {
    Duration::from_secs(10)
}

fn default_max_retries() -> u32 {
    1
}

fn default_fan_out_deadline() -> Duration {
    Duration::from_secs(10)
}

fn default_tier() -> String {
    DEFAULT_TIER.to_string()
}

fn default_confidence_threshold() -> f64 {
    0.5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

fn default_metrics_port() -> u16 {
    9464
}

impl Default for SwitchboardConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "switchboard-node".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: SwitchboardSpec::default(),
        }
    }
}

impl SwitchboardConfigManifest {
    /// Default manifest with a small worker/manager pair serving `echo`,
    /// used by `config generate`.
    pub fn sample() -> Self {
        let mut manifest = Self::default();
        manifest.spec.agents = vec![
            AgentSpec {
                id: AgentId::new("echo-1"),
                rung: Rung::Worker,
                capabilities: vec!["echo".to_string()],
                confidence_threshold: 0.8,
            },
            AgentSpec {
                id: AgentId::new("manager-1"),
                rung: Rung::Manager,
                capabilities: vec!["echo".to_string()],
                confidence_threshold: 0.3,
            },
        ];
        manifest.spec.observability.metrics = Some(MetricsConfig {
            enabled: false,
            port: default_metrics_port(),
        });
        manifest
    }

    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Configuration file locations, in precedence order
    /// 1. SWITCHBOARD_CONFIG_PATH environment variable
    /// 2. ./switchboard.yaml (working directory)
    /// 3. ~/.switchboard/config.yaml (user home)
    /// 4. /etc/switchboard/config.yaml (system)
    pub fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(path) = std::env::var("SWITCHBOARD_CONFIG_PATH") {
            paths.push(PathBuf::from(path));
        }
        paths.push(PathBuf::from("./switchboard.yaml"));
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".switchboard").join("config.yaml"));
        }
        paths.push(PathBuf::from("/etc/switchboard/config.yaml"));
        paths
    }

    pub fn discover_config() -> Option<PathBuf> {
        Self::candidate_paths().into_iter().find(|path| path.exists())
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path: fail if missing or invalid
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = match Self::discover_config() {
            Some(config_path) => {
                tracing::info!("Loading configuration from discovered path: {:?}", config_path);
                Self::from_yaml_file(config_path)?
            }
            None => {
                tracing::warn!("No configuration file found in standard locations. Using defaults.");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("SWITCHBOARD_LOG_LEVEL") {
            if val.trim().is_empty() {
                tracing::warn!("Empty SWITCHBOARD_LOG_LEVEL. Ignoring.");
            } else {
                tracing::info!("Environment override: SWITCHBOARD_LOG_LEVEL={}", val);
                self.spec.observability.logging.level = val;
            }
        }

        if let Ok(val) = std::env::var("SWITCHBOARD_MAX_RETRIES") {
            match val.parse::<u32>() {
                Ok(retries) => {
                    tracing::info!("Environment override: SWITCHBOARD_MAX_RETRIES={}", retries);
                    self.spec.director.max_retries = retries;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for SWITCHBOARD_MAX_RETRIES: '{}'. Expected an integer. Ignoring.",
                    val
                ),
            }
        }

        if let Ok(val) = std::env::var("SWITCHBOARD_REQUEST_DEADLINE") {
            match humantime_serde::re::humantime::parse_duration(&val) {
                Ok(deadline) => {
                    tracing::info!("Environment override: SWITCHBOARD_REQUEST_DEADLINE={}", val);
                    self.spec.director.request_deadline = deadline;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for SWITCHBOARD_REQUEST_DEADLINE: '{}'. Expected a duration like '2s'. Ignoring.",
                    val
                ),
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_version != API_VERSION {
            return Err(ConfigError::UnsupportedVersion(self.api_version.clone()));
        }
        if self.kind != KIND {
            return Err(ConfigError::UnsupportedKind(self.kind.clone()));
        }
        if self.metadata.name.is_empty() {
            return Err(ConfigError::Invalid("metadata.name cannot be empty".into()));
        }

        let transport = &self.spec.transport;
        if transport.channel_capacity == 0 {
            return Err(ConfigError::Invalid("transport.channel_capacity must be at least 1".into()));
        }
        if transport.enqueue_timeout.is_zero() {
            return Err(ConfigError::Invalid("transport.enqueue_timeout must be non-zero".into()));
        }
        if transport.backoff.max_attempts == 0 {
            return Err(ConfigError::Invalid("transport.backoff.max_attempts must be at least 1".into()));
        }

        self.spec.health.validate().map_err(ConfigError::Invalid)?;

        let director = &self.spec.director;
        if director.agent_id.as_str().is_empty() || director.agent_id.is_broadcast() {
            return Err(ConfigError::Invalid(format!(
                "director.agent_id '{}' is not a valid agent id",
                director.agent_id
            )));
        }
        if director.request_deadline.is_zero() || director.fan_out_deadline.is_zero() {
            return Err(ConfigError::Invalid("director deadlines must be non-zero".into()));
        }

        self.spec.admission.quotas.validate().map_err(ConfigError::Invalid)?;

        let mut seen = HashSet::new();
        for agent in &self.spec.agents {
            if agent.id.as_str().is_empty() || agent.id.is_broadcast() || agent.id == director.agent_id {
                return Err(ConfigError::Invalid(format!("agent id '{}' is reserved or empty", agent.id)));
            }
            if !seen.insert(&agent.id) {
                return Err(ConfigError::Invalid(format!("duplicate agent id '{}'", agent.id)));
            }
            if !(0.0..=1.0).contains(&agent.confidence_threshold) {
                return Err(ConfigError::Invalid(format!(
                    "agent '{}' confidence_threshold {} is outside [0, 1]",
                    agent.id, agent.confidence_threshold
                )));
            }
            if matches!(agent.rung, Rung::Director | Rung::Human) {
                return Err(ConfigError::Invalid(format!(
                    "agent '{}' must serve at the worker or manager rung",
                    agent.id
                )));
            }
        }

        Ok(())
    }
}
