// Configuration Management Module
// Handles probe-console.toml loading, defaults, and validation

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Result, Context};
use tracing::{info, warn};

use crate::orchestrator::{AlertThresholds, OrchestratorConfig};

/// Main console configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub collection: CollectionConfig,

    #[serde(default)]
    pub alerts: AlertThresholds,

    #[serde(default)]
    pub probes: ProbesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: LogFormat,

    /// EnvFilter directive used when RUST_LOG is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_path")]
    pub path: PathBuf,

    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Seconds between scheduled runs; 0 disables the scheduler
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_source_timeout")]
    pub source_timeout_ms: u64,

    /// Outbound frames buffered per viewer before it is dropped
    #[serde(default = "default_viewer_queue")]
    pub viewer_queue_capacity: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbesConfig {
    #[serde(default)]
    pub benchmarks: BenchmarkProbeConfig,

    #[serde(default)]
    pub self_checks: SelfCheckProbeConfig,

    #[serde(default)]
    pub profile: ProfileProbeConfig,

    #[serde(default)]
    pub integrations: EndpointProbeConfig,

    #[serde(default)]
    pub transport: EndpointProbeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkProbeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Elements sorted / encoded / hashed per workload
    #[serde(default = "default_workload_size")]
    pub workload_size: usize,

    #[serde(default = "default_sort_target")]
    pub sort_target_ms: f64,

    #[serde(default = "default_json_target")]
    pub json_target_ms: f64,

    #[serde(default = "default_hash_target")]
    pub hash_target_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfCheckProbeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileProbeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_rss")]
    pub max_rss_mb: f64,

    #[serde(default = "default_max_cpu")]
    pub max_cpu_secs: f64,
}

/// TCP endpoints probed for connect latency
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointProbeConfig {
    /// Unset means "on when endpoints are listed"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

impl EndpointProbeConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(!self.endpoints.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,

    /// host:port
    pub address: String,

    #[serde(default = "default_connect_target")]
    pub target_ms: f64,
}

// Default value functions
fn default_bind_addr() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 9400 }
fn default_log_format() -> LogFormat { LogFormat::Json }
fn default_log_filter() -> String { "probe_console=info,tower_http=warn".to_string() }
fn default_cache_ttl() -> u64 { 300 }
fn default_history_path() -> PathBuf { PathBuf::from("data/history.db") }
fn default_retention_days() -> u32 { 30 }
fn default_interval() -> u64 { 300 }
fn default_source_timeout() -> u64 { 30_000 }
fn default_viewer_queue() -> usize { 256 }
fn default_workload_size() -> usize { 100_000 }
fn default_sort_target() -> f64 { 50.0 }
fn default_json_target() -> f64 { 100.0 }
fn default_hash_target() -> f64 { 20.0 }
fn default_max_rss() -> f64 { 512.0 }
fn default_max_cpu() -> f64 { 3_600.0 }
fn default_connect_target() -> f64 { 250.0 }
fn default_true() -> bool { true }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            filter: default_log_filter(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: default_cache_ttl() }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: default_history_path(),
            retention_days: default_retention_days(),
        }
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            source_timeout_ms: default_source_timeout(),
            viewer_queue_capacity: default_viewer_queue(),
        }
    }
}

impl Default for BenchmarkProbeConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            workload_size: default_workload_size(),
            sort_target_ms: default_sort_target(),
            json_target_ms: default_json_target(),
            hash_target_ms: default_hash_target(),
        }
    }
}

impl Default for SelfCheckProbeConfig {
    fn default() -> Self {
        Self { enabled: default_true() }
    }
}

impl Default for ProfileProbeConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_rss_mb: default_max_rss(),
            max_cpu_secs: default_max_cpu(),
        }
    }
}

impl ConsoleConfig {
    /// Load configuration from file or use defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let contents = std::fs::read_to_string(path)
                .context("Failed to read configuration file")?;

            let config: ConsoleConfig = toml::from_str(&contents)
                .context("Failed to parse configuration file")?;

            config.validate()?;
            Ok(config)
        } else {
            warn!("Configuration file not found, using defaults");
            info!("Create probe-console.toml to customize configuration");
            Ok(Self::default())
        }
    }

    /// Validate settings that would break the pipeline as a whole.
    /// Probe-level mistakes are not fatal; those domains degrade to disabled.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.cache.ttl_secs == 0 {
            anyhow::bail!("Cache TTL must be at least 1 second");
        }

        if self.history.retention_days == 0 {
            anyhow::bail!("History retention must be at least 1 day");
        }

        if self.collection.source_timeout_ms == 0 {
            anyhow::bail!("Source timeout cannot be 0");
        }

        if self.collection.viewer_queue_capacity == 0 {
            anyhow::bail!("Viewer queue capacity must be at least 1");
        }

        if self.alerts.min_performance_score > 100 {
            anyhow::bail!("Minimum performance score must be between 0 and 100");
        }

        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn collection_interval(&self) -> Option<Duration> {
        (self.collection.interval_secs > 0).then(|| Duration::from_secs(self.collection.interval_secs))
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            source_timeout: Duration::from_millis(self.collection.source_timeout_ms),
            alerts: self.alerts,
        }
    }
}
