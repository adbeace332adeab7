use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::retry::BackoffPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub allocator: AllocatorConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_backend")]
    pub backend: Backend,
    /// May contain a "%partition%" placeholder replaced with the partition number
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_partitions")]
    pub partitions: u32,
    /// SlateDB flush interval; SlateDB's default when unset
    #[serde(default)]
    pub flush_interval_ms: Option<u64>,
    /// Default bound for a single cache operation or queue operation
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_path(),
            partitions: default_partitions(),
            flush_interval_ms: None,
            op_timeout_ms: default_op_timeout_ms(),
        }
    }
}

impl CacheConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    /// Resolve the storage location of one partition from the path template.
    pub fn partition_config(&self, partition: u32) -> PartitionConfig {
        let name = partition.to_string();
        let path = self
            .path
            .replace("%partition%", &name)
            .replace("{partition}", &name);
        PartitionConfig {
            name,
            backend: self.backend.clone(),
            path,
            flush_interval_ms: self.flush_interval_ms,
        }
    }
}

fn default_backend() -> Backend {
    Backend::Fs
}

fn default_path() -> String {
    "/tmp/gridq-%partition%".to_string()
}

fn default_partitions() -> u32 {
    8
}

fn default_op_timeout_ms() -> u64 {
    5_000
}

/// Storage settings for a single partition
#[derive(Debug, Deserialize, Clone)]
pub struct PartitionConfig {
    pub name: String,
    pub backend: Backend,
    pub path: String,
    #[serde(default)]
    pub flush_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Fs,
    Memory,
    Url,
}

/// Retry budget for sequence allocation under contention
#[derive(Debug, Deserialize, Clone)]
pub struct AllocatorConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_factor: default_backoff_factor(),
            jitter: default_jitter(),
        }
    }
}

impl AllocatorConfig {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.max_attempts,
            initial_backoff_ms: self.initial_backoff_ms,
            max_backoff_ms: self.max_backoff_ms,
            backoff_factor: self.backoff_factor,
            jitter: self.jitter,
        }
    }
}

fn default_max_attempts() -> u32 {
    16
}

fn default_initial_backoff_ms() -> u64 {
    5
}

fn default_max_backoff_ms() -> u64 {
    200
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClusterConfig {
    #[serde(default = "default_nodes")]
    pub nodes: Vec<u64>,
    #[serde(default = "default_virtual_nodes")]
    pub virtual_nodes: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            virtual_nodes: default_virtual_nodes(),
        }
    }
}

fn default_nodes() -> Vec<u64> {
    vec![0]
}

fn default_virtual_nodes() -> u32 {
    crate::ring::DEFAULT_VIRTUAL_NODES
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let data = fs::read_to_string(p)?;
                let cfg: Self = toml::from_str(&data)?;
                Ok(cfg)
            }
            None => Ok(Self::default()),
        }
    }
}
