//! Bridge configuration (`warpbridge.toml`).

use std::path::Path;

use serde::{Deserialize, Serialize};
use warpgrid_hostenv::{HostLoop, HostLoopBuilder};

/// Bytes requested per blocking read when producing a host stream.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 4096;
/// Undelivered inbound socket messages kept per connection.
pub const DEFAULT_SOCKET_QUEUE_CAPACITY: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Bytes per produced stream chunk. Values above 4096 are capped.
    pub read_chunk_size: usize,
    pub socket_queue_capacity: usize,
    pub host: HostConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub thread_name: String,
    pub max_blocking_threads: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            socket_queue_capacity: DEFAULT_SOCKET_QUEUE_CAPACITY,
            host: HostConfig::default(),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            thread_name: "warpgrid-host".to_string(),
            max_blocking_threads: 64,
        }
    }
}

impl BridgeConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: BridgeConfig = toml::from_str(content)?;
        if config.read_chunk_size == 0 {
            anyhow::bail!("read_chunk_size must be greater than zero");
        }
        if config.socket_queue_capacity == 0 {
            anyhow::bail!("socket_queue_capacity must be greater than zero");
        }
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl HostConfig {
    pub fn loop_builder(&self) -> HostLoopBuilder {
        HostLoop::builder()
            .thread_name(self.thread_name.clone())
            .max_blocking_threads(self.max_blocking_threads)
    }
}
