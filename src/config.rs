//! Layered configuration: built-in defaults, overridden by an optional
//! JSON config file, overridden by `CASTORE_`-prefixed environment
//! variables. Mirrors the teacher crate's `config.rs` shape (explicit
//! `Default` impls per section, a custom "string or number" deserializer
//! for fields operators commonly pass as either).

use std::{net::SocketAddr, path::Path, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::StoreError;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub events: EventsConfig,
    pub interlock: InterlockConfig,
    pub engine: EngineConfig,
    pub server: ServerConfig,
    pub path_generator: PathGeneratorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            events: EventsConfig::default(),
            interlock: InterlockConfig::default(),
            engine: EngineConfig::default(),
            server: ServerConfig::default(),
            path_generator: PathGeneratorConfig::default(),
        }
    }
}

impl Config {
    /// Load defaults, then a JSON file at `path` if given, then environment
    /// overrides. A missing file is not an error; a malformed one is.
    pub fn load(path: Option<&Path>) -> Result<Self, StoreError> {
        let mut cfg = Config::default();
        if let Some(path) = path {
            if path.exists() {
                let data = std::fs::read_to_string(path)?;
                cfg = serde_json::from_str(&data)?;
            }
        }
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CASTORE_STORAGE_URL") {
            self.storage.url = v;
        }
        if let Ok(v) = std::env::var("CASTORE_EVENTS_URL") {
            self.events.url = v;
        }
        if let Ok(v) = std::env::var("CASTORE_INTERLOCK_URL") {
            self.interlock.url = v;
        }
        if let Ok(v) = std::env::var("CASTORE_HTTP_ADDR") {
            if let Ok(addr) = v.parse() {
                self.server.http_addr = addr;
            }
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StorageConfig {
    /// `fs:///abs/path` or `s3://host/bucket?access=...&secret=...`
    pub url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: "fs:///var/lib/castore/data".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EventsConfig {
    /// `memory`, `nats://...`, `kafka://...`
    pub url: String,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            url: "memory".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InterlockConfig {
    /// `memory`, `redis://...`
    pub url: String,
    #[serde(deserialize_with = "string_or_u64")]
    pub lease_seconds: u64,
}

impl Default for InterlockConfig {
    fn default() -> Self {
        Self {
            url: "memory".to_string(),
            lease_seconds: 300,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EngineConfig {
    pub max_tasks: usize,
    pub max_stages: usize,
    pub max_retries: u32,
    pub worker_pool_size: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_tasks: usize::MAX,
            max_stages: usize::MAX,
            max_retries: 2,
            worker_pool_size: None,
        }
    }
}

impl EngineConfig {
    pub fn effective_worker_pool_size(&self) -> usize {
        self.worker_pool_size.unwrap_or_else(num_cpus::get)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerConfig {
    pub http_addr: SocketAddr,
    pub chunk_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from_str("0.0.0.0:8088").unwrap(),
            chunk_size: crate::utils::DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PathGeneratorConfig {
    pub template: String,
    pub max_attempts: u32,
}

impl Default for PathGeneratorConfig {
    fn default() -> Self {
        Self {
            template: "{{year}}/{{month}}/{{md5:1}}/{{md5:2}}/{{md5}}".to_string(),
            max_attempts: 30,
        }
    }
}

fn string_or_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrU64 {
        String(String),
        U64(u64),
    }

    match StringOrU64::deserialize(deserializer)? {
        StringOrU64::String(v) => v.parse().map_err(serde::de::Error::custom),
        StringOrU64::U64(v) => Ok(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let cfg = Config::default();
        assert_eq!(cfg.interlock.lease_seconds, 300);
        assert_eq!(cfg.path_generator.max_attempts, 30);
    }

    #[test]
    fn loads_missing_file_as_defaults() {
        let cfg = Config::load(Some(Path::new("/nonexistent/castore.json"))).unwrap();
        assert_eq!(cfg.storage.url, StorageConfig::default().url);
    }
}
