//! Server Attributes
//!
//! Configuration of a remote cache server. Attributes are read from a JSON file using
//! camelCase keys, and individual values can be overridden with `key=value` pairs (the
//! launcher's `--set` flag). Every attribute has a default, so an empty object is a valid file.

use crate::error::{CacheServerError, Result};
use crate::events::types::EventQueueType;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_SERVICE_NAME: &str = "RemoteCacheService";
pub const DEFAULT_REGISTRY_PORT: u16 = 1099;

/// Tunables of a remote cache server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerAttributes {
    /// Port of the RPC listener. `0` picks an anonymous port.
    pub service_port: u16,
    /// Let client reads fall through to cluster peers on a local miss.
    pub allow_cluster_get: bool,
    /// Fan writes that arrive from a cluster peer out to this server's own listeners.
    pub local_cluster_consistency: bool,
    /// Periodically verify the directory binding and restore it when lost.
    pub use_registry_keep_alive: bool,
    pub registry_keep_alive_delay_millis: u64,
    /// Name of the shared delivery pool used by pooled event queues.
    pub event_queue_pool_name: Option<String>,
    pub event_queue_type: EventQueueType,
    /// Maximum number of concurrent deliveries in a pool.
    pub event_queue_pool_size: usize,
    /// Failed delivery attempts before a queue is marked as not working.
    pub event_queue_max_failure: u32,
    pub event_queue_wait_before_retry_millis: u64,
    /// Name the server is bound under in the service directory.
    pub remote_service_name: String,
    pub socket_open_timeout_millis: u64,
    pub socket_read_timeout_millis: u64,
    /// Base URLs of cooperating peer servers used as cascade targets.
    pub cluster_peers: Vec<String>,
    /// Emit one structured record per RPC on the `cache_events` target.
    pub cache_event_logging: bool,
}

impl Default for ServerAttributes {
    fn default() -> Self {
        Self {
            service_port: 0,
            allow_cluster_get: true,
            local_cluster_consistency: false,
            use_registry_keep_alive: true,
            registry_keep_alive_delay_millis: 15_000,
            event_queue_pool_name: None,
            event_queue_type: EventQueueType::Single,
            event_queue_pool_size: 4,
            event_queue_max_failure: 3,
            event_queue_wait_before_retry_millis: 500,
            remote_service_name: DEFAULT_SERVICE_NAME.to_string(),
            socket_open_timeout_millis: 5_000,
            socket_read_timeout_millis: 5_000,
            cluster_peers: Vec::new(),
            cache_event_logging: false,
        }
    }
}

impl ServerAttributes {
    /// Load attributes from a JSON file and validate them.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CacheServerError::Configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let attributes: Self = serde_json::from_str(&content).map_err(|e| {
            CacheServerError::Configuration(format!("Failed to parse config: {}", e))
        })?;

        attributes.validate()?;
        Ok(attributes)
    }

    /// Override a single attribute by its camelCase name.
    pub fn apply_property(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key.trim() {
            "servicePort" => self.service_port = parse_value(key, value)?,
            "allowClusterGet" => self.allow_cluster_get = parse_value(key, value)?,
            "localClusterConsistency" => self.local_cluster_consistency = parse_value(key, value)?,
            "useRegistryKeepAlive" => self.use_registry_keep_alive = parse_value(key, value)?,
            "registryKeepAliveDelayMillis" => {
                self.registry_keep_alive_delay_millis = parse_value(key, value)?
            }
            "eventQueuePoolName" => {
                self.event_queue_pool_name = (!value.is_empty()).then(|| value.to_string())
            }
            "eventQueueType" => self.event_queue_type = parse_value(key, value)?,
            "eventQueuePoolSize" => self.event_queue_pool_size = parse_value(key, value)?,
            "eventQueueMaxFailure" => self.event_queue_max_failure = parse_value(key, value)?,
            "eventQueueWaitBeforeRetryMillis" => {
                self.event_queue_wait_before_retry_millis = parse_value(key, value)?
            }
            "remoteServiceName" => self.remote_service_name = value.to_string(),
            "socketOpenTimeoutMillis" => self.socket_open_timeout_millis = parse_value(key, value)?,
            "socketReadTimeoutMillis" => self.socket_read_timeout_millis = parse_value(key, value)?,
            "clusterPeers" => {
                self.cluster_peers = value
                    .split(',')
                    .map(str::trim)
                    .filter(|peer| !peer.is_empty())
                    .map(str::to_string)
                    .collect()
            }
            "cacheEventLogging" => self.cache_event_logging = parse_value(key, value)?,
            other => {
                return Err(CacheServerError::Configuration(format!(
                    "Unknown server attribute: {}",
                    other
                )));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.remote_service_name.trim().is_empty() {
            return Err(CacheServerError::Configuration(
                "remoteServiceName must not be empty".to_string(),
            ));
        }

        if self.use_registry_keep_alive && self.registry_keep_alive_delay_millis == 0 {
            return Err(CacheServerError::Configuration(
                "registryKeepAliveDelayMillis must be positive when keep-alive is enabled"
                    .to_string(),
            ));
        }

        if self.event_queue_pool_size == 0 {
            return Err(CacheServerError::Configuration(
                "eventQueuePoolSize must be positive".to_string(),
            ));
        }

        if self.event_queue_max_failure == 0 {
            return Err(CacheServerError::Configuration(
                "eventQueueMaxFailure must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.registry_keep_alive_delay_millis)
    }

    pub fn socket_open_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_open_timeout_millis)
    }

    pub fn socket_read_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_read_timeout_millis)
    }

    pub fn wait_before_retry(&self) -> Duration {
        Duration::from_millis(self.event_queue_wait_before_retry_millis)
    }

    /// HTTP client honouring the configured socket timeouts.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(self.socket_open_timeout())
            .timeout(self.socket_read_timeout())
            .build()
            .map_err(|e| CacheServerError::Configuration(format!("Invalid HTTP client: {}", e)))
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| {
        CacheServerError::Configuration(format!("Invalid value [{}] for {}: {}", value, key, e))
    })
}
