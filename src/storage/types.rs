use serde::{Deserialize, Serialize};

/// A cached value together with the region it belongs to.
///
/// Values are opaque to the server and travel as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheElement {
    pub cache_name: String,
    pub key: String,
    pub value: serde_json::Value,
    /// Timestamp (ms) when the element was created by its original writer.
    pub created_at: u64,
}

impl CacheElement {
    pub fn new(cache_name: impl Into<String>, key: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            cache_name: cache_name.into(),
            key: key.into(),
            value,
            created_at: now_ms(),
        }
    }
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
