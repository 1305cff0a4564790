use crate::storage::types::CacheElement;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A mutation notification sent to a remote listener.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheEvent {
    Put { item: CacheElement },
    Remove { cache_name: String, key: String },
    RemoveAll { cache_name: String },
    Dispose { cache_name: String },
}

impl CacheEvent {
    pub fn cache_name(&self) -> &str {
        match self {
            CacheEvent::Put { item } => &item.cache_name,
            CacheEvent::Remove { cache_name, .. }
            | CacheEvent::RemoveAll { cache_name }
            | CacheEvent::Dispose { cache_name } => cache_name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CacheEvent::Put { .. } => "put",
            CacheEvent::Remove { .. } => "remove",
            CacheEvent::RemoveAll { .. } => "remove_all",
            CacheEvent::Dispose { .. } => "dispose",
        }
    }
}

impl fmt::Display for CacheEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheEvent::Put { item } => write!(f, "PutEvent [{}] in [{}]", item.key, item.cache_name),
            CacheEvent::Remove { cache_name, key } => {
                write!(f, "RemoveEvent [{}] in [{}]", key, cache_name)
            }
            CacheEvent::RemoveAll { cache_name } => write!(f, "RemoveAllEvent in [{}]", cache_name),
            CacheEvent::Dispose { cache_name } => write!(f, "DisposeEvent in [{}]", cache_name),
        }
    }
}

/// How a queue schedules its deliveries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventQueueType {
    #[default]
    Single,
    Pooled,
}

impl FromStr for EventQueueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "pooled" => Ok(Self::Pooled),
            other => Err(format!("unknown event queue type: {}", other)),
        }
    }
}
