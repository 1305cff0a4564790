//! Structured cache event logging.
//!
//! When `cacheEventLogging` is on, every RPC produces one `CacheEventRecord`. The record is
//! created before the operation starts and logged once it finished, so the elapsed time covers
//! the whole call.

use std::fmt;
use std::time::Instant;

pub const CACHE_EVENTS_TARGET: &str = "cache_events";
pub const EVENT_SOURCE: &str = "RemoteCacheServer";

/// Names of the events recorded per RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEventName {
    Update,
    Get,
    GetMatching,
    GetMultiple,
    Remove,
    RemoveAll,
    Dispose,
}

impl CacheEventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheEventName::Update => "update",
            CacheEventName::Get => "get",
            CacheEventName::GetMatching => "getMatching",
            CacheEventName::GetMultiple => "getMultiple",
            CacheEventName::Remove => "remove",
            CacheEventName::RemoveAll => "removeAll",
            CacheEventName::Dispose => "dispose",
        }
    }
}

impl fmt::Display for CacheEventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CacheEventRecord {
    pub source: &'static str,
    pub region: String,
    pub event_name: CacheEventName,
    /// Origin address recorded for the requester, if it registered one.
    pub origin: Option<String>,
    pub key: String,
    pub started_at: Instant,
}

/// Sink for per-call cache events, application events and errors.
pub trait CacheEventLogger: Send + Sync {
    fn log_cache_event(&self, record: &CacheEventRecord);

    fn log_application_event(&self, source: &str, event_name: &str, detail: &str);

    fn log_error(&self, source: &str, event_name: &str, error: &str);
}

/// Writes cache events to the `cache_events` tracing target.
#[derive(Debug, Default)]
pub struct TracingCacheEventLogger;

impl CacheEventLogger for TracingCacheEventLogger {
    fn log_cache_event(&self, record: &CacheEventRecord) {
        tracing::info!(
            target: CACHE_EVENTS_TARGET,
            source = record.source,
            region = %record.region,
            event = %record.event_name,
            origin = record.origin.as_deref().unwrap_or("unknown"),
            key = %record.key,
            elapsed_us = record.started_at.elapsed().as_micros() as u64,
            "cache event"
        );
    }

    fn log_application_event(&self, source: &str, event_name: &str, detail: &str) {
        tracing::info!(
            target: CACHE_EVENTS_TARGET,
            source,
            event = event_name,
            detail,
            "application event"
        );
    }

    fn log_error(&self, source: &str, event_name: &str, error: &str) {
        tracing::error!(
            target: CACHE_EVENTS_TARGET,
            source,
            event = event_name,
            error,
            "cache error"
        );
    }
}
