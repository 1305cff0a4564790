//! Network Protocol Definitions
//!
//! Data Transfer Objects exchanged between clients, cluster peers and the remote cache server.
//! Every mutating or reading call carries the `requester_id` of the caller's own listener, or
//! `0` if it never registered one.

use crate::events::types::CacheEvent;
use crate::listeners::types::{ListenerDescriptor, ListenerId};
use crate::storage::types::CacheElement;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub const ENDPOINT_UPDATE: &str = "/cache/update";
pub const ENDPOINT_GET: &str = "/cache/get";
pub const ENDPOINT_GET_MATCHING: &str = "/cache/get_matching";
pub const ENDPOINT_GET_MULTIPLE: &str = "/cache/get_multiple";
pub const ENDPOINT_KEYS: &str = "/cache/keys";
pub const ENDPOINT_REMOVE: &str = "/cache/remove";
pub const ENDPOINT_REMOVE_ALL: &str = "/cache/remove_all";
pub const ENDPOINT_DISPOSE: &str = "/cache/dispose";
pub const ENDPOINT_RELEASE: &str = "/cache/release";
pub const ENDPOINT_ADD_LISTENER: &str = "/listeners/add";
pub const ENDPOINT_REMOVE_LISTENER: &str = "/listeners/remove";
pub const ENDPOINT_SHUTDOWN: &str = "/admin/shutdown";
pub const ENDPOINT_STATS: &str = "/admin/stats";
pub const ENDPOINT_PEER_EVENTS: &str = "/peer/events";

/// Region wildcard accepted by the listener endpoints.
pub const ALL_REGIONS: &str = "*";

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub item: CacheElement,
    #[serde(default)]
    pub requester_id: ListenerId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetRequest {
    pub cache_name: String,
    pub key: String,
    #[serde(default)]
    pub requester_id: ListenerId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetResponse {
    pub item: Option<CacheElement>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetMatchingRequest {
    pub cache_name: String,
    pub pattern: String,
    #[serde(default)]
    pub requester_id: ListenerId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetMultipleRequest {
    pub cache_name: String,
    pub keys: HashSet<String>,
    #[serde(default)]
    pub requester_id: ListenerId,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ElementsResponse {
    pub elements: HashMap<String, CacheElement>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct KeySetResponse {
    pub keys: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveRequest {
    pub cache_name: String,
    pub key: String,
    #[serde(default)]
    pub requester_id: ListenerId,
}

/// Body of `remove_all` and `dispose`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegionRequest {
    pub cache_name: String,
    #[serde(default)]
    pub requester_id: ListenerId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OperationResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OperationResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddListenerRequest {
    pub cache_name: String,
    pub descriptor: ListenerDescriptor,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddListenerResponse {
    pub success: bool,
    pub listener_id: ListenerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveListenerRequest {
    pub cache_name: String,
    pub listener_id: ListenerId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ShutdownRequest {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub stats: String,
}

/// Payload POSTed to a listener's callback URL for every queued event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerEventRequest {
    pub listener_id: ListenerId,
    pub event: CacheEvent,
}
