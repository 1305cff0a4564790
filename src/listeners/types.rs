use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a registered listener. `0` is reserved for anonymous callers.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(transparent)]
pub struct ListenerId(pub u64);

impl ListenerId {
    pub const ANONYMOUS: ListenerId = ListenerId(0);

    pub fn is_anonymous(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of party sits behind a listener id.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RequesterType {
    #[default]
    Client,
    ClusterPeer,
}

/// What a listener presents when it subscribes to a region.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ListenerDescriptor {
    /// `0` asks the server to allocate a fresh id.
    #[serde(default)]
    pub listener_id: ListenerId,
    #[serde(default)]
    pub remote_type: RequesterType,
    /// Address of the listener's host, kept for event logging.
    #[serde(default)]
    pub local_host_address: Option<String>,
    /// Where queued events are POSTed to.
    #[serde(default)]
    pub callback_url: Option<String>,
}

/// The caller of a single RPC, resolved once at the boundary and carried through the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub id: ListenerId,
    pub kind: RequesterType,
}

impl Requester {
    pub fn is_cluster(&self) -> bool {
        self.kind == RequesterType::ClusterPeer
    }
}
