use serde::{Deserialize, Serialize};
use std::fmt;

/// What a name resolves to in the service directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub service_name: String,
    /// Base URL of the RPC surface, e.g. `http://cache-1:8100`.
    pub url: String,
}

impl ServiceEndpoint {
    pub fn new(service_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            url: url.into(),
        }
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.service_name, self.url)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BindRequest {
    pub endpoint: ServiceEndpoint,
    /// `false` refuses to overwrite an existing binding.
    #[serde(default)]
    pub replace: bool,
}

/// Lifecycle of the server owned by a `ServerManager`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Running,
}

/// Result of one keep-alive check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveOutcome {
    /// The name resolved, nothing to do.
    Alive,
    /// The name was missing and the binding was restored.
    Restored,
    /// The name was missing and could not be restored this time.
    Failed,
}
