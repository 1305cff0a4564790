//! Delivery targets for queued events.

use super::types::CacheEvent;
use crate::error::{CacheServerError, Result};
use crate::listeners::types::ListenerId;
use crate::server::protocol::ListenerEventRequest;

use async_trait::async_trait;

/// The receiving end of an event queue.
///
/// Errors are reported back to the queue, which decides whether to retry or to give up on the
/// listener.
#[async_trait]
pub trait RemoteListener: Send + Sync {
    async fn handle_event(&self, listener_id: ListenerId, event: &CacheEvent) -> Result<()>;
}

/// Delivers events by POSTing them to the callback URL a listener registered with.
pub struct HttpRemoteListener {
    callback_url: String,
    http_client: reqwest::Client,
}

impl HttpRemoteListener {
    pub fn new(callback_url: impl Into<String>, http_client: reqwest::Client) -> Self {
        Self {
            callback_url: callback_url.into(),
            http_client,
        }
    }
}

#[async_trait]
impl RemoteListener for HttpRemoteListener {
    async fn handle_event(&self, listener_id: ListenerId, event: &CacheEvent) -> Result<()> {
        let payload = ListenerEventRequest {
            listener_id,
            event: event.clone(),
        };

        let response = self
            .http_client
            .post(&self.callback_url)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CacheServerError::Transport(format!(
                "Listener {} at {} answered {}",
                listener_id,
                self.callback_url,
                response.status()
            )));
        }

        Ok(())
    }
}
