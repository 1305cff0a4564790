//! HTTP client for the RPC surface of a remote cache server.
//!
//! Used by peer servers to cascade writes and reads, and by the binary for remote shutdown and
//! stats. Connection failures are retried with jittered exponential backoff; HTTP error statuses
//! are not.

use crate::error::{CacheServerError, Result};
use crate::listeners::types::{ListenerDescriptor, ListenerId};
use crate::server::protocol::*;
use crate::storage::types::CacheElement;

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

const DEFAULT_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct RemoteCacheClient {
    base_url: String,
    http_client: reqwest::Client,
    attempts: usize,
}

impl RemoteCacheClient {
    pub fn new(base_url: impl Into<String>, http_client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
            attempts: DEFAULT_ATTEMPTS,
        }
    }

    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn update(&self, item: &CacheElement, requester_id: ListenerId) -> Result<()> {
        let _: OperationResponse = self
            .post(
                ENDPOINT_UPDATE,
                &UpdateRequest {
                    item: item.clone(),
                    requester_id,
                },
            )
            .await?;
        Ok(())
    }

    pub async fn get(
        &self,
        cache_name: &str,
        key: &str,
        requester_id: ListenerId,
    ) -> Result<Option<CacheElement>> {
        let response: GetResponse = self
            .post(
                ENDPOINT_GET,
                &GetRequest {
                    cache_name: cache_name.to_string(),
                    key: key.to_string(),
                    requester_id,
                },
            )
            .await?;
        Ok(response.item)
    }

    pub async fn get_matching(
        &self,
        cache_name: &str,
        pattern: &str,
        requester_id: ListenerId,
    ) -> Result<HashMap<String, CacheElement>> {
        let response: ElementsResponse = self
            .post(
                ENDPOINT_GET_MATCHING,
                &GetMatchingRequest {
                    cache_name: cache_name.to_string(),
                    pattern: pattern.to_string(),
                    requester_id,
                },
            )
            .await?;
        Ok(response.elements)
    }

    pub async fn get_multiple(
        &self,
        cache_name: &str,
        keys: &HashSet<String>,
        requester_id: ListenerId,
    ) -> Result<HashMap<String, CacheElement>> {
        let response: ElementsResponse = self
            .post(
                ENDPOINT_GET_MULTIPLE,
                &GetMultipleRequest {
                    cache_name: cache_name.to_string(),
                    keys: keys.clone(),
                    requester_id,
                },
            )
            .await?;
        Ok(response.elements)
    }

    pub async fn get_key_set(&self, cache_name: &str) -> Result<Vec<String>> {
        let response: KeySetResponse = self
            .get_json(&format!("{}/{}", ENDPOINT_KEYS, cache_name))
            .await?;
        Ok(response.keys)
    }

    pub async fn remove(&self, cache_name: &str, key: &str, requester_id: ListenerId) -> Result<()> {
        let _: OperationResponse = self
            .post(
                ENDPOINT_REMOVE,
                &RemoveRequest {
                    cache_name: cache_name.to_string(),
                    key: key.to_string(),
                    requester_id,
                },
            )
            .await?;
        Ok(())
    }

    pub async fn remove_all(&self, cache_name: &str, requester_id: ListenerId) -> Result<()> {
        let _: OperationResponse = self
            .post(
                ENDPOINT_REMOVE_ALL,
                &RegionRequest {
                    cache_name: cache_name.to_string(),
                    requester_id,
                },
            )
            .await?;
        Ok(())
    }

    pub async fn dispose(&self, cache_name: &str, requester_id: ListenerId) -> Result<()> {
        let _: OperationResponse = self
            .post(
                ENDPOINT_DISPOSE,
                &RegionRequest {
                    cache_name: cache_name.to_string(),
                    requester_id,
                },
            )
            .await?;
        Ok(())
    }

    pub async fn release(&self) -> Result<()> {
        let _: OperationResponse = self.post(ENDPOINT_RELEASE, &()).await?;
        Ok(())
    }

    pub async fn add_listener(
        &self,
        cache_name: &str,
        descriptor: &ListenerDescriptor,
    ) -> Result<ListenerId> {
        let response: AddListenerResponse = self
            .post(
                ENDPOINT_ADD_LISTENER,
                &AddListenerRequest {
                    cache_name: cache_name.to_string(),
                    descriptor: descriptor.clone(),
                },
            )
            .await?;
        Ok(response.listener_id)
    }

    pub async fn remove_listener(&self, cache_name: &str, listener_id: ListenerId) -> Result<()> {
        let _: OperationResponse = self
            .post(
                ENDPOINT_REMOVE_LISTENER,
                &RemoveListenerRequest {
                    cache_name: cache_name.to_string(),
                    listener_id,
                },
            )
            .await?;
        Ok(())
    }

    pub async fn shutdown(&self, host: &str, port: u16) -> Result<()> {
        let _: OperationResponse = self
            .post(
                ENDPOINT_SHUTDOWN,
                &ShutdownRequest {
                    host: host.to_string(),
                    port,
                },
            )
            .await?;
        Ok(())
    }

    pub async fn stats(&self) -> Result<String> {
        let response: StatsResponse = self.get_json(ENDPOINT_STATS).await?;
        Ok(response.stats)
    }

    async fn post<T: Serialize, R: DeserializeOwned>(&self, path: &str, payload: &T) -> Result<R> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.post_with_retry(&url, payload).await?;
        decode(&url, response).await
    }

    async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.get_with_retry(&url).await?;
        decode(&url, response).await
    }

    async fn post_with_retry<T: Serialize>(
        &self,
        url: &str,
        payload: &T,
    ) -> Result<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..self.attempts {
            match self.http_client.post(url).json(payload).send().await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if attempt + 1 == self.attempts {
                        return Err(e.into());
                    }
                    tracing::debug!("POST {} failed (attempt {}): {}", url, attempt + 1, e);
                    delay_ms = backoff(delay_ms).await;
                }
            }
        }

        Err(CacheServerError::Transport(format!(
            "Retry attempts exhausted for {}",
            url
        )))
    }

    async fn get_with_retry(&self, url: &str) -> Result<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..self.attempts {
            match self.http_client.get(url).send().await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if attempt + 1 == self.attempts {
                        return Err(e.into());
                    }
                    tracing::debug!("GET {} failed (attempt {}): {}", url, attempt + 1, e);
                    delay_ms = backoff(delay_ms).await;
                }
            }
        }

        Err(CacheServerError::Transport(format!(
            "Retry attempts exhausted for {}",
            url
        )))
    }
}

/// Sleeps for `delay_ms` plus jitter and returns the next delay.
async fn backoff(delay_ms: u64) -> u64 {
    let jitter = rand::random::<u64>() % 50;
    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
    (delay_ms * 2).min(1200)
}

async fn decode<R: DeserializeOwned>(url: &str, response: reqwest::Response) -> Result<R> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CacheServerError::Transport(format!(
            "{} answered {}: {}",
            url, status, body
        )));
    }
    Ok(response.json().await?)
}
