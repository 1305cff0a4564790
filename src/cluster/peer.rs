//! A peer server used as a cascade target.
//!
//! Before the first call for a region the auxiliary subscribes at the peer as a cluster-peer
//! listener. The id it gets back is sent as `requester_id` on every later call, so the peer
//! applies our writes locally and never cascades them back.
//!
//! A transport failure may mean the peer restarted and lost our id, so the registrations are
//! forgotten and redone on the next call.

use super::client::RemoteCacheClient;
use crate::error::{CacheServerError, Result};
use crate::listeners::types::{ListenerDescriptor, ListenerId, RequesterType};
use crate::server::protocol::ENDPOINT_PEER_EVENTS;
use crate::storage::region::Auxiliary;
use crate::storage::types::CacheElement;

use async_trait::async_trait;
use dashmap::DashSet;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

pub struct PeerAuxiliary {
    client: RemoteCacheClient,
    /// Base URL of this server, where the peer would deliver events.
    local_url: String,
    local_host_address: Option<String>,
    listener_id: AtomicU64,
    registered: DashSet<String>,
    registration: Mutex<()>,
}

impl PeerAuxiliary {
    pub fn new(client: RemoteCacheClient, local_url: &str, local_host_address: Option<String>) -> Self {
        Self {
            client,
            local_url: local_url.trim_end_matches('/').to_string(),
            local_host_address,
            listener_id: AtomicU64::new(0),
            registered: DashSet::new(),
            registration: Mutex::new(()),
        }
    }

    pub fn listener_id(&self) -> ListenerId {
        ListenerId(self.listener_id.load(Ordering::SeqCst))
    }

    /// Our cluster-peer id at the peer, subscribing for `cache_name` first if needed.
    async fn requester_id(&self, cache_name: &str) -> Result<ListenerId> {
        if self.registered.contains(cache_name) {
            return Ok(self.listener_id());
        }

        let _guard = self.registration.lock().await;
        if self.registered.contains(cache_name) {
            return Ok(self.listener_id());
        }

        let descriptor = ListenerDescriptor {
            listener_id: self.listener_id(),
            remote_type: RequesterType::ClusterPeer,
            local_host_address: self.local_host_address.clone(),
            callback_url: Some(format!("{}{}", self.local_url, ENDPOINT_PEER_EVENTS)),
        };
        let id = self.check(self.client.add_listener(cache_name, &descriptor).await)?;

        tracing::info!(
            "Registered at peer {} for [{}] as cluster listener {}",
            self.client.base_url(),
            cache_name,
            id
        );
        self.listener_id.store(id.0, Ordering::SeqCst);
        self.registered.insert(cache_name.to_string());
        Ok(id)
    }

    fn forget_registrations(&self) {
        self.registered.clear();
        self.listener_id.store(0, Ordering::SeqCst);
    }

    fn check<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(CacheServerError::Transport(reason)) = &result {
            tracing::warn!(
                "Peer {} unreachable, registering again on the next call: {}",
                self.client.base_url(),
                reason
            );
            self.forget_registrations();
        }
        result
    }
}

#[async_trait]
impl Auxiliary for PeerAuxiliary {
    fn name(&self) -> &str {
        self.client.base_url()
    }

    async fn update(&self, item: &CacheElement) -> Result<()> {
        let requester_id = self.requester_id(&item.cache_name).await?;
        self.check(self.client.update(item, requester_id).await)
    }

    async fn get(&self, cache_name: &str, key: &str) -> Result<Option<CacheElement>> {
        let requester_id = self.requester_id(cache_name).await?;
        self.check(self.client.get(cache_name, key, requester_id).await)
    }

    async fn get_matching(
        &self,
        cache_name: &str,
        pattern: &str,
    ) -> Result<HashMap<String, CacheElement>> {
        let requester_id = self.requester_id(cache_name).await?;
        self.check(
            self.client
                .get_matching(cache_name, pattern, requester_id)
                .await,
        )
    }

    async fn get_multiple(
        &self,
        cache_name: &str,
        keys: &HashSet<String>,
    ) -> Result<HashMap<String, CacheElement>> {
        let requester_id = self.requester_id(cache_name).await?;
        self.check(
            self.client
                .get_multiple(cache_name, keys, requester_id)
                .await,
        )
    }

    async fn remove(&self, cache_name: &str, key: &str) -> Result<()> {
        let requester_id = self.requester_id(cache_name).await?;
        self.check(self.client.remove(cache_name, key, requester_id).await)
    }

    async fn remove_all(&self, cache_name: &str) -> Result<()> {
        let requester_id = self.requester_id(cache_name).await?;
        self.check(self.client.remove_all(cache_name, requester_id).await)
    }
}
