//! Listener Registry
//!
//! Maps regions to their event queues and listener ids to requester types. Regions are created
//! lazily on first reference and memoized, so there is at most one `RegionListeners` per name
//! and pool.

use super::types::{ListenerDescriptor, ListenerId, Requester, RequesterType};
use crate::error::{CacheServerError, Result};
use crate::events::listener::RemoteListener;
use crate::events::queue::{EventQueue, EventQueueFactory};
use crate::storage::region::{CacheManager, RegionStore};

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Ids are handed out in `1..=DEFAULT_MAX_LISTENER_ID` and wrap around afterwards.
pub const DEFAULT_MAX_LISTENER_ID: u64 = i32::MAX as u64;

/// The listeners of one region together with its backing store.
pub struct RegionListeners {
    cache_name: String,
    store: Arc<dyn RegionStore>,
    queues: DashMap<ListenerId, Arc<dyn EventQueue>>,
    /// Serializes "mutate + enqueue" for this region.
    write_lock: Mutex<()>,
}

impl RegionListeners {
    pub fn new(cache_name: &str, store: Arc<dyn RegionStore>) -> Self {
        Self {
            cache_name: cache_name.to_string(),
            store,
            queues: DashMap::new(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn store(&self) -> &Arc<dyn RegionStore> {
        &self.store
    }

    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    /// Working queues except the requester's, ordered by listener id.
    pub fn fanout_targets(&self, exclude: ListenerId) -> Vec<Arc<dyn EventQueue>> {
        let mut targets: Vec<Arc<dyn EventQueue>> = self
            .queues
            .iter()
            .filter(|entry| *entry.key() != exclude && entry.value().is_working())
            .map(|entry| entry.value().clone())
            .collect();
        targets.sort_by_key(|queue| queue.listener_id());
        targets
    }

    pub fn listener_ids(&self) -> Vec<ListenerId> {
        let mut ids: Vec<ListenerId> = self.queues.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    pub fn queue(&self, id: ListenerId) -> Option<Arc<dyn EventQueue>> {
        self.queues.get(&id).map(|entry| entry.value().clone())
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    pub fn live_queue_count(&self) -> usize {
        self.queues
            .iter()
            .filter(|entry| entry.value().is_working())
            .count()
    }

    /// Drops queues that stopped working.
    fn cleanup(&self) {
        self.queues.retain(|id, queue| {
            let keep = queue.is_working();
            if !keep {
                tracing::info!(
                    "Removing non-functional queue of listener {} from [{}]",
                    id,
                    self.cache_name
                );
            }
            keep
        });
    }
}

/// Bounded wrap-around id counter.
///
/// After wrapping, an allocated id is not checked against ids that are still live.
#[derive(Debug)]
struct IdAllocator {
    last: u64,
    max: u64,
}

impl IdAllocator {
    fn next(&mut self) -> ListenerId {
        if self.last >= self.max {
            tracing::warn!("Listener id counter reached {}, wrapping around", self.max);
            self.last = 0;
        }
        self.last += 1;
        ListenerId(self.last)
    }
}

pub struct ListenerRegistry {
    cache_manager: Arc<dyn CacheManager>,
    queue_factory: EventQueueFactory,
    client_regions: DashMap<String, Arc<RegionListeners>>,
    cluster_regions: DashMap<String, Arc<RegionListeners>>,
    id_types: DashMap<ListenerId, RequesterType>,
    id_addresses: DashMap<ListenerId, String>,
    /// Guards id allocation and the rest of a registration.
    allocator: Mutex<IdAllocator>,
}

impl ListenerRegistry {
    pub fn new(cache_manager: Arc<dyn CacheManager>, queue_factory: EventQueueFactory) -> Self {
        Self::with_max_listener_id(cache_manager, queue_factory, DEFAULT_MAX_LISTENER_ID)
    }

    pub fn with_max_listener_id(
        cache_manager: Arc<dyn CacheManager>,
        queue_factory: EventQueueFactory,
        max_listener_id: u64,
    ) -> Self {
        Self {
            cache_manager,
            queue_factory,
            client_regions: DashMap::new(),
            cluster_regions: DashMap::new(),
            id_types: DashMap::new(),
            id_addresses: DashMap::new(),
            allocator: Mutex::new(IdAllocator {
                last: 0,
                max: max_listener_id.max(1),
            }),
        }
    }

    pub fn cache_manager(&self) -> &Arc<dyn CacheManager> {
        &self.cache_manager
    }

    /// Since a caller that never registered a listener has no id, it is treated as a client.
    pub fn resolve(&self, requester_id: ListenerId) -> Requester {
        let kind = self
            .id_types
            .get(&requester_id)
            .map(|entry| *entry.value())
            .unwrap_or_default();
        Requester {
            id: requester_id,
            kind,
        }
    }

    pub fn origin_address(&self, id: ListenerId) -> Option<String> {
        self.id_addresses.get(&id).map(|entry| entry.value().clone())
    }

    /// The client pool of `cache_name`, creating region and store on first reference.
    pub async fn region(&self, cache_name: &str) -> Result<Arc<RegionListeners>> {
        self.region_in(&self.client_regions, cache_name).await
    }

    pub async fn cluster_region(&self, cache_name: &str) -> Result<Arc<RegionListeners>> {
        self.region_in(&self.cluster_regions, cache_name).await
    }

    /// The client pool of `cache_name` if it was referenced before.
    pub fn existing_region(&self, cache_name: &str) -> Option<Arc<RegionListeners>> {
        self.client_regions
            .get(cache_name)
            .map(|entry| entry.value().clone())
    }

    async fn region_in(
        &self,
        regions: &DashMap<String, Arc<RegionListeners>>,
        cache_name: &str,
    ) -> Result<Arc<RegionListeners>> {
        if let Some(region) = regions.get(cache_name) {
            return Ok(region.value().clone());
        }

        let store = self.cache_manager.get_region(cache_name).await?;
        let region = regions
            .entry(cache_name.to_string())
            .or_insert_with(|| Arc::new(RegionListeners::new(cache_name, store)))
            .value()
            .clone();
        Ok(region)
    }

    /// Subscribes a listener to a region and returns the id it is registered under.
    pub async fn register(
        &self,
        cache_name: &str,
        descriptor: &ListenerDescriptor,
        listener: Arc<dyn RemoteListener>,
    ) -> Result<ListenerId> {
        let remote_type = descriptor.remote_type;
        let address = descriptor.local_host_address.clone();

        let region = match remote_type {
            RequesterType::ClusterPeer => {
                tracing::debug!("Adding cluster listener, listenerAddress [{:?}]", address);
                self.cluster_region(cache_name).await
            }
            RequesterType::Client => {
                tracing::debug!("Adding normal listener, listenerAddress [{:?}]", address);
                self.region(cache_name).await
            }
        }
        .map_err(|e| {
            CacheServerError::ListenerRegistration(format!(
                "Cannot resolve region [{}] for listener at [{:?}]: {}",
                cache_name, address, e
            ))
        })?;

        region.cleanup();

        let mut allocator = self.allocator.lock().await;

        let id = if descriptor.listener_id.is_anonymous() {
            let id = allocator.next();
            tracing::info!(
                "Adding vm listener under new id = [{}], listenerAddress [{:?}]",
                id,
                address
            );
            id
        } else {
            tracing::info!(
                "Adding listener under existing id = [{}], listenerAddress [{:?}]",
                descriptor.listener_id,
                address
            );
            descriptor.listener_id
        };

        self.id_types.insert(id, remote_type);
        if let Some(address) = address {
            self.id_addresses.insert(id, address);
        }

        let queue = self.queue_factory.create_queue(listener, id, cache_name);
        if let Some(previous) = region.queues.insert(id, queue) {
            previous.destroy();
        }
        drop(allocator);

        tracing::info!(
            "Region [{}] now has {} {:?} listener(s)",
            cache_name,
            region.queue_count(),
            remote_type
        );
        Ok(id)
    }

    /// Unsubscribes a listener from a region. Safe to call repeatedly.
    ///
    /// Returns whether a queue was found and destroyed.
    pub fn unregister(&self, cache_name: &str, listener_id: ListenerId) -> bool {
        let pools: Vec<&DashMap<String, Arc<RegionListeners>>> =
            match self.id_types.get(&listener_id).map(|entry| *entry.value()) {
                Some(RequesterType::ClusterPeer) => vec![&self.cluster_regions],
                Some(RequesterType::Client) => vec![&self.client_regions],
                None => vec![&self.client_regions, &self.cluster_regions],
            };

        let mut found = false;
        for pool in pools {
            let Some(region) = pool.get(cache_name).map(|entry| entry.value().clone()) else {
                continue;
            };

            region.cleanup();
            if let Some((_, queue)) = region.queues.remove(&listener_id) {
                tracing::debug!(
                    "Found queue for cache region = [{}] and listenerId [{}]",
                    cache_name,
                    listener_id
                );
                queue.destroy();
                region.cleanup();
                found = true;
            }

            tracing::info!(
                "After removing listener [{}] cache region [{}]'s listener size [{}]",
                listener_id,
                cache_name,
                region.queue_count()
            );
        }

        if !found {
            tracing::debug!(
                "Did not find queue for cache region = [{}] and listenerId [{}]",
                cache_name,
                listener_id
            );
        }

        self.id_types.remove(&listener_id);
        self.id_addresses.remove(&listener_id);
        found
    }

    /// Names of every region known to either pool, sorted.
    pub fn region_names(&self) -> Vec<String> {
        let names: BTreeSet<String> = self
            .client_regions
            .iter()
            .chain(self.cluster_regions.iter())
            .map(|entry| entry.key().clone())
            .collect();
        names.into_iter().collect()
    }

    /// Every listener id with a queue in `cache_name`, across both pools.
    pub fn listener_ids(&self, cache_name: &str) -> Vec<ListenerId> {
        let ids: BTreeSet<ListenerId> = [&self.client_regions, &self.cluster_regions]
            .into_iter()
            .filter_map(|pool| pool.get(cache_name).map(|entry| entry.value().clone()))
            .flat_map(|region| region.listener_ids())
            .collect();
        ids.into_iter().collect()
    }

    /// Forgets both pools of a region. Queues are dropped, not destroyed, so events already
    /// enqueued are still delivered.
    ///
    /// Type and address entries go with the queues, unless the id still listens to another
    /// region.
    pub fn remove_region(&self, cache_name: &str) {
        let mut ids = Vec::new();
        for pool in [&self.client_regions, &self.cluster_regions] {
            if let Some((_, region)) = pool.remove(cache_name) {
                ids.extend(region.listener_ids());
            }
        }

        for id in ids {
            if !self.has_queue(id) {
                self.id_types.remove(&id);
                self.id_addresses.remove(&id);
            }
        }
    }

    fn has_queue(&self, id: ListenerId) -> bool {
        self.client_regions
            .iter()
            .chain(self.cluster_regions.iter())
            .any(|entry| entry.value().queues.contains_key(&id))
    }

    pub fn live_queue_count(&self) -> usize {
        self.client_regions
            .iter()
            .chain(self.cluster_regions.iter())
            .map(|entry| entry.value().live_queue_count())
            .sum()
    }

    pub fn registered_type_count(&self) -> usize {
        self.id_types.len()
    }

    /// Drops every region and all id bookkeeping.
    pub fn clear(&self) {
        self.client_regions.clear();
        self.cluster_regions.clear();
        self.id_types.clear();
        self.id_addresses.clear();
    }
}
