//! Remote Cache Server core.
//!
//! Applies client and cluster-peer calls to the named regions and fans resulting events out to
//! the other listeners of the region.
//!
//! ## Routing
//! - Writes from a cluster peer go to the `local_*` store operations and only fan out when
//!   `localClusterConsistency` is on. Writes from clients cascade and always fan out.
//! - Reads from a cluster peer are local. Client reads cascade when `allowClusterGet` is on.
//! - Fan-out never delivers back to the requester's own listener.
//!
//! The region lock covers the local write and the enqueue only. Client writes are cascaded to
//! the auxiliaries after the lock is released.
//!
//! Store faults are logged and swallowed at the operation boundary; the call itself succeeds.

use super::event_log::{
    CacheEventLogger, CacheEventName, CacheEventRecord, EVENT_SOURCE, TracingCacheEventLogger,
};
use super::protocol::{ALL_REGIONS, ShutdownRequest};
use crate::config::ServerAttributes;
use crate::error::{CacheServerError, Result};
use crate::events::listener::{HttpRemoteListener, RemoteListener};
use crate::events::queue::EventQueueFactory;
use crate::events::types::CacheEvent;
use crate::listeners::registry::{ListenerRegistry, RegionListeners};
use crate::listeners::types::{ListenerDescriptor, ListenerId, Requester};
use crate::storage::region::CacheManager;
use crate::storage::types::CacheElement;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;

/// Every n-th put is logged at info level.
const PUT_LOG_INTERVAL: u64 = 100;

pub struct RemoteCacheServer {
    attributes: ServerAttributes,
    registry: ListenerRegistry,
    http_client: reqwest::Client,
    event_logger: Option<Arc<dyn CacheEventLogger>>,
    shutdown_hook: Option<mpsc::UnboundedSender<ShutdownRequest>>,
    puts: AtomicU64,
    shut_down: AtomicBool,
}

impl RemoteCacheServer {
    pub fn new(attributes: ServerAttributes, cache_manager: Arc<dyn CacheManager>) -> Result<Self> {
        Self::with_registry(
            attributes.clone(),
            ListenerRegistry::new(cache_manager, EventQueueFactory::from_attributes(&attributes)),
        )
    }

    pub fn with_registry(attributes: ServerAttributes, registry: ListenerRegistry) -> Result<Self> {
        attributes.validate()?;
        let http_client = attributes.http_client()?;
        let event_logger = cache_event_logger(&attributes);

        Ok(Self {
            attributes,
            registry,
            http_client,
            event_logger,
            shutdown_hook: None,
            puts: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn with_event_logger(mut self, logger: Arc<dyn CacheEventLogger>) -> Self {
        self.event_logger = Some(logger);
        self
    }

    /// Routes `shutdown(host, port)` calls to whoever owns the server's lifecycle.
    pub fn with_shutdown_hook(mut self, hook: mpsc::UnboundedSender<ShutdownRequest>) -> Self {
        self.shutdown_hook = Some(hook);
        self
    }

    pub fn attributes(&self) -> &ServerAttributes {
        &self.attributes
    }

    pub fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    pub fn cache_manager(&self) -> &Arc<dyn CacheManager> {
        self.registry.cache_manager()
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    pub fn puts(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    // ============================================================
    // WRITES
    // ============================================================

    /// An update from an anonymous client.
    pub async fn put(&self, item: CacheElement) {
        self.update(item, ListenerId::ANONYMOUS).await;
    }

    pub async fn update(&self, item: CacheElement, requester_id: ListenerId) {
        let requester = self.registry.resolve(requester_id);
        let record = self.create_event(&item.cache_name, &item.key, requester, CacheEventName::Update);
        self.process_update(item, requester).await;
        self.log_event(record);
    }

    async fn process_update(&self, item: CacheElement, requester: Requester) {
        self.log_update_info(&item);

        let Some(region) = self.resolve_region(&item.cache_name, "update").await else {
            return;
        };

        {
            let _guard = region.lock().await;

            if let Err(e) = region.store().local_update(item.clone()).await {
                self.log_store_error("update", &item.cache_name, &e);
                return;
            }

            if self.should_fan_out(requester) {
                let targets = region.fanout_targets(requester.id);
                tracing::debug!("Enqueuing put of [{}] for {} listener(s)", item.key, targets.len());
                for queue in targets {
                    queue.add_put_event(item.clone());
                }
            } else {
                tracing::debug!(
                    "NOT notifying listeners of [{}], request came from cluster {}",
                    item.key,
                    requester.id
                );
            }
        }

        // Auxiliaries may be remote, so they are only reached once the region lock is released.
        if requester.is_cluster() {
            tracing::debug!("Put [{}] FROM cluster, NOT updating other auxiliaries", item.key);
        } else if let Err(e) = region.store().cascade_update(&item).await {
            self.log_store_error("update", &item.cache_name, &e);
        }
    }

    pub async fn remove(&self, cache_name: &str, key: &str, requester_id: ListenerId) {
        let requester = self.registry.resolve(requester_id);
        let record = self.create_event(cache_name, key, requester, CacheEventName::Remove);
        self.process_remove(cache_name, key, requester).await;
        self.log_event(record);
    }

    async fn process_remove(&self, cache_name: &str, key: &str, requester: Requester) {
        tracing::debug!("remove [{}] from cache [{}]", key, cache_name);

        let Some(region) = self.registry.existing_region(cache_name) else {
            return;
        };

        {
            let _guard = region.lock().await;

            match region.store().local_remove(key).await {
                Ok(found) => tracing::debug!("remove [{}] found locally: {}", key, found),
                Err(e) => {
                    self.log_store_error("remove", cache_name, &e);
                    return;
                }
            }

            if self.should_fan_out(requester) {
                for queue in region.fanout_targets(requester.id) {
                    queue.add_remove_event(key);
                }
            }
        }

        if !requester.is_cluster() {
            if let Err(e) = region.store().cascade_remove(key).await {
                self.log_store_error("remove", cache_name, &e);
            }
        }
    }

    pub async fn remove_all(&self, cache_name: &str, requester_id: ListenerId) {
        let requester = self.registry.resolve(requester_id);
        let record = self.create_event(cache_name, "all", requester, CacheEventName::RemoveAll);
        self.process_remove_all(cache_name, requester).await;
        self.log_event(record);
    }

    async fn process_remove_all(&self, cache_name: &str, requester: Requester) {
        let Some(region) = self.registry.existing_region(cache_name) else {
            return;
        };

        {
            let _guard = region.lock().await;

            if let Err(e) = region.store().local_remove_all().await {
                self.log_store_error("removeAll", cache_name, &e);
                return;
            }

            if self.should_fan_out(requester) {
                for queue in region.fanout_targets(requester.id) {
                    queue.add_remove_all_event();
                }
            }
        }

        if !requester.is_cluster() {
            if let Err(e) = region.store().cascade_remove_all().await {
                self.log_store_error("removeAll", cache_name, &e);
            }
        }
    }

    /// Tells every listener of the region to drop it, then frees the region.
    ///
    /// Unlike the other writes this goes to the requester's listener too.
    pub async fn dispose(&self, cache_name: &str, requester_id: ListenerId) {
        let requester = self.registry.resolve(requester_id);
        let record = self.create_event(cache_name, "none", requester, CacheEventName::Dispose);
        self.process_dispose(cache_name).await;
        self.log_event(record);
    }

    async fn process_dispose(&self, cache_name: &str) {
        tracing::info!("Dispose request received from listener for [{}]", cache_name);

        let Some(region) = self.registry.existing_region(cache_name) else {
            return;
        };

        let _guard = region.lock().await;

        let targets = region.fanout_targets(ListenerId::ANONYMOUS);
        tracing::debug!("Enqueuing dispose of [{}] for {} listener(s)", cache_name, targets.len());
        for queue in targets {
            queue.add_dispose_event();
        }

        self.cache_manager().free_region(cache_name).await;
        self.registry.remove_region(cache_name);
    }

    /// Disposes every region.
    pub async fn release(&self) {
        let names = self.registry.region_names();
        tracing::info!("Releasing {} region(s)", names.len());

        for name in names {
            self.process_dispose(&name).await;
        }
        self.cache_manager().release().await;
    }

    // ============================================================
    // READS
    // ============================================================

    pub async fn get(
        &self,
        cache_name: &str,
        key: &str,
        requester_id: ListenerId,
    ) -> Option<CacheElement> {
        let requester = self.registry.resolve(requester_id);
        let record = self.create_event(cache_name, key, requester, CacheEventName::Get);
        let item = self.process_get(cache_name, key, requester).await;
        self.log_event(record);
        item
    }

    async fn process_get(
        &self,
        cache_name: &str,
        key: &str,
        requester: Requester,
    ) -> Option<CacheElement> {
        let region = self.resolve_region(cache_name, "get").await?;

        let result = if self.cascading_reads(requester) {
            region.store().get(key).await
        } else {
            tracing::debug!("get [{}] from [{}] is local only", key, cache_name);
            region.store().local_get(key).await
        };

        match result {
            Ok(item) => item,
            Err(e) => {
                self.log_store_error("get", cache_name, &e);
                None
            }
        }
    }

    pub async fn get_matching(
        &self,
        cache_name: &str,
        pattern: &str,
        requester_id: ListenerId,
    ) -> HashMap<String, CacheElement> {
        let requester = self.registry.resolve(requester_id);
        let record = self.create_event(cache_name, pattern, requester, CacheEventName::GetMatching);

        let elements = match self.resolve_region(cache_name, "getMatching").await {
            Some(region) => {
                let result = if self.cascading_reads(requester) {
                    region.store().get_matching(pattern).await
                } else {
                    region.store().local_get_matching(pattern).await
                };
                result.unwrap_or_else(|e| {
                    self.log_store_error("getMatching", cache_name, &e);
                    HashMap::new()
                })
            }
            None => HashMap::new(),
        };

        self.log_event(record);
        elements
    }

    pub async fn get_multiple(
        &self,
        cache_name: &str,
        keys: &HashSet<String>,
        requester_id: ListenerId,
    ) -> HashMap<String, CacheElement> {
        let requester = self.registry.resolve(requester_id);
        let mut key_list: Vec<&str> = keys.iter().map(String::as_str).collect();
        key_list.sort_unstable();
        let record = self.create_event(
            cache_name,
            &key_list.join(","),
            requester,
            CacheEventName::GetMultiple,
        );

        let elements = match self.resolve_region(cache_name, "getMultiple").await {
            Some(region) => {
                let result = if self.cascading_reads(requester) {
                    region.store().get_multiple(keys).await
                } else {
                    region.store().local_get_multiple(keys).await
                };
                result.unwrap_or_else(|e| {
                    self.log_store_error("getMultiple", cache_name, &e);
                    HashMap::new()
                })
            }
            None => HashMap::new(),
        };

        self.log_event(record);
        elements
    }

    pub async fn get_key_set(&self, cache_name: &str) -> HashSet<String> {
        let Some(region) = self.resolve_region(cache_name, "getKeySet").await else {
            return HashSet::new();
        };

        region.store().get_key_set().await.unwrap_or_else(|e| {
            self.log_store_error("getKeySet", cache_name, &e);
            HashSet::new()
        })
    }

    // ============================================================
    // PEER EVENTS
    // ============================================================

    /// Applies an event pushed by a peer server to the local store only. Nothing is cascaded
    /// or fanned out.
    pub async fn apply_peer_event(&self, event: CacheEvent) {
        tracing::debug!("Applying peer event {}", event);

        match event {
            CacheEvent::Put { item } => {
                let Some(region) = self.resolve_region(&item.cache_name, "peerPut").await else {
                    return;
                };
                let _guard = region.lock().await;
                let cache_name = item.cache_name.clone();
                if let Err(e) = region.store().local_update(item).await {
                    self.log_store_error("peerPut", &cache_name, &e);
                }
            }
            CacheEvent::Remove { cache_name, key } => {
                let Some(region) = self.registry.existing_region(&cache_name) else {
                    return;
                };
                let _guard = region.lock().await;
                if let Err(e) = region.store().local_remove(&key).await {
                    self.log_store_error("peerRemove", &cache_name, &e);
                }
            }
            CacheEvent::RemoveAll { cache_name } => {
                let Some(region) = self.registry.existing_region(&cache_name) else {
                    return;
                };
                let _guard = region.lock().await;
                if let Err(e) = region.store().local_remove_all().await {
                    self.log_store_error("peerRemoveAll", &cache_name, &e);
                }
            }
            CacheEvent::Dispose { cache_name } => {
                tracing::info!("Peer disposed [{}], keeping the local region", cache_name);
            }
        }
    }

    // ============================================================
    // LISTENERS
    // ============================================================

    /// Builds the HTTP delivery target for a descriptor received over the wire.
    pub fn http_listener(&self, descriptor: &ListenerDescriptor) -> Result<Arc<dyn RemoteListener>> {
        let callback_url = descriptor.callback_url.as_deref().ok_or_else(|| {
            CacheServerError::ListenerRegistration(format!(
                "Listener at [{:?}] did not provide a callback url",
                descriptor.local_host_address
            ))
        })?;

        Ok(Arc::new(HttpRemoteListener::new(
            callback_url,
            self.http_client.clone(),
        )))
    }

    /// Subscribes `listener` to `cache_name`, or to every known region for `"*"`.
    pub async fn add_cache_listener(
        &self,
        cache_name: &str,
        descriptor: &ListenerDescriptor,
        listener: Arc<dyn RemoteListener>,
    ) -> Result<ListenerId> {
        if self.is_shut_down() {
            return Err(CacheServerError::Configuration(
                "Server is shut down, not accepting listeners".to_string(),
            ));
        }

        if cache_name != ALL_REGIONS {
            let id = self
                .registry
                .register(cache_name, descriptor, listener)
                .await
                .inspect_err(|e| self.log_error("addCacheListener", e))?;
            self.log_application_event(
                "addCacheListener",
                &format!("cacheName={}, listenerId={}", cache_name, id),
            );
            return Ok(id);
        }

        let names = self.known_regions();
        if names.is_empty() {
            tracing::debug!("No regions known yet, nothing to subscribe listener to");
            return Ok(descriptor.listener_id);
        }

        let mut descriptor = descriptor.clone();
        for name in names {
            let id = self
                .registry
                .register(&name, &descriptor, listener.clone())
                .await
                .inspect_err(|e| self.log_error("addCacheListener", e))?;
            descriptor.listener_id = id;
        }

        self.log_application_event(
            "addCacheListener",
            &format!("cacheName=*, listenerId={}", descriptor.listener_id),
        );
        Ok(descriptor.listener_id)
    }

    /// Unsubscribes a listener from `cache_name`, or from every known region for `"*"`.
    ///
    /// Returns whether any queue was removed. Repeated calls are harmless.
    pub fn remove_cache_listener(&self, cache_name: &str, listener_id: ListenerId) -> bool {
        let names = if cache_name == ALL_REGIONS {
            self.known_regions()
        } else {
            vec![cache_name.to_string()]
        };

        let mut found = false;
        for name in &names {
            found |= self.registry.unregister(name, listener_id);
        }

        self.log_application_event(
            "removeCacheListener",
            &format!("cacheName={}, listenerId={}", cache_name, listener_id),
        );
        found
    }

    fn known_regions(&self) -> Vec<String> {
        let names: BTreeSet<String> = self
            .registry
            .region_names()
            .into_iter()
            .chain(self.cache_manager().region_names())
            .collect();
        names.into_iter().collect()
    }

    // ============================================================
    // LIFECYCLE
    // ============================================================

    /// Hands a shutdown request to the lifecycle owner, or shuts the core down directly when
    /// nobody owns it.
    pub async fn shutdown(&self, host: &str, port: u16) {
        tracing::info!("Received shutdown request. Shutting down server.");

        let request = ShutdownRequest {
            host: host.to_string(),
            port,
        };
        if let Some(hook) = &self.shutdown_hook {
            if hook.send(request).is_ok() {
                return;
            }
            tracing::warn!("Lifecycle owner is gone, shutting down the core directly");
        }

        self.close().await;
    }

    /// Unregisters every listener of every region and refuses new ones from now on.
    pub fn shutdown_listeners(&self) {
        self.shut_down.store(true, Ordering::SeqCst);

        for cache_name in self.registry.region_names() {
            for listener_id in self.registry.listener_ids(&cache_name) {
                self.registry.unregister(&cache_name, listener_id);
            }
            tracing::info!("Removed listeners for cache [{}]", cache_name);
        }
        self.registry.clear();
    }

    /// Removes all listeners and shuts down the cache manager, which frees every region.
    pub async fn close(&self) {
        self.shutdown_listeners();
        self.cache_manager().shutdown().await;
    }

    pub fn get_stats(&self) -> String {
        format!(
            "{}\nServer: puts={} live_queues={} registered_listeners={}",
            self.cache_manager().stats(),
            self.puts(),
            self.registry.live_queue_count(),
            self.registry.registered_type_count()
        )
    }

    // ============================================================
    // HELPERS
    // ============================================================

    fn should_fan_out(&self, requester: Requester) -> bool {
        !requester.is_cluster() || self.attributes.local_cluster_consistency
    }

    fn cascading_reads(&self, requester: Requester) -> bool {
        !requester.is_cluster() && self.attributes.allow_cluster_get
    }

    async fn resolve_region(&self, cache_name: &str, operation: &str) -> Option<Arc<RegionListeners>> {
        match self.registry.region(cache_name).await {
            Ok(region) => Some(region),
            Err(e) => {
                self.log_store_error(operation, cache_name, &e);
                None
            }
        }
    }

    fn log_update_info(&self, item: &CacheElement) {
        let puts = self.puts.fetch_add(1, Ordering::SeqCst) + 1;
        if puts % PUT_LOG_INTERVAL == 0 {
            tracing::info!("puts = {}", puts);
        }
        tracing::debug!("In update, put [{}] in [{}]", item.key, item.cache_name);
    }

    fn log_store_error(&self, operation: &str, cache_name: &str, error: &CacheServerError) {
        tracing::error!("Problem in {} for region [{}]: {}", operation, cache_name, error);
        self.log_error(operation, error);
    }

    fn create_event(
        &self,
        cache_name: &str,
        key: &str,
        requester: Requester,
        event_name: CacheEventName,
    ) -> Option<CacheEventRecord> {
        self.event_logger.as_ref()?;

        Some(CacheEventRecord {
            source: EVENT_SOURCE,
            region: cache_name.to_string(),
            event_name,
            origin: self.registry.origin_address(requester.id),
            key: key.to_string(),
            started_at: Instant::now(),
        })
    }

    fn log_event(&self, record: Option<CacheEventRecord>) {
        if let (Some(logger), Some(record)) = (&self.event_logger, record) {
            logger.log_cache_event(&record);
        }
    }

    fn log_application_event(&self, event_name: &str, detail: &str) {
        if let Some(logger) = &self.event_logger {
            logger.log_application_event(EVENT_SOURCE, event_name, detail);
        }
    }

    fn log_error(&self, event_name: &str, error: &CacheServerError) {
        if let Some(logger) = &self.event_logger {
            logger.log_error(EVENT_SOURCE, event_name, &error.to_string());
        }
    }
}

fn cache_event_logger(attributes: &ServerAttributes) -> Option<Arc<dyn CacheEventLogger>> {
    if attributes.cache_event_logging {
        let logger: Arc<dyn CacheEventLogger> = Arc::new(TracingCacheEventLogger);
        Some(logger)
    } else {
        None
    }
}
