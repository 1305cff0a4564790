//! Per-listener Event Queues
//!
//! A `CacheEventQueue` is an unbounded channel drained by one background task. Enqueueing is a
//! plain channel send, which is what lets the server enqueue while it holds a region lock.

use super::listener::RemoteListener;
use super::types::{CacheEvent, EventQueueType};
use crate::config::ServerAttributes;
use crate::listeners::types::ListenerId;
use crate::storage::types::CacheElement;

use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;

const DEFAULT_POOL_NAME: &str = "default";

/// Ordered outbound channel towards a single listener.
pub trait EventQueue: Send + Sync {
    fn listener_id(&self) -> ListenerId;

    fn cache_name(&self) -> &str;

    /// `false` once delivery failed past the failure threshold or the queue was destroyed.
    fn is_working(&self) -> bool;

    /// `false` once the delivery task has stopped.
    fn is_alive(&self) -> bool;

    fn add_put_event(&self, item: CacheElement);

    fn add_remove_event(&self, key: &str);

    fn add_remove_all_event(&self);

    fn add_dispose_event(&self);

    /// Stops delivery immediately; events still queued are dropped.
    fn destroy(&self);

    /// Events enqueued but not yet picked up by the delivery task.
    fn pending(&self) -> usize;
}

/// Retry policy shared by every queue created from the same attributes.
#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    pub max_failure: u32,
    pub wait_before_retry: Duration,
}

impl QueueSettings {
    pub fn from_attributes(attributes: &ServerAttributes) -> Self {
        Self {
            max_failure: attributes.event_queue_max_failure.max(1),
            wait_before_retry: attributes.wait_before_retry(),
        }
    }
}

struct QueueState {
    working: AtomicBool,
    alive: AtomicBool,
    pending: AtomicUsize,
}

pub struct CacheEventQueue {
    listener_id: ListenerId,
    cache_name: String,
    sender: mpsc::UnboundedSender<CacheEvent>,
    state: Arc<QueueState>,
    worker: JoinHandle<()>,
}

impl CacheEventQueue {
    /// Creates the queue and spawns its delivery task. Must be called within a tokio runtime.
    pub fn new(
        listener: Arc<dyn RemoteListener>,
        listener_id: ListenerId,
        cache_name: &str,
        settings: QueueSettings,
        pool: Option<Arc<Semaphore>>,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let state = Arc::new(QueueState {
            working: AtomicBool::new(true),
            alive: AtomicBool::new(true),
            pending: AtomicUsize::new(0),
        });

        let worker = tokio::spawn(delivery_loop(
            listener,
            listener_id,
            cache_name.to_string(),
            receiver,
            state.clone(),
            settings,
            pool,
        ));

        Self {
            listener_id,
            cache_name: cache_name.to_string(),
            sender,
            state,
            worker,
        }
    }

    fn put(&self, event: CacheEvent) {
        if !self.is_working() {
            tracing::warn!("Not enqueuing {} for [{}] because it's non-functional", event, self);
            return;
        }

        self.state.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(event).is_err() {
            self.state.pending.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!("Delivery task of [{}] is gone, marking queue non-functional", self);
            self.state.working.store(false, Ordering::SeqCst);
        }
    }
}

impl fmt::Display for CacheEventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheEventQueue [listenerId={}, cacheName={}]",
            self.listener_id, self.cache_name
        )
    }
}

impl EventQueue for CacheEventQueue {
    fn listener_id(&self) -> ListenerId {
        self.listener_id
    }

    fn cache_name(&self) -> &str {
        &self.cache_name
    }

    fn is_working(&self) -> bool {
        self.state.working.load(Ordering::SeqCst)
    }

    fn is_alive(&self) -> bool {
        self.state.alive.load(Ordering::SeqCst)
    }

    fn add_put_event(&self, item: CacheElement) {
        self.put(CacheEvent::Put { item });
    }

    fn add_remove_event(&self, key: &str) {
        self.put(CacheEvent::Remove {
            cache_name: self.cache_name.clone(),
            key: key.to_string(),
        });
    }

    fn add_remove_all_event(&self) {
        self.put(CacheEvent::RemoveAll {
            cache_name: self.cache_name.clone(),
        });
    }

    fn add_dispose_event(&self) {
        self.put(CacheEvent::Dispose {
            cache_name: self.cache_name.clone(),
        });
    }

    fn destroy(&self) {
        tracing::debug!("Destroying {}", self);
        self.state.working.store(false, Ordering::SeqCst);
        self.state.alive.store(false, Ordering::SeqCst);
        self.worker.abort();
    }

    fn pending(&self) -> usize {
        self.state.pending.load(Ordering::SeqCst)
    }
}

async fn delivery_loop(
    listener: Arc<dyn RemoteListener>,
    listener_id: ListenerId,
    cache_name: String,
    mut receiver: mpsc::UnboundedReceiver<CacheEvent>,
    state: Arc<QueueState>,
    settings: QueueSettings,
    pool: Option<Arc<Semaphore>>,
) {
    while let Some(event) = receiver.recv().await {
        state.pending.fetch_sub(1, Ordering::SeqCst);

        let _permit = match &pool {
            Some(pool) => match pool.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => None,
            },
            None => None,
        };

        if !deliver(listener.as_ref(), listener_id, &event, settings).await {
            tracing::warn!(
                "Dropping {} and marking queue of listener {} in [{}] as non-functional",
                event,
                listener_id,
                cache_name
            );
            state.working.store(false, Ordering::SeqCst);
            break;
        }
    }

    state.alive.store(false, Ordering::SeqCst);
    tracing::debug!("Delivery task for listener {} in [{}] stopped", listener_id, cache_name);
}

async fn deliver(
    listener: &dyn RemoteListener,
    listener_id: ListenerId,
    event: &CacheEvent,
    settings: QueueSettings,
) -> bool {
    let mut failures = 0;

    loop {
        match listener.handle_event(listener_id, event).await {
            Ok(()) => return true,
            Err(e) => {
                failures += 1;
                tracing::warn!(
                    "Error delivering {} to listener {} (attempt {}/{}): {}",
                    event,
                    listener_id,
                    failures,
                    settings.max_failure,
                    e
                );
                if failures >= settings.max_failure {
                    return false;
                }
                tokio::time::sleep(settings.wait_before_retry).await;
            }
        }
    }
}

/// Named delivery pools shared by pooled queues.
pub struct DeliveryPools {
    pools: DashMap<String, Arc<Semaphore>>,
    pool_size: usize,
}

impl DeliveryPools {
    pub fn new(pool_size: usize) -> Arc<Self> {
        Arc::new(Self {
            pools: DashMap::new(),
            pool_size: pool_size.max(1),
        })
    }

    pub fn get_or_create(&self, name: &str) -> Arc<Semaphore> {
        self.pools
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::info!("Creating delivery pool [{}] with {} slots", name, self.pool_size);
                Arc::new(Semaphore::new(self.pool_size))
            })
            .value()
            .clone()
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }
}

/// Builds queues according to the configured queue type and pool.
pub struct EventQueueFactory {
    settings: QueueSettings,
    queue_type: EventQueueType,
    pool_name: Option<String>,
    pools: Arc<DeliveryPools>,
}

impl EventQueueFactory {
    pub fn from_attributes(attributes: &ServerAttributes) -> Self {
        Self {
            settings: QueueSettings::from_attributes(attributes),
            queue_type: attributes.event_queue_type,
            pool_name: attributes.event_queue_pool_name.clone(),
            pools: DeliveryPools::new(attributes.event_queue_pool_size),
        }
    }

    pub fn create_queue(
        &self,
        listener: Arc<dyn RemoteListener>,
        listener_id: ListenerId,
        cache_name: &str,
    ) -> Arc<dyn EventQueue> {
        let pool = match self.queue_type {
            EventQueueType::Single => None,
            EventQueueType::Pooled => Some(
                self.pools
                    .get_or_create(self.pool_name.as_deref().unwrap_or(DEFAULT_POOL_NAME)),
            ),
        };

        Arc::new(CacheEventQueue::new(
            listener,
            listener_id,
            cache_name,
            self.settings,
            pool,
        ))
    }

    pub fn pools(&self) -> &DeliveryPools {
        &self.pools
    }
}
