//! Fakes shared by the unit tests of several modules.

use crate::error::{CacheServerError, Result};
use crate::events::listener::RemoteListener;
use crate::events::types::CacheEvent;
use crate::listeners::types::ListenerId;
use crate::storage::region::{Auxiliary, CacheManager, RegionStore};
use crate::storage::types::CacheElement;

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn element(cache_name: &str, key: &str, value: i64) -> CacheElement {
    CacheElement::new(cache_name, key, serde_json::json!(value))
}

/// Remembers every event it receives. Can be told to fail the first `n` deliveries.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<CacheEvent>>,
    failures_left: AtomicU32,
    attempts: AtomicU32,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_first(n: u32) -> Arc<Self> {
        let listener = Self::default();
        listener.failures_left.store(n, Ordering::SeqCst);
        Arc::new(listener)
    }

    pub fn events(&self) -> Vec<CacheEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Polls until at least `count` events arrived or `timeout` elapsed.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<CacheEvent> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let events = self.events();
            if events.len() >= count || tokio::time::Instant::now() >= deadline {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl RemoteListener for RecordingListener {
    async fn handle_event(&self, _listener_id: ListenerId, event: &CacheEvent) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CacheServerError::Transport("listener unreachable".to_string()));
        }

        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// An auxiliary backed by a map, recording which writes were cascaded to it. Writes can be
/// slowed down to stand in for a remote peer.
#[derive(Default)]
pub struct RecordingAuxiliary {
    data: DashMap<(String, String), CacheElement>,
    write_delay: Duration,
    updates: Mutex<Vec<String>>,
    removes: Mutex<Vec<String>>,
    remove_alls: Mutex<Vec<String>>,
}

impl RecordingAuxiliary {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_write_delay(write_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            write_delay,
            ..Self::default()
        })
    }

    async fn slow_down(&self) {
        if !self.write_delay.is_zero() {
            tokio::time::sleep(self.write_delay).await;
        }
    }

    /// Stores an element the auxiliary can serve without recording it as a cascaded write.
    pub fn seed(&self, item: CacheElement) {
        self.data
            .insert((item.cache_name.clone(), item.key.clone()), item);
    }

    pub fn updates(&self) -> Vec<String> {
        self.updates.lock().unwrap().clone()
    }

    pub fn removes(&self) -> Vec<String> {
        self.removes.lock().unwrap().clone()
    }

    pub fn remove_alls(&self) -> Vec<String> {
        self.remove_alls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Auxiliary for RecordingAuxiliary {
    fn name(&self) -> &str {
        "recording"
    }

    async fn update(&self, item: &CacheElement) -> Result<()> {
        self.slow_down().await;
        self.updates.lock().unwrap().push(item.key.clone());
        self.seed(item.clone());
        Ok(())
    }

    async fn get(&self, cache_name: &str, key: &str) -> Result<Option<CacheElement>> {
        Ok(self
            .data
            .get(&(cache_name.to_string(), key.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn get_matching(
        &self,
        cache_name: &str,
        pattern: &str,
    ) -> Result<HashMap<String, CacheElement>> {
        let regex = regex::Regex::new(pattern).map_err(|e| CacheServerError::region(cache_name, e))?;
        Ok(self
            .data
            .iter()
            .filter(|entry| entry.key().0 == cache_name && regex.is_match(&entry.key().1))
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect())
    }

    async fn get_multiple(
        &self,
        cache_name: &str,
        keys: &HashSet<String>,
    ) -> Result<HashMap<String, CacheElement>> {
        let mut found = HashMap::new();
        for key in keys {
            if let Some(item) = self.get(cache_name, key).await? {
                found.insert(key.clone(), item);
            }
        }
        Ok(found)
    }

    async fn remove(&self, cache_name: &str, key: &str) -> Result<()> {
        self.slow_down().await;
        self.removes.lock().unwrap().push(key.to_string());
        self.data.remove(&(cache_name.to_string(), key.to_string()));
        Ok(())
    }

    async fn remove_all(&self, cache_name: &str) -> Result<()> {
        self.slow_down().await;
        self.remove_alls.lock().unwrap().push(cache_name.to_string());
        self.data.retain(|(region, _), _| region != cache_name);
        Ok(())
    }
}

/// A cache manager whose regions cannot be resolved.
#[derive(Default)]
pub struct BrokenCacheManager {
    shut_down: AtomicBool,
}

impl BrokenCacheManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl CacheManager for BrokenCacheManager {
    async fn get_region(&self, name: &str) -> Result<Arc<dyn RegionStore>> {
        Err(CacheServerError::region(name, "store offline"))
    }

    fn region_names(&self) -> Vec<String> {
        Vec::new()
    }

    async fn free_region(&self, _name: &str) {}

    async fn release(&self) {}

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn stats(&self) -> String {
        "broken".to_string()
    }
}
