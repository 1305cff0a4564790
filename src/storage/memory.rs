//! In-memory region engine.
//!
//! Each region keeps its entries in a `DashMap` and holds the list of auxiliaries it cascades to.
//! Cascading reads that are satisfied by an auxiliary are written back locally so the next read
//! is a local hit.

use super::region::{Auxiliary, CacheManager, RegionStore};
use super::types::CacheElement;
use crate::error::{CacheServerError, Result};

use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub struct MemoryRegion {
    name: String,
    local_data: DashMap<String, CacheElement>,
    auxiliaries: Vec<Arc<dyn Auxiliary>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryRegion {
    pub fn new(name: &str, auxiliaries: Vec<Arc<dyn Auxiliary>>) -> Self {
        Self {
            name: name.to_string(),
            local_data: DashMap::new(),
            auxiliaries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn store_local(&self, item: CacheElement) {
        self.local_data.insert(item.key.clone(), item);
    }

    pub fn local_entry_count(&self) -> usize {
        self.local_data.len()
    }

    fn compile(&self, pattern: &str) -> Result<Regex> {
        Regex::new(pattern).map_err(|e| CacheServerError::region(&self.name, e))
    }

    fn matching_local(&self, regex: &Regex) -> HashMap<String, CacheElement> {
        self.local_data
            .iter()
            .filter(|entry| regex.is_match(entry.key()))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn stats(&self) -> String {
        format!(
            "Region [{}] entries={} hits={} misses={} auxiliaries={}",
            self.name,
            self.local_data.len(),
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.auxiliaries.len()
        )
    }
}

#[async_trait]
impl RegionStore for MemoryRegion {
    fn name(&self) -> &str {
        &self.name
    }

    async fn update(&self, item: CacheElement) -> Result<()> {
        self.local_update(item.clone()).await?;
        self.cascade_update(&item).await
    }

    async fn local_update(&self, item: CacheElement) -> Result<()> {
        self.store_local(item);
        Ok(())
    }

    async fn cascade_update(&self, item: &CacheElement) -> Result<()> {
        for aux in &self.auxiliaries {
            if let Err(e) = aux.update(item).await {
                tracing::warn!(
                    "Failed to cascade update of [{}] to auxiliary {}: {}",
                    item.key,
                    aux.name(),
                    e
                );
            }
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CacheElement>> {
        if let Some(item) = self.local_get(key).await? {
            return Ok(Some(item));
        }

        for aux in &self.auxiliaries {
            match aux.get(&self.name, key).await {
                Ok(Some(item)) => {
                    tracing::debug!("GET: [{}] found on auxiliary {}", key, aux.name());
                    self.store_local(item.clone());
                    return Ok(Some(item));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("GET: auxiliary {} failed for [{}]: {}", aux.name(), key, e);
                }
            }
        }

        Ok(None)
    }

    async fn local_get(&self, key: &str) -> Result<Option<CacheElement>> {
        match self.local_data.get(key) {
            Some(item) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(item.value().clone()))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn get_matching(&self, pattern: &str) -> Result<HashMap<String, CacheElement>> {
        let regex = self.compile(pattern)?;
        let mut elements = HashMap::new();

        for aux in &self.auxiliaries {
            match aux.get_matching(&self.name, pattern).await {
                Ok(found) => elements.extend(found),
                Err(e) => {
                    tracing::warn!("GET_MATCHING: auxiliary {} failed: {}", aux.name(), e);
                }
            }
        }

        // Local entries win over whatever the auxiliaries returned.
        elements.extend(self.matching_local(&regex));
        Ok(elements)
    }

    async fn local_get_matching(&self, pattern: &str) -> Result<HashMap<String, CacheElement>> {
        let regex = self.compile(pattern)?;
        Ok(self.matching_local(&regex))
    }

    async fn get_multiple(&self, keys: &HashSet<String>) -> Result<HashMap<String, CacheElement>> {
        let mut elements = self.local_get_multiple(keys).await?;

        for aux in &self.auxiliaries {
            let missing: HashSet<String> = keys
                .iter()
                .filter(|key| !elements.contains_key(*key))
                .cloned()
                .collect();
            if missing.is_empty() {
                break;
            }

            match aux.get_multiple(&self.name, &missing).await {
                Ok(found) => {
                    for (key, item) in found {
                        self.store_local(item.clone());
                        elements.insert(key, item);
                    }
                }
                Err(e) => {
                    tracing::warn!("GET_MULTIPLE: auxiliary {} failed: {}", aux.name(), e);
                }
            }
        }

        Ok(elements)
    }

    async fn local_get_multiple(
        &self,
        keys: &HashSet<String>,
    ) -> Result<HashMap<String, CacheElement>> {
        let mut elements = HashMap::new();
        for key in keys {
            if let Some(item) = self.local_get(key).await? {
                elements.insert(key.clone(), item);
            }
        }
        Ok(elements)
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let found = self.local_remove(key).await?;
        self.cascade_remove(key).await?;
        Ok(found)
    }

    async fn local_remove(&self, key: &str) -> Result<bool> {
        Ok(self.local_data.remove(key).is_some())
    }

    async fn cascade_remove(&self, key: &str) -> Result<()> {
        for aux in &self.auxiliaries {
            if let Err(e) = aux.remove(&self.name, key).await {
                tracing::warn!(
                    "Failed to cascade remove of [{}] to auxiliary {}: {}",
                    key,
                    aux.name(),
                    e
                );
            }
        }
        Ok(())
    }

    async fn remove_all(&self) -> Result<()> {
        self.local_remove_all().await?;
        self.cascade_remove_all().await
    }

    async fn local_remove_all(&self) -> Result<()> {
        self.local_data.clear();
        Ok(())
    }

    async fn cascade_remove_all(&self) -> Result<()> {
        for aux in &self.auxiliaries {
            if let Err(e) = aux.remove_all(&self.name).await {
                tracing::warn!(
                    "Failed to cascade remove_all of [{}] to auxiliary {}: {}",
                    self.name,
                    aux.name(),
                    e
                );
            }
        }
        Ok(())
    }

    async fn get_key_set(&self) -> Result<HashSet<String>> {
        Ok(self
            .local_data
            .iter()
            .map(|entry| entry.key().clone())
            .collect())
    }
}

/// Creates `MemoryRegion`s on demand, all sharing the same auxiliaries.
pub struct MemoryCacheManager {
    regions: DashMap<String, Arc<MemoryRegion>>,
    auxiliaries: Vec<Arc<dyn Auxiliary>>,
    shut_down: AtomicBool,
}

impl MemoryCacheManager {
    pub fn new() -> Arc<Self> {
        Self::with_auxiliaries(Vec::new())
    }

    pub fn with_auxiliaries(auxiliaries: Vec<Arc<dyn Auxiliary>>) -> Arc<Self> {
        Arc::new(Self {
            regions: DashMap::new(),
            auxiliaries,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn region(&self, name: &str) -> Option<Arc<MemoryRegion>> {
        self.regions.get(name).map(|entry| entry.value().clone())
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn local_entry_count(&self) -> usize {
        self.regions
            .iter()
            .map(|entry| entry.value().local_entry_count())
            .sum()
    }
}

#[async_trait]
impl CacheManager for MemoryCacheManager {
    async fn get_region(&self, name: &str) -> Result<Arc<dyn RegionStore>> {
        if self.is_shut_down() {
            return Err(CacheServerError::region(name, "cache manager is shut down"));
        }

        let region: Arc<dyn RegionStore> = self
            .regions
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::info!("Creating region [{}]", name);
                Arc::new(MemoryRegion::new(name, self.auxiliaries.clone()))
            })
            .value()
            .clone();
        Ok(region)
    }

    fn region_names(&self) -> Vec<String> {
        self.regions.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn free_region(&self, name: &str) {
        if self.regions.remove(name).is_some() {
            tracing::info!("Freed region [{}]", name);
        }
    }

    async fn release(&self) {
        let count = self.regions.len();
        self.regions.clear();
        tracing::info!("Released {} regions", count);
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.release().await;
        tracing::info!("Cache manager shut down");
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn stats(&self) -> String {
        let mut names = self.region_names();
        names.sort();

        let mut lines = vec![format!(
            "Cache manager: regions={} entries={}",
            self.regions.len(),
            self.local_entry_count()
        )];
        for name in names {
            if let Some(region) = self.region(&name) {
                lines.push(region.stats());
            }
        }
        lines.join("\n")
    }
}
