//! Storage collaborator boundary.

use super::types::CacheElement;
use crate::error::Result;

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Backing store of a single region.
///
/// The cascading operations may reach auxiliaries over the network; the `local_*` ones never
/// leave the process. A cascading write is its `local_*` write followed by the matching
/// `cascade_*` call, which only talks to the auxiliaries.
#[async_trait]
pub trait RegionStore: Send + Sync {
    fn name(&self) -> &str;

    async fn update(&self, item: CacheElement) -> Result<()>;
    async fn local_update(&self, item: CacheElement) -> Result<()>;
    async fn cascade_update(&self, item: &CacheElement) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<CacheElement>>;
    async fn local_get(&self, key: &str) -> Result<Option<CacheElement>>;

    /// Elements whose key matches the regular expression `pattern`.
    async fn get_matching(&self, pattern: &str) -> Result<HashMap<String, CacheElement>>;
    async fn local_get_matching(&self, pattern: &str) -> Result<HashMap<String, CacheElement>>;

    async fn get_multiple(&self, keys: &HashSet<String>) -> Result<HashMap<String, CacheElement>>;
    async fn local_get_multiple(
        &self,
        keys: &HashSet<String>,
    ) -> Result<HashMap<String, CacheElement>>;

    /// Returns whether the key was present locally.
    async fn remove(&self, key: &str) -> Result<bool>;
    async fn local_remove(&self, key: &str) -> Result<bool>;
    async fn cascade_remove(&self, key: &str) -> Result<()>;

    async fn remove_all(&self) -> Result<()>;
    async fn local_remove_all(&self) -> Result<()>;
    async fn cascade_remove_all(&self) -> Result<()>;

    async fn get_key_set(&self) -> Result<HashSet<String>>;
}

/// Owner of all region stores in the process.
#[async_trait]
pub trait CacheManager: Send + Sync {
    /// Returns the store for `name`, creating it on first reference.
    async fn get_region(&self, name: &str) -> Result<Arc<dyn RegionStore>>;

    fn region_names(&self) -> Vec<String>;

    /// Drops a region and everything stored in it.
    async fn free_region(&self, name: &str);

    /// Frees every region.
    async fn release(&self);

    /// Frees every region and refuses further use.
    async fn shutdown(&self);

    fn is_shut_down(&self) -> bool;

    fn stats(&self) -> String;
}

/// A cascade target consulted by the non-local region operations.
#[async_trait]
pub trait Auxiliary: Send + Sync {
    fn name(&self) -> &str;

    async fn update(&self, item: &CacheElement) -> Result<()>;

    async fn get(&self, cache_name: &str, key: &str) -> Result<Option<CacheElement>>;

    async fn get_matching(
        &self,
        cache_name: &str,
        pattern: &str,
    ) -> Result<HashMap<String, CacheElement>>;

    async fn get_multiple(
        &self,
        cache_name: &str,
        keys: &HashSet<String>,
    ) -> Result<HashMap<String, CacheElement>>;

    async fn remove(&self, cache_name: &str, key: &str) -> Result<()>;

    async fn remove_all(&self, cache_name: &str) -> Result<()>;
}
