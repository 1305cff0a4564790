//! Remote Cache Server Library
//!
//! A network-accessible cache tier. Clients and cooperating peer servers put, get and remove
//! elements in named regions; every change is fanned out asynchronously to the other listeners
//! of the region, never back to the caller that made it.
//!
//! ## Architecture Modules
//!
//! - **`storage`**: The region store boundary (`RegionStore`, `CacheManager`, `Auxiliary`) and
//!   an in-memory implementation with cascading to auxiliaries.
//! - **`events`**: Per-listener event queues with retrying asynchronous delivery.
//! - **`listeners`**: Listener id allocation, requester classification and per-region queue
//!   pools.
//! - **`server`**: The `RemoteCacheServer` core and its JSON-over-HTTP RPC surface.
//! - **`cluster`**: HTTP client for the RPC surface and the peer auxiliary used for clustering.
//! - **`directory`**: Service directory, keep-alive loop and the `ServerManager` lifecycle.
//! - **`config`**: `ServerAttributes` loading, overrides and validation.
//! - **`error`**: The crate-wide `CacheServerError`.

pub mod cluster;
pub mod config;
pub mod directory;
pub mod error;
pub mod events;
pub mod listeners;
pub mod server;
pub mod storage;

#[cfg(test)]
mod testing;
