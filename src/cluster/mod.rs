//! Cluster Module
//!
//! Talking to other remote cache servers: a typed HTTP client for the RPC surface, and
//! `PeerAuxiliary`, which plugs a peer into a region store as a cascade target.

pub mod client;
pub mod peer;

#[cfg(test)]
mod tests;
