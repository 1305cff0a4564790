//! Remote Cache Server Module
//!
//! The core of the cache tier: a server that accepts put/get/remove calls from clients and from
//! peer servers, applies them to named regions and notifies every other listener of the change.
//!
//! ## Core Concepts
//! - **Requester**: the caller of an RPC, identified by the id of its own listener. The id is
//!   resolved once per call into a client or cluster-peer requester.
//! - **Fan-out**: after a write, an event is enqueued on every working listener queue of the
//!   region except the requester's. The region lock is held across the write and the enqueue, so
//!   listeners observe writes to one region in the order they were applied.
//! - **Cluster isolation**: writes coming from a peer are applied locally only, so a change never
//!   bounces between peers.
//! - **Transport**: the RPC surface is exposed as JSON over HTTP by `handlers::router`.

pub mod event_log;
pub mod handlers;
pub mod protocol;
pub mod service;
