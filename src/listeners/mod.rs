//! Listener Registry Module
//!
//! Keeps track of who is listening to which region and what kind of requester each listener is.
//!
//! ## Core Concepts
//! - **Listener ids**: non-zero integers handed out by a bounded wrap-around counter. Id `0` is
//!   the anonymous caller that never registered a listener.
//! - **Requester type**: every id is recorded as either a plain `Client` or a `ClusterPeer`.
//!   The server resolves the type once per call and uses it to decide between local and
//!   cascading operations.
//! - **Pools**: each region has a client pool and a separate cluster pool of event queues.
//!   Fan-out only targets the client pool.

pub mod registry;
pub mod types;
