//! Event Delivery Module
//!
//! Decouples region mutations from remote notification. Every registered listener gets its own
//! `EventQueue`; the server enqueues events while holding the region lock and a background task
//! delivers them, so a slow or unreachable listener never stalls a writer.
//!
//! ## Core Concepts
//! - **Ordering**: one queue delivers strictly in enqueue order.
//! - **Failure threshold**: a delivery is retried `maxFailure` times; after that the queue marks
//!   itself as not working and stops. The registry reclaims such queues lazily.
//! - **Queue types**: `single` queues deliver on their own task without limits; `pooled` queues
//!   share a named pool that bounds concurrent deliveries.
//!
//! ## Submodules
//! - **`types`**: the event enum and queue type.
//! - **`queue`**: the `EventQueue` trait, its channel-backed implementation and factory.
//! - **`listener`**: the `RemoteListener` delivery target and its HTTP implementation.

pub mod listener;
pub mod queue;
pub mod types;
