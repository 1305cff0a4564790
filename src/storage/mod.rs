//! Region Storage Module
//!
//! The backing store behind every cache region. The server only talks to it through the
//! `CacheManager` and `RegionStore` traits, so any storage engine can be plugged in.
//!
//! ## Core Concepts
//! - **Region**: a named keyspace. The manager creates one store per name on first use.
//! - **Local vs. cascading**: every operation exists in a `local_*` flavour touching only this
//!   process, and a cascading flavour that also reaches the configured auxiliaries.
//! - **Auxiliary**: a cascade target such as a cooperating peer server.
//!
//! `memory` holds the in-memory reference engine used by the launcher and the tests.

pub mod memory;
pub mod region;
pub mod types;
