//! Service Directory Module
//!
//! Process lifecycle of the remote cache server and its advertisement in a naming directory.
//!
//! ## Core Concepts
//! - **ServerManager**: owns the single running server of the process. Startup validates the
//!   attributes, serves the RPC surface, creates the local directory and binds the server in it.
//!   Shutdown undoes all of that in reverse.
//! - **Service directory**: a naming registry mapping a service name to the server's RPC URL.
//! - **Keep-alive**: a periodic check that looks the server up and, if the directory lost it,
//!   recreates the directory and rebinds the server.

pub mod keepalive;
pub mod manager;
pub mod service;
pub mod types;

#[cfg(test)]
mod tests;
