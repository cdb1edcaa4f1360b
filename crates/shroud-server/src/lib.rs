//! Shroud HTTP server.
//!
//! Wires the lifecycle coordinator, storage backend and HTTP routes into a
//! running Axum server, and runs the retention sweep worker beside it.

pub mod config;
pub mod error;
pub mod extract;
pub mod hardening;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod worker;
