pub mod accounts;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod files;
pub mod mail;
pub mod models;
pub mod response;
pub mod routes;
pub mod schema;
pub mod state;
pub mod storage;
pub mod store;

use tracing_subscriber::EnvFilter;

/// Compact `tracing` output filtered by `RUST_LOG`, `info` by default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
