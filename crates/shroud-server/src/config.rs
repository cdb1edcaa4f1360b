//! Server configuration for Shroud.
//!
//! Loads configuration from environment variables with sensible defaults.
//! All settings can be overridden via `SHROUD_*` environment variables.

use std::net::SocketAddr;

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Storage backend type.
    pub storage_backend: StorageBackendType,
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
    /// Path to a JSON-lines access log file, mirrored from the stored log.
    pub audit_file_path: Option<String>,
    /// Seconds between retention sweeps.
    pub sweep_interval_secs: u64,
    /// Purge a secret right after the view that made it terminal.
    pub sweep_on_write: bool,
    /// Maximum concurrent requests that run key derivation (create, view).
    pub kdf_concurrency: usize,
    /// Whether to skip `mlock` (for development without root/`CAP_IPC_LOCK`).
    pub disable_mlock: bool,
}

/// Supported storage backend types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
    /// Redb persistent storage.
    Redb { path: String },
}

impl StorageBackendType {
    /// Short name for health output and logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redb { .. } => "redb",
        }
    }
}

const DEFAULT_PORT: u16 = 8300;

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORT`: port to bind on, on `0.0.0.0`
    /// - `SHROUD_BIND_ADDR`: full bind address (overrides `PORT`, default: `127.0.0.1:8300`)
    /// - `SHROUD_STORAGE`: `memory` or `redb` (default: `memory`)
    /// - `SHROUD_STORAGE_PATH`: redb file path (default: `./data/shroud.redb`)
    /// - `SHROUD_LOG_LEVEL`: log filter (default: `info`)
    /// - `SHROUD_AUDIT_FILE`: path to a JSON-lines access log file (optional)
    /// - `SHROUD_SWEEP_INTERVAL`: seconds between retention sweeps (default: `60`)
    /// - `SHROUD_SWEEP_ON_WRITE`: purge right after a terminal view (default: `false`)
    /// - `SHROUD_KDF_CONCURRENCY`: concurrent create/view requests (default: `32`)
    /// - `SHROUD_DISABLE_MLOCK`: skip `mlockall` for dev environments (default: `false`)
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    #[must_use]
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        // Priority: SHROUD_BIND_ADDR > PORT > default 127.0.0.1:8300
        let bind_addr = if let Some(addr) = var("SHROUD_BIND_ADDR") {
            addr.parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))
        } else if let Some(port_str) = var("PORT") {
            let port: u16 = port_str.parse().unwrap_or(DEFAULT_PORT);
            SocketAddr::from(([0, 0, 0, 0], port))
        } else {
            SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT))
        };

        let storage_path =
            var("SHROUD_STORAGE_PATH").unwrap_or_else(|| "./data/shroud.redb".to_owned());

        let storage_backend = match var("SHROUD_STORAGE")
            .unwrap_or_else(|| "memory".to_owned())
            .to_lowercase()
            .as_str()
        {
            "redb" => StorageBackendType::Redb { path: storage_path },
            _ => StorageBackendType::Memory,
        };

        let log_level = var("SHROUD_LOG_LEVEL").unwrap_or_else(|| "info".to_owned());

        let audit_file_path = var("SHROUD_AUDIT_FILE").filter(|p| !p.is_empty());

        let sweep_interval_secs = var("SHROUD_SWEEP_INTERVAL")
            .and_then(|v| v.parse().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(60);

        let sweep_on_write = var("SHROUD_SWEEP_ON_WRITE").is_some_and(|v| is_truthy(&v));

        let kdf_concurrency = var("SHROUD_KDF_CONCURRENCY")
            .and_then(|v| v.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(32);

        let disable_mlock = var("SHROUD_DISABLE_MLOCK").is_some_and(|v| is_truthy(&v));

        Self {
            bind_addr,
            storage_backend,
            log_level,
            audit_file_path,
            sweep_interval_secs,
            sweep_on_write,
            kdf_concurrency,
            disable_mlock,
        }
    }
}

fn is_truthy(value: &str) -> bool {
    value == "true" || value == "1"
}
