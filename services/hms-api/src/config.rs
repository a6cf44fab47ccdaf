use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::store::postgres::DbConfig;

/// Which record store backs the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// In-process document collections (24-hex object ids).
    Memory,
    /// Postgres `records` table (auto-increment ids).
    Postgres,
}

impl std::str::FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mongo" | "document" => Ok(Self::Memory),
            "postgres" | "pg" => Ok(Self::Postgres),
            other => bail!("unknown HMS_STORE '{other}': expected 'memory' or 'postgres'"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,
    pub store: StoreKind,
    pub database: DbConfig,
    pub run_migrations: bool,
    pub catalog_path: Option<PathBuf>,
    pub allocation_retries: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("HMS_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:5000".to_string())
            .parse()
            .context("HMS_LISTEN_ADDR must be a socket address")?;

        let log_level = std::env::var("HMS_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dev_mode = env_flag("HMS_DEV").unwrap_or(false);

        let store = match std::env::var("HMS_STORE") {
            Ok(value) => value.parse()?,
            Err(_) if std::env::var("DATABASE_URL").is_ok() => StoreKind::Postgres,
            Err(_) => StoreKind::Memory,
        };

        let database = DbConfig::from_env();
        let run_migrations = env_flag("HMS_RUN_MIGRATIONS").unwrap_or(dev_mode);

        let catalog_path = std::env::var("HMS_CATALOG_PATH").ok().map(PathBuf::from);

        let allocation_retries = match std::env::var("HMS_ALLOCATION_RETRIES") {
            Ok(value) => value
                .parse()
                .context("HMS_ALLOCATION_RETRIES must be a non-negative integer")?,
            Err(_) => 3,
        };

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            store,
            database,
            run_migrations,
            catalog_path,
            allocation_retries,
        })
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}
