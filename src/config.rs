use std::{env, str::FromStr};

use thiserror::Error;

const DEFAULT_ADMIN_PASSWORD: &str = "admin";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown STORE_BACKEND {0:?} (expected \"sqlite\" or \"memory\")")]
    UnknownBackend(String),

    #[error("{name} must be a number, got {value:?}")]
    NotANumber { name: &'static str, value: String },

    #[error("{name} must be true or false, got {value:?}")]
    NotABool { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StoreBackend::Sqlite),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(ConfigError::UnknownBackend(value.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub username: String,
    pub password: String,
    pub display_name: String,
}

impl AdminSeed {
    pub fn uses_default_password(&self) -> bool {
        self.password == DEFAULT_ADMIN_PASSWORD
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: StoreBackend,
    pub database_url: String,
    pub max_connections: u32,
    pub port: u16,
    pub admin: AdminSeed,
    pub seed_catalog: bool,
    pub event_buffer: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any variable source; `from_env` passes the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        Ok(Self {
            backend: text("STORE_BACKEND", "sqlite").parse()?,
            database_url: text("DATABASE_URL", "sqlite://./data/clinicflow.db"),
            max_connections: number(&lookup, "DB_MAX_CONNECTIONS", 5)?,
            port: number(&lookup, "PORT", 8080)?,
            admin: AdminSeed {
                username: text("ADMIN_USER", "admin"),
                password: text("ADMIN_PASSWORD", DEFAULT_ADMIN_PASSWORD),
                display_name: text("ADMIN_DISPLAY_NAME", "Administrator"),
            },
            seed_catalog: flag(&lookup, "SEED_CATALOG", true)?,
            event_buffer: number(&lookup, "EVENT_BUFFER", 64)?,
        })
    }
}

fn number<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::NotANumber { name, value }),
    }
}

fn flag<F>(lookup: &F, name: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name).as_deref().map(str::trim) {
        None => Ok(default),
        Some("true" | "1" | "yes") => Ok(true),
        Some("false" | "0" | "no") => Ok(false),
        Some(other) => Err(ConfigError::NotABool {
            name,
            value: other.to_string(),
        }),
    }
}
