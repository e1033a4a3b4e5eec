use std::time::Duration;

use anyhow::bail;
use axum::http::HeaderValue;
use serde::Deserialize;

/// Connection settings consumed by the connection manager.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub server_selection_timeout: Duration,
    pub socket_timeout: Duration,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            server_selection_timeout: Duration::from_millis(5_000),
            socket_timeout: Duration::from_millis(45_000),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseSettings,
    pub environment: String,
    pub version: String,
    pub api_base_url: String,
    pub allowed_origin: String,
    pub host: String,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseSettings::default(),
            environment: "development".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            api_base_url: "/api".into(),
            allowed_origin: "*".into(),
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup; missing or unparseable
    /// numbers fall back to the defaults. An `APP_URL` that cannot be sent as
    /// a header value is rejected.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let millis = |key: &str, fallback: Duration| {
            lookup(key)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(fallback)
        };

        let database = DatabaseSettings {
            url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            server_selection_timeout: millis(
                "DB_SERVER_SELECTION_TIMEOUT_MS",
                defaults.database.server_selection_timeout,
            ),
            socket_timeout: millis("DB_SOCKET_TIMEOUT_MS", defaults.database.socket_timeout),
            max_connections: lookup("DB_MAX_CONNECTIONS")
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.database.max_connections),
        };

        let allowed_origin = lookup("APP_URL").unwrap_or(defaults.allowed_origin);
        if HeaderValue::from_str(&allowed_origin).is_err() {
            bail!("APP_URL is not a valid header value: {allowed_origin:?}");
        }

        Ok(Self {
            database,
            environment: lookup("APP_ENV").unwrap_or(defaults.environment),
            version: lookup("APP_VERSION").unwrap_or(defaults.version),
            api_base_url: lookup("API_BASE_URL").unwrap_or(defaults.api_base_url),
            allowed_origin,
            host: lookup("APP_HOST").unwrap_or(defaults.host),
            port: lookup("APP_PORT")
                .and_then(|v| v.parse::<u16>().ok())
                .unwrap_or(defaults.port),
        })
    }
}
