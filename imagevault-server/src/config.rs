use std::path::PathBuf;

use imagevault_core::CoreConfig;
use serde::Deserialize;

/// Server-only settings layered on top of `CoreConfig`, loaded the way the
/// teacher's `infra::config::Config::from_env` loads `ferrex-server`'s
/// configuration: environment variables (via `dotenvy`), with `clap`
/// overriding a handful of deployment knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server_host: String,
    pub server_port: u16,

    /// `None` selects `InMemoryStore`; `Some` selects `PostgresStore`.
    pub database_url: Option<String>,
    /// `None` selects `InMemoryQueue`; `Some` selects `RedisStreamQueue`.
    pub redis_url: Option<String>,

    pub cors_allowed_origins: Vec<String>,

    /// Optional path to a TOML file overriding `core` defaults.
    pub core_config_path: Option<PathBuf>,

    #[serde(skip)]
    pub core: CoreConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_host: "0.0.0.0".to_string(),
            server_port: 8080,
            database_url: None,
            redis_url: None,
            cors_allowed_origins: vec!["http://localhost:5173".to_string()],
            core_config_path: None,
            core: CoreConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Environment + optional TOML file, mirroring the teacher's
    /// `Config::from_env` (`dotenvy` first, then plain `env::var` reads).
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self {
            server_host: std::env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: std::env::var("SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            database_url: std::env::var("DATABASE_URL").ok(),
            redis_url: std::env::var("REDIS_URL").ok(),
            cors_allowed_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:5173".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            core_config_path: std::env::var("CORE_CONFIG_PATH").ok().map(PathBuf::from),
            core: CoreConfig::default(),
        };

        if let Some(path) = &config.core_config_path {
            let raw = std::fs::read_to_string(path)?;
            config.core = toml::from_str(&raw)?;
        }

        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}
