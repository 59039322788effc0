use std::collections::HashMap;
use std::env;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::manager::ScaleConfig;
use crate::pool::{ConnectionPoolConfig, PoolConfigOverride};

/// Prefix for environment overrides, e.g. `WSPOOL_SERVER__PORT=9000` or
/// `WSPOOL_POOL__MAX_CONNECTIONS=500`
const ENV_PREFIX: &str = "WSPOOL";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    /// When absent, WebSocket clients connect anonymously
    #[serde(default)]
    pub jwt: Option<JwtConfig>,
    #[serde(default)]
    pub api: ApiConfig,
    /// Base configuration shared by every pool
    #[serde(default)]
    pub pool: ConnectionPoolConfig,
    /// Pools created at startup, in registration order
    #[serde(default = "default_pools")]
    pub pools: Vec<String>,
    /// Per-pool overrides keyed by pool id
    #[serde(default)]
    pub pool_overrides: HashMap<String, PoolConfigOverride>,
    #[serde(default)]
    pub scale: ScaleConfig,
    #[serde(default)]
    pub shutdown: ShutdownSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Outbound frame buffer per WebSocket connection
    #[serde(default = "default_send_buffer")]
    pub ws_send_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    /// Reject WebSocket upgrades without a valid token
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    /// API key for `/api/v1`. Open when unset.
    pub key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownSettings {
    /// Upper bound on the whole shutdown sequence
    #[serde(default = "default_shutdown_timeout")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_send_buffer() -> usize {
    256
}

fn default_pools() -> Vec<String> {
    vec!["primary".to_string()]
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("pools", default_pools())?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("pools")
                    .with_list_parse_key("server.cors_origins"),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Override for a pool, if configured
    pub fn pool_override(&self, pool_id: &str) -> Option<&PoolConfigOverride> {
        self.pool_overrides.get(pool_id)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
            ws_send_buffer: default_send_buffer(),
        }
    }
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_shutdown_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_json(json: &str) -> Settings {
        Config::builder()
            .add_source(config::File::from_str(json, config::FileFormat::Json))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8080);
        assert_eq!(ShutdownSettings::default().timeout_secs, 30);
    }

    #[test]
    fn test_empty_source_uses_defaults() {
        let settings = from_json("{}");
        assert_eq!(settings.pools, vec!["primary".to_string()]);
        assert!(settings.jwt.is_none());
        assert!(settings.api.key.is_none());
        assert_eq!(settings.pool, ConnectionPoolConfig::default());
        assert_eq!(settings.scale, ScaleConfig::default());
    }

    #[test]
    fn test_sections_and_overrides() {
        let settings = from_json(
            r#"{
                "server": { "port": 9100 },
                "jwt": { "secret": "s3cret", "required": true },
                "pool": { "max_connections": 500, "load_balancing": "weighted",
                          "weights": { "east": 2.0 } },
                "pools": ["east", "west"],
                "pool_overrides": { "west": { "max_connections": 50 } },
                "scale": { "max_total_connections": 900, "throttle_enabled": false }
            }"#,
        );

        assert_eq!(settings.server_addr(), "0.0.0.0:9100");
        assert!(settings.jwt.as_ref().unwrap().required);
        assert_eq!(settings.pool.max_connections, 500);
        assert_eq!(settings.pool.weights.get("east"), Some(&2.0));
        assert_eq!(settings.pools, vec!["east", "west"]);
        assert_eq!(
            settings.pool_override("west").unwrap().max_connections,
            Some(50)
        );
        assert!(settings.pool_override("east").is_none());
        assert_eq!(settings.scale.max_total_connections, 900);
        assert!(!settings.scale.throttle_enabled);
        assert_eq!(settings.scale.queue_max_size, 100_000);
    }
}
