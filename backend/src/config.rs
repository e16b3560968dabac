//! Configuration management for the Stockdesk server
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (config/development.toml, config/production.toml)
//! 3. Environment variable overrides with STOCKDESK prefix

use config::{ConfigError, Environment, File};
use serde::Deserialize;
use shared::EnginePolicy;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Business policies applied when re-validating submissions
    #[serde(default)]
    pub engine: EnginePolicy,

    /// Log output configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// "pretty" or "json"
    pub format: String,

    /// Used when RUST_LOG is not set
    pub filter: String,
}

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("STOCKDESK_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("engine.negative_totals", "allow")?
            .set_default("engine.over_receipt", "reject")?
            .set_default("logging.format", "pretty")?
            .set_default(
                "logging.filter",
                "stockdesk_server=debug,shared=debug,tower_http=debug,sqlx=warn",
            )?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (STOCKDESK_ prefix)
            .add_source(
                Environment::with_prefix("STOCKDESK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Address the listener binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{NegativeTotalPolicy, OverReceiptPolicy};

    #[test]
    fn test_engine_section_from_toml() {
        let config = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                environment = "test"
                [server]
                host = "127.0.0.1"
                port = 8080
                [database]
                url = "postgres://localhost/test"
                max_connections = 2
                min_connections = 1
                [engine]
                negative_totals = "clamp_to_zero"
                [logging]
                format = "JSON"
                filter = "info"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let config: Config = config.try_deserialize().unwrap();

        assert_eq!(config.engine.negative_totals, NegativeTotalPolicy::ClampToZero);
        assert_eq!(config.engine.over_receipt, OverReceiptPolicy::Reject);
        assert!(config.logging.is_json());
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
    }
}
