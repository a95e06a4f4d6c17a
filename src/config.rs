use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "caisse.toml";
pub const DEFAULT_DATABASE_PATH: &str = "caisse.db";
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// Settings layered from defaults, an optional TOML file and `CAISSE_*`
/// environment variables (nested keys joined with `__`).
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    /// Company used when a command does not name one
    #[serde(default)]
    pub company: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                path: DEFAULT_DATABASE_PATH.to_string(),
            },
            logging: LoggingConfig {
                level: DEFAULT_LOG_LEVEL.to_string(),
            },
            company: None,
        }
    }
}

impl AppConfig {
    /// Load the configuration. An explicitly given file must exist; the
    /// default `caisse.toml` is optional.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let (file, required) = match path {
            Some(p) => (p, true),
            None => (DEFAULT_CONFIG_FILE, false),
        };

        let config = Config::builder()
            .set_default("database.path", DEFAULT_DATABASE_PATH)?
            .set_default("logging.level", DEFAULT_LOG_LEVEL)?
            .add_source(File::with_name(file).required(required))
            .add_source(
                Environment::with_prefix("CAISSE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to load configuration from {}", file))?;

        config
            .try_deserialize()
            .context("Invalid configuration")
    }
}
