//! Sequencer configuration module
//!
//! Handles loading and validating configuration from environment variables.

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load environment variables: {0}")]
    EnvLoad(#[from] dotenvy::Error),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Sequencer behaviour configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SequencerConfig {
    /// Number of entities fetched per repository search page
    pub search_page_size: usize,
    /// Separator between the action type name and the generated token
    pub qualified_name_separator: String,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            search_page_size: 100,
            qualified_name_separator: "::".to_string(),
        }
    }
}

/// Output format of the tracing subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Compact,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,governance_sequencer=debug".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Postgres repository configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_pool_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "postgres".to_string(),
            max_pool_size: 10,
        }
    }
}

/// Complete sequencer settings
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub sequencer: SequencerConfig,
    pub logging: LoggingConfig,
    /// Only present when a DATABASE_URL is configured
    pub database: Option<DatabaseConfig>,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::accept_env_file(dotenvy::dotenv())?;
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// A missing .env file is fine; a malformed one is not
    fn accept_env_file<T>(result: Result<T, dotenvy::Error>) -> Result<(), ConfigError> {
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Build settings from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = SequencerConfig::default();

        let search_page_size = match lookup("SEQUENCER_SEARCH_PAGE_SIZE") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(size) if size > 0 => size,
                _ => {
                    return Err(ConfigError::InvalidValue(format!(
                        "SEQUENCER_SEARCH_PAGE_SIZE must be a positive integer, got '{}'",
                        raw
                    )))
                }
            },
            None => defaults.search_page_size,
        };

        let qualified_name_separator = match lookup("SEQUENCER_NAME_SEPARATOR") {
            Some(sep) if sep.is_empty() => {
                return Err(ConfigError::InvalidValue(
                    "SEQUENCER_NAME_SEPARATOR must not be empty".to_string(),
                ))
            }
            Some(sep) => sep,
            None => defaults.qualified_name_separator,
        };

        let logging = LoggingConfig {
            filter: lookup("LOG_FILTER")
                .or_else(|| lookup("RUST_LOG"))
                .unwrap_or_else(|| LoggingConfig::default().filter),
            format: match lookup("LOG_FORMAT").as_deref().map(str::to_lowercase).as_deref() {
                None | Some("compact") => LogFormat::Compact,
                Some("json") => LogFormat::Json,
                Some(other) => {
                    return Err(ConfigError::InvalidValue(format!(
                        "LOG_FORMAT must be 'compact' or 'json', got '{}'",
                        other
                    )))
                }
            },
        };

        let max_pool_size = match lookup("DB_MAX_CONNECTIONS") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(size) if size > 0 => size,
                _ => {
                    return Err(ConfigError::InvalidValue(format!(
                        "DB_MAX_CONNECTIONS must be a positive integer, got '{}'",
                        raw
                    )))
                }
            },
            None => 10,
        };

        let database = match lookup("DATABASE_URL") {
            Some(url) => Some(Self::parse_database_url(&url, max_pool_size)?),
            None => None,
        };

        Ok(Self {
            sequencer: SequencerConfig {
                search_page_size,
                qualified_name_separator,
            },
            logging,
            database,
        })
    }

    /// Parse a DATABASE_URL connection string (postgresql://...)
    fn parse_database_url(url: &str, max_pool_size: usize) -> Result<DatabaseConfig, ConfigError> {
        let parsed = url::Url::parse(url).map_err(|_| {
            ConfigError::InvalidValue(
                "Invalid DATABASE_URL format (expected postgresql://...)".to_string(),
            )
        })?;

        if parsed.scheme() != "postgres" && parsed.scheme() != "postgresql" {
            return Err(ConfigError::InvalidValue(format!(
                "Unsupported DATABASE_URL scheme '{}'",
                parsed.scheme()
            )));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| ConfigError::InvalidValue("Missing host in DATABASE_URL".to_string()))?
            .to_string();

        let user = if parsed.username().is_empty() {
            DatabaseConfig::default().user
        } else {
            parsed.username().to_string()
        };

        let database = parsed.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(ConfigError::InvalidValue(
                "Missing database name in DATABASE_URL".to_string(),
            ));
        }

        Ok(DatabaseConfig {
            host,
            port: parsed.port().unwrap_or(5432),
            user,
            password: parsed.password().map(|p| p.to_string()).unwrap_or_default(),
            database,
            max_pool_size,
        })
    }
}
