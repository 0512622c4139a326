use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub connection_string: String,
    pub pool_size: usize,
    /// Open the database in read-only access mode
    pub read_only: bool,
    pub query_timeout_secs: u64,
    /// Create the sales table on startup if it is missing
    pub bootstrap: bool,
    /// CSV loaded into an empty sales table during bootstrap
    pub seed_csv: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    /// Key rate limits on `X-Forwarded-For`. Only safe behind a proxy that
    /// overwrites the header.
    pub trust_forwarded_for: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub backend: String, // "remote" or "ollama"
    pub model: String,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClassifierConfig {
    pub backend: String, // "huggingface" or "none"
    pub model: String,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub timeout_secs: u64,
    pub cache_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    pub rate_limit_requests: usize,
    pub rate_limit_window_secs: u64,
    /// Ask the model for a second query when the first one is rejected
    pub reprompt_on_unsafe: bool,
    pub history_size: usize,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub llm: LlmConfig,
    pub classifier: ClassifierConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// DuckDB database file
    #[arg(long)]
    pub database: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty")]
    pub log_format: LogFormat,
}

#[derive(Debug, Error)]
pub enum ConfigValidationError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{0} is too large")]
    TooLarge(&'static str),

    #[error("database.bootstrap requires a writable database; set read_only = false")]
    BootstrapReadOnly,

    #[error(transparent)]
    Load(#[from] ConfigError),
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigValidationError> {
        let mut config_builder = Config::builder();

        // Add configuration from file if specified
        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            let default_locations = [
                "config.toml",
                "config/config.toml",
                "/etc/nl-analytics/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        // Credentials are expected here, e.g. NLA__LLM__API_KEY
        config_builder = config_builder.add_source(
            Environment::with_prefix("NLA")
                .prefix_separator("__")
                .separator("__"),
        );

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        // Override with command line args if provided
        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }
        if let Some(database) = &args.database {
            config.database.connection_string = database.clone();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.pipeline.rate_limit_requests == 0 {
            return Err(ConfigValidationError::Zero("pipeline.rate_limit_requests"));
        }
        if self.pipeline.rate_limit_window_secs == 0 {
            return Err(ConfigValidationError::Zero("pipeline.rate_limit_window_secs"));
        }
        if self.classifier.cache_size == 0 {
            return Err(ConfigValidationError::Zero("classifier.cache_size"));
        }
        if self.database.pool_size == 0 {
            return Err(ConfigValidationError::Zero("database.pool_size"));
        }
        self.database.max_pool_size()?;
        if self.database.bootstrap && self.database.read_only {
            return Err(ConfigValidationError::BootstrapReadOnly);
        }
        Ok(())
    }

    /// Every credential that must never appear in logs.
    pub fn secrets(&self) -> Vec<String> {
        [&self.llm.api_key, &self.classifier.api_key]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect()
    }
}

impl DatabaseConfig {
    /// `pool_size` as the r2d2 builder takes it.
    pub fn max_pool_size(&self) -> Result<u32, ConfigValidationError> {
        u32::try_from(self.pool_size)
            .map_err(|_| ConfigValidationError::TooLarge("database.pool_size"))
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ClassifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PipelineConfig {
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connection_string: "data/analytics.duckdb".to_string(),
            pool_size: 5,
            read_only: false,
            query_timeout_secs: 30,
            bootstrap: true,
            seed_csv: None,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            trust_forwarded_for: false,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: "remote".to_string(),
            model: "mistral-tiny".to_string(),
            api_key: None,
            api_url: None,
            timeout_secs: 30,
            temperature: 0.1,
            max_tokens: 1000,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            backend: "none".to_string(),
            model: "distilbert-base-uncased".to_string(),
            api_key: None,
            api_url: None,
            timeout_secs: 5,
            cache_size: 128,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rate_limit_requests: 100,
            rate_limit_window_secs: 3600,
            reprompt_on_unsafe: false,
            history_size: 10,
        }
    }
}
