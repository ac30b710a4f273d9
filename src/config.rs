//! Configuration management for the classification service
//!
//! Settings are read once at startup (defaults, then an optional TOML file, then
//! environment variables) and treated as immutable for the life of the process.

use crate::classifier::Provider;
use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::Path;

/// Optional config file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/finance-ml.toml";

/// Log output format
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event
    #[default]
    Json,
    /// Human-readable, for local development
    Pretty,
}

/// Main application settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub service_name: String,
    pub service_version: String,

    pub host: String,
    pub port: u16,

    /// Active generative-model backend
    pub llm_provider: Provider,
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_base_url: String,
    pub anthropic_api_key: String,
    pub anthropic_model: String,
    pub anthropic_base_url: String,

    /// Rule hits below these confidences fall through to the model
    pub merchant_confidence_threshold: f64,
    pub category_confidence_threshold: f64,

    /// Z-score above which an amount is anomalous
    pub anomaly_threshold: f64,

    /// Deadline for a single external classifier call
    pub llm_timeout_ms: u64,

    /// Maximum in-flight external calls per batch
    pub batch_concurrency: usize,

    /// JSON rule table; built-in rules when unset
    pub rules_path: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: LogFormat,

    pub cors_origins: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            service_name: "finance-ml-service".to_string(),
            service_version: format!("v{}", env!("CARGO_PKG_VERSION")),
            host: "0.0.0.0".to_string(),
            port: 8000,
            llm_provider: Provider::OpenAi,
            openai_api_key: String::new(),
            openai_model: "gpt-4-turbo-preview".to_string(),
            openai_base_url: "https://api.openai.com".to_string(),
            anthropic_api_key: String::new(),
            anthropic_model: "claude-3-sonnet-20240229".to_string(),
            anthropic_base_url: "https://api.anthropic.com".to_string(),
            merchant_confidence_threshold: 0.70,
            category_confidence_threshold: 0.70,
            anomaly_threshold: 2.5,
            llm_timeout_ms: 15_000,
            batch_concurrency: 8,
            rules_path: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
        }
    }
}

impl Settings {
    /// Load settings from the default file (if present) and the environment
    pub fn load() -> Result<Self> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Load settings from a specific file (if present) and the environment
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_string_lossy().into_owned();
        let config = Config::builder()
            .add_source(File::new(&path, FileFormat::Toml).required(false))
            .add_source(
                Environment::default()
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("cors_origins"),
            )
            .build()
            .context("Failed to build configuration")?;

        Self::from_config(config)
    }

    /// Deserialize and validate an already-built configuration
    pub fn from_config(config: Config) -> Result<Self> {
        let settings: Settings = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("merchant_confidence_threshold", self.merchant_confidence_threshold),
            ("category_confidence_threshold", self.category_confidence_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{} must be within [0, 1], got {}", name, value);
            }
        }

        if !(self.anomaly_threshold > 0.0 && self.anomaly_threshold < 10.0) {
            bail!(
                "anomaly_threshold must be within (0, 10), got {}",
                self.anomaly_threshold
            );
        }

        if self.llm_timeout_ms == 0 {
            bail!("llm_timeout_ms must be greater than zero");
        }

        if self.batch_concurrency == 0 {
            bail!("batch_concurrency must be greater than zero");
        }

        Ok(())
    }

    /// API key of the active provider
    pub fn active_api_key(&self) -> &str {
        match self.llm_provider {
            Provider::OpenAi => &self.openai_api_key,
            Provider::Anthropic => &self.anthropic_api_key,
        }
    }

    /// Model identifier of the active provider
    pub fn active_model(&self) -> &str {
        match self.llm_provider {
            Provider::OpenAi => &self.openai_model,
            Provider::Anthropic => &self.anthropic_model,
        }
    }

    /// Whether a credential for the active provider is configured
    pub fn llm_available(&self) -> bool {
        !self.active_api_key().trim().is_empty()
    }
}
