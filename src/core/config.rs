//! Configuration management for the orchestrator.
//!
//! Configuration is layered with the `config` crate: built-in defaults, then an
//! optional file (format picked from its extension), then environment
//! variables. Environment variable names match the keys in upper case, e.g.
//! `MAX_CONVERSATION_HISTORY` or `AUTHORIZED_MODELS=gpt-4,gpt-3.5-turbo`.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest accepted conversation timeout, one year.
pub const MAX_CONVERSATION_TIMEOUT_MINUTES: u64 = 365 * 24 * 60;

/// Longest accepted dispatch timeout, one day.
pub const MAX_DISPATCH_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum number of messages kept per conversation
    #[serde(default = "default_max_conversation_history")]
    pub max_conversation_history: usize,

    /// Idle minutes after which a conversation expires
    #[serde(default = "default_conversation_timeout_minutes")]
    pub conversation_timeout_minutes: u64,

    /// Whether requested models are checked against `authorized_models`
    #[serde(default)]
    pub model_authorization_enabled: bool,

    /// Allow-list of model identifiers (case-sensitive)
    #[serde(default)]
    pub authorized_models: Vec<String>,

    /// Queries per minute allowed per client (0 disables limiting)
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,

    /// Upper bound for a single backend dispatch
    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,

    /// Interval between backend health sweeps (0 disables the monitor)
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    /// Interval between sweeps of expired store entries and idle rate-limit
    /// buckets (0 disables them)
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Services registered at startup
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

/// A service registered from the configuration file at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub max_concurrent_requests: Option<u64>,
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_conversation_history() -> usize {
    10
}

fn default_conversation_timeout_minutes() -> u64 {
    30
}

fn default_rate_limit_per_minute() -> u32 {
    60
}

fn default_dispatch_timeout_secs() -> u64 {
    30
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_conversation_history: default_max_conversation_history(),
            conversation_timeout_minutes: default_conversation_timeout_minutes(),
            model_authorization_enabled: false,
            authorized_models: Vec::new(),
            rate_limit_per_minute: default_rate_limit_per_minute(),
            dispatch_timeout_secs: default_dispatch_timeout_secs(),
            health_check_interval_secs: default_health_check_interval_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            services: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional file plus the environment.
    ///
    /// # Arguments
    ///
    /// * `path` - Optional path to a TOML, YAML or JSON configuration file
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use bot_orchestrator::core::config::AppConfig;
    ///
    /// let config = AppConfig::load(Some("orchestrator.toml")).expect("Failed to load config");
    /// ```
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }

        builder = builder.add_source(
            Environment::default()
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("authorized_models"),
        );

        let config: AppConfig = builder
            .build()
            .with_context(|| match path {
                Some(path) => format!("Failed to read config file: {}", path),
                None => "Failed to read configuration".to_string(),
            })?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration using the file named by `CONFIG_FILE`, if any.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var("CONFIG_FILE").ok();
        Self::load(path.as_deref())
    }

    fn validate(&self) -> Result<()> {
        if self.max_conversation_history == 0 {
            anyhow::bail!("max_conversation_history must be at least 1");
        }
        if self.dispatch_timeout_secs == 0 {
            anyhow::bail!("dispatch_timeout_secs must be at least 1");
        }
        if self.dispatch_timeout_secs > MAX_DISPATCH_TIMEOUT_SECS {
            anyhow::bail!(
                "dispatch_timeout_secs must be at most {}",
                MAX_DISPATCH_TIMEOUT_SECS
            );
        }
        if self.conversation_timeout_minutes > MAX_CONVERSATION_TIMEOUT_MINUTES {
            anyhow::bail!(
                "conversation_timeout_minutes must be at most {}",
                MAX_CONVERSATION_TIMEOUT_MINUTES
            );
        }
        Ok(())
    }

    pub fn conversation_timeout(&self) -> Duration {
        Duration::from_secs(self.conversation_timeout_minutes.saturating_mul(60))
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    /// Allow-list with blank entries (e.g. from a trailing comma) removed.
    pub fn authorized_model_list(&self) -> Vec<String> {
        self.authorized_models
            .iter()
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .map(String::from)
            .collect()
    }
}
