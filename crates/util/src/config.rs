use std::{env, fmt};

use url::Url;

use super::database_url;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns the canonical name used for logging labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub environment: Environment,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;

        Ok(Self {
            database_url: database_url(),
            environment,
        })
    }
}

/// Settings gating the marketing notifier.
///
/// `sailthru_enabled` is the process-wide switch; the per-partner opt-in
/// lives in storage and is checked by the notifier on every event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifierConfig {
    pub sailthru_enabled: bool,
    pub broker_url: Option<Url>,
}

impl NotifierConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let sailthru_enabled = match env::var("SAILTHRU_ENABLE") {
            Ok(value) => parse_switch(&value)?,
            Err(_) => false,
        };

        let broker_url = match env::var("TASK_BROKER_URL") {
            Ok(value) if !value.trim().is_empty() => Some(
                Url::parse(value.trim())
                    .map_err(|err| ConfigError::BrokerUrl(value.clone(), err))?,
            ),
            _ => None,
        };

        Ok(Self {
            sailthru_enabled,
            broker_url,
        })
    }
}

fn parse_switch(value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::InvalidSwitch(other.to_string())),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    InvalidSwitch(String),
    BrokerUrl(String, url::ParseError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::InvalidSwitch(value) => {
                write!(f, "SAILTHRU_ENABLE must be a boolean switch (got {value})")
            }
            Self::BrokerUrl(value, err) => {
                write!(f, "invalid TASK_BROKER_URL value '{value}': {err}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
