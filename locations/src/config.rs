use crate::retry::RetryPolicy;
use serde::Deserialize;
use thiserror::Error;

pub const DATABASE_URL_ENV: &str = "DATABASE_URL";
pub const ALLOWED_ORIGINS_ENV: &str = "ALLOWED_ORIGINS";

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("{0} must allow at least one attempt")]
    ZeroAttempts(&'static str),

    #[error("Empty CORS origin")]
    EmptyOrigin,

    #[error("No database url configured and DATABASE_URL is not set")]
    MissingDatabaseUrl,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub listener: Listener,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub rate_gate: RateGateConfig,
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.database.validate()?;
        self.cors.validate()?;
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres connection string. Falls back to `DATABASE_URL` when unset.
    pub url: Option<String>,
    /// Connect over TLS using the system trust roots.
    pub tls: bool,
    /// Budget for the connection made before the server starts listening.
    pub startup_retry: RetryPolicy,
    /// Budget for reconnecting while serving a request.
    pub request_retry: RetryPolicy,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            url: None,
            tls: true,
            startup_retry: RetryPolicy::fixed(5, 1000),
            request_retry: RetryPolicy::once(),
        }
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.startup_retry.max_attempts == 0 {
            return Err(ValidationError::ZeroAttempts("startup_retry"));
        }
        if self.request_retry.max_attempts == 0 {
            return Err(ValidationError::ZeroAttempts("request_retry"));
        }
        Ok(())
    }

    /// The configured url, or `DATABASE_URL` from the environment.
    pub fn connection_url(&self) -> Result<String, ValidationError> {
        self.resolve_url(std::env::var(DATABASE_URL_ENV).ok())
    }

    fn resolve_url(&self, env_url: Option<String>) -> Result<String, ValidationError> {
        self.url
            .clone()
            .or(env_url)
            .filter(|url| !url.trim().is_empty())
            .ok_or(ValidationError::MissingDatabaseUrl)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateGateConfig {
    /// Check the block status a second time after the request has been logged, so the
    /// request that crosses the limit is rejected as well.
    pub recheck_after_record: bool,
}

impl Default for RateGateConfig {
    fn default() -> Self {
        RateGateConfig {
            recheck_after_record: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        CorsConfig {
            allowed_origins: vec![
                "https://the-super-sweet-two.vercel.app".into(),
                "http://localhost:3000".into(),
                "http://127.0.0.1:5173".into(),
            ],
        }
    }
}

impl CorsConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.allowed_origins.iter().any(|o| o.trim().is_empty()) {
            return Err(ValidationError::EmptyOrigin);
        }
        Ok(())
    }

    /// Allowed origins, with `ALLOWED_ORIGINS` (comma separated) taking precedence.
    pub fn effective_origins(&self) -> Vec<String> {
        match std::env::var(ALLOWED_ORIGINS_ENV) {
            Ok(value) => parse_origins(&value),
            Err(_) => self.allowed_origins.clone(),
        }
    }
}

fn parse_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(String::from)
        .collect()
}
