//! Service configuration
//!
//! Every component owns a config struct with a `from_env()` constructor.
//! [`AppConfig::from_env`] assembles them once at startup so a missing
//! secret aborts the process before the listener binds.

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

use crate::jwt::JwtConfig;
use crate::oauth::GoogleConfig;
use crate::otp::OtpConfig;
use crate::otp::sender::SenderConfig;
use crate::payment::PaymentConfig;

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Development,
}

impl Environment {
    pub fn from_env() -> Result<Self> {
        match env::var("APP_ENV").unwrap_or_default().to_lowercase().as_str() {
            "" | "production" | "prod" => Ok(Environment::Production),
            "development" | "dev" => Ok(Environment::Development),
            other => anyhow::bail!("APP_ENV must be production or development, got {other}"),
        }
    }

    pub fn is_production(&self) -> bool {
        *self == Environment::Production
    }
}

/// Which store adapter backs the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

/// Read a variable that must be present and non-empty
pub(crate) fn required_var(name: &str) -> Result<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => anyhow::bail!("{name} environment variable not set"),
    }
}

/// Read and parse an optional variable, falling back to `default` when unset
pub(crate) fn parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .with_context(|| format!("{name} has an invalid value")),
        _ => Ok(default),
    }
}

/// Boolean flag: `1`, `true` or `yes` enable it
pub(crate) fn flag(name: &str) -> bool {
    env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Top-level configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub bind_addr: String,
    pub frontend_url: String,
    /// Reverse proxies in front of the service whose `X-Forwarded-For`
    /// entries are trusted; 0 keys callers on the socket peer
    pub trusted_proxy_hops: usize,
    /// Only ever true in development
    pub expose_error_detail: bool,
    pub storage: StorageBackend,
    pub sweep_schedule: String,
    pub jwt: JwtConfig,
    pub otp: OtpConfig,
    pub senders: SenderConfig,
    pub payment: PaymentConfig,
    pub google: GoogleConfig,
}

impl AppConfig {
    /// Load every component config from the environment
    ///
    /// # Environment Variables
    /// - `APP_ENV`: `production` (default) or `development`
    /// - `BIND_ADDR`: Listen address (default: 0.0.0.0:3000)
    /// - `FRONTEND_URL`: OAuth redirect target and CORS origin (default: http://localhost:5173)
    /// - `TRUSTED_PROXY_HOPS`: Trusted reverse proxies in front of the service (default: 0)
    /// - `EXPOSE_ERROR_DETAIL`: Add internal error detail to responses (development only)
    /// - `STORAGE_BACKEND`: `postgres` (default) or `memory` (development only)
    /// - `SWEEP_SCHEDULE`: Cron expression for the expiry sweep (default: every 10 minutes)
    pub fn from_env() -> Result<Self> {
        let environment = Environment::from_env()?;

        let storage = match env::var("STORAGE_BACKEND")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "" | "postgres" => StorageBackend::Postgres,
            "memory" if !environment.is_production() => StorageBackend::Memory,
            "memory" => anyhow::bail!("STORAGE_BACKEND=memory is not allowed in production"),
            other => anyhow::bail!("unknown STORAGE_BACKEND {other}"),
        };

        Ok(AppConfig {
            environment,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            trusted_proxy_hops: parse_or("TRUSTED_PROXY_HOPS", 0)?,
            expose_error_detail: !environment.is_production() && flag("EXPOSE_ERROR_DETAIL"),
            storage,
            sweep_schedule: env::var("SWEEP_SCHEDULE")
                .unwrap_or_else(|_| "0 */10 * * * *".to_string()),
            jwt: JwtConfig::from_env()?,
            otp: OtpConfig::from_env(environment)?,
            senders: SenderConfig::from_env(environment)?,
            payment: PaymentConfig::from_env()?,
            google: GoogleConfig::from_env()?,
        })
    }
}
