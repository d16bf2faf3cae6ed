//! Outbound OTP delivery
//!
//! The engine only knows the [`OtpSender`] contract. Production wires an
//! HTTP email API and an HTTP SMS API; development without credentials
//! falls back to [`LogSender`].

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::env;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{Environment, required_var};

#[derive(Debug, Error)]
pub enum SendError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider rejected the message with status {0}")]
    Rejected(u16),
}

/// Delivers a code to one recipient
#[async_trait]
pub trait OtpSender: Send + Sync {
    async fn send(&self, recipient: &str, code: &str, ttl_minutes: i64) -> Result<(), SendError>;
}

/// Email API configuration
#[derive(Debug, Clone)]
pub struct EmailApiConfig {
    pub api_url: String,
    pub api_key: String,
    pub from: String,
}

/// SMS API configuration
#[derive(Debug, Clone)]
pub struct SmsApiConfig {
    pub api_url: String,
    pub account_sid: String,
    pub auth_token: String,
    pub from: String,
}

/// Credentials for both channels. `None` selects the logging sender.
#[derive(Debug, Clone, Default)]
pub struct SenderConfig {
    pub email: Option<EmailApiConfig>,
    pub sms: Option<SmsApiConfig>,
}

fn any_set(names: &[&str]) -> bool {
    names.iter().any(|name| env::var(name).is_ok_and(|v| !v.is_empty()))
}

impl SenderConfig {
    /// # Environment Variables
    /// - `EMAIL_API_URL`, `EMAIL_API_KEY`, `EMAIL_FROM`
    /// - `SMS_API_URL`, `SMS_ACCOUNT_SID`, `SMS_AUTH_TOKEN`, `SMS_FROM`
    ///
    /// All are required in production. In development a channel whose
    /// variables are all absent is served by the logging sender; a
    /// partially configured channel is still an error.
    pub fn from_env(environment: Environment) -> Result<Self> {
        const EMAIL: &[&str] = &["EMAIL_API_URL", "EMAIL_API_KEY", "EMAIL_FROM"];
        const SMS: &[&str] = &["SMS_API_URL", "SMS_ACCOUNT_SID", "SMS_AUTH_TOKEN", "SMS_FROM"];

        let email = if environment.is_production() || any_set(EMAIL) {
            Some(EmailApiConfig {
                api_url: required_var("EMAIL_API_URL")?,
                api_key: required_var("EMAIL_API_KEY")?,
                from: required_var("EMAIL_FROM")?,
            })
        } else {
            None
        };

        let sms = if environment.is_production() || any_set(SMS) {
            Some(SmsApiConfig {
                api_url: required_var("SMS_API_URL")?,
                account_sid: required_var("SMS_ACCOUNT_SID")?,
                auth_token: required_var("SMS_AUTH_TOKEN")?,
                from: required_var("SMS_FROM")?,
            })
        } else {
            None
        };

        Ok(SenderConfig { email, sms })
    }
}

fn http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
}

/// JSON email API with bearer authentication
pub struct HttpEmailSender {
    client: reqwest::Client,
    config: EmailApiConfig,
}

impl HttpEmailSender {
    pub fn new(config: EmailApiConfig) -> Result<Self, SendError> {
        Ok(Self {
            client: http_client()?,
            config,
        })
    }
}

#[async_trait]
impl OtpSender for HttpEmailSender {
    async fn send(&self, recipient: &str, code: &str, ttl_minutes: i64) -> Result<(), SendError> {
        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "from": self.config.from,
                "to": recipient,
                "subject": "Your verification code",
                "text": format!(
                    "Your verification code is {code}. It expires in {ttl_minutes} minutes."
                ),
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SendError::Rejected(response.status().as_u16()));
        }

        info!("Verification email dispatched");
        Ok(())
    }
}

/// Form-encoded SMS API with basic authentication
pub struct HttpSmsSender {
    client: reqwest::Client,
    config: SmsApiConfig,
}

impl HttpSmsSender {
    pub fn new(config: SmsApiConfig) -> Result<Self, SendError> {
        Ok(Self {
            client: http_client()?,
            config,
        })
    }
}

#[async_trait]
impl OtpSender for HttpSmsSender {
    async fn send(&self, recipient: &str, code: &str, ttl_minutes: i64) -> Result<(), SendError> {
        let body = format!("Your verification code is {code}. It expires in {ttl_minutes} minutes.");
        let response = self
            .client
            .post(&self.config.api_url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[
                ("From", self.config.from.as_str()),
                ("To", recipient),
                ("Body", body.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SendError::Rejected(response.status().as_u16()));
        }

        info!("Verification SMS dispatched");
        Ok(())
    }
}

/// Development sender: writes the code to the debug log
pub struct LogSender;

#[async_trait]
impl OtpSender for LogSender {
    async fn send(&self, recipient: &str, code: &str, ttl_minutes: i64) -> Result<(), SendError> {
        debug!(
            "OTP for {} is {} (valid {} minutes)",
            recipient, code, ttl_minutes
        );
        Ok(())
    }
}
