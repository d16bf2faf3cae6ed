//! OTP engine
//!
//! One live challenge per identifier. Issuing replaces the stored challenge
//! before the code is dispatched, so a later verify only ever sees the most
//! recent code. Verification is evaluated under the store's row lock.

use anyhow::Result;
use chrono::{Duration, Utc};
use rand::{Rng, rngs::OsRng};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Environment, flag, parse_or};
use crate::models::{ChallengeVerdict, OtpChallenge, OtpChannel};
use crate::store::{Store, StoreError};
use crate::validation::{normalize_email, normalize_phone, validate_email, validate_phone};

pub mod sender;

use sender::OtpSender;

/// OTP configuration
#[derive(Debug, Clone)]
pub struct OtpConfig {
    pub ttl_seconds: i64,
    pub max_attempts: i32,
    pub code_length: usize,
    /// Treat dispatch failures as non-fatal. Never true in production.
    pub dispatch_fallback: bool,
    pub rate_limit_max: u32,
    pub rate_limit_window_seconds: u64,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 600,
            max_attempts: 3,
            code_length: 6,
            dispatch_fallback: false,
            rate_limit_max: 3,
            rate_limit_window_seconds: 300,
        }
    }
}

impl OtpConfig {
    /// # Environment Variables
    /// - `OTP_TTL_SECONDS` (default: 600)
    /// - `OTP_MAX_ATTEMPTS` (default: 3)
    /// - `OTP_CODE_LENGTH` (default: 6)
    /// - `OTP_DISPATCH_FALLBACK`: honored outside production only
    /// - `OTP_RATE_LIMIT_MAX` (default: 3), `OTP_RATE_LIMIT_WINDOW_SECONDS` (default: 300)
    pub fn from_env(environment: Environment) -> Result<Self> {
        let config = OtpConfig {
            ttl_seconds: parse_or("OTP_TTL_SECONDS", 600)?,
            max_attempts: parse_or("OTP_MAX_ATTEMPTS", 3)?,
            code_length: parse_or("OTP_CODE_LENGTH", 6)?,
            dispatch_fallback: !environment.is_production() && flag("OTP_DISPATCH_FALLBACK"),
            rate_limit_max: parse_or("OTP_RATE_LIMIT_MAX", 3)?,
            rate_limit_window_seconds: parse_or("OTP_RATE_LIMIT_WINDOW_SECONDS", 300)?,
        };

        if config.ttl_seconds <= 0 || config.max_attempts <= 0 {
            anyhow::bail!("OTP_TTL_SECONDS and OTP_MAX_ATTEMPTS must be positive");
        }
        if !(4..=10).contains(&config.code_length) {
            anyhow::bail!("OTP_CODE_LENGTH must be between 4 and 10");
        }

        Ok(config)
    }
}

#[derive(Debug, Error)]
pub enum OtpError {
    #[error("{0}")]
    Validation(String),

    #[error("no challenge for identifier")]
    NotFound,

    #[error("code already used")]
    AlreadyUsed,

    #[error("code expired")]
    Expired,

    #[error("too many attempts")]
    TooManyAttempts,

    #[error("invalid code")]
    InvalidCode,

    #[error("dispatch failed: {0}")]
    Dispatch(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Senders for both channels
#[derive(Clone)]
pub struct OtpSenders {
    pub email: Arc<dyn OtpSender>,
    pub sms: Arc<dyn OtpSender>,
}

/// Acknowledgment of an issue request
#[derive(Debug, Clone, Serialize)]
pub struct IssueReceipt {
    /// False when dispatch failed and the fallback kept the flow alive
    pub delivered: bool,
    pub expires_in: i64,
}

/// Validate and normalize an identifier for its channel
pub fn normalize_identifier(identifier: &str, channel: OtpChannel) -> Result<String, OtpError> {
    match channel {
        OtpChannel::Email => {
            let email = normalize_email(identifier);
            validate_email(&email).map_err(OtpError::Validation)?;
            Ok(email)
        }
        OtpChannel::Sms => {
            let phone = normalize_phone(identifier);
            validate_phone(&phone).map_err(OtpError::Validation)?;
            Ok(phone)
        }
    }
}

/// Fixed-width numeric code from the OS random source
fn generate_code(length: usize) -> String {
    let mut rng = OsRng;
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// OTP engine
#[derive(Clone)]
pub struct OtpEngine {
    store: Arc<dyn Store>,
    senders: OtpSenders,
    config: OtpConfig,
}

impl OtpEngine {
    pub fn new(store: Arc<dyn Store>, senders: OtpSenders, config: OtpConfig) -> Self {
        Self {
            store,
            senders,
            config,
        }
    }

    pub fn config(&self) -> &OtpConfig {
        &self.config
    }

    /// Replace the identifier's challenge with a fresh code and dispatch it
    pub async fn issue(&self, identifier: &str, channel: OtpChannel) -> Result<IssueReceipt, OtpError> {
        let identifier = normalize_identifier(identifier, channel)?;
        let now = Utc::now();

        let challenge = OtpChallenge {
            identifier: identifier.clone(),
            code: generate_code(self.config.code_length),
            channel,
            expires_at: now + Duration::seconds(self.config.ttl_seconds),
            attempts: 0,
            verified: false,
            created_at: now,
        };
        self.store.replace_challenge(&challenge).await?;

        let sender = match channel {
            OtpChannel::Email => &self.senders.email,
            OtpChannel::Sms => &self.senders.sms,
        };

        let delivered = match sender
            .send(&identifier, &challenge.code, self.config.ttl_seconds / 60)
            .await
        {
            Ok(()) => true,
            Err(e) if self.config.dispatch_fallback => {
                warn!(
                    "OTP dispatch over {} failed, continuing with stored code: {}",
                    channel.as_str(),
                    e
                );
                false
            }
            Err(e) => {
                warn!("OTP dispatch over {} failed: {}", channel.as_str(), e);
                return Err(OtpError::Dispatch(e.to_string()));
            }
        };

        info!("Issued OTP challenge over {}", channel.as_str());

        Ok(IssueReceipt {
            delivered,
            expires_in: self.config.ttl_seconds,
        })
    }

    /// Check a submitted code. Each call is one attempt; it is never retried.
    pub async fn verify(
        &self,
        identifier: &str,
        code: &str,
        channel: OtpChannel,
    ) -> Result<String, OtpError> {
        let identifier = normalize_identifier(identifier, channel)?;

        let verdict = self
            .store
            .verify_challenge(&identifier, code.trim(), Utc::now(), self.config.max_attempts)
            .await?
            .ok_or(OtpError::NotFound)?;

        match verdict {
            ChallengeVerdict::Verified => {
                info!("OTP challenge verified over {}", channel.as_str());
                Ok(identifier)
            }
            ChallengeVerdict::AlreadyUsed => Err(OtpError::AlreadyUsed),
            ChallengeVerdict::Expired => Err(OtpError::Expired),
            ChallengeVerdict::TooManyAttempts => Err(OtpError::TooManyAttempts),
            ChallengeVerdict::InvalidCode => Err(OtpError::InvalidCode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use sender::SendError;
    use std::sync::Mutex;

    /// Remembers every code it was asked to send
    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    impl Outbox {
        fn last_code(&self) -> String {
            self.sent.lock().unwrap().last().unwrap().1.clone()
        }
    }

    #[async_trait]
    impl OtpSender for Outbox {
        async fn send(&self, recipient: &str, code: &str, _ttl: i64) -> Result<(), SendError> {
            if self.fail {
                return Err(SendError::Rejected(503));
            }
            self.sent
                .lock()
                .unwrap()
                .push((recipient.to_string(), code.to_string()));
            Ok(())
        }
    }

    fn engine(outbox: Arc<Outbox>, config: OtpConfig) -> OtpEngine {
        OtpEngine::new(
            Arc::new(MemoryStore::new()),
            OtpSenders {
                email: outbox.clone(),
                sms: outbox,
            },
            config,
        )
    }

    #[test]
    fn codes_are_fixed_width_digits() {
        for _ in 0..50 {
            let code = generate_code(6);
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn issued_code_verifies_once() {
        let outbox = Arc::new(Outbox::default());
        let otp = engine(outbox.clone(), OtpConfig::default());

        otp.issue("a@x.com", OtpChannel::Email).await.unwrap();
        let code = outbox.last_code();

        assert_eq!(
            otp.verify("A@x.com", &code, OtpChannel::Email).await.unwrap(),
            "a@x.com"
        );
        assert!(matches!(
            otp.verify("a@x.com", &code, OtpChannel::Email).await,
            Err(OtpError::AlreadyUsed)
        ));
    }

    #[tokio::test]
    async fn unknown_identifier_is_not_found() {
        let otp = engine(Arc::new(Outbox::default()), OtpConfig::default());
        assert!(matches!(
            otp.verify("a@x.com", "123456", OtpChannel::Email).await,
            Err(OtpError::NotFound)
        ));
    }

    #[tokio::test]
    async fn dispatch_failure_surfaces_without_fallback() {
        let outbox = Arc::new(Outbox {
            fail: true,
            ..Default::default()
        });
        let otp = engine(outbox, OtpConfig::default());

        assert!(matches!(
            otp.issue("a@x.com", OtpChannel::Email).await,
            Err(OtpError::Dispatch(_))
        ));
    }

    #[tokio::test]
    async fn dispatch_failure_tolerated_with_fallback() {
        let outbox = Arc::new(Outbox {
            fail: true,
            ..Default::default()
        });
        let config = OtpConfig {
            dispatch_fallback: true,
            ..Default::default()
        };
        let otp = engine(outbox, config);

        let receipt = otp.issue("+919876543210", OtpChannel::Sms).await.unwrap();
        assert!(!receipt.delivered);

        // The stored challenge stays authoritative
        assert!(matches!(
            otp.verify("+919876543210", "not-it", OtpChannel::Sms).await,
            Err(OtpError::InvalidCode)
        ));
    }

    #[tokio::test]
    async fn malformed_identifier_is_rejected() {
        let otp = engine(Arc::new(Outbox::default()), OtpConfig::default());
        assert!(matches!(
            otp.issue("not-an-email", OtpChannel::Email).await,
            Err(OtpError::Validation(_))
        ));
    }
}
