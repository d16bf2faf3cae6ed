//! One-time passcode challenge model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use subtle::ConstantTimeEq;

use super::UnknownVariant;

/// Delivery channel of a challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpChannel {
    Email,
    #[serde(alias = "phone")]
    Sms,
}

impl OtpChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpChannel::Email => "email",
            OtpChannel::Sms => "sms",
        }
    }
}

impl FromStr for OtpChannel {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(OtpChannel::Email),
            "sms" | "phone" => Ok(OtpChannel::Sms),
            other => Err(UnknownVariant::new("otp channel", other)),
        }
    }
}

/// The single live challenge for an identifier
#[derive(Debug, Clone)]
pub struct OtpChallenge {
    pub identifier: String,
    pub code: String,
    pub channel: OtpChannel,
    pub expires_at: DateTime<Utc>,
    pub attempts: i32,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

/// Result of checking a submitted code against a challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeVerdict {
    Verified,
    AlreadyUsed,
    Expired,
    TooManyAttempts,
    InvalidCode,
}

impl ChallengeVerdict {
    /// Whether this outcome consumes one verification attempt
    pub fn counts_attempt(&self) -> bool {
        matches!(
            self,
            ChallengeVerdict::AlreadyUsed
                | ChallengeVerdict::TooManyAttempts
                | ChallengeVerdict::InvalidCode
        )
    }
}

impl OtpChallenge {
    /// Decide the outcome of one verification call.
    ///
    /// Checks run in a fixed order: already used, expired, attempts
    /// exhausted, then the code itself. The comparison is constant time.
    pub fn evaluate(&self, submitted: &str, now: DateTime<Utc>, max_attempts: i32) -> ChallengeVerdict {
        if self.verified {
            return ChallengeVerdict::AlreadyUsed;
        }
        if now > self.expires_at {
            return ChallengeVerdict::Expired;
        }
        if self.attempts >= max_attempts {
            return ChallengeVerdict::TooManyAttempts;
        }
        if bool::from(submitted.as_bytes().ct_eq(self.code.as_bytes())) {
            ChallengeVerdict::Verified
        } else {
            ChallengeVerdict::InvalidCode
        }
    }

    /// Record the effect of a verdict. The attempt counter never exceeds
    /// `max_attempts`.
    pub fn apply(&mut self, verdict: ChallengeVerdict, max_attempts: i32) {
        if verdict.counts_attempt() {
            self.attempts = (self.attempts + 1).min(max_attempts);
        }
        if verdict == ChallengeVerdict::Verified {
            self.verified = true;
        }
    }
}
