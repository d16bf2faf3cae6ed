//! Token issuer: access/refresh token pairs and persisted sessions
//!
//! Tokens are HS256 JWTs signed with separate access and refresh secrets.
//! Verification is stateless (signature, issuer, expiry). Every issued pair
//! is also recorded as a [`Session`] keyed by the access token, so logout
//! can revoke it and privilege checks can consult live state.

use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::config::{parse_or, required_var};
use crate::models::{Role, Session, User};
use crate::store::{Store, StoreError};

/// JWT configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// HMAC secret for access tokens
    pub access_secret: String,
    /// HMAC secret for refresh tokens
    pub refresh_secret: String,
    /// `iss` claim written into and required on every token
    pub issuer: String,
    /// Access token expiration time in seconds (default: 1 hour)
    pub access_token_expiry: u64,
    /// Refresh token expiration time in seconds (default: 7 days)
    pub refresh_token_expiry: u64,
}

impl JwtConfig {
    /// Create a new JwtConfig from environment variables
    ///
    /// # Environment Variables
    /// - `JWT_ACCESS_SECRET`: Secret for signing access tokens (required)
    /// - `JWT_REFRESH_SECRET`: Secret for signing refresh tokens (required)
    /// - `JWT_ISSUER`: Issuer claim (default: "college-finder-access")
    /// - `JWT_ACCESS_TOKEN_EXPIRY`: Access token expiry in seconds (default: 3600)
    /// - `JWT_REFRESH_TOKEN_EXPIRY`: Refresh token expiry in seconds (default: 604800)
    pub fn from_env() -> Result<Self> {
        let access_secret = required_var("JWT_ACCESS_SECRET")?;
        let refresh_secret = required_var("JWT_REFRESH_SECRET")?;

        if access_secret == refresh_secret {
            anyhow::bail!("JWT_ACCESS_SECRET and JWT_REFRESH_SECRET must differ");
        }

        let issuer = std::env::var("JWT_ISSUER")
            .unwrap_or_else(|_| "college-finder-access".to_string());
        let access_token_expiry = parse_or("JWT_ACCESS_TOKEN_EXPIRY", 3600u64)?;
        let refresh_token_expiry = parse_or("JWT_REFRESH_TOKEN_EXPIRY", 604_800u64)?;

        if access_token_expiry == 0 || refresh_token_expiry == 0 {
            anyhow::bail!("token expiries must be positive");
        }

        Ok(JwtConfig {
            access_secret,
            refresh_secret,
            issuer,
            access_token_expiry,
            refresh_token_expiry,
        })
    }
}

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: Uuid,
    /// Issuer
    pub iss: String,
    /// Issued at time
    pub iat: i64,
    /// Expiration time
    pub exp: i64,
    /// Unique token id, so two pairs minted in the same second differ
    pub jti: Uuid,
    /// Role at issue time. Informational only; privilege checks read the
    /// live account.
    pub role: Role,
    /// Token type (access or refresh)
    pub token_type: TokenType,
}

/// Token type enum
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub enum TokenType {
    /// Access token
    Access,
    /// Refresh token
    Refresh,
}

/// Response body for every flow that authenticates a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

/// Where a session was opened from
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid or expired token")]
    InvalidOrExpiredToken,

    #[error("failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Token issuer
#[derive(Clone)]
pub struct TokenIssuer {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    validation: Validation,
    config: JwtConfig,
    store: Arc<dyn Store>,
}

impl TokenIssuer {
    pub fn new(config: JwtConfig, store: Arc<dyn Store>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        TokenIssuer {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            validation,
            config,
            store,
        }
    }

    fn mint(&self, user: &User, token_type: TokenType) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let (ttl, key) = match token_type {
            TokenType::Access => (self.config.access_token_expiry, &self.access_encoding),
            TokenType::Refresh => (self.config.refresh_token_expiry, &self.refresh_encoding),
        };

        let claims = Claims {
            sub: user.id,
            iss: self.config.issuer.clone(),
            iat: now,
            exp: now + ttl as i64,
            jti: Uuid::new_v4(),
            role: user.role,
            token_type,
        };

        Ok(encode(&Header::new(Algorithm::HS256), &claims, key)?)
    }

    /// Mint a token pair for `user` and persist the session
    pub async fn issue(&self, user: &User, context: &ClientContext) -> Result<TokenPair, TokenError> {
        let access_token = self.mint(user, TokenType::Access)?;
        let refresh_token = self.mint(user, TokenType::Refresh)?;

        let now = Utc::now();
        let session = Session {
            token: access_token.clone(),
            refresh_token: refresh_token.clone(),
            user_id: user.id,
            ip_address: context.ip_address.clone(),
            user_agent: context.user_agent.clone(),
            expires_at: now + Duration::seconds(self.config.refresh_token_expiry as i64),
            created_at: now,
        };
        self.store.insert_session(&session).await?;

        info!("Issued session for user: {}", user.id);

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.config.access_token_expiry,
        })
    }

    fn verify(&self, token: &str, expected: TokenType) -> Result<Claims, TokenError> {
        let key = match expected {
            TokenType::Access => &self.access_decoding,
            TokenType::Refresh => &self.refresh_decoding,
        };

        let claims = decode::<Claims>(token, key, &self.validation)
            .map_err(|_| TokenError::InvalidOrExpiredToken)?
            .claims;

        // The library accepts exp == now; a token is dead at its expiry instant
        if claims.token_type != expected || claims.exp <= Utc::now().timestamp() {
            return Err(TokenError::InvalidOrExpiredToken);
        }

        Ok(claims)
    }

    /// Validate an access token: signature, issuer and expiry only
    pub fn verify_access(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(token, TokenType::Access)
    }

    /// Validate a refresh token
    pub fn verify_refresh(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(token, TokenType::Refresh)
    }

    /// Live session for an access token, if it has not been revoked or expired
    pub async fn session(&self, token: &str) -> Result<Option<Session>, TokenError> {
        let session = self.store.find_session(token).await?;
        Ok(session.filter(|s| !s.is_expired(Utc::now())))
    }

    /// Delete the session for `token`. Unknown tokens are not an error.
    pub async fn revoke(&self, token: &str) -> Result<bool, TokenError> {
        let removed = self.store.delete_session(token).await?;
        if removed {
            info!("Revoked session");
        }
        Ok(removed)
    }

    /// Get the access token expiry time
    pub fn access_token_expiry(&self) -> u64 {
        self.config.access_token_expiry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RegistrationMethod;
    use crate::store::{MemoryStore, SessionStore};

    fn config() -> JwtConfig {
        JwtConfig {
            access_secret: "access-secret-for-tests".to_string(),
            refresh_secret: "refresh-secret-for-tests".to_string(),
            issuer: "access-tests".to_string(),
            access_token_expiry: 3600,
            refresh_token_expiry: 604_800,
        }
    }

    fn user() -> User {
        User::new_pending(
            Some("a@x.com".to_string()),
            None,
            "A".to_string(),
            RegistrationMethod::Local,
        )
    }

    fn issuer() -> (TokenIssuer, MemoryStore) {
        let store = MemoryStore::new();
        (TokenIssuer::new(config(), Arc::new(store.clone())), store)
    }

    fn forge(exp_offset: i64, token_type: TokenType, secret: &str, issuer: &str) -> String {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: Uuid::new_v4(),
            iss: issuer.to_string(),
            iat: now,
            exp: now + exp_offset,
            jti: Uuid::new_v4(),
            role: Role::User,
            token_type,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn issued_pair_verifies_and_persists_session() {
        let (tokens, store) = issuer();
        let user = user();
        let context = ClientContext {
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: Some("tests".to_string()),
        };

        let pair = tokens.issue(&user, &context).await.unwrap();

        let claims = tokens.verify_access(&pair.access_token).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.iss, "access-tests");
        assert_eq!(tokens.verify_refresh(&pair.refresh_token).unwrap().sub, user.id);

        let session = store.find_session(&pair.access_token).await.unwrap().unwrap();
        assert_eq!(session.user_id, user.id);
        assert_eq!(session.ip_address.as_deref(), Some("10.0.0.1"));
        assert!(session.expires_at > session.created_at);
    }

    #[tokio::test]
    async fn two_pairs_for_same_user_are_distinct_sessions() {
        let (tokens, _) = issuer();
        let user = user();
        let first = tokens.issue(&user, &ClientContext::default()).await.unwrap();
        let second = tokens.issue(&user, &ClientContext::default()).await.unwrap();
        assert_ne!(first.access_token, second.access_token);
    }

    #[test]
    fn expired_token_is_rejected() {
        let (tokens, _) = issuer();
        let token = forge(-10, TokenType::Access, "access-secret-for-tests", "access-tests");
        assert!(matches!(
            tokens.verify_access(&token),
            Err(TokenError::InvalidOrExpiredToken)
        ));
    }

    #[test]
    fn token_at_expiry_instant_is_rejected() {
        let (tokens, _) = issuer();
        let token = forge(0, TokenType::Access, "access-secret-for-tests", "access-tests");
        assert!(tokens.verify_access(&token).is_err());
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let (tokens, _) = issuer();
        let token = forge(60, TokenType::Refresh, "access-secret-for-tests", "access-tests");
        assert!(tokens.verify_access(&token).is_err());
    }

    #[test]
    fn wrong_secret_or_issuer_is_rejected() {
        let (tokens, _) = issuer();
        let wrong_secret = forge(60, TokenType::Access, "someone-else", "access-tests");
        assert!(tokens.verify_access(&wrong_secret).is_err());

        let wrong_issuer = forge(60, TokenType::Access, "access-secret-for-tests", "other");
        assert!(tokens.verify_access(&wrong_issuer).is_err());
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let (tokens, _) = issuer();
        let pair = tokens.issue(&user(), &ClientContext::default()).await.unwrap();

        assert!(tokens.revoke(&pair.access_token).await.unwrap());
        assert!(!tokens.revoke(&pair.access_token).await.unwrap());
        assert!(!tokens.revoke("never-issued").await.unwrap());
        assert!(tokens.session(&pair.access_token).await.unwrap().is_none());
    }
}
