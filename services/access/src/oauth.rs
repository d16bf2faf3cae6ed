//! Redirect-based Google sign-in (authorization code flow with PKCE)
//!
//! The pending flow (CSRF state and PKCE verifier) is parked in Redis for
//! ten minutes and consumed exactly once by the callback.

use anyhow::Result;
use chrono::Utc;
use common::cache::RedisPool;
use common::error::CacheError;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, Scope, TokenResponse, TokenUrl, basic::BasicClient,
};
use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;
use tracing::info;

use crate::config::required_var;
use crate::identity::ExternalIdentity;

const STATE_TTL_SECONDS: u64 = 600;
const SCOPES: &[&str] = &["openid", "email", "profile"];

/// Google OAuth configuration
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub certs_url: String,
}

impl GoogleConfig {
    /// # Environment Variables
    /// - `GOOGLE_CLIENT_ID`: OAuth client id, also the expected ID-token audience (required)
    /// - `GOOGLE_CLIENT_SECRET`: OAuth client secret (required)
    /// - `GOOGLE_REDIRECT_URL`: Callback URL (default: http://localhost:3000/auth/google/callback)
    pub fn from_env() -> Result<Self> {
        Ok(GoogleConfig {
            client_id: required_var("GOOGLE_CLIENT_ID")?,
            client_secret: required_var("GOOGLE_CLIENT_SECRET")?,
            redirect_url: env::var("GOOGLE_REDIRECT_URL")
                .unwrap_or_else(|_| "http://localhost:3000/auth/google/callback".to_string()),
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            userinfo_url: "https://www.googleapis.com/oauth2/v2/userinfo".to_string(),
            certs_url: "https://www.googleapis.com/oauth2/v3/certs".to_string(),
        })
    }
}

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("invalid or expired state")]
    InvalidState,

    #[error("code exchange failed: {0}")]
    Exchange(String),

    #[error("profile fetch failed: {0}")]
    Profile(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("oauth misconfigured: {0}")]
    Configuration(String),
}

/// Pending authorization parked in Redis
#[derive(Debug, Serialize, Deserialize)]
struct PendingAuthorization {
    pkce_verifier: String,
    created_at: i64,
}

/// Google userinfo response
#[derive(Debug, Deserialize)]
struct GoogleUser {
    id: String,
    email: Option<String>,
    #[serde(default)]
    verified_email: bool,
    name: Option<String>,
    picture: Option<String>,
}

fn state_key(csrf: &str) -> String {
    format!("oauth_state:{}", csrf)
}

/// Google OAuth2 client wrapper
#[derive(Clone)]
pub struct GoogleOAuth {
    client: BasicClient,
    http: reqwest::Client,
    userinfo_url: String,
    redis: RedisPool,
}

impl GoogleOAuth {
    pub fn new(config: &GoogleConfig, redis: RedisPool) -> Result<Self, OAuthError> {
        let invalid = |e: oauth2::url::ParseError| OAuthError::Configuration(e.to_string());

        let client = BasicClient::new(
            ClientId::new(config.client_id.clone()),
            Some(ClientSecret::new(config.client_secret.clone())),
            AuthUrl::new(config.auth_url.clone()).map_err(invalid)?,
            Some(TokenUrl::new(config.token_url.clone()).map_err(invalid)?),
        )
        .set_redirect_uri(RedirectUrl::new(config.redirect_url.clone()).map_err(invalid)?);

        Ok(Self {
            client,
            http: reqwest::Client::new(),
            userinfo_url: config.userinfo_url.clone(),
            redis,
        })
    }

    /// Build the consent URL and park the PKCE verifier under its state
    pub async fn authorization_url(&self) -> Result<String, OAuthError> {
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let mut request = self
            .client
            .authorize_url(CsrfToken::new_random)
            .set_pkce_challenge(pkce_challenge);
        for scope in SCOPES {
            request = request.add_scope(Scope::new(scope.to_string()));
        }
        let (auth_url, csrf_token) = request.url();

        let pending = PendingAuthorization {
            pkce_verifier: pkce_verifier.secret().clone(),
            created_at: Utc::now().timestamp(),
        };
        self.redis
            .set_json(&state_key(csrf_token.secret()), &pending, STATE_TTL_SECONDS)
            .await?;

        info!("Generated Google authorization URL");
        Ok(auth_url.to_string())
    }

    /// Consume the state, exchange the code and fetch the user's profile
    pub async fn complete(&self, code: &str, state: &str) -> Result<ExternalIdentity, OAuthError> {
        let pending: PendingAuthorization = self
            .redis
            .take_json(&state_key(state))
            .await?
            .ok_or(OAuthError::InvalidState)?;

        let token = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(pending.pkce_verifier))
            .request_async(oauth2::reqwest::async_http_client)
            .await
            .map_err(|e| OAuthError::Exchange(e.to_string()))?;

        let response = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(token.access_token().secret())
            .send()
            .await
            .map_err(|e| OAuthError::Profile(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OAuthError::Profile(format!(
                "userinfo returned {}",
                response.status()
            )));
        }

        let google_user: GoogleUser = response
            .json()
            .await
            .map_err(|e| OAuthError::Profile(e.to_string()))?;

        Ok(ExternalIdentity {
            external_id: google_user.id,
            email: google_user.email,
            name: google_user.name,
            avatar_url: google_user.picture,
            email_verified: google_user.verified_email,
        })
    }
}
