//! External identity: Google ID-token verification and account linking

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header, jwk::JwkSet};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::jwt::{ClientContext, TokenError, TokenIssuer, TokenPair};
use crate::models::{AccountStatus, RegistrationMethod, User, UserProfile};
use crate::oauth::GoogleConfig;
use crate::store::{Store, StoreError};
use crate::validation::normalize_email;

const JWKS_TTL: Duration = Duration::from_secs(3600);
const GOOGLE_ISSUERS: &[&str] = &["accounts.google.com", "https://accounts.google.com"];
const LINK_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid assertion: {0}")]
    InvalidAssertion(String),

    #[error("identity provider unavailable: {0}")]
    Unavailable(String),

    #[error("email is linked to a different external account")]
    AlreadyLinked,

    #[error("account is suspended")]
    Suspended,

    #[error("account is deleted")]
    Deleted,

    #[error("concurrent linking did not settle")]
    Contention,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Normalized third-party identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub external_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub email_verified: bool,
}

/// Validates a third-party identity assertion
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify_assertion(&self, token: &str) -> Result<ExternalIdentity, IdentityError>;
}

#[derive(Debug, Deserialize)]
struct GoogleIdClaims {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    name: Option<String>,
    picture: Option<String>,
}

struct CachedKeys {
    keys: JwkSet,
    fetched_at: Instant,
}

/// Verifies Google ID tokens against Google's published signing keys
pub struct GoogleIdTokenVerifier {
    client: reqwest::Client,
    client_id: String,
    certs_url: String,
    keys: RwLock<Option<CachedKeys>>,
}

impl GoogleIdTokenVerifier {
    pub fn new(config: &GoogleConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            client_id: config.client_id.clone(),
            certs_url: config.certs_url.clone(),
            keys: RwLock::new(None),
        }
    }

    async fn fetch_keys(&self) -> Result<JwkSet, IdentityError> {
        let response = self
            .client
            .get(&self.certs_url)
            .send()
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(IdentityError::Unavailable(format!(
                "certs endpoint returned {}",
                response.status()
            )));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))
    }

    /// Key for `kid`, refreshing the cached set when stale or missing the key
    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, IdentityError> {
        {
            let cache = self.keys.read().await;
            if let Some(cached) = cache.as_ref().filter(|c| c.fetched_at.elapsed() < JWKS_TTL) {
                if let Some(jwk) = cached.keys.find(kid) {
                    return DecodingKey::from_jwk(jwk)
                        .map_err(|e| IdentityError::InvalidAssertion(e.to_string()));
                }
            }
        }

        let keys = self.fetch_keys().await?;
        let key = keys.find(kid).map(DecodingKey::from_jwk);
        *self.keys.write().await = Some(CachedKeys {
            keys,
            fetched_at: Instant::now(),
        });

        match key {
            Some(key) => key.map_err(|e| IdentityError::InvalidAssertion(e.to_string())),
            None => Err(IdentityError::InvalidAssertion(
                "unknown signing key".to_string(),
            )),
        }
    }
}

#[async_trait]
impl IdentityVerifier for GoogleIdTokenVerifier {
    async fn verify_assertion(&self, token: &str) -> Result<ExternalIdentity, IdentityError> {
        let header =
            decode_header(token).map_err(|e| IdentityError::InvalidAssertion(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| IdentityError::InvalidAssertion("missing key id".to_string()))?;

        let key = self.decoding_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.set_issuer(GOOGLE_ISSUERS);

        let claims = decode::<GoogleIdClaims>(token, &key, &validation)
            .map_err(|e| IdentityError::InvalidAssertion(e.to_string()))?
            .claims;

        Ok(ExternalIdentity {
            external_id: claims.sub,
            email: claims.email,
            name: claims.name,
            avatar_url: claims.picture,
            email_verified: claims.email_verified,
        })
    }
}

/// Result of an external login
#[derive(Debug, Clone, Serialize)]
pub struct LinkedLogin {
    pub user: UserProfile,
    #[serde(flatten)]
    pub tokens: TokenPair,
    /// True when this login created the account
    pub created: bool,
}

fn ensure_usable(user: &User) -> Result<(), IdentityError> {
    match user.account_status {
        AccountStatus::Deleted => Err(IdentityError::Deleted),
        AccountStatus::Suspended => Err(IdentityError::Suspended),
        _ => Ok(()),
    }
}

/// Maps external identities onto accounts
#[derive(Clone)]
pub struct IdentityLinker {
    store: Arc<dyn Store>,
    tokens: TokenIssuer,
}

impl IdentityLinker {
    pub fn new(store: Arc<dyn Store>, tokens: TokenIssuer) -> Self {
        Self { store, tokens }
    }

    /// Resolve the identity to exactly one account, then issue tokens.
    ///
    /// Lookup by external id, then by email (binding the identity), then
    /// create. A uniqueness conflict on link or create means a concurrent
    /// request won; the loop retries as a lookup.
    pub async fn login_or_link(
        &self,
        identity: &ExternalIdentity,
        context: &ClientContext,
    ) -> Result<LinkedLogin, IdentityError> {
        let email = identity
            .email
            .as_deref()
            .map(normalize_email)
            .ok_or_else(|| IdentityError::InvalidAssertion("identity has no email".to_string()))?;

        for _ in 0..LINK_ATTEMPTS {
            if let Some(user) = self
                .store
                .find_user_by_external_id(&identity.external_id)
                .await?
            {
                return self.finish(user, false, context).await;
            }

            if let Some(user) = self.store.find_user_by_email(&email).await? {
                ensure_usable(&user)?;
                if user
                    .external_id
                    .as_deref()
                    .is_some_and(|bound| bound != identity.external_id)
                {
                    return Err(IdentityError::AlreadyLinked);
                }
                if !identity.email_verified {
                    return Err(IdentityError::InvalidAssertion(
                        "provider has not verified this email".to_string(),
                    ));
                }

                match self
                    .store
                    .link_external_identity(
                        user.id,
                        &identity.external_id,
                        identity.avatar_url.as_deref(),
                    )
                    .await
                {
                    Ok(linked) => {
                        info!("Linked external identity to account: {}", linked.id);
                        return self.finish(linked, false, context).await;
                    }
                    Err(StoreError::Conflict(_)) => continue,
                    Err(e) => return Err(e.into()),
                }
            }

            if !identity.email_verified {
                return Err(IdentityError::InvalidAssertion(
                    "provider has not verified this email".to_string(),
                ));
            }

            let full_name = identity
                .name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| email.split('@').next().unwrap_or("User").to_string());

            let mut user = User::new_pending(
                Some(email.clone()),
                None,
                full_name,
                RegistrationMethod::External,
            );
            user.external_id = Some(identity.external_id.clone());
            user.avatar_url = identity.avatar_url.clone();
            user.email_verified = true;

            match self.store.insert_user(&user).await {
                Ok(()) => {
                    info!("Created account from external identity: {}", user.id);
                    return self.finish(user, true, context).await;
                }
                Err(StoreError::Conflict(constraint)) => {
                    warn!("External signup raced on {}, retrying as lookup", constraint);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(IdentityError::Contention)
    }

    async fn finish(
        &self,
        mut user: User,
        created: bool,
        context: &ClientContext,
    ) -> Result<LinkedLogin, IdentityError> {
        ensure_usable(&user)?;

        let now = Utc::now();
        self.store.record_login(user.id, now).await?;
        user.last_login = Some(now);

        let tokens = self.tokens.issue(&user, context).await?;

        Ok(LinkedLogin {
            user: user.profile(),
            tokens,
            created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::JwtConfig;
    use crate::models::PaymentStatus;
    use crate::store::{AccountStore, MemoryStore};

    fn linker() -> (IdentityLinker, MemoryStore) {
        let store = MemoryStore::new();
        let tokens = TokenIssuer::new(
            JwtConfig {
                access_secret: "a".to_string(),
                refresh_secret: "r".to_string(),
                issuer: "tests".to_string(),
                access_token_expiry: 3600,
                refresh_token_expiry: 7200,
            },
            Arc::new(store.clone()),
        );
        (IdentityLinker::new(Arc::new(store.clone()), tokens), store)
    }

    fn identity(sub: &str, email: &str) -> ExternalIdentity {
        ExternalIdentity {
            external_id: sub.to_string(),
            email: Some(email.to_string()),
            name: Some("Google User".to_string()),
            avatar_url: Some("https://example.com/a.png".to_string()),
            email_verified: true,
        }
    }

    #[tokio::test]
    async fn first_login_creates_pending_account() {
        let (linker, store) = linker();
        let login = linker
            .login_or_link(&identity("g-1", "a@x.com"), &ClientContext::default())
            .await
            .unwrap();

        assert!(login.created);
        let user = store.find_user_by_external_id("g-1").await.unwrap().unwrap();
        assert_eq!(user.account_status, AccountStatus::PendingPayment);
        assert_eq!(user.registration_method, RegistrationMethod::External);
        assert!(user.email_verified);
    }

    #[tokio::test]
    async fn unverified_email_never_creates_an_account() {
        let (linker, store) = linker();
        let unverified = ExternalIdentity {
            email_verified: false,
            ..identity("g-1", "a@x.com")
        };

        assert!(matches!(
            linker.login_or_link(&unverified, &ClientContext::default()).await,
            Err(IdentityError::InvalidAssertion(_))
        ));
        assert!(store.find_user_by_external_id("g-1").await.unwrap().is_none());
        assert!(store.find_user_by_email("a@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_login_reuses_account() {
        let (linker, _) = linker();
        let ctx = ClientContext::default();
        let first = linker.login_or_link(&identity("g-1", "a@x.com"), &ctx).await.unwrap();
        let second = linker.login_or_link(&identity("g-1", "a@x.com"), &ctx).await.unwrap();

        assert!(!second.created);
        assert_eq!(first.user.id, second.user.id);
    }

    #[tokio::test]
    async fn existing_email_account_is_linked_without_touching_payment() {
        let (linker, store) = linker();
        let mut existing = User::new_pending(
            Some("a@x.com".to_string()),
            None,
            "A".to_string(),
            RegistrationMethod::Local,
        );
        existing.apply_payment(Utc::now());
        store.insert_user(&existing).await.unwrap();

        let login = linker
            .login_or_link(&identity("g-1", "A@X.com"), &ClientContext::default())
            .await
            .unwrap();

        assert!(!login.created);
        assert_eq!(login.user.id, existing.id);
        assert_eq!(login.user.account_status, AccountStatus::Active);
        assert_eq!(login.user.payment_status, PaymentStatus::Completed);
        assert!(login.user.email_verified);
    }

    #[tokio::test]
    async fn email_bound_to_other_identity_is_rejected() {
        let (linker, _) = linker();
        let ctx = ClientContext::default();
        linker.login_or_link(&identity("g-1", "a@x.com"), &ctx).await.unwrap();

        assert!(matches!(
            linker.login_or_link(&identity("g-2", "a@x.com"), &ctx).await,
            Err(IdentityError::AlreadyLinked)
        ));
    }

    #[tokio::test]
    async fn suspended_account_cannot_login() {
        let (linker, store) = linker();
        let ctx = ClientContext::default();
        let login = linker.login_or_link(&identity("g-1", "a@x.com"), &ctx).await.unwrap();
        store
            .compare_and_set_status(login.user.id, AccountStatus::PendingPayment, AccountStatus::Suspended)
            .await
            .unwrap();

        assert!(matches!(
            linker.login_or_link(&identity("g-1", "a@x.com"), &ctx).await,
            Err(IdentityError::Suspended)
        ));
    }
}
