//! Account service: signup, credential login and the lifecycle state machine

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{
    AccountStatus, OtpChannel, PaymentStatus, RegistrationMethod, Role, User, UserFilter,
};
use crate::store::{Store, StoreError};
use crate::validation::{
    normalize_email, normalize_phone, validate_email, validate_full_name, validate_password,
    validate_phone,
};

/// Compare-and-set retries before a status change gives up
const STATUS_CAS_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account is suspended")]
    Suspended,

    #[error("account not found")]
    NotFound,

    #[error("cannot move account from {from} to {to}")]
    InvalidTransition {
        from: AccountStatus,
        to: AccountStatus,
    },

    #[error("{0}")]
    Forbidden(String),

    #[error("password hashing failed: {0}")]
    PasswordHash(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for AccountError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(constraint) => AccountError::Conflict(conflict_message(&constraint)),
            other => AccountError::Store(other),
        }
    }
}

fn conflict_message(constraint: &str) -> String {
    if constraint.contains("email") {
        "Email is already registered".to_string()
    } else if constraint.contains("phone") {
        "Phone number is already registered".to_string()
    } else {
        "Account already exists".to_string()
    }
}

/// Self-service signup payload
#[derive(Debug, Clone, Deserialize)]
pub struct SignupInput {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: String,
    pub full_name: String,
}

/// Admin provisioning payload
#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionInput {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub full_name: String,
    pub password: Option<String>,
    #[serde(default = "default_role")]
    pub role: Role,
}

/// Admin edit of an account; at least one field is required
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountUpdate {
    pub account_status: Option<AccountStatus>,
    pub role: Option<Role>,
}

fn default_role() -> Role {
    Role::User
}

/// Reject accounts that may not act: deleted reads as missing, suspended is forbidden
pub fn ensure_in_good_standing(user: &User) -> Result<(), AccountError> {
    match user.account_status {
        AccountStatus::Deleted => Err(AccountError::NotFound),
        AccountStatus::Suspended => Err(AccountError::Suspended),
        _ => Ok(()),
    }
}

fn ensure_can_assign_role(actor: &User, id: Uuid) -> Result<(), AccountError> {
    if actor.role != Role::SuperAdmin {
        return Err(AccountError::Forbidden(
            "Only a super-admin can change roles".to_string(),
        ));
    }
    if actor.id == id {
        return Err(AccountError::Forbidden(
            "You cannot change your own role".to_string(),
        ));
    }
    Ok(())
}

fn hash_password(password: &str) -> Result<String, AccountError> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AccountError::PasswordHash(e.to_string()))
}

fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!("Stored password hash is unreadable: {}", e);
            false
        }
    }
}

/// Normalize and validate an optional email/phone pair; at least one is required
fn identifiers(
    email: Option<&str>,
    phone: Option<&str>,
) -> Result<(Option<String>, Option<String>), AccountError> {
    let email = email
        .map(normalize_email)
        .filter(|e| !e.is_empty());
    let phone = phone
        .map(normalize_phone)
        .filter(|p| !p.is_empty());

    if email.is_none() && phone.is_none() {
        return Err(AccountError::Validation(
            "Either email or phone is required".to_string(),
        ));
    }
    if let Some(email) = &email {
        validate_email(email).map_err(AccountError::Validation)?;
    }
    if let Some(phone) = &phone {
        validate_phone(phone).map_err(AccountError::Validation)?;
    }

    Ok((email, phone))
}

/// Account service
#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn Store>,
}

impl AccountService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create a local account in `PENDING_PAYMENT`
    pub async fn signup(&self, input: SignupInput) -> Result<User, AccountError> {
        let (email, phone) = identifiers(input.email.as_deref(), input.phone.as_deref())?;
        validate_password(&input.password).map_err(AccountError::Validation)?;
        validate_full_name(&input.full_name).map_err(AccountError::Validation)?;

        let mut user = User::new_pending(
            email,
            phone,
            input.full_name.trim().to_string(),
            RegistrationMethod::Local,
        );
        user.password_hash = Some(hash_password(&input.password)?);

        self.store.insert_user(&user).await?;
        info!("Created account: {}", user.id);

        Ok(user)
    }

    /// Check email and password, then record the login
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<User, AccountError> {
        let email = normalize_email(email);
        let mut user = self
            .store
            .find_user_by_email(&email)
            .await?
            .ok_or(AccountError::InvalidCredentials)?;

        if user.is_deleted() {
            return Err(AccountError::NotFound);
        }

        // OAuth-only accounts have no password to match
        let matches = user
            .password_hash
            .as_deref()
            .is_some_and(|hash| verify_password(hash, password));
        if !matches {
            warn!("Failed login for account: {}", user.id);
            return Err(AccountError::InvalidCredentials);
        }

        ensure_in_good_standing(&user)?;

        let now = Utc::now();
        self.store.record_login(user.id, now).await?;
        user.last_login = Some(now);

        Ok(user)
    }

    /// Live, non-deleted account by id
    pub async fn find_by_id(&self, id: Uuid) -> Result<User, AccountError> {
        self.store
            .find_user_by_id(id)
            .await?
            .filter(|u| !u.is_deleted())
            .ok_or(AccountError::NotFound)
    }

    /// Non-deleted account bound to an email or phone identifier
    pub async fn find_by_identifier(
        &self,
        identifier: &str,
        channel: OtpChannel,
    ) -> Result<Option<User>, AccountError> {
        let user = match channel {
            OtpChannel::Email => self.store.find_user_by_email(identifier).await?,
            OtpChannel::Sms => self.store.find_user_by_phone(identifier).await?,
        };
        Ok(user.filter(|u| !u.is_deleted()))
    }

    /// Admin read that still returns deleted accounts
    pub async fn find_for_audit(&self, id: Uuid) -> Result<User, AccountError> {
        self.store
            .find_user_by_id(id)
            .await?
            .ok_or(AccountError::NotFound)
    }

    pub async fn list(&self, filter: &UserFilter) -> Result<Vec<User>, AccountError> {
        Ok(self.store.list_users(filter).await?)
    }

    pub async fn record_login(&self, user_id: Uuid) -> Result<(), AccountError> {
        Ok(self.store.record_login(user_id, Utc::now()).await?)
    }

    pub async fn mark_identifier_verified(
        &self,
        user_id: Uuid,
        channel: OtpChannel,
    ) -> Result<(), AccountError> {
        Ok(self.store.mark_verified(user_id, channel).await?)
    }

    /// Administrative status change through the lifecycle state machine
    pub async fn change_status(&self, id: Uuid, next: AccountStatus) -> Result<User, AccountError> {
        for _ in 0..STATUS_CAS_ATTEMPTS {
            let user = self.find_for_audit(id).await?;
            if !user.can_move_to(next) {
                return Err(AccountError::InvalidTransition {
                    from: user.account_status,
                    to: next,
                });
            }

            if let Some(updated) = self
                .store
                .compare_and_set_status(id, user.account_status, next)
                .await?
            {
                info!(
                    "Account {} moved from {} to {}",
                    id, user.account_status, next
                );
                return Ok(updated);
            }
        }

        Err(AccountError::Conflict(
            "Account changed concurrently, retry".to_string(),
        ))
    }

    /// Role changes are reserved to super-admins and never apply to oneself
    pub async fn set_role(&self, actor: &User, id: Uuid, role: Role) -> Result<User, AccountError> {
        ensure_can_assign_role(actor, id)?;

        let user = self
            .store
            .set_role(id, role)
            .await?
            .ok_or(AccountError::NotFound)?;
        info!("Account {} role set to {}", id, role.as_str());

        Ok(user)
    }

    /// Apply an admin edit. Both changes are checked before either is
    /// written, so a rejected status change leaves the role untouched.
    pub async fn update(
        &self,
        actor: &User,
        id: Uuid,
        update: AccountUpdate,
    ) -> Result<User, AccountError> {
        if update.account_status.is_none() && update.role.is_none() {
            return Err(AccountError::Validation(
                "Nothing to update: provide account_status or role".to_string(),
            ));
        }
        if update.role.is_some() {
            ensure_can_assign_role(actor, id)?;
        }

        let mut user = self.find_for_audit(id).await?;
        if let Some(next) = update.account_status {
            if !user.can_move_to(next) {
                return Err(AccountError::InvalidTransition {
                    from: user.account_status,
                    to: next,
                });
            }
            user = self.change_status(id, next).await?;
        }
        if let Some(role) = update.role {
            user = self.set_role(actor, id, role).await?;
        }

        Ok(user)
    }

    /// Admin-created account: active, paid and verified from the start
    pub async fn provision(&self, input: ProvisionInput) -> Result<User, AccountError> {
        let (email, phone) = identifiers(input.email.as_deref(), input.phone.as_deref())?;
        validate_full_name(&input.full_name).map_err(AccountError::Validation)?;

        let password_hash = match input.password.as_deref() {
            Some(password) => {
                validate_password(password).map_err(AccountError::Validation)?;
                Some(hash_password(password)?)
            }
            None => None,
        };

        let now = Utc::now();
        let mut user = User::new_pending(
            email,
            phone,
            input.full_name.trim().to_string(),
            RegistrationMethod::Admin,
        );
        user.password_hash = password_hash;
        user.role = input.role;
        user.email_verified = user.email.is_some();
        user.phone_verified = user.phone.is_some();
        user.account_status = AccountStatus::Active;
        user.payment_status = PaymentStatus::Completed;
        user.payment_completed_at = Some(now);

        self.store.insert_user(&user).await?;
        info!("Provisioned account: {}", user.id);

        Ok(user)
    }
}
