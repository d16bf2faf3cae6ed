//! User model and the account lifecycle state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::UnknownVariant;

/// Privilege level of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    /// Admin and super-admin may use the admin surface
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            "super_admin" => Ok(Role::SuperAdmin),
            other => Err(UnknownVariant::new("role", other)),
        }
    }
}

/// Account lifecycle state
///
/// `PendingPayment` is the initial state. `Deleted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    PendingPayment,
    Active,
    Suspended,
    Deleted,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::PendingPayment => "PENDING_PAYMENT",
            AccountStatus::Active => "ACTIVE",
            AccountStatus::Suspended => "SUSPENDED",
            AccountStatus::Deleted => "DELETED",
        }
    }

    /// Whether the state machine has an edge from `self` to `next`.
    ///
    /// Payment requirements on `Active` are checked by [`User::can_move_to`].
    pub fn can_transition_to(self, next: AccountStatus) -> bool {
        use AccountStatus::*;

        match (self, next) {
            (Deleted, _) => false,
            (_, Deleted) => true,
            (Suspended, Suspended) => false,
            (_, Suspended) => true,
            (PendingPayment, Active) => true,
            (Suspended, Active) | (Suspended, PendingPayment) => true,
            _ => false,
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING_PAYMENT" => Ok(AccountStatus::PendingPayment),
            "ACTIVE" => Ok(AccountStatus::Active),
            "SUSPENDED" => Ok(AccountStatus::Suspended),
            "DELETED" => Ok(AccountStatus::Deleted),
            other => Err(UnknownVariant::new("account status", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            other => Err(UnknownVariant::new("payment status", other)),
        }
    }
}

/// How the account first came into existence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationMethod {
    Local,
    External,
    Admin,
}

impl RegistrationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationMethod::Local => "local",
            RegistrationMethod::External => "external",
            RegistrationMethod::Admin => "admin",
        }
    }
}

impl FromStr for RegistrationMethod {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(RegistrationMethod::Local),
            "external" => Ok(RegistrationMethod::External),
            "admin" => Ok(RegistrationMethod::Admin),
            other => Err(UnknownVariant::new("registration method", other)),
        }
    }
}

/// User entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub full_name: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub external_id: Option<String>,
    pub avatar_url: Option<String>,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub role: Role,
    pub account_status: AccountStatus,
    pub payment_status: PaymentStatus,
    pub registration_method: RegistrationMethod,
    pub payment_completed_at: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// A fresh account awaiting payment
    pub fn new_pending(
        email: Option<String>,
        phone: Option<String>,
        full_name: String,
        registration_method: RegistrationMethod,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email,
            phone,
            full_name,
            password_hash: None,
            external_id: None,
            avatar_url: None,
            email_verified: false,
            phone_verified: false,
            role: Role::User,
            account_status: AccountStatus::PendingPayment,
            payment_status: PaymentStatus::Pending,
            registration_method,
            payment_completed_at: None,
            last_login: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.account_status == AccountStatus::Deleted
    }

    pub fn has_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Completed
    }

    /// Whether an administrative status change to `next` keeps every
    /// account invariant intact.
    pub fn can_move_to(&self, next: AccountStatus) -> bool {
        if !self.account_status.can_transition_to(next) {
            return false;
        }
        match next {
            AccountStatus::Active => self.has_paid(),
            AccountStatus::PendingPayment => !self.has_paid(),
            _ => true,
        }
    }

    /// Apply the payment-driven transition to `Active`.
    ///
    /// Returns false when nothing changed. Suspended and deleted accounts
    /// keep their status but still record the completed payment.
    pub fn apply_payment(&mut self, at: DateTime<Utc>) -> bool {
        let already = self.has_paid() && self.account_status != AccountStatus::PendingPayment;
        self.payment_status = PaymentStatus::Completed;
        if self.payment_completed_at.is_none() {
            self.payment_completed_at = Some(at);
        }
        if self.account_status == AccountStatus::PendingPayment {
            self.account_status = AccountStatus::Active;
        }
        if !already {
            self.updated_at = at;
        }
        !already
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile::from(self)
    }
}

/// Public projection of a user, safe to return to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub full_name: String,
    pub avatar_url: Option<String>,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub role: Role,
    pub account_status: AccountStatus,
    pub payment_status: PaymentStatus,
    pub registration_method: RegistrationMethod,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            phone: user.phone.clone(),
            full_name: user.full_name.clone(),
            avatar_url: user.avatar_url.clone(),
            email_verified: user.email_verified,
            phone_verified: user.phone_verified,
            role: user.role,
            account_status: user.account_status,
            payment_status: user.payment_status,
            registration_method: user.registration_method,
            last_login: user.last_login,
            created_at: user.created_at,
        }
    }
}

/// Admin listing filter
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserFilter {
    pub account_status: Option<AccountStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub role: Option<Role>,
    /// Case-insensitive match on email, phone or full name
    pub search: Option<String>,
    #[serde(default)]
    pub include_deleted: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl UserFilter {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 200)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    pub fn matches(&self, user: &User) -> bool {
        if user.is_deleted() && !self.include_deleted {
            return false;
        }
        if self.account_status.is_some_and(|s| s != user.account_status) {
            return false;
        }
        if self.payment_status.is_some_and(|s| s != user.payment_status) {
            return false;
        }
        if self.role.is_some_and(|r| r != user.role) {
            return false;
        }
        match self.search.as_deref().map(str::to_lowercase) {
            Some(needle) => [user.email.as_deref(), user.phone.as_deref(), Some(user.full_name.as_str())]
                .into_iter()
                .flatten()
                .any(|field| field.to_lowercase().contains(&needle)),
            None => true,
        }
    }
}
