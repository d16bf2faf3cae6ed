//! Storage ports
//!
//! Every component talks to persistence through these traits. The Postgres
//! adapter is used in production; the in-memory adapter backs tests and
//! local development. Each method is a single logical operation: adapters
//! must make it atomic with respect to concurrent callers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AccountStatus, CaptureOutcome, ChallengeVerdict, OrderCapture, OrderKey, OtpChallenge,
    OtpChannel, PaymentOrder, Role, Session, SupportTicket, TicketFilter, TicketUpdate,
    UnknownVariant, User, UserFilter,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write
    #[error("conflict: {0}")]
    Conflict(String),

    /// The row a write targets does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A stored value could not be decoded
    #[error("corrupt row: {0}")]
    Corrupt(#[from] UnknownVariant),

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                let constraint = db.constraint().unwrap_or("unique constraint").to_string();
                return StoreError::Conflict(constraint);
            }
        }
        StoreError::Database(err)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a new user. Fails with `Conflict` when the email, phone or
    /// external id is already bound to another row.
    async fn insert_user(&self, user: &User) -> StoreResult<()>;

    /// Raw lookups. Deleted users are returned; callers filter.
    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_phone(&self, phone: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_external_id(&self, external_id: &str) -> StoreResult<Option<User>>;

    /// Bind an external identity to an account that has none (or already
    /// has this one), marking the email verified. `Conflict` otherwise.
    async fn link_external_identity(
        &self,
        user_id: Uuid,
        external_id: &str,
        avatar_url: Option<&str>,
    ) -> StoreResult<User>;

    async fn record_login(&self, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    async fn mark_verified(&self, user_id: Uuid, channel: OtpChannel) -> StoreResult<()>;

    /// Compare-and-set on the lifecycle status. Returns `None` when the
    /// current status is no longer `expected`.
    async fn compare_and_set_status(
        &self,
        user_id: Uuid,
        expected: AccountStatus,
        next: AccountStatus,
    ) -> StoreResult<Option<User>>;

    async fn set_role(&self, user_id: Uuid, role: Role) -> StoreResult<Option<User>>;

    async fn list_users(&self, filter: &UserFilter) -> StoreResult<Vec<User>>;
}

#[async_trait]
pub trait OtpStore: Send + Sync {
    /// Upsert keyed by identifier: the new challenge fully replaces any
    /// previous one, with attempts reset and the verified flag cleared.
    async fn replace_challenge(&self, challenge: &OtpChallenge) -> StoreResult<()>;

    /// Evaluate and record one verification attempt under a row lock.
    /// Returns `None` when no challenge exists for the identifier.
    async fn verify_challenge(
        &self,
        identifier: &str,
        submitted: &str,
        now: DateTime<Utc>,
        max_attempts: i32,
    ) -> StoreResult<Option<ChallengeVerdict>>;

    async fn purge_expired_challenges(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &Session) -> StoreResult<()>;
    async fn find_session(&self, token: &str) -> StoreResult<Option<Session>>;
    /// Returns whether a session was removed
    async fn delete_session(&self, token: &str) -> StoreResult<bool>;
    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert_order(&self, order: &PaymentOrder) -> StoreResult<()>;
    async fn find_order(&self, key: &OrderKey) -> StoreResult<Option<PaymentOrder>>;
    async fn list_orders_for_user(&self, user_id: Uuid) -> StoreResult<Vec<PaymentOrder>>;
    async fn has_captured_order(&self, user_id: Uuid) -> StoreResult<bool>;

    /// Mark an order failed unless it is already captured. Returns the
    /// order as it stands afterwards, or `None` if it does not exist.
    async fn mark_order_failed(
        &self,
        key: &OrderKey,
        error_description: &str,
    ) -> StoreResult<Option<PaymentOrder>>;

    /// Capture the order and activate its owner as one unit. A second
    /// capture of the same order observes `AlreadyCaptured` and changes
    /// nothing. Fails with `NotFound` when the order does not exist.
    async fn capture_order(&self, capture: &OrderCapture) -> StoreResult<CaptureOutcome>;
}

#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn insert_ticket(&self, ticket: &SupportTicket) -> StoreResult<()>;
    async fn list_tickets(&self, filter: &TicketFilter) -> StoreResult<Vec<SupportTicket>>;
    async fn update_ticket(
        &self,
        id: Uuid,
        update: &TicketUpdate,
    ) -> StoreResult<Option<SupportTicket>>;
}

/// Everything the service persists
pub trait Store: AccountStore + OtpStore + SessionStore + PaymentStore + TicketStore {}

impl<T> Store for T where T: AccountStore + OtpStore + SessionStore + PaymentStore + TicketStore {}
