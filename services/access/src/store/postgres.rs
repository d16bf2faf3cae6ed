//! PostgreSQL storage adapter

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use tracing::info;
use uuid::Uuid;

use super::{
    AccountStore, OtpStore, PaymentStore, SessionStore, StoreError, StoreResult, TicketStore,
};
use crate::models::{
    AccountStatus, CaptureOutcome, ChallengeVerdict, OrderCapture, OrderKey, OtpChallenge,
    OtpChannel, PaymentOrder, Role, Session, SupportTicket, TicketFilter, TicketUpdate, User,
    UserFilter,
};

const USER_COLUMNS: &str = "id, email, phone, full_name, password_hash, external_id, avatar_url, \
     email_verified, phone_verified, role, account_status, payment_status, registration_method, \
     payment_completed_at, last_login, created_at, updated_at";

const ORDER_COLUMNS: &str = "id, user_id, amount, currency, status, gateway_order_id, \
     gateway_payment_id, gateway_signature, error_description, created_at, updated_at, captured_at";

const TICKET_COLUMNS: &str =
    "id, user_id, subject, message, status, admin_note, created_at, updated_at";

/// Postgres-backed store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> Result<(), common::error::DatabaseError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| common::error::DatabaseError::Migration(e.to_string()))
    }

    fn order_predicate(key: &OrderKey) -> &'static str {
        match key {
            OrderKey::Id(_) => "id = $1",
            OrderKey::GatewayOrderId(_) => "gateway_order_id = $1",
        }
    }

    async fn fetch_order_in(
        tx: &mut Transaction<'_, Postgres>,
        key: &OrderKey,
    ) -> StoreResult<Option<PaymentOrder>> {
        let sql = format!(
            "SELECT {} FROM payment_orders WHERE {} FOR UPDATE",
            ORDER_COLUMNS,
            Self::order_predicate(key)
        );
        let row = bind_order_key(sqlx::query(&sql), key)
            .fetch_optional(&mut **tx)
            .await?;
        row.as_ref().map(order_from_row).transpose()
    }
}

fn bind_order_key<'q>(
    query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    key: &'q OrderKey,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    match key {
        OrderKey::Id(id) => query.bind(*id),
        OrderKey::GatewayOrderId(gateway_id) => query.bind(gateway_id.as_str()),
    }
}

fn user_from_row(row: &PgRow) -> StoreResult<User> {
    Ok(User {
        id: row.get("id"),
        email: row.get("email"),
        phone: row.get("phone"),
        full_name: row.get("full_name"),
        password_hash: row.get("password_hash"),
        external_id: row.get("external_id"),
        avatar_url: row.get("avatar_url"),
        email_verified: row.get("email_verified"),
        phone_verified: row.get("phone_verified"),
        role: row.get::<String, _>("role").parse()?,
        account_status: row.get::<String, _>("account_status").parse()?,
        payment_status: row.get::<String, _>("payment_status").parse()?,
        registration_method: row.get::<String, _>("registration_method").parse()?,
        payment_completed_at: row.get("payment_completed_at"),
        last_login: row.get("last_login"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn order_from_row(row: &PgRow) -> StoreResult<PaymentOrder> {
    Ok(PaymentOrder {
        id: row.get("id"),
        user_id: row.get("user_id"),
        amount: row.get("amount"),
        currency: row.get("currency"),
        status: row.get::<String, _>("status").parse()?,
        gateway_order_id: row.get("gateway_order_id"),
        gateway_payment_id: row.get("gateway_payment_id"),
        gateway_signature: row.get("gateway_signature"),
        error_description: row.get("error_description"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        captured_at: row.get("captured_at"),
    })
}

fn session_from_row(row: &PgRow) -> Session {
    Session {
        token: row.get("token"),
        refresh_token: row.get("refresh_token"),
        user_id: row.get("user_id"),
        ip_address: row.get("ip_address"),
        user_agent: row.get("user_agent"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    }
}

fn challenge_from_row(row: &PgRow) -> StoreResult<OtpChallenge> {
    Ok(OtpChallenge {
        identifier: row.get("identifier"),
        code: row.get("code"),
        channel: row.get::<String, _>("channel").parse()?,
        expires_at: row.get("expires_at"),
        attempts: row.get("attempts"),
        verified: row.get("verified"),
        created_at: row.get("created_at"),
    })
}

fn ticket_from_row(row: &PgRow) -> StoreResult<SupportTicket> {
    Ok(SupportTicket {
        id: row.get("id"),
        user_id: row.get("user_id"),
        subject: row.get("subject"),
        message: row.get("message"),
        status: row.get::<String, _>("status").parse()?,
        admin_note: row.get("admin_note"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl AccountStore for PgStore {
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, phone, full_name, password_hash, external_id, avatar_url,
                               email_verified, phone_verified, role, account_status, payment_status,
                               registration_method, payment_completed_at, last_login, created_at,
                               updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.phone)
        .bind(&user.full_name)
        .bind(&user.password_hash)
        .bind(&user.external_id)
        .bind(&user.avatar_url)
        .bind(user.email_verified)
        .bind(user.phone_verified)
        .bind(user.role.as_str())
        .bind(user.account_status.as_str())
        .bind(user.payment_status.as_str())
        .bind(user.registration_method.as_str())
        .bind(user.payment_completed_at)
        .bind(user.last_login)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_phone(&self, phone: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE phone = $1", USER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(phone)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_external_id(&self, external_id: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE external_id = $1", USER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn link_external_identity(
        &self,
        user_id: Uuid,
        external_id: &str,
        avatar_url: Option<&str>,
    ) -> StoreResult<User> {
        let sql = format!(
            r#"
            UPDATE users
            SET external_id = $2,
                email_verified = TRUE,
                avatar_url = COALESCE(avatar_url, $3),
                updated_at = NOW()
            WHERE id = $1 AND (external_id IS NULL OR external_id = $2)
            RETURNING {}
            "#,
            USER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(user_id)
            .bind(external_id)
            .bind(avatar_url)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => user_from_row(&row),
            None => Err(StoreError::Conflict(
                "account already linked to another identity".to_string(),
            )),
        }
    }

    async fn record_login(&self, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE users SET last_login = $2 WHERE id = $1")
            .bind(user_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_verified(&self, user_id: Uuid, channel: OtpChannel) -> StoreResult<()> {
        let sql = match channel {
            OtpChannel::Email => {
                "UPDATE users SET email_verified = TRUE, updated_at = NOW() WHERE id = $1"
            }
            OtpChannel::Sms => {
                "UPDATE users SET phone_verified = TRUE, updated_at = NOW() WHERE id = $1"
            }
        };
        sqlx::query(sql).bind(user_id).execute(&self.pool).await?;
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        user_id: Uuid,
        expected: AccountStatus,
        next: AccountStatus,
    ) -> StoreResult<Option<User>> {
        let sql = format!(
            r#"
            UPDATE users SET account_status = $3, updated_at = NOW()
            WHERE id = $1 AND account_status = $2
            RETURNING {}
            "#,
            USER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(user_id)
            .bind(expected.as_str())
            .bind(next.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn set_role(&self, user_id: Uuid, role: Role) -> StoreResult<Option<User>> {
        let sql = format!(
            "UPDATE users SET role = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            USER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(user_id)
            .bind(role.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn list_users(&self, filter: &UserFilter) -> StoreResult<Vec<User>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM users
            WHERE ($1 OR account_status <> 'DELETED')
              AND ($2::TEXT IS NULL OR account_status = $2)
              AND ($3::TEXT IS NULL OR payment_status = $3)
              AND ($4::TEXT IS NULL OR role = $4)
              AND ($5::TEXT IS NULL
                   OR email ILIKE '%' || $5 || '%'
                   OR phone ILIKE '%' || $5 || '%'
                   OR full_name ILIKE '%' || $5 || '%')
            ORDER BY created_at DESC
            LIMIT $6 OFFSET $7
            "#,
            USER_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(filter.include_deleted)
            .bind(filter.account_status.map(|s| s.as_str()))
            .bind(filter.payment_status.map(|s| s.as_str()))
            .bind(filter.role.map(|r| r.as_str()))
            .bind(filter.search.as_deref())
            .bind(filter.limit())
            .bind(filter.offset())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(user_from_row).collect()
    }
}

#[async_trait]
impl OtpStore for PgStore {
    async fn replace_challenge(&self, challenge: &OtpChallenge) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO otp_challenges (identifier, code, channel, expires_at, attempts, verified, created_at)
            VALUES ($1, $2, $3, $4, 0, FALSE, $5)
            ON CONFLICT (identifier) DO UPDATE
            SET code = EXCLUDED.code,
                channel = EXCLUDED.channel,
                expires_at = EXCLUDED.expires_at,
                attempts = 0,
                verified = FALSE,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(&challenge.identifier)
        .bind(&challenge.code)
        .bind(challenge.channel.as_str())
        .bind(challenge.expires_at)
        .bind(challenge.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn verify_challenge(
        &self,
        identifier: &str,
        submitted: &str,
        now: DateTime<Utc>,
        max_attempts: i32,
    ) -> StoreResult<Option<ChallengeVerdict>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT identifier, code, channel, expires_at, attempts, verified, created_at
            FROM otp_challenges
            WHERE identifier = $1
            FOR UPDATE
            "#,
        )
        .bind(identifier)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut challenge = challenge_from_row(&row)?;
        let verdict = challenge.evaluate(submitted, now, max_attempts);
        challenge.apply(verdict, max_attempts);

        if verdict != ChallengeVerdict::Expired {
            sqlx::query(
                "UPDATE otp_challenges SET attempts = $2, verified = $3 WHERE identifier = $1",
            )
            .bind(identifier)
            .bind(challenge.attempts)
            .bind(challenge.verified)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(Some(verdict))
    }

    async fn purge_expired_challenges(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM otp_challenges WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn insert_session(&self, session: &Session) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (token, refresh_token, user_id, ip_address, user_agent, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&session.token)
        .bind(&session.refresh_token)
        .bind(session.user_id)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_session(&self, token: &str) -> StoreResult<Option<Session>> {
        let row = sqlx::query(
            r#"
            SELECT token, refresh_token, user_id, ip_address, user_agent, expires_at, created_at
            FROM sessions
            WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(session_from_row))
    }

    async fn delete_session(&self, token: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PaymentStore for PgStore {
    async fn insert_order(&self, order: &PaymentOrder) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_orders (id, user_id, amount, currency, status, gateway_order_id,
                                        gateway_payment_id, gateway_signature, error_description,
                                        created_at, updated_at, captured_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.amount)
        .bind(&order.currency)
        .bind(order.status.as_str())
        .bind(&order.gateway_order_id)
        .bind(&order.gateway_payment_id)
        .bind(&order.gateway_signature)
        .bind(&order.error_description)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.captured_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_order(&self, key: &OrderKey) -> StoreResult<Option<PaymentOrder>> {
        let sql = format!(
            "SELECT {} FROM payment_orders WHERE {}",
            ORDER_COLUMNS,
            Self::order_predicate(key)
        );
        let row = bind_order_key(sqlx::query(&sql), key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn list_orders_for_user(&self, user_id: Uuid) -> StoreResult<Vec<PaymentOrder>> {
        let sql = format!(
            "SELECT {} FROM payment_orders WHERE user_id = $1 ORDER BY created_at DESC",
            ORDER_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(order_from_row).collect()
    }

    async fn has_captured_order(&self, user_id: Uuid) -> StoreResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM payment_orders WHERE user_id = $1 AND status = 'captured'
            ) AS captured
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("captured"))
    }

    async fn mark_order_failed(
        &self,
        key: &OrderKey,
        error_description: &str,
    ) -> StoreResult<Option<PaymentOrder>> {
        let sql = format!(
            r#"
            UPDATE payment_orders
            SET status = 'failed', error_description = $2, updated_at = NOW()
            WHERE {} AND status <> 'captured'
            RETURNING {}
            "#,
            Self::order_predicate(key),
            ORDER_COLUMNS
        );
        let row = bind_order_key(sqlx::query(&sql), key)
            .bind(error_description)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(order_from_row(&row)?)),
            // Either missing or already captured; report whichever it is
            None => self.find_order(key).await,
        }
    }

    async fn capture_order(&self, capture: &OrderCapture) -> StoreResult<CaptureOutcome> {
        let mut tx = self.pool.begin().await?;

        let order = Self::fetch_order_in(&mut tx, &capture.key)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("order {:?}", capture.key)))?;

        if order.is_captured() {
            tx.commit().await?;
            return Ok(CaptureOutcome::AlreadyCaptured(order));
        }

        let sql = format!(
            r#"
            UPDATE payment_orders
            SET status = 'captured',
                gateway_payment_id = $2,
                gateway_signature = COALESCE($3, gateway_signature),
                error_description = NULL,
                captured_at = $4,
                updated_at = $4
            WHERE id = $1 AND status <> 'captured'
            RETURNING {}
            "#,
            ORDER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(order.id)
            .bind(&capture.gateway_payment_id)
            .bind(&capture.gateway_signature)
            .bind(capture.captured_at)
            .fetch_one(&mut *tx)
            .await?;
        let captured = order_from_row(&row)?;

        let activated = sqlx::query(
            r#"
            UPDATE users
            SET payment_status = 'completed',
                payment_completed_at = COALESCE(payment_completed_at, $2),
                account_status = CASE WHEN account_status = 'PENDING_PAYMENT'
                                      THEN 'ACTIVE' ELSE account_status END,
                updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(captured.user_id)
        .bind(capture.captured_at)
        .execute(&mut *tx)
        .await?;

        if activated.rows_affected() == 0 {
            // Dropping the transaction rolls the capture back
            return Err(StoreError::NotFound(format!("user {}", captured.user_id)));
        }

        tx.commit().await?;
        Ok(CaptureOutcome::Captured(captured))
    }
}

#[async_trait]
impl TicketStore for PgStore {
    async fn insert_ticket(&self, ticket: &SupportTicket) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO support_tickets (id, user_id, subject, message, status, admin_note, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(ticket.id)
        .bind(ticket.user_id)
        .bind(&ticket.subject)
        .bind(&ticket.message)
        .bind(ticket.status.as_str())
        .bind(&ticket.admin_note)
        .bind(ticket.created_at)
        .bind(ticket.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_tickets(&self, filter: &TicketFilter) -> StoreResult<Vec<SupportTicket>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM support_tickets
            WHERE ($1::TEXT IS NULL OR status = $1)
              AND ($2::UUID IS NULL OR user_id = $2)
            ORDER BY created_at DESC
            "#,
            TICKET_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(ticket_from_row).collect()
    }

    async fn update_ticket(
        &self,
        id: Uuid,
        update: &TicketUpdate,
    ) -> StoreResult<Option<SupportTicket>> {
        let sql = format!(
            r#"
            UPDATE support_tickets
            SET status = COALESCE($2, status),
                admin_note = COALESCE($3, admin_note),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            TICKET_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(update.status.map(|s| s.as_str()))
            .bind(update.admin_note.as_deref())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(ticket_from_row).transpose()
    }
}
