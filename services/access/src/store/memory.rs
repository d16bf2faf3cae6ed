//! In-memory storage adapter
//!
//! All tables sit behind one mutex, so every trait method is trivially
//! atomic, including the capture-and-activate unit. Used by tests and by
//! development runs with `STORAGE_BACKEND=memory`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AccountStore, OtpStore, PaymentStore, SessionStore, StoreError, StoreResult, TicketStore,
};
use crate::models::{
    AccountStatus, CaptureOutcome, ChallengeVerdict, OrderCapture, OrderKey, OrderStatus,
    OtpChallenge, OtpChannel, PaymentOrder, Role, Session, SupportTicket, TicketFilter,
    TicketUpdate, User, UserFilter,
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    challenges: HashMap<String, OtpChallenge>,
    sessions: HashMap<String, Session>,
    orders: HashMap<Uuid, PaymentOrder>,
    tickets: HashMap<Uuid, SupportTicket>,
}

impl Tables {
    fn unique_violation(&self, candidate: &User) -> Option<&'static str> {
        self.users
            .values()
            .filter(|u| u.id != candidate.id)
            .find_map(|u| {
                if candidate.email.is_some() && u.email == candidate.email {
                    Some("users_email_key")
                } else if candidate.phone.is_some() && u.phone == candidate.phone {
                    Some("users_phone_key")
                } else if candidate.external_id.is_some() && u.external_id == candidate.external_id
                {
                    Some("users_external_id_key")
                } else {
                    None
                }
            })
    }

    fn order_mut(&mut self, key: &OrderKey) -> Option<&mut PaymentOrder> {
        match key {
            OrderKey::Id(id) => self.orders.get_mut(id),
            OrderKey::GatewayOrderId(_) => self.orders.values_mut().find(|o| key.matches(o)),
        }
    }
}

/// Thread-safe in-memory store
#[derive(Default, Clone)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if let Some(constraint) = tables.unique_violation(user) {
            return Err(StoreError::Conflict(constraint.to_string()));
        }
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn find_user_by_phone(&self, phone: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.phone.as_deref() == Some(phone))
            .cloned())
    }

    async fn find_user_by_external_id(&self, external_id: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn link_external_identity(
        &self,
        user_id: Uuid,
        external_id: &str,
        avatar_url: Option<&str>,
    ) -> StoreResult<User> {
        let mut tables = self.tables.lock().await;

        if tables
            .users
            .values()
            .any(|u| u.id != user_id && u.external_id.as_deref() == Some(external_id))
        {
            return Err(StoreError::Conflict("users_external_id_key".to_string()));
        }

        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", user_id)))?;

        match user.external_id.as_deref() {
            Some(bound) if bound != external_id => {
                return Err(StoreError::Conflict(
                    "account already linked to another identity".to_string(),
                ));
            }
            _ => {}
        }

        user.external_id = Some(external_id.to_string());
        user.email_verified = true;
        if user.avatar_url.is_none() {
            user.avatar_url = avatar_url.map(str::to_string);
        }
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn record_login(&self, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(user) = self.tables.lock().await.users.get_mut(&user_id) {
            user.last_login = Some(at);
        }
        Ok(())
    }

    async fn mark_verified(&self, user_id: Uuid, channel: OtpChannel) -> StoreResult<()> {
        if let Some(user) = self.tables.lock().await.users.get_mut(&user_id) {
            match channel {
                OtpChannel::Email => user.email_verified = true,
                OtpChannel::Sms => user.phone_verified = true,
            }
            user.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        user_id: Uuid,
        expected: AccountStatus,
        next: AccountStatus,
    ) -> StoreResult<Option<User>> {
        let mut tables = self.tables.lock().await;
        match tables.users.get_mut(&user_id) {
            Some(user) if user.account_status == expected => {
                user.account_status = next;
                user.updated_at = Utc::now();
                Ok(Some(user.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn set_role(&self, user_id: Uuid, role: Role) -> StoreResult<Option<User>> {
        let mut tables = self.tables.lock().await;
        Ok(tables.users.get_mut(&user_id).map(|user| {
            user.role = role;
            user.updated_at = Utc::now();
            user.clone()
        }))
    }

    async fn list_users(&self, filter: &UserFilter) -> StoreResult<Vec<User>> {
        let tables = self.tables.lock().await;
        let mut users: Vec<User> = tables
            .users
            .values()
            .filter(|u| filter.matches(u))
            .cloned()
            .collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(users
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .collect())
    }
}

#[async_trait]
impl OtpStore for MemoryStore {
    async fn replace_challenge(&self, challenge: &OtpChallenge) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables
            .challenges
            .insert(challenge.identifier.clone(), challenge.clone());
        Ok(())
    }

    async fn verify_challenge(
        &self,
        identifier: &str,
        submitted: &str,
        now: DateTime<Utc>,
        max_attempts: i32,
    ) -> StoreResult<Option<ChallengeVerdict>> {
        let mut tables = self.tables.lock().await;
        Ok(tables.challenges.get_mut(identifier).map(|challenge| {
            let verdict = challenge.evaluate(submitted, now, max_attempts);
            challenge.apply(verdict, max_attempts);
            verdict
        }))
    }

    async fn purge_expired_challenges(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.challenges.len();
        tables.challenges.retain(|_, c| c.expires_at >= now);
        Ok((before - tables.challenges.len()) as u64)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: &Session) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.sessions.contains_key(&session.token) {
            return Err(StoreError::Conflict("sessions_pkey".to_string()));
        }
        tables.sessions.insert(session.token.clone(), session.clone());
        Ok(())
    }

    async fn find_session(&self, token: &str) -> StoreResult<Option<Session>> {
        Ok(self.tables.lock().await.sessions.get(token).cloned())
    }

    async fn delete_session(&self, token: &str) -> StoreResult<bool> {
        Ok(self.tables.lock().await.sessions.remove(token).is_some())
    }

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, s| !s.is_expired(now));
        Ok((before - tables.sessions.len()) as u64)
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn insert_order(&self, order: &PaymentOrder) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables
            .orders
            .values()
            .any(|o| o.gateway_order_id == order.gateway_order_id)
        {
            return Err(StoreError::Conflict(
                "payment_orders_gateway_order_id_key".to_string(),
            ));
        }
        tables.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn find_order(&self, key: &OrderKey) -> StoreResult<Option<PaymentOrder>> {
        let tables = self.tables.lock().await;
        Ok(tables.orders.values().find(|o| key.matches(o)).cloned())
    }

    async fn list_orders_for_user(&self, user_id: Uuid) -> StoreResult<Vec<PaymentOrder>> {
        let tables = self.tables.lock().await;
        let mut orders: Vec<PaymentOrder> = tables
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn has_captured_order(&self, user_id: Uuid) -> StoreResult<bool> {
        let tables = self.tables.lock().await;
        Ok(tables
            .orders
            .values()
            .any(|o| o.user_id == user_id && o.is_captured()))
    }

    async fn mark_order_failed(
        &self,
        key: &OrderKey,
        error_description: &str,
    ) -> StoreResult<Option<PaymentOrder>> {
        let mut tables = self.tables.lock().await;
        Ok(tables.order_mut(key).map(|order| {
            if !order.is_captured() {
                order.status = OrderStatus::Failed;
                order.error_description = Some(error_description.to_string());
                order.updated_at = Utc::now();
            }
            order.clone()
        }))
    }

    async fn capture_order(&self, capture: &OrderCapture) -> StoreResult<CaptureOutcome> {
        let mut tables = self.tables.lock().await;

        let owner_id = tables
            .orders
            .values()
            .find(|o| capture.key.matches(o))
            .map(|o| o.user_id)
            .ok_or_else(|| StoreError::NotFound(format!("order {:?}", capture.key)))?;
        if !tables.users.contains_key(&owner_id) {
            return Err(StoreError::NotFound(format!("user {}", owner_id)));
        }

        let order = tables
            .order_mut(&capture.key)
            .ok_or_else(|| StoreError::NotFound(format!("order {:?}", capture.key)))?;

        if order.is_captured() {
            return Ok(CaptureOutcome::AlreadyCaptured(order.clone()));
        }

        order.status = OrderStatus::Captured;
        order.gateway_payment_id = Some(capture.gateway_payment_id.clone());
        if capture.gateway_signature.is_some() {
            order.gateway_signature = capture.gateway_signature.clone();
        }
        order.error_description = None;
        order.captured_at = Some(capture.captured_at);
        order.updated_at = capture.captured_at;
        let order = order.clone();

        let owner = tables
            .users
            .get_mut(&order.user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", order.user_id)))?;
        owner.apply_payment(capture.captured_at);

        Ok(CaptureOutcome::Captured(order))
    }
}

#[async_trait]
impl TicketStore for MemoryStore {
    async fn insert_ticket(&self, ticket: &SupportTicket) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.tickets.insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn list_tickets(&self, filter: &TicketFilter) -> StoreResult<Vec<SupportTicket>> {
        let tables = self.tables.lock().await;
        let mut tickets: Vec<SupportTicket> = tables
            .tickets
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        tickets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tickets)
    }

    async fn update_ticket(
        &self,
        id: Uuid,
        update: &TicketUpdate,
    ) -> StoreResult<Option<SupportTicket>> {
        let mut tables = self.tables.lock().await;
        Ok(tables.tickets.get_mut(&id).map(|ticket| {
            if let Some(status) = update.status {
                ticket.status = status;
            }
            if let Some(note) = &update.admin_note {
                ticket.admin_note = Some(note.clone());
            }
            ticket.updated_at = Utc::now();
            ticket.clone()
        }))
    }
}
