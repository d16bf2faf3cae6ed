//! Support tickets raised by account holders and triaged by admins

use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::models::{SupportTicket, TicketFilter, TicketStatus, TicketUpdate};
use crate::store::{Store, StoreError};

const SUBJECT_MAX: usize = 200;
const MESSAGE_MAX: usize = 5000;

#[derive(Debug, Error)]
pub enum SupportError {
    #[error("{0}")]
    Validation(String),

    #[error("ticket not found")]
    NotFound,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTicket {
    pub subject: String,
    pub message: String,
}

fn bounded(field: &str, value: &str, max: usize) -> Result<String, SupportError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(SupportError::Validation(format!("{field} is required")));
    }
    if value.chars().count() > max {
        return Err(SupportError::Validation(format!(
            "{field} must be at most {max} characters long"
        )));
    }
    Ok(value.to_string())
}

#[derive(Clone)]
pub struct SupportDesk {
    store: Arc<dyn Store>,
}

impl SupportDesk {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn open(&self, user_id: Uuid, ticket: NewTicket) -> Result<SupportTicket, SupportError> {
        let now = Utc::now();
        let ticket = SupportTicket {
            id: Uuid::new_v4(),
            user_id,
            subject: bounded("Subject", &ticket.subject, SUBJECT_MAX)?,
            message: bounded("Message", &ticket.message, MESSAGE_MAX)?,
            status: TicketStatus::Open,
            admin_note: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_ticket(&ticket).await?;
        info!("User {} opened ticket {}", user_id, ticket.id);

        Ok(ticket)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<SupportTicket>, SupportError> {
        let filter = TicketFilter {
            user_id: Some(user_id),
            ..Default::default()
        };
        Ok(self.store.list_tickets(&filter).await?)
    }

    pub async fn list(&self, filter: &TicketFilter) -> Result<Vec<SupportTicket>, SupportError> {
        Ok(self.store.list_tickets(filter).await?)
    }

    pub async fn update(&self, id: Uuid, update: &TicketUpdate) -> Result<SupportTicket, SupportError> {
        if update.status.is_none() && update.admin_note.is_none() {
            return Err(SupportError::Validation("Nothing to update".to_string()));
        }

        let ticket = self
            .store
            .update_ticket(id, update)
            .await?
            .ok_or(SupportError::NotFound)?;
        info!("Ticket {} updated to {}", id, ticket.status.as_str());

        Ok(ticket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn open_list_and_update() {
        let desk = SupportDesk::new(Arc::new(MemoryStore::new()));
        let user_id = Uuid::new_v4();

        let ticket = desk
            .open(
                user_id,
                NewTicket {
                    subject: " Payment stuck ".to_string(),
                    message: "Charged but still pending".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(ticket.subject, "Payment stuck");
        assert_eq!(desk.list_for_user(user_id).await.unwrap().len(), 1);
        assert!(desk.list_for_user(Uuid::new_v4()).await.unwrap().is_empty());

        let updated = desk
            .update(
                ticket.id,
                &TicketUpdate {
                    status: Some(TicketStatus::Resolved),
                    admin_note: Some("Captured via webhook".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, TicketStatus::Resolved);
    }

    #[tokio::test]
    async fn empty_subject_is_rejected() {
        let desk = SupportDesk::new(Arc::new(MemoryStore::new()));
        let result = desk
            .open(
                Uuid::new_v4(),
                NewTicket {
                    subject: "  ".to_string(),
                    message: "m".to_string(),
                },
            )
            .await;
        assert!(matches!(result, Err(SupportError::Validation(_))));
    }

    #[tokio::test]
    async fn updating_unknown_ticket_is_not_found() {
        let desk = SupportDesk::new(Arc::new(MemoryStore::new()));
        let update = TicketUpdate {
            status: Some(TicketStatus::Closed),
            admin_note: None,
        };
        assert!(matches!(
            desk.update(Uuid::new_v4(), &update).await,
            Err(SupportError::NotFound)
        ));
    }
}
