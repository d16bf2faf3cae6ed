//! Gateway webhook reconciliation
//!
//! The payload is authenticated with the webhook secret before any field
//! is read. Capture events share the capture write with the client path,
//! so duplicates and races settle on one terminal state.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use super::signature;
use crate::models::{CaptureOutcome, OrderCapture, OrderKey};
use crate::store::{Store, StoreError};

/// Header carrying the hex HMAC of the raw body
pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("{0}")]
    Malformed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What reconciliation did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// The event changed an order
    Applied,
    /// The order already held the terminal state the event asks for
    AlreadyApplied,
    /// Acknowledged without effect
    Ignored,
}

#[derive(Debug, Deserialize)]
struct GatewayEvent {
    event: String,
    #[serde(default)]
    payload: EventPayload,
}

#[derive(Debug, Default, Deserialize)]
struct EventPayload {
    payment: Option<Entity<PaymentEntity>>,
    order: Option<Entity<OrderEntity>>,
}

#[derive(Debug, Deserialize)]
struct Entity<T> {
    entity: T,
}

#[derive(Debug, Deserialize)]
struct PaymentEntity {
    id: String,
    order_id: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderEntity {
    id: String,
}

impl EventPayload {
    fn gateway_order_id(&self) -> Option<&str> {
        self.payment
            .as_ref()
            .and_then(|p| p.entity.order_id.as_deref())
            .or_else(|| self.order.as_ref().map(|o| o.entity.id.as_str()))
    }
}

/// Webhook reconciler
#[derive(Clone)]
pub struct WebhookReconciler {
    store: Arc<dyn Store>,
    secret: String,
}

impl WebhookReconciler {
    pub fn new(store: Arc<dyn Store>, secret: String) -> Self {
        Self { store, secret }
    }

    /// Authenticate and apply one event
    pub async fn handle(
        &self,
        body: &[u8],
        signature_header: Option<&str>,
    ) -> Result<WebhookOutcome, WebhookError> {
        let authentic = signature_header
            .is_some_and(|sig| signature::verify(self.secret.as_bytes(), body, sig));
        if !authentic {
            warn!("Rejected webhook with invalid signature");
            return Err(WebhookError::InvalidSignature);
        }

        let event: GatewayEvent =
            serde_json::from_slice(body).map_err(|e| WebhookError::Malformed(e.to_string()))?;

        match event.event.as_str() {
            "payment.captured" | "order.paid" => self.captured(&event.payload).await,
            "payment.failed" => self.failed(&event.payload).await,
            other => {
                info!("Ignoring webhook event {}", other);
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    async fn captured(&self, payload: &EventPayload) -> Result<WebhookOutcome, WebhookError> {
        let payment = payload
            .payment
            .as_ref()
            .ok_or_else(|| WebhookError::Malformed("missing payment entity".to_string()))?;
        let order_id = payload
            .gateway_order_id()
            .ok_or_else(|| WebhookError::Malformed("missing order id".to_string()))?;

        let capture = OrderCapture {
            key: OrderKey::GatewayOrderId(order_id.to_string()),
            gateway_payment_id: payment.entity.id.clone(),
            gateway_signature: None,
            captured_at: Utc::now(),
        };

        match self.store.capture_order(&capture).await {
            Ok(CaptureOutcome::Captured(order)) => {
                info!("Webhook captured order {} for user {}", order.id, order.user_id);
                Ok(WebhookOutcome::Applied)
            }
            Ok(CaptureOutcome::AlreadyCaptured(order)) => {
                info!("Webhook capture for order {} already applied", order.id);
                Ok(WebhookOutcome::AlreadyApplied)
            }
            Err(StoreError::NotFound(_)) => {
                warn!("Webhook capture for unknown gateway order {}", order_id);
                Ok(WebhookOutcome::Ignored)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn failed(&self, payload: &EventPayload) -> Result<WebhookOutcome, WebhookError> {
        let order_id = payload
            .gateway_order_id()
            .ok_or_else(|| WebhookError::Malformed("missing order id".to_string()))?;
        let description = payload
            .payment
            .as_ref()
            .and_then(|p| p.entity.error_description.as_deref())
            .unwrap_or("payment failed");

        let key = OrderKey::GatewayOrderId(order_id.to_string());
        match self.store.mark_order_failed(&key, description).await? {
            Some(order) if order.is_captured() => {
                warn!("Ignoring failure event for captured order {}", order.id);
                Ok(WebhookOutcome::AlreadyApplied)
            }
            Some(order) => {
                info!("Webhook marked order {} failed", order.id);
                Ok(WebhookOutcome::Applied)
            }
            None => {
                warn!("Webhook failure for unknown gateway order {}", order_id);
                Ok(WebhookOutcome::Ignored)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn reconciler() -> WebhookReconciler {
        WebhookReconciler::new(Arc::new(MemoryStore::new()), "whsec".to_string())
    }

    #[tokio::test]
    async fn missing_or_wrong_signature_is_rejected() {
        let webhook = reconciler();
        let body = json!({"event": "payment.captured"}).to_string();

        assert!(matches!(
            webhook.handle(body.as_bytes(), None).await,
            Err(WebhookError::InvalidSignature)
        ));
        let forged = signature::sign(b"not-the-secret", body.as_bytes());
        assert!(matches!(
            webhook.handle(body.as_bytes(), Some(&forged)).await,
            Err(WebhookError::InvalidSignature)
        ));
    }

    #[tokio::test]
    async fn unknown_event_is_acknowledged() {
        let webhook = reconciler();
        let body = json!({"event": "refund.created", "payload": {}}).to_string();
        let sig = signature::sign(b"whsec", body.as_bytes());

        assert_eq!(
            webhook.handle(body.as_bytes(), Some(&sig)).await.unwrap(),
            WebhookOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn signed_garbage_is_malformed() {
        let webhook = reconciler();
        let body = b"not json";
        let sig = signature::sign(b"whsec", body);

        assert!(matches!(
            webhook.handle(body, Some(&sig)).await,
            Err(WebhookError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn capture_for_unknown_order_is_ignored() {
        let webhook = reconciler();
        let body = json!({
            "event": "payment.captured",
            "payload": {"payment": {"entity": {"id": "pay_1", "order_id": "order_missing"}}}
        })
        .to_string();
        let sig = signature::sign(b"whsec", body.as_bytes());

        assert_eq!(
            webhook.handle(body.as_bytes(), Some(&sig)).await.unwrap(),
            WebhookOutcome::Ignored
        );
    }
}
