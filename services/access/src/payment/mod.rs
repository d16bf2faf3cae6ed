//! Payment authorization engine
//!
//! Orders are created at the gateway first and persisted only once the
//! gateway has acknowledged them. Completion trusts nothing the client sends
//! until the gateway's HMAC over `order_id|payment_id` checks out; the
//! capture itself is a single conditional write shared with the webhook
//! path, so whichever arrives second observes `AlreadyCaptured`.

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{parse_or, required_var};
use crate::models::{CaptureOutcome, OrderCapture, OrderKey, OrderStatus, PaymentOrder, User};
use crate::store::{Store, StoreError};

pub mod gateway;
pub mod signature;
pub mod webhook;

use gateway::{GatewayOrderRequest, PaymentGateway};

const RECEIPT_MAX_LEN: usize = 40;
const SIGNATURE_MISMATCH: &str = "signature mismatch";

/// Payment gateway configuration
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    /// Public key id, handed to the client for checkout
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
    pub api_url: String,
    pub currency: String,
    pub timeout_seconds: u64,
}

impl PaymentConfig {
    /// # Environment Variables
    /// - `PAYMENT_KEY_ID`, `PAYMENT_KEY_SECRET`, `PAYMENT_WEBHOOK_SECRET` (required)
    /// - `PAYMENT_API_URL` (default: https://api.razorpay.com/v1)
    /// - `PAYMENT_CURRENCY` (default: INR)
    /// - `PAYMENT_TIMEOUT_SECONDS` (default: 15)
    pub fn from_env() -> Result<Self> {
        Ok(PaymentConfig {
            key_id: required_var("PAYMENT_KEY_ID")?,
            key_secret: required_var("PAYMENT_KEY_SECRET")?,
            webhook_secret: required_var("PAYMENT_WEBHOOK_SECRET")?,
            api_url: env::var("PAYMENT_API_URL")
                .unwrap_or_else(|_| "https://api.razorpay.com/v1".to_string()),
            currency: env::var("PAYMENT_CURRENCY").unwrap_or_else(|_| "INR".to_string()),
            timeout_seconds: parse_or("PAYMENT_TIMEOUT_SECONDS", 15)?,
        })
    }
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("amount must be positive")]
    InvalidAmount,

    #[error("signature mismatch")]
    InvalidSignature,

    #[error("order not found")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What the client needs to open the gateway checkout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDescriptor {
    /// Our order record id
    pub record_id: Uuid,
    /// Gateway order id
    pub order_id: String,
    pub amount: i64,
    pub currency: String,
    pub key_id: String,
}

/// Client proof of payment
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentProof {
    pub record_id: Uuid,
    pub gateway_payment_id: String,
    pub gateway_order_id: String,
    pub signature: String,
}

/// Bounded receipt id derived from the user id and the current time
fn receipt_for(user_id: Uuid) -> String {
    let mut receipt = format!(
        "rcpt_{}_{}",
        &user_id.simple().to_string()[..8],
        Utc::now().timestamp()
    );
    receipt.truncate(RECEIPT_MAX_LEN);
    receipt
}

/// Payment engine
#[derive(Clone)]
pub struct PaymentEngine {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    config: PaymentConfig,
}

impl PaymentEngine {
    pub fn new(store: Arc<dyn Store>, gateway: Arc<dyn PaymentGateway>, config: PaymentConfig) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    /// Create a gateway order, then record it. Nothing is stored on failure.
    pub async fn create_order(&self, user: &User, amount: i64) -> Result<OrderDescriptor, PaymentError> {
        if amount <= 0 {
            return Err(PaymentError::InvalidAmount);
        }
        if user.has_paid() {
            return Err(PaymentError::Validation(
                "Payment has already been completed".to_string(),
            ));
        }

        let request = GatewayOrderRequest {
            amount,
            currency: self.config.currency.clone(),
            receipt: receipt_for(user.id),
        };

        let gateway_order = self.gateway.create_order(&request).await.map_err(|e| {
            warn!("Gateway order creation failed for user {}: {}", user.id, e);
            PaymentError::Gateway(e.to_string())
        })?;

        let now = Utc::now();
        let order = PaymentOrder {
            id: Uuid::new_v4(),
            user_id: user.id,
            amount,
            currency: request.currency,
            status: OrderStatus::Created,
            gateway_order_id: gateway_order.id,
            gateway_payment_id: None,
            gateway_signature: None,
            error_description: None,
            created_at: now,
            updated_at: now,
            captured_at: None,
        };
        self.store.insert_order(&order).await?;

        info!("Created order {} for user {}", order.id, user.id);

        Ok(OrderDescriptor {
            record_id: order.id,
            order_id: order.gateway_order_id,
            amount: order.amount,
            currency: order.currency,
            key_id: self.config.key_id.clone(),
        })
    }

    /// Verify the gateway signature and capture the order.
    ///
    /// A mismatch marks the caller's uncaptured order failed. Completing an
    /// order that is already captured returns it unchanged.
    pub async fn complete_payment(
        &self,
        caller: Uuid,
        proof: &PaymentProof,
    ) -> Result<PaymentOrder, PaymentError> {
        let message = signature::payment_message(&proof.gateway_order_id, &proof.gateway_payment_id);
        let key = OrderKey::Id(proof.record_id);

        if !signature::verify(
            self.config.key_secret.as_bytes(),
            message.as_bytes(),
            &proof.signature,
        ) {
            warn!("Payment signature mismatch for order {}", proof.record_id);
            if let Some(order) = self.store.find_order(&key).await? {
                if order.user_id == caller && !order.is_captured() {
                    self.store.mark_order_failed(&key, SIGNATURE_MISMATCH).await?;
                }
            }
            return Err(PaymentError::InvalidSignature);
        }

        let order = self
            .store
            .find_order(&key)
            .await?
            .filter(|o| o.user_id == caller)
            .ok_or(PaymentError::NotFound)?;

        if order.gateway_order_id != proof.gateway_order_id {
            return Err(PaymentError::Validation(
                "Gateway order id does not match this order".to_string(),
            ));
        }

        let capture = OrderCapture {
            key,
            gateway_payment_id: proof.gateway_payment_id.clone(),
            gateway_signature: Some(proof.signature.clone()),
            captured_at: Utc::now(),
        };

        let outcome = match self.store.capture_order(&capture).await {
            Ok(outcome) => outcome,
            Err(StoreError::NotFound(_)) => return Err(PaymentError::NotFound),
            Err(e) => return Err(e.into()),
        };

        match &outcome {
            CaptureOutcome::Captured(order) => {
                info!("Captured order {} and activated user {}", order.id, caller)
            }
            CaptureOutcome::AlreadyCaptured(order) => {
                info!("Order {} was already captured", order.id)
            }
        }

        Ok(outcome.into_order())
    }

    /// Whether the user holds any captured order
    pub async fn check_status(&self, user_id: Uuid) -> Result<bool, PaymentError> {
        Ok(self.store.has_captured_order(user_id).await?)
    }

    pub async fn history(&self, user_id: Uuid) -> Result<Vec<PaymentOrder>, PaymentError> {
        Ok(self.store.list_orders_for_user(user_id).await?)
    }
}
