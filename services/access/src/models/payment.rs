//! Payment order model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::UnknownVariant;

/// Order status. `Captured` is terminal; `Failed` may still be captured by
/// a later valid proof of payment for the same order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Captured,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Captured => "captured",
            OrderStatus::Failed => "failed",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(OrderStatus::Created),
            "captured" => Ok(OrderStatus::Captured),
            "failed" => Ok(OrderStatus::Failed),
            other => Err(UnknownVariant::new("order status", other)),
        }
    }
}

/// One payment attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentOrder {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Minor currency unit
    pub amount: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub gateway_order_id: String,
    pub gateway_payment_id: Option<String>,
    #[serde(skip_serializing)]
    pub gateway_signature: Option<String>,
    pub error_description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub captured_at: Option<DateTime<Utc>>,
}

impl PaymentOrder {
    pub fn is_captured(&self) -> bool {
        self.status == OrderStatus::Captured
    }
}

/// Identifying key of an order: our record id or the gateway's order id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderKey {
    Id(Uuid),
    GatewayOrderId(String),
}

impl OrderKey {
    pub fn matches(&self, order: &PaymentOrder) -> bool {
        match self {
            OrderKey::Id(id) => order.id == *id,
            OrderKey::GatewayOrderId(gateway_id) => order.gateway_order_id == *gateway_id,
        }
    }
}

/// Terminal capture write
#[derive(Debug, Clone)]
pub struct OrderCapture {
    pub key: OrderKey,
    pub gateway_payment_id: String,
    /// Absent when the capture comes from a signed webhook
    pub gateway_signature: Option<String>,
    pub captured_at: DateTime<Utc>,
}

/// What a capture write observed
#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    /// This call moved the order to captured and activated the owner
    Captured(PaymentOrder),
    /// The order was captured earlier; nothing changed
    AlreadyCaptured(PaymentOrder),
}

impl CaptureOutcome {
    pub fn order(&self) -> &PaymentOrder {
        match self {
            CaptureOutcome::Captured(order) | CaptureOutcome::AlreadyCaptured(order) => order,
        }
    }

    pub fn into_order(self) -> PaymentOrder {
        match self {
            CaptureOutcome::Captured(order) | CaptureOutcome::AlreadyCaptured(order) => order,
        }
    }
}
