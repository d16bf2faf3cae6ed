//! Access service models

pub mod otp;
pub mod payment;
pub mod session;
pub mod ticket;
pub mod user;

// Re-export for convenience
pub use otp::{ChallengeVerdict, OtpChallenge, OtpChannel};
pub use payment::{CaptureOutcome, OrderCapture, OrderKey, OrderStatus, PaymentOrder};
pub use session::Session;
pub use ticket::{SupportTicket, TicketFilter, TicketStatus, TicketUpdate};
pub use user::{
    AccountStatus, PaymentStatus, RegistrationMethod, Role, User, UserFilter, UserProfile,
};

/// Error raised when a stored text column does not name a known variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
