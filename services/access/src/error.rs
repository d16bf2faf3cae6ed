//! HTTP error type
//!
//! Component errors are converted into [`ApiError`] at the handler boundary.
//! Every response carries a stable machine-readable `error` kind and a
//! human-readable `message`.

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::accounts::AccountError;
use crate::identity::IdentityError;
use crate::jwt::TokenError;
use crate::oauth::OAuthError;
use crate::otp::OtpError;
use crate::payment::PaymentError;
use crate::payment::webhook::WebhookError;
use crate::store::StoreError;
use crate::support::SupportError;

/// Custom error type for the access service
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Expired(String),

    #[error("{0}")]
    AlreadyUsed(String),

    #[error("{0}")]
    TooManyAttempts(String),

    #[error("{0}")]
    InvalidCode(String),

    #[error("{0}")]
    InvalidSignature(String),

    #[error("{0}")]
    GatewayError(String),

    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,

    #[error("Too many requests, try again later")]
    RateLimited,

    /// Internal failure; the payload is detail that is never shown by default
    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    /// Stable machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::Expired(_) => "EXPIRED",
            ApiError::AlreadyUsed(_) => "ALREADY_USED",
            ApiError::TooManyAttempts(_) => "TOO_MANY_ATTEMPTS",
            ApiError::InvalidCode(_) => "INVALID_CODE",
            ApiError::InvalidSignature(_) => "INVALID_SIGNATURE",
            ApiError::GatewayError(_) => "GATEWAY_ERROR",
            ApiError::InvalidOrExpiredToken => "INVALID_OR_EXPIRED_TOKEN",
            ApiError::RateLimited => "RATE_LIMITED",
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_)
            | ApiError::Expired(_)
            | ApiError::AlreadyUsed(_)
            | ApiError::InvalidCode(_)
            | ApiError::InvalidSignature(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) | ApiError::InvalidOrExpiredToken => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::TooManyAttempts(_) | ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::GatewayError(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        ApiError::Internal(err.to_string())
    }
}

/// Internal detail attached to 500 responses, surfaced by [`error_detail`]
#[derive(Debug, Clone)]
pub struct ErrorDetail(pub String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.kind(),
            "message": self.to_string(),
        }));

        let mut response = (status, body).into_response();
        if let ApiError::Internal(detail) = self {
            error!("Internal error: {}", detail);
            response.extensions_mut().insert(ErrorDetail(detail));
        }
        response
    }
}

/// Response middleware that adds `detail` to internal errors when enabled
pub async fn error_detail(
    State(expose): State<bool>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let response = next.run(req).await;
    if !expose {
        return response;
    }

    match response.extensions().get::<ErrorDetail>().cloned() {
        Some(ErrorDetail(detail)) => (
            response.status(),
            Json(json!({
                "error": "INTERNAL",
                "message": "Internal server error",
                "detail": detail,
            })),
        )
            .into_response(),
        None => response,
    }
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(what) => ApiError::Conflict(format!("Already exists: {what}")),
            StoreError::NotFound(what) => ApiError::NotFound(format!("Not found: {what}")),
            other => ApiError::internal(other),
        }
    }
}

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::Validation(msg) => ApiError::Validation(msg),
            AccountError::Conflict(msg) => ApiError::Conflict(msg),
            AccountError::InvalidCredentials => {
                ApiError::Unauthorized("Invalid credentials".to_string())
            }
            AccountError::Suspended => ApiError::Forbidden("Account is suspended".to_string()),
            AccountError::NotFound => ApiError::NotFound("Account not found".to_string()),
            err @ AccountError::InvalidTransition { .. } => ApiError::Validation(err.to_string()),
            AccountError::Forbidden(msg) => ApiError::Forbidden(msg),
            AccountError::PasswordHash(detail) => ApiError::Internal(detail),
            AccountError::Store(err) => err.into(),
        }
    }
}

impl From<OtpError> for ApiError {
    fn from(err: OtpError) -> Self {
        match err {
            OtpError::Validation(msg) => ApiError::Validation(msg),
            OtpError::NotFound => ApiError::NotFound("No code was issued for this identifier".to_string()),
            OtpError::AlreadyUsed => ApiError::AlreadyUsed("Code has already been used".to_string()),
            OtpError::Expired => ApiError::Expired("Code has expired".to_string()),
            OtpError::TooManyAttempts => {
                ApiError::TooManyAttempts("Too many attempts, request a new code".to_string())
            }
            OtpError::InvalidCode => ApiError::InvalidCode("Invalid code".to_string()),
            OtpError::Dispatch(detail) => ApiError::Internal(format!("otp dispatch: {detail}")),
            OtpError::Store(err) => err.into(),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::InvalidOrExpiredToken => ApiError::InvalidOrExpiredToken,
            TokenError::Signing(err) => ApiError::internal(err),
            TokenError::Store(err) => err.into(),
        }
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::InvalidAssertion(msg) => {
                ApiError::Unauthorized(format!("Invalid identity assertion: {msg}"))
            }
            IdentityError::Unavailable(detail) => {
                ApiError::GatewayError(format!("Identity provider unavailable: {detail}"))
            }
            IdentityError::AlreadyLinked => ApiError::Conflict(
                "Email is linked to a different external account".to_string(),
            ),
            IdentityError::Suspended => ApiError::Forbidden("Account is suspended".to_string()),
            IdentityError::Deleted => ApiError::NotFound("Account not found".to_string()),
            IdentityError::Contention => {
                ApiError::Conflict("Account is being linked concurrently, retry".to_string())
            }
            IdentityError::Token(err) => err.into(),
            IdentityError::Store(err) => err.into(),
        }
    }
}

impl From<OAuthError> for ApiError {
    fn from(err: OAuthError) -> Self {
        match err {
            OAuthError::InvalidState => {
                ApiError::Unauthorized("Invalid or expired OAuth state".to_string())
            }
            OAuthError::Exchange(msg) => ApiError::Unauthorized(format!("OAuth exchange failed: {msg}")),
            OAuthError::Profile(msg) => ApiError::GatewayError(format!("OAuth profile fetch failed: {msg}")),
            OAuthError::Cache(err) => ApiError::internal(err),
            OAuthError::Configuration(detail) => ApiError::Internal(detail),
        }
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::InvalidAmount => {
                ApiError::Validation("Amount must be greater than zero".to_string())
            }
            PaymentError::InvalidSignature => {
                ApiError::InvalidSignature("Payment signature verification failed".to_string())
            }
            PaymentError::NotFound => ApiError::NotFound("Order not found".to_string()),
            PaymentError::Validation(msg) => ApiError::Validation(msg),
            PaymentError::Gateway(msg) => ApiError::GatewayError(msg),
            PaymentError::Store(err) => err.into(),
        }
    }
}

impl From<SupportError> for ApiError {
    fn from(err: SupportError) -> Self {
        match err {
            SupportError::Validation(msg) => ApiError::Validation(msg),
            SupportError::NotFound => ApiError::NotFound("Ticket not found".to_string()),
            SupportError::Store(err) => err.into(),
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::InvalidSignature => {
                ApiError::InvalidSignature("Webhook signature verification failed".to_string())
            }
            WebhookError::Malformed(msg) => ApiError::Validation(format!("Malformed event: {msg}")),
            WebhookError::Store(err) => err.into(),
        }
    }
}
