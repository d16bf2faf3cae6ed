//! Payment routes

use axum::{
    Extension, Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use crate::{
    AppState,
    error::ApiResult,
    middleware::CurrentUser,
    models::{AccountStatus, PaymentOrder, PaymentStatus},
    payment::{PaymentProof, webhook::SIGNATURE_HEADER},
};

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub amount: i64,
}

#[derive(Debug, Serialize)]
pub struct VerifyPaymentResponse {
    pub success: bool,
    pub order: PaymentOrder,
    pub account_status: AccountStatus,
    pub payment_status: PaymentStatus,
}

#[derive(Debug, Serialize)]
pub struct PaymentStatusResponse {
    pub has_paid: bool,
    pub account_status: AccountStatus,
    pub payment_status: PaymentStatus,
}

pub async fn create_order(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(payload): Json<CreateOrderRequest>,
) -> ApiResult<impl IntoResponse> {
    let descriptor = state
        .payments
        .create_order(&current.user, payload.amount)
        .await?;

    Ok((StatusCode::CREATED, Json(descriptor)))
}

/// Client-side completion of a checkout
pub async fn verify(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(proof): Json<PaymentProof>,
) -> ApiResult<Json<VerifyPaymentResponse>> {
    let order = state
        .payments
        .complete_payment(current.user.id, &proof)
        .await?;

    let user = state.accounts.find_for_audit(current.user.id).await?;

    Ok(Json(VerifyPaymentResponse {
        success: true,
        order,
        account_status: user.account_status,
        payment_status: user.payment_status,
    }))
}

pub async fn history(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> ApiResult<Json<Vec<PaymentOrder>>> {
    Ok(Json(state.payments.history(current.user.id).await?))
}

pub async fn status(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> ApiResult<Json<PaymentStatusResponse>> {
    let has_paid = state.payments.check_status(current.user.id).await?;

    Ok(Json(PaymentStatusResponse {
        has_paid,
        account_status: current.user.account_status,
        payment_status: current.user.payment_status,
    }))
}

/// Gateway webhook; the raw body is what the signature covers
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = state.webhooks.handle(&body, signature).await?;

    Ok(Json(serde_json::json!({
        "status": "ok",
        "outcome": outcome,
    })))
}
