//! Authentication routes

use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    AppState,
    accounts::{SignupInput, ensure_in_good_standing},
    error::{ApiError, ApiResult},
    identity::LinkedLogin,
    jwt::{ClientContext, TokenPair},
    middleware::CurrentUser,
    models::{OtpChannel, UserProfile},
};

/// Profile plus a fresh token pair
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserProfile,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct SendOtpRequest {
    #[serde(rename = "type")]
    pub channel: OtpChannel,
    pub identifier: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    pub identifier: String,
    pub code: String,
    #[serde(rename = "type")]
    pub channel: OtpChannel,
}

#[derive(Debug, Serialize)]
pub struct VerifyOtpResponse {
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
    #[serde(flatten)]
    pub tokens: Option<TokenPair>,
}

#[derive(Debug, Deserialize)]
pub struct GoogleLoginRequest {
    #[serde(alias = "credential", alias = "id_token")]
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct GoogleCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Create an account and sign it in
pub async fn signup(
    State(state): State<AppState>,
    context: ClientContext,
    Json(payload): Json<SignupInput>,
) -> ApiResult<impl IntoResponse> {
    let user = state.accounts.signup(payload).await?;
    let tokens = state.tokens.issue(&user, &context).await?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: user.profile(),
            tokens,
        }),
    ))
}

/// Email and password login
pub async fn login(
    State(state): State<AppState>,
    context: ClientContext,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let user = state
        .accounts
        .authenticate(&payload.email, &payload.password)
        .await?;
    let tokens = state.tokens.issue(&user, &context).await?;
    info!("User {} logged in", user.id);

    Ok(Json(AuthResponse {
        user: user.profile(),
        tokens,
    }))
}

/// Exchange a refresh token for a new pair, re-reading the live account
pub async fn refresh(
    State(state): State<AppState>,
    context: ClientContext,
    Json(payload): Json<RefreshRequest>,
) -> ApiResult<Json<TokenPair>> {
    let claims = state.tokens.verify_refresh(&payload.refresh_token)?;

    let user = state
        .accounts
        .find_by_id(claims.sub)
        .await
        .map_err(|_| ApiError::InvalidOrExpiredToken)?;
    ensure_in_good_standing(&user)?;

    Ok(Json(state.tokens.issue(&user, &context).await?))
}

/// Issue an OTP challenge; limited per caller
pub async fn send_otp(
    State(state): State<AppState>,
    context: ClientContext,
    Json(payload): Json<SendOtpRequest>,
) -> ApiResult<impl IntoResponse> {
    let caller = context.ip_address.as_deref().unwrap_or("unknown");
    if !state.rate_limiter.is_allowed(&format!("send-otp:{caller}")).await {
        return Err(ApiError::RateLimited);
    }

    let receipt = state.otp.issue(&payload.identifier, payload.channel).await?;

    Ok(Json(serde_json::json!({
        "message": "Verification code sent",
        "delivered": receipt.delivered,
        "expires_in": receipt.expires_in,
    })))
}

/// Verify an OTP. Signs in the bound account when there is one.
pub async fn verify_otp(
    State(state): State<AppState>,
    context: ClientContext,
    Json(payload): Json<VerifyOtpRequest>,
) -> ApiResult<Json<VerifyOtpResponse>> {
    let identifier = state
        .otp
        .verify(&payload.identifier, &payload.code, payload.channel)
        .await?;

    let Some(mut user) = state
        .accounts
        .find_by_identifier(&identifier, payload.channel)
        .await?
    else {
        return Ok(Json(VerifyOtpResponse {
            verified: true,
            user: None,
            tokens: None,
        }));
    };

    ensure_in_good_standing(&user)?;
    state
        .accounts
        .mark_identifier_verified(user.id, payload.channel)
        .await?;
    state.accounts.record_login(user.id).await?;
    match payload.channel {
        OtpChannel::Email => user.email_verified = true,
        OtpChannel::Sms => user.phone_verified = true,
    }

    let tokens = state.tokens.issue(&user, &context).await?;

    Ok(Json(VerifyOtpResponse {
        verified: true,
        user: Some(user.profile()),
        tokens: Some(tokens),
    }))
}

/// Google ID-token login
pub async fn google_login(
    State(state): State<AppState>,
    context: ClientContext,
    Json(payload): Json<GoogleLoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let identity = state.identity.verify_assertion(&payload.token).await?;
    let login = state.linker.login_or_link(&identity, &context).await?;

    Ok(Json(login))
}

/// Start the redirect flow
pub async fn google_url(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let url = state.oauth.authorization_url().await?;
    Ok(Json(serde_json::json!({ "url": url })))
}

/// Finish the redirect flow and hand the tokens to the frontend in the fragment
pub async fn google_callback(
    State(state): State<AppState>,
    context: ClientContext,
    Query(query): Query<GoogleCallbackQuery>,
) -> Redirect {
    let target = format!("{}/auth/callback", state.frontend_url.trim_end_matches('/'));

    let result: Result<LinkedLogin, ApiError> = async {
        if let Some(error) = query.error {
            return Err(ApiError::Unauthorized(format!("Consent denied: {error}")));
        }
        let (Some(code), Some(oauth_state)) = (query.code, query.state) else {
            return Err(ApiError::Validation("Missing code or state".to_string()));
        };

        let identity = state.oauth.complete(&code, &oauth_state).await?;
        Ok(state.linker.login_or_link(&identity, &context).await?)
    }
    .await;

    match result {
        Ok(login) => Redirect::to(&format!(
            "{}#access_token={}&refresh_token={}",
            target, login.tokens.access_token, login.tokens.refresh_token
        )),
        Err(err) => {
            warn!("Google callback failed: {}", err);
            Redirect::to(&format!("{}#error={}", target, err.kind()))
        }
    }
}

/// Token check for the caller
pub async fn verify(Extension(current): Extension<CurrentUser>) -> impl IntoResponse {
    Json(serde_json::json!({
        "valid": true,
        "user_id": current.user.id,
        "role": current.user.role,
        "account_status": current.user.account_status,
        "payment_status": current.user.payment_status,
    }))
}

pub async fn profile(Extension(current): Extension<CurrentUser>) -> Json<UserProfile> {
    Json(current.user.profile())
}

/// Revoke the caller's session
pub async fn logout(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> ApiResult<impl IntoResponse> {
    state.tokens.revoke(&current.token).await?;
    info!("User {} logged out", current.user.id);

    Ok(Json(serde_json::json!({"message": "Logged out successfully"})))
}
