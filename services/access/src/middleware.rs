//! Request authentication and client context extraction

use axum::{
    async_trait,
    body::Body,
    extract::{ConnectInfo, FromRequestParts, State},
    http::{HeaderMap, Request, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use std::convert::Infallible;
use std::net::SocketAddr;
use tracing::warn;

use crate::{
    AppState,
    accounts::ensure_in_good_standing,
    error::ApiError,
    jwt::ClientContext,
    models::User,
};

/// Live account behind the request's access token
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    /// Raw access token, the session key
    pub token: String,
}

/// Verify the bearer token and load the account it names.
///
/// Token checks are stateless; account status is read fresh on every request.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) =
        bearer.ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;
    let token = bearer.token().to_string();

    let claims = state.tokens.verify_access(&token)?;

    let user = state.accounts.find_for_audit(claims.sub).await?;
    ensure_in_good_standing(&user)?;

    req.extensions_mut().insert(CurrentUser { user, token });

    Ok(next.run(req).await)
}

/// Admin gate. Runs inside [`require_auth`] and checks the persisted session
/// and the live role, never the role claim.
pub async fn require_admin(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let current = req
        .extensions()
        .get::<CurrentUser>()
        .cloned()
        .ok_or_else(|| ApiError::Unauthorized("Authentication required".to_string()))?;

    let session = state
        .tokens
        .session(&current.token)
        .await?
        .ok_or(ApiError::InvalidOrExpiredToken)?;

    if session.user_id != current.user.id {
        return Err(ApiError::InvalidOrExpiredToken);
    }

    if !current.user.role.is_admin() {
        warn!("Non-admin {} attempted an admin operation", current.user.id);
        return Err(ApiError::Forbidden("Admin access required".to_string()));
    }

    Ok(next.run(req).await)
}

/// Caller IP.
///
/// With no trusted proxies this is the socket peer and `X-Forwarded-For` is
/// ignored. Behind `trusted_hops` proxies it is the entry the outermost
/// trusted proxy appended, counted from the right of the header.
pub fn client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_hops: usize,
) -> Option<String> {
    let peer_ip = peer.map(|addr| addr.ip().to_string());
    if trusted_hops == 0 {
        return peer_ip;
    }

    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.rsplit(',')
                .map(str::trim)
                .nth(trusted_hops - 1)
                .filter(|ip| !ip.is_empty())
                .map(str::to_string)
        })
        .or(peer_ip)
}

#[async_trait]
impl FromRequestParts<AppState> for ClientContext {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Ok(ClientContext {
            ip_address: client_ip(&parts.headers, peer, state.trusted_proxy_hops),
            user_agent: parts
                .headers
                .get(axum::http::header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        })
    }
}
