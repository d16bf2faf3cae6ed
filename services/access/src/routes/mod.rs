//! HTTP surface
//!
//! ```text
//! GET   /health                      - Health check (public)
//! POST  /auth/signup                 - Create account (public)
//! POST  /auth/login                  - Email + password login (public)
//! POST  /auth/refresh                - Exchange a refresh token (public)
//! POST  /auth/send-otp               - Issue an OTP challenge (public, rate limited)
//! POST  /auth/verify-otp             - Verify an OTP challenge (public)
//! POST  /auth/google-login           - Google ID-token login (public)
//! GET   /auth/google/url             - Start the Google redirect flow (public)
//! GET   /auth/google/callback        - Finish the Google redirect flow (public)
//! GET   /auth/verify                 - Validate the caller's token (auth)
//! GET   /auth/profile                - Caller profile (auth)
//! POST  /auth/logout                 - Revoke the caller's session (auth)
//! POST  /payment/create-order        - Open a gateway order (auth)
//! POST  /payment/verify              - Complete a payment (auth)
//! GET   /payment/history             - Caller's orders (auth)
//! GET   /payment/status              - Caller's entitlement (auth)
//! POST  /payment/webhook             - Gateway events (signature verified)
//! POST  /support/tickets             - Open a ticket (auth)
//! GET   /support/tickets             - Caller's tickets (auth)
//! GET   /admin/users                 - List accounts (admin)
//! POST  /admin/users                 - Provision an account (admin)
//! GET   /admin/users/:id             - Read an account, deleted included (admin)
//! PATCH /admin/users/:id             - Change status or role (admin)
//! GET   /admin/tickets               - List tickets (admin)
//! PATCH /admin/tickets/:id           - Update a ticket (admin)
//! ```

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware::from_fn_with_state,
    routing::{get, patch, post},
};
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::{
    AppState,
    error::error_detail,
    middleware::{require_admin, require_auth},
};

pub mod admin;
pub mod auth;
pub mod health;
pub mod payment;
pub mod support;

fn cors(frontend_url: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    match HeaderValue::from_str(frontend_url.trim_end_matches('/')) {
        Ok(origin) => layer.allow_origin(origin),
        Err(_) => {
            warn!("FRONTEND_URL is not a valid origin, CORS disabled");
            layer
        }
    }
}

/// Create the router for the access service
pub fn create_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/auth/signup", post(auth::signup))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/send-otp", post(auth::send_otp))
        .route("/auth/verify-otp", post(auth::verify_otp))
        .route("/auth/google-login", post(auth::google_login))
        .route("/auth/google/url", get(auth::google_url))
        .route("/auth/google/callback", get(auth::google_callback))
        .route("/payment/webhook", post(payment::webhook));

    let protected_routes = Router::new()
        .route("/auth/verify", get(auth::verify))
        .route("/auth/profile", get(auth::profile))
        .route("/auth/logout", post(auth::logout))
        .route("/payment/create-order", post(payment::create_order))
        .route("/payment/verify", post(payment::verify))
        .route("/payment/history", get(payment::history))
        .route("/payment/status", get(payment::status))
        .route(
            "/support/tickets",
            get(support::list_own).post(support::open),
        )
        .layer(from_fn_with_state(state.clone(), require_auth));

    let admin_routes = Router::new()
        .route(
            "/admin/users",
            get(admin::list_users).post(admin::provision_user),
        )
        .route(
            "/admin/users/:id",
            get(admin::get_user).patch(admin::update_user),
        )
        .route("/admin/tickets", get(admin::list_tickets))
        .route("/admin/tickets/:id", patch(admin::update_ticket))
        .layer(from_fn_with_state(state.clone(), require_admin))
        .layer(from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(admin_routes)
        .layer(from_fn_with_state(state.expose_error_detail, error_detail))
        .layer(cors(&state.frontend_url))
        .with_state(state)
}

