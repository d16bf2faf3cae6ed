//! Access service: accounts, one-time passcodes, sessions, Google sign-in,
//! paid activation and support tickets for the college finder.
//!
//! Components are plain structs around an `Arc<dyn Store>`; the HTTP layer in
//! [`routes`] only translates requests into component calls. Everything that
//! talks to the outside world (OTP delivery, the payment gateway, Google) sits
//! behind a trait so tests can swap it out.

use std::sync::Arc;

use common::cache::RedisPool;

pub mod accounts;
pub mod config;
pub mod error;
pub mod identity;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod oauth;
pub mod otp;
pub mod payment;
pub mod rate_limiter;
pub mod routes;
pub mod store;
pub mod support;
pub mod sweeper;
pub mod validation;

pub use routes::create_router;

use crate::{
    accounts::AccountService,
    config::AppConfig,
    identity::{IdentityLinker, IdentityVerifier},
    jwt::TokenIssuer,
    oauth::{GoogleOAuth, OAuthError},
    otp::{OtpEngine, OtpSenders},
    payment::{PaymentEngine, gateway::PaymentGateway, webhook::WebhookReconciler},
    rate_limiter::{RateLimiter, RateLimiterConfig},
    store::Store,
    support::SupportDesk,
};

/// External collaborators the service is wired to
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn Store>,
    pub senders: OtpSenders,
    pub gateway: Arc<dyn PaymentGateway>,
    pub identity: Arc<dyn IdentityVerifier>,
    pub redis: RedisPool,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub accounts: AccountService,
    pub tokens: TokenIssuer,
    pub otp: OtpEngine,
    pub identity: Arc<dyn IdentityVerifier>,
    pub linker: IdentityLinker,
    pub oauth: GoogleOAuth,
    pub payments: PaymentEngine,
    pub webhooks: WebhookReconciler,
    pub support: SupportDesk,
    pub rate_limiter: RateLimiter,
    pub frontend_url: String,
    pub trusted_proxy_hops: usize,
    pub expose_error_detail: bool,
}

impl AppState {
    pub fn new(config: &AppConfig, collaborators: Collaborators) -> Result<Self, OAuthError> {
        let Collaborators {
            store,
            senders,
            gateway,
            identity,
            redis,
        } = collaborators;

        let tokens = TokenIssuer::new(config.jwt.clone(), store.clone());
        let rate_limiter = RateLimiter::new(RateLimiterConfig {
            max_requests: config.otp.rate_limit_max,
            window_seconds: config.otp.rate_limit_window_seconds,
        });

        Ok(AppState {
            accounts: AccountService::new(store.clone()),
            otp: OtpEngine::new(store.clone(), senders, config.otp.clone()),
            identity,
            linker: IdentityLinker::new(store.clone(), tokens.clone()),
            oauth: GoogleOAuth::new(&config.google, redis)?,
            payments: PaymentEngine::new(store.clone(), gateway, config.payment.clone()),
            webhooks: WebhookReconciler::new(store.clone(), config.payment.webhook_secret.clone()),
            support: SupportDesk::new(store),
            tokens,
            rate_limiter,
            frontend_url: config.frontend_url.clone(),
            trusted_proxy_hops: config.trusted_proxy_hops,
            expose_error_detail: config.expose_error_detail,
        })
    }
}
