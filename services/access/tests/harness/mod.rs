//! Shared harness for the access service integration tests
//!
//! Builds an [`AppState`] over the in-memory store with fakes for every
//! outbound collaborator. The Redis handle points at a closed port; only the
//! redirect OAuth flow would touch it.

#![allow(dead_code)]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use access::{
    AppState, Collaborators,
    config::{AppConfig, Environment, StorageBackend},
    identity::{ExternalIdentity, IdentityError, IdentityVerifier},
    jwt::JwtConfig,
    oauth::GoogleConfig,
    otp::{
        OtpConfig, OtpSenders,
        sender::{OtpSender, SendError, SenderConfig},
    },
    payment::{
        PaymentConfig,
        gateway::{GatewayError, GatewayOrder, GatewayOrderRequest, PaymentGateway},
        signature,
    },
    store::{MemoryStore, Store},
};
use async_trait::async_trait;
use common::cache::{RedisConfig, RedisPool};

pub const KEY_SECRET: &str = "test-key-secret";
pub const WEBHOOK_SECRET: &str = "test-webhook-secret";
pub const PASSWORD: &str = "Aa1!aaaa";

/// Records every code it is asked to deliver
#[derive(Default)]
pub struct Outbox {
    sent: Mutex<Vec<(String, String)>>,
}

impl Outbox {
    pub fn last_code_for(&self, recipient: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(to, _)| to == recipient)
            .map(|(_, code)| code.clone())
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl OtpSender for Outbox {
    async fn send(&self, recipient: &str, code: &str, _ttl_minutes: i64) -> Result<(), SendError> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), code.to_string()));
        Ok(())
    }
}

/// Gateway that hands out sequential order ids, or fails on demand
#[derive(Default)]
pub struct FakeGateway {
    next: AtomicUsize,
    failing: AtomicBool,
}

impl FakeGateway {
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_order(&self, request: &GatewayOrderRequest) -> Result<GatewayOrder, GatewayError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                status: 503,
                body: "gateway unavailable".to_string(),
            });
        }
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(GatewayOrder {
            id: format!("order_test{n:04}"),
            amount: request.amount,
            currency: request.currency.clone(),
        })
    }
}

/// Accepts `good:<external id>:<email>` and `unverified:<external id>:<email>` tokens
pub struct FakeIdentity;

#[async_trait]
impl IdentityVerifier for FakeIdentity {
    async fn verify_assertion(&self, token: &str) -> Result<ExternalIdentity, IdentityError> {
        let mut parts = token.splitn(3, ':');
        let (Some(kind), Some(external_id), Some(email)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(IdentityError::InvalidAssertion("malformed test token".to_string()));
        };
        let email_verified = match kind {
            "good" => true,
            "unverified" => false,
            _ => return Err(IdentityError::InvalidAssertion("rejected".to_string())),
        };

        Ok(ExternalIdentity {
            external_id: external_id.to_string(),
            email: Some(email.to_string()),
            name: Some("Google User".to_string()),
            avatar_url: None,
            email_verified,
        })
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        environment: Environment::Development,
        bind_addr: "127.0.0.1:0".to_string(),
        frontend_url: "http://localhost:5173".to_string(),
        trusted_proxy_hops: 0,
        expose_error_detail: false,
        storage: StorageBackend::Memory,
        sweep_schedule: "0 */10 * * * *".to_string(),
        jwt: JwtConfig {
            access_secret: "test-access-secret".to_string(),
            refresh_secret: "test-refresh-secret".to_string(),
            issuer: "college-finder-access".to_string(),
            access_token_expiry: 3600,
            refresh_token_expiry: 604_800,
        },
        otp: OtpConfig::default(),
        senders: SenderConfig::default(),
        payment: PaymentConfig {
            key_id: "rzp_test_key".to_string(),
            key_secret: KEY_SECRET.to_string(),
            webhook_secret: WEBHOOK_SECRET.to_string(),
            api_url: "http://127.0.0.1:1".to_string(),
            currency: "INR".to_string(),
            timeout_seconds: 1,
        },
        google: GoogleConfig {
            client_id: "test-client.apps.googleusercontent.com".to_string(),
            client_secret: "test-client-secret".to_string(),
            redirect_url: "http://localhost:3000/auth/google/callback".to_string(),
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            userinfo_url: "https://www.googleapis.com/oauth2/v2/userinfo".to_string(),
            certs_url: "https://www.googleapis.com/oauth2/v3/certs".to_string(),
        },
    }
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<dyn Store>,
    pub outbox: Arc<Outbox>,
    pub gateway: Arc<FakeGateway>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let outbox = Arc::new(Outbox::default());
        let gateway = Arc::new(FakeGateway::default());
        let redis = RedisPool::new(&RedisConfig {
            url: "redis://127.0.0.1:1".to_string(),
            key_prefix: "access-test".to_string(),
        })
        .unwrap();

        let state = AppState::new(
            &config,
            Collaborators {
                store: store.clone(),
                senders: OtpSenders {
                    email: outbox.clone(),
                    sms: outbox.clone(),
                },
                gateway: gateway.clone(),
                identity: Arc::new(FakeIdentity),
                redis,
            },
        )
        .unwrap();

        Self {
            state,
            store,
            outbox,
            gateway,
        }
    }
}

/// Signature the gateway would hand the client for this order/payment pair
pub fn client_signature(gateway_order_id: &str, gateway_payment_id: &str) -> String {
    let message = signature::payment_message(gateway_order_id, gateway_payment_id);
    signature::sign(KEY_SECRET.as_bytes(), message.as_bytes())
}

/// Signature the gateway puts on a webhook body
pub fn webhook_signature(body: &str) -> String {
    signature::sign(WEBHOOK_SECRET.as_bytes(), body.as_bytes())
}

pub fn captured_event(gateway_order_id: &str, gateway_payment_id: &str) -> String {
    serde_json::json!({
        "event": "payment.captured",
        "payload": {
            "payment": {
                "entity": {
                    "id": gateway_payment_id,
                    "order_id": gateway_order_id,
                }
            }
        }
    })
    .to_string()
}

pub fn failed_event(gateway_order_id: &str, gateway_payment_id: &str) -> String {
    serde_json::json!({
        "event": "payment.failed",
        "payload": {
            "payment": {
                "entity": {
                    "id": gateway_payment_id,
                    "order_id": gateway_order_id,
                    "error_description": "card declined",
                }
            }
        }
    })
    .to_string()
}
