//! Router-level tests: status codes, error bodies and the auth gates

mod harness;

use std::net::SocketAddr;

use access::{
    accounts::ProvisionInput,
    create_router,
    models::{AccountStatus, Role},
};
use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode, header},
};
use harness::{PASSWORD, TestApp, captured_event, client_signature, webhook_signature};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

fn patch_json(uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::patch(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn signup(router: &Router, email: &str) -> Value {
    let (status, body) = send(
        router,
        post_json(
            "/auth/signup",
            None,
            json!({"email": email, "password": PASSWORD, "full_name": "A"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body
}

async fn login(router: &Router, email: &str) -> String {
    let (status, body) = send(
        router,
        post_json(
            "/auth/login",
            None,
            json!({"email": email, "password": PASSWORD}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["access_token"].as_str().unwrap().to_string()
}

async fn admin_token(app: &TestApp, router: &Router, role: Role) -> String {
    app.state
        .accounts
        .provision(ProvisionInput {
            email: Some("admin@x.com".to_string()),
            phone: None,
            full_name: "Admin".to_string(),
            password: Some(PASSWORD.to_string()),
            role,
        })
        .await
        .unwrap();
    login(router, "admin@x.com").await
}

#[tokio::test]
async fn health_is_public() {
    let app = TestApp::new();
    let router = create_router(app.state.clone());

    let (status, body) = send(&router, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn signup_login_and_profile() {
    let app = TestApp::new();
    let router = create_router(app.state.clone());

    let created = signup(&router, "a@x.com").await;
    assert_eq!(created["user"]["account_status"], "PENDING_PAYMENT");
    assert_eq!(created["token_type"], "Bearer");
    assert!(created["user"].get("password_hash").is_none());

    let token = login(&router, "a@x.com").await;
    let (status, profile) = send(&router, get("/auth/profile", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["email"], "a@x.com");

    let (status, body) = send(
        &router,
        post_json("/auth/signup", None, json!({"email": "a@x.com", "password": PASSWORD, "full_name": "A"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "CONFLICT");
}

#[tokio::test]
async fn bad_credentials_are_unauthorized() {
    let app = TestApp::new();
    let router = create_router(app.state.clone());
    signup(&router, "a@x.com").await;

    let (status, body) = send(
        &router,
        post_json(
            "/auth/login",
            None,
            json!({"email": "a@x.com", "password": "Wrong1!pass"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "UNAUTHORIZED");
}

#[tokio::test]
async fn protected_routes_need_a_valid_token() {
    let app = TestApp::new();
    let router = create_router(app.state.clone());

    let (status, _) = send(&router, get("/auth/profile", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&router, get("/payment/status", Some("not-a-jwt"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "INVALID_OR_EXPIRED_TOKEN");
}

#[tokio::test]
async fn refresh_returns_a_new_pair() {
    let app = TestApp::new();
    let router = create_router(app.state.clone());
    let created = signup(&router, "a@x.com").await;

    let (status, body) = send(
        &router,
        post_json(
            "/auth/refresh",
            None,
            json!({"refresh_token": created["refresh_token"]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(body["access_token"], created["access_token"]);

    let (status, _) = send(
        &router,
        post_json(
            "/auth/refresh",
            None,
            json!({"refresh_token": created["access_token"]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn send_otp_is_rate_limited_per_caller() {
    let app = TestApp::new();
    let router = create_router(app.state.clone());

    for _ in 0..3 {
        let (status, body) = send(
            &router,
            post_json(
                "/auth/send-otp",
                None,
                json!({"type": "email", "identifier": "a@x.com"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["delivered"], true);
    }

    let (status, body) = send(
        &router,
        post_json(
            "/auth/send-otp",
            None,
            json!({"type": "email", "identifier": "a@x.com"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "RATE_LIMITED");
    assert_eq!(app.outbox.count(), 3);
}

#[tokio::test]
async fn forged_forwarded_for_does_not_escape_the_send_otp_limit() {
    let app = TestApp::new();
    let router = create_router(app.state.clone());
    let peer: SocketAddr = "192.0.2.10:51000".parse().unwrap();

    let mut statuses = Vec::new();
    for i in 0..4 {
        let mut request = post_json(
            "/auth/send-otp",
            None,
            json!({"type": "email", "identifier": "a@x.com"}),
        );
        request.headers_mut().insert(
            "x-forwarded-for",
            format!("198.51.100.{i}").parse().unwrap(),
        );
        request.extensions_mut().insert(ConnectInfo(peer));

        let (status, body) = send(&router, request).await;
        if status == StatusCode::TOO_MANY_REQUESTS {
            assert_eq!(body["error"], "RATE_LIMITED");
        }
        statuses.push(status);
    }

    assert_eq!(
        statuses,
        vec![
            StatusCode::OK,
            StatusCode::OK,
            StatusCode::OK,
            StatusCode::TOO_MANY_REQUESTS
        ]
    );
    assert_eq!(app.outbox.count(), 3);
}

#[tokio::test]
async fn verify_otp_marks_the_account_verified() {
    let app = TestApp::new();
    let router = create_router(app.state.clone());
    signup(&router, "a@x.com").await;

    send(
        &router,
        post_json(
            "/auth/send-otp",
            None,
            json!({"type": "email", "identifier": "A@x.com"}),
        ),
    )
    .await;
    let code = app.outbox.last_code_for("a@x.com").unwrap();

    let (status, body) = send(
        &router,
        post_json(
            "/auth/verify-otp",
            None,
            json!({"type": "email", "identifier": "a@x.com", "code": code}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["verified"], true);
    assert_eq!(body["user"]["email_verified"], true);
    assert!(body["access_token"].is_string());

    let (status, body) = send(
        &router,
        post_json(
            "/auth/verify-otp",
            None,
            json!({"type": "email", "identifier": "a@x.com", "code": code}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "ALREADY_USED");
}

#[tokio::test]
async fn suspended_account_spends_the_code_without_signing_in() {
    let app = TestApp::new();
    let router = create_router(app.state.clone());
    let created = signup(&router, "a@x.com").await;
    let user_id: uuid::Uuid = created["user"]["id"].as_str().unwrap().parse().unwrap();
    app.state
        .accounts
        .change_status(user_id, AccountStatus::Suspended)
        .await
        .unwrap();

    let (status, _) = send(
        &router,
        post_json(
            "/auth/send-otp",
            None,
            json!({"type": "email", "identifier": "a@x.com"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let code = app.outbox.last_code_for("a@x.com").unwrap();

    let verify = json!({"type": "email", "identifier": "a@x.com", "code": code});
    let (status, body) = send(&router, post_json("/auth/verify-otp", None, verify.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");

    let (status, body) = send(&router, post_json("/auth/verify-otp", None, verify)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "ALREADY_USED");

    let user = app.state.accounts.find_for_audit(user_id).await.unwrap();
    assert!(!user.email_verified);
}

#[tokio::test]
async fn google_login_creates_an_account() {
    let app = TestApp::new();
    let router = create_router(app.state.clone());

    let (status, body) = send(
        &router,
        post_json(
            "/auth/google-login",
            None,
            json!({"credential": "good:google-1:g@x.com"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["created"], true);
    assert_eq!(body["user"]["registration_method"], "external");

    let (status, body) = send(
        &router,
        post_json("/auth/google-login", None, json!({"token": "bogus"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "UNAUTHORIZED");
}

#[tokio::test]
async fn payment_flow_over_http() {
    let app = TestApp::new();
    let router = create_router(app.state.clone());
    signup(&router, "a@x.com").await;
    let token = login(&router, "a@x.com").await;

    let (status, order) = send(
        &router,
        post_json("/payment/create-order", Some(&token), json!({"amount": 119900})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    let order_id = order["order_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &router,
        post_json(
            "/payment/verify",
            Some(&token),
            json!({
                "record_id": order["record_id"],
                "gateway_order_id": order_id,
                "gateway_payment_id": "pay_1",
                "signature": "bad",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_SIGNATURE");

    let (status, body) = send(
        &router,
        post_json(
            "/payment/verify",
            Some(&token),
            json!({
                "record_id": order["record_id"],
                "gateway_order_id": order_id,
                "gateway_payment_id": "pay_1",
                "signature": client_signature(&order_id, "pay_1"),
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["account_status"], "ACTIVE");
    assert_eq!(body["order"]["status"], "captured");

    let (_, status_body) = send(&router, get("/payment/status", Some(&token))).await;
    assert_eq!(status_body["has_paid"], true);

    let (_, history) = send(&router, get("/payment/history", Some(&token))).await;
    assert_eq!(history.as_array().unwrap().len(), 1);

    let (status, _) = send(
        &router,
        post_json("/payment/create-order", Some(&token), json!({"amount": 1000})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webhook_requires_a_valid_signature() {
    let app = TestApp::new();
    let router = create_router(app.state.clone());
    let body = captured_event("order_unknown", "pay_1");

    let request = Request::post("/payment/webhook")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-razorpay-signature", "deadbeef")
        .body(Body::from(body.clone()))
        .unwrap();
    let (status, response) = send(&router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "INVALID_SIGNATURE");

    let request = Request::post("/payment/webhook")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-razorpay-signature", webhook_signature(&body))
        .body(Body::from(body))
        .unwrap();
    let (status, response) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["status"], "ok");
    assert_eq!(response["outcome"], "ignored");
}

#[tokio::test]
async fn admin_routes_check_the_live_role() {
    let app = TestApp::new();
    let router = create_router(app.state.clone());
    let created = signup(&router, "a@x.com").await;
    let user_token = login(&router, "a@x.com").await;

    let (status, body) = send(&router, get("/admin/users", Some(&user_token))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "FORBIDDEN");

    let admin = admin_token(&app, &router, Role::Admin).await;
    let (status, users) = send(&router, get("/admin/users", Some(&admin))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(users.as_array().unwrap().len(), 2);

    let user_id = created["user"]["id"].as_str().unwrap();
    let (status, body) = send(
        &router,
        patch_json(
            &format!("/admin/users/{user_id}"),
            &admin,
            json!({"account_status": "SUSPENDED"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["account_status"], "SUSPENDED");

    let (status, _) = send(&router, get("/auth/profile", Some(&user_token))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &router,
        patch_json(
            &format!("/admin/users/{user_id}"),
            &admin,
            json!({"role": "admin"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
}

#[tokio::test]
async fn admin_update_is_all_or_nothing() {
    let app = TestApp::new();
    let router = create_router(app.state.clone());
    let created = signup(&router, "a@x.com").await;
    let user_id = created["user"]["id"].as_str().unwrap();
    let root = admin_token(&app, &router, Role::SuperAdmin).await;

    let (status, body) = send(
        &router,
        patch_json(
            &format!("/admin/users/{user_id}"),
            &root,
            json!({"role": "admin", "account_status": "ACTIVE"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, body) = send(&router, get(&format!("/admin/users/{user_id}"), Some(&root))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "user");
    assert_eq!(body["account_status"], "PENDING_PAYMENT");
}

#[tokio::test]
async fn admin_gate_requires_a_live_session() {
    let app = TestApp::new();
    let router = create_router(app.state.clone());
    let admin = admin_token(&app, &router, Role::SuperAdmin).await;

    let (status, _) = send(&router, post_json("/auth/logout", Some(&admin), json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&router, get("/admin/users", Some(&admin))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "INVALID_OR_EXPIRED_TOKEN");
}

#[tokio::test]
async fn support_tickets_round_trip_through_admin() {
    let app = TestApp::new();
    let router = create_router(app.state.clone());
    signup(&router, "a@x.com").await;
    let token = login(&router, "a@x.com").await;

    let (status, ticket) = send(
        &router,
        post_json(
            "/support/tickets",
            Some(&token),
            json!({"subject": "Payment stuck", "message": "Charged but still pending"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{ticket}");
    assert_eq!(ticket["status"], "open");

    let admin = admin_token(&app, &router, Role::Admin).await;
    let ticket_id = ticket["id"].as_str().unwrap();
    let (status, updated) = send(
        &router,
        patch_json(
            &format!("/admin/tickets/{ticket_id}"),
            &admin,
            json!({"status": "resolved", "admin_note": "Reconciled"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{updated}");
    assert_eq!(updated["status"], "resolved");

    let (_, mine) = send(&router, get("/support/tickets", Some(&token))).await;
    assert_eq!(mine[0]["admin_note"], "Reconciled");

    let (_, open) = send(&router, get("/admin/tickets?status=open", Some(&admin))).await;
    assert!(open.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn webhook_capture_shows_up_in_status() {
    let app = TestApp::new();
    let router = create_router(app.state.clone());
    signup(&router, "a@x.com").await;
    let token = login(&router, "a@x.com").await;

    let (_, order) = send(
        &router,
        post_json("/payment/create-order", Some(&token), json!({"amount": 119900})),
    )
    .await;
    let body = captured_event(order["order_id"].as_str().unwrap(), "pay_w");
    let request = Request::post("/payment/webhook")
        .header("x-razorpay-signature", webhook_signature(&body))
        .body(Body::from(body))
        .unwrap();
    let (status, response) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["outcome"], "applied");

    let (_, status_body) = send(&router, get("/payment/status", Some(&token))).await;
    assert_eq!(status_body["has_paid"], true);
    assert_eq!(status_body["account_status"], "ACTIVE");
}
