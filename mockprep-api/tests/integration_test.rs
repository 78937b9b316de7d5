use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use mockprep_api::middleware::auth::{issue_token, ROLE_ADMIN, ROLE_CUSTOMER};
use mockprep_api::state::{AppState, AuthConfig, Collaborators, Repositories};
use mockprep_api::{app, worker};
use mockprep_booking::{BookingPolicy, HmacPaymentGateway, MemoryFlowStore};
use mockprep_core::memory::MemoryStore;
use mockprep_core::models::{Service, Slot};
use mockprep_core::notify::LogNotifier;
use mockprep_core::{Clock, ManualClock};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const JWT_SECRET: &str = "test-jwt-secret";
const WEBHOOK_SECRET: &str = "whsec_test";

struct TestApp {
    router: Router,
    state: AppState,
    clock: Arc<ManualClock>,
    gateway: HmacPaymentGateway,
}

fn service(id: &str) -> Service {
    Service {
        id: id.to_string(),
        name: "UPSC personality test mock".to_string(),
        price: 250000,
        features: vec!["Three member panel".into(), "Recorded feedback".into()],
        is_bookable: true,
        has_details_page: true,
        resources: vec![],
        position: 1,
    }
}

async fn setup() -> TestApp {
    let store = Arc::new(MemoryStore::with_services(vec![service("upsc-mock")]).await);
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let repos = Repositories::in_memory(store);

    let deps = Collaborators {
        flows: Arc::new(MemoryFlowStore::new()),
        payments: Arc::new(HmacPaymentGateway::new(WEBHOOK_SECRET)),
        notifier: Arc::new(LogNotifier),
        clock: clock.clone(),
    };
    let state = AppState::new(
        &repos,
        deps,
        BookingPolicy::default(),
        AuthConfig { secret: JWT_SECRET.to_string(), expiration: 3600 },
    );

    TestApp {
        router: app(state.clone()),
        state,
        clock,
        gateway: HmacPaymentGateway::new(WEBHOOK_SECRET),
    }
}

impl TestApp {
    async fn slot(&self, capacity: u32) -> Slot {
        self.state
            .orchestrator
            .availability()
            .create_slot("upsc-mock", self.clock.now() + Duration::days(2), capacity)
            .await
            .unwrap()
    }

    async fn send(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        self.send_with(method, uri, token, body, &[]).await
    }

    async fn send_with(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, value)
    }

    /// Walks a flow up to PaymentPending and returns (flow id, intent id).
    async fn flow_awaiting_payment(&self, token: &str, slot: &Slot) -> (String, String) {
        let (status, flow) = self
            .send(Method::POST, "/v1/flows", Some(token), Some(json!({ "service_id": "upsc-mock" })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let flow_id = flow["id"].as_str().unwrap().to_string();

        let (status, _) = self
            .send(
                Method::POST,
                &format!("/v1/flows/{}/hold", flow_id),
                Some(token),
                Some(json!({ "slot_id": slot.id })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = self
            .send(Method::POST, &format!("/v1/flows/{}/details", flow_id), Some(token), Some(details()))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, flow) = self
            .send(Method::POST, &format!("/v1/flows/{}/payment-intent", flow_id), Some(token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(flow["stage"], "payment_pending");

        (flow_id, flow["intent"]["id"].as_str().unwrap().to_string())
    }
}

fn customer(sub: &str) -> String {
    issue_token(JWT_SECRET, sub, ROLE_CUSTOMER, 3600).unwrap()
}

fn admin() -> String {
    issue_token(JWT_SECRET, "admin-1", ROLE_ADMIN, 3600).unwrap()
}

fn details() -> Value {
    json!({
        "name": "Asha Verma",
        "email": "Asha.Verma@example.com",
        "phone": "+91 98765 43210",
        "exam_applied": "UPSC CSE 2026",
        "prior_attempts": 1
    })
}

#[tokio::test]
async fn test_health_and_catalog_are_public() {
    let app = setup().await;

    let (status, body) = app.send(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = app.send(Method::GET, "/v1/services", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["id"], "upsc-mock");

    let (status, body) = app.send(Method::GET, "/v1/services/missing", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("missing"));
}

#[tokio::test]
async fn test_slot_listing_hides_full_slots() {
    let app = setup().await;
    let open = app.slot(2).await;
    let tight = app.slot(1).await;

    let token = customer("user-1");
    let (_, flow) = app
        .send(Method::POST, "/v1/flows", Some(&token), Some(json!({ "service_id": "upsc-mock" })))
        .await;
    let (status, _) = app
        .send(
            Method::POST,
            &format!("/v1/flows/{}/hold", flow["id"].as_str().unwrap()),
            Some(&token),
            Some(json!({ "slot_id": tight.id })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, slots) = app.send(Method::GET, "/v1/services/upsc-mock/slots", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let slots = slots.as_array().unwrap();
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0]["id"], open.id.to_string());
    assert_eq!(slots[0]["remaining"], 2);
}

#[tokio::test]
async fn test_customer_routes_require_a_token() {
    let app = setup().await;

    let (status, _) = app
        .send(Method::POST, "/v1/flows", None, Some(json!({ "service_id": "upsc-mock" })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send(Method::GET, "/v1/me/bookings", Some("not-a-jwt"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.send(Method::GET, "/v1/admin/overview", Some(&customer("user-1")), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_paid_flow_end_to_end() {
    let app = setup().await;
    let slot = app.slot(3).await;
    let token = customer("user-1");

    let (flow_id, intent_id) = app.flow_awaiting_payment(&token, &slot).await;

    let signature = app.gateway.sign(&intent_id, "txn_001", "captured").unwrap();
    let webhook = json!({
        "intent_id": intent_id,
        "reference_id": flow_id,
        "transaction_id": "txn_001",
        "status": "captured"
    });
    let (status, ack) = app
        .send_with(
            Method::POST,
            "/v1/webhooks/payments",
            None,
            Some(webhook.clone()),
            &[("x-signature", signature.as_str())],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "upcoming");
    assert_eq!(ack["payment_status"], "paid");

    // A redelivered webhook returns the same booking
    let (status, replay) = app
        .send_with(Method::POST, "/v1/webhooks/payments", None, Some(webhook), &[("x-signature", signature.as_str())])
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replay["booking_id"], ack["booking_id"]);

    let (status, flow) = app.send(Method::GET, &format!("/v1/flows/{}", flow_id), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(flow["stage"], "confirmed");
    assert_eq!(flow["booking_id"], ack["booking_id"]);

    let (status, bookings) = app.send(Method::GET, "/v1/me/bookings", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let bookings = bookings.as_array().unwrap();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0]["contact"]["email"], "asha.verma@example.com");
    assert_eq!(bookings[0]["transaction_id"], "txn_001");
    assert!(bookings[0]["meeting_link"].as_str().unwrap().starts_with("https://"));

    let slot = app.state.orchestrator.availability().get_slot(slot.id).await.unwrap();
    assert_eq!((slot.held, slot.confirmed), (0, 1));
}

#[tokio::test]
async fn test_tampered_signature_keeps_the_hold() {
    let app = setup().await;
    let slot = app.slot(1).await;
    let token = customer("user-1");
    let (flow_id, intent_id) = app.flow_awaiting_payment(&token, &slot).await;

    // Signed for a different transaction than the one claimed
    let forged = app.gateway.sign(&intent_id, "txn_other", "captured").unwrap();
    let (status, _) = app
        .send_with(
            Method::POST,
            "/v1/webhooks/payments",
            None,
            Some(json!({
                "intent_id": intent_id,
                "reference_id": flow_id,
                "transaction_id": "txn_001",
                "status": "captured"
            })),
            &[("x-signature", forged.as_str())],
        )
        .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);

    let (_, flow) = app.send(Method::GET, &format!("/v1/flows/{}", flow_id), Some(&token), None).await;
    assert_eq!(flow["stage"], "payment_pending");
    assert_eq!(flow["payment_attempts"], 0);

    let slot = app.state.orchestrator.availability().get_slot(slot.id).await.unwrap();
    assert_eq!((slot.held, slot.confirmed), (1, 0));
}

#[tokio::test]
async fn test_missing_signature_header_is_rejected() {
    let app = setup().await;
    let (status, _) = app
        .send(
            Method::POST,
            "/v1/webhooks/payments",
            None,
            Some(json!({
                "intent_id": "pi_1",
                "reference_id": "00000000-0000-0000-0000-000000000000",
                "transaction_id": "txn_1",
                "status": "captured"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_second_user_gets_slot_full() {
    let app = setup().await;
    let slot = app.slot(1).await;

    for (user, expected) in [("user-1", StatusCode::OK), ("user-2", StatusCode::CONFLICT)] {
        let token = customer(user);
        let (_, flow) = app
            .send(Method::POST, "/v1/flows", Some(&token), Some(json!({ "service_id": "upsc-mock" })))
            .await;
        let (status, _) = app
            .send(
                Method::POST,
                &format!("/v1/flows/{}/hold", flow["id"].as_str().unwrap()),
                Some(&token),
                Some(json!({ "slot_id": slot.id })),
            )
            .await;
        assert_eq!(status, expected, "hold for {}", user);
    }
}

#[tokio::test]
async fn test_lapsed_hold_is_gone() {
    let app = setup().await;
    let slot = app.slot(1).await;
    let token = customer("user-1");

    let (_, flow) = app
        .send(Method::POST, "/v1/flows", Some(&token), Some(json!({ "service_id": "upsc-mock" })))
        .await;
    let flow_id = flow["id"].as_str().unwrap().to_string();
    app.send(
        Method::POST,
        &format!("/v1/flows/{}/hold", flow_id),
        Some(&token),
        Some(json!({ "slot_id": slot.id })),
    )
    .await;

    app.clock.advance(Duration::minutes(16));

    let (status, _) = app
        .send(Method::POST, &format!("/v1/flows/{}/details", flow_id), Some(&token), Some(details()))
        .await;
    assert_eq!(status, StatusCode::GONE);

    let (_, flow) = app.send(Method::GET, &format!("/v1/flows/{}", flow_id), Some(&token), None).await;
    assert_eq!(flow["stage"], "hold_expired");
    assert!(flow["expires_at"].is_null());
}

#[tokio::test]
async fn test_other_users_cannot_touch_a_flow() {
    let app = setup().await;
    let (_, flow) = app
        .send(
            Method::POST,
            "/v1/flows",
            Some(&customer("user-1")),
            Some(json!({ "service_id": "upsc-mock" })),
        )
        .await;

    let (status, _) = app
        .send(
            Method::GET,
            &format!("/v1/flows/{}", flow["id"].as_str().unwrap()),
            Some(&customer("user-2")),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_pay_later_then_admin_settles() {
    let app = setup().await;
    let slot = app.slot(2).await;
    let token = customer("user-1");

    let (_, flow) = app
        .send(Method::POST, "/v1/flows", Some(&token), Some(json!({ "service_id": "upsc-mock" })))
        .await;
    let flow_id = flow["id"].as_str().unwrap().to_string();
    app.send(
        Method::POST,
        &format!("/v1/flows/{}/hold", flow_id),
        Some(&token),
        Some(json!({ "slot_id": slot.id })),
    )
    .await;
    app.send(Method::POST, &format!("/v1/flows/{}/details", flow_id), Some(&token), Some(details()))
        .await;

    let (status, booking) = app
        .send(Method::POST, &format!("/v1/flows/{}/pay-later", flow_id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(booking["payment_status"], "pay_later");
    assert_eq!(booking["status"], "pending_approval");
    let booking_id = booking["id"].as_str().unwrap().to_string();

    let admin = admin();
    let (status, overview) = app.send(Method::GET, "/v1/admin/overview", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(overview["pending_approval"], 1);
    assert_eq!(overview["outstanding_pay_later"], 250000);

    let (status, settled) = app
        .send(
            Method::POST,
            &format!("/v1/admin/bookings/{}/payment-status", booking_id),
            Some(&admin),
            Some(json!({ "payment_status": "paid", "transaction_id": "cash_17" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(settled["payment_status"], "paid");
    assert_eq!(settled["status"], "upcoming");

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/v1/admin/bookings/{}/status", booking_id),
            Some(&admin),
            Some(json!({ "status": "pending_approval" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_customer_cancellation_releases_the_unit() {
    let app = setup().await;
    let slot = app.slot(1).await;
    let token = customer("user-1");
    let (flow_id, intent_id) = app.flow_awaiting_payment(&token, &slot).await;

    let signature = app.gateway.sign(&intent_id, "txn_9", "succeeded").unwrap();
    let (_, ack) = app
        .send_with(
            Method::POST,
            "/v1/webhooks/payments",
            None,
            Some(json!({
                "intent_id": intent_id,
                "reference_id": flow_id,
                "transaction_id": "txn_9",
                "status": "succeeded"
            })),
            &[("x-signature", signature.as_str())],
        )
        .await;
    let booking_id = ack["booking_id"].as_str().unwrap().to_string();

    let (status, _) = app
        .send(Method::POST, &format!("/v1/me/bookings/{}/cancel", booking_id), Some(&customer("user-2")), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send(Method::POST, &format!("/v1/me/bookings/{}/cancel", booking_id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["capacity_released"], true);
    assert_eq!(body["booking"]["status"], "cancelled");

    let (status, _) = app
        .send(Method::POST, &format!("/v1/me/bookings/{}/cancel", booking_id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let slot = app.state.orchestrator.availability().get_slot(slot.id).await.unwrap();
    assert_eq!(slot.confirmed, 0);
}

#[tokio::test]
async fn test_admin_manages_catalog_and_slots() {
    let app = setup().await;
    let admin = admin();

    let mut mentorship = serde_json::to_value(service("mentorship-call")).unwrap();
    mentorship["name"] = json!("One-to-one mentorship call");
    mentorship["resources"] = json!([
        { "type": "document", "title": "DAF checklist", "url": "https://cdn.example.com/daf.pdf" }
    ]);

    let (status, _) = app
        .send(Method::PUT, "/v1/admin/services/other-id", Some(&admin), Some(mentorship.clone()))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, saved) = app
        .send(Method::PUT, "/v1/admin/services/mentorship-call", Some(&admin), Some(mentorship))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saved["resources"][0]["type"], "document");

    let starts_at = app.clock.now() + Duration::days(5);
    let (status, slot) = app
        .send(
            Method::POST,
            "/v1/admin/services/mentorship-call/slots",
            Some(&admin),
            Some(json!({ "starts_at": starts_at, "capacity": 4 })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(slot["remaining"], 4);

    let (status, _) = app
        .send(
            Method::DELETE,
            &format!("/v1/admin/slots/{}", slot["id"].as_str().unwrap()),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, slots) = app.send(Method::GET, "/v1/services/mentorship-call/slots", None, None).await;
    assert!(slots.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_content_round() {
    let app = setup().await;
    let admin = admin();

    let (status, _) = app
        .send(
            Method::POST,
            "/v1/messages",
            None,
            Some(json!({ "name": "Ravi", "email": "not-an-email", "message": "Hello" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send(
            Method::POST,
            "/v1/messages",
            None,
            Some(json!({ "name": "Ravi", "email": "ravi@example.com", "message": "Do you cover SSB?" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, messages) = app.send(Method::GET, "/v1/admin/messages", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(messages[0]["email"], "ravi@example.com");

    let (status, _) = app
        .send(
            Method::POST,
            "/v1/admin/testimonials",
            Some(&admin),
            Some(json!({ "author": "Meera", "quote": "The panel felt real.", "rating": 9 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send(
            Method::POST,
            "/v1/admin/testimonials",
            Some(&admin),
            Some(json!({ "author": "Meera", "quote": "The panel felt real.", "rating": 5 })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let (_, testimonials) = app.send(Method::GET, "/v1/testimonials", None, None).await;
    assert_eq!(testimonials.as_array().unwrap().len(), 1);

    let (status, _) = app
        .send(
            Method::POST,
            "/v1/admin/blog",
            Some(&admin),
            Some(json!({
                "slug": "daf-prep",
                "title": "Preparing your DAF",
                "summary": "What panels ask about",
                "body": "Start with your hobbies."
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, post) = app.send(Method::GET, "/v1/blog/daf-prep", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(post["title"], "Preparing your DAF");

    let (status, _) = app.send(Method::GET, "/v1/blog/unknown", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_sweeper_reclaims_lapsed_holds() {
    let app = setup().await;
    let slot = app.slot(1).await;
    app.state.orchestrator.reservations().create_hold(slot.id, "user-1").await.unwrap();

    app.clock.advance(Duration::minutes(20));
    let report = worker::sweep_once(&app.state.orchestrator).await;
    assert_eq!(report.expired_holds, 1);
    assert_eq!(report.lapsed_pay_later, 0);

    let report = worker::sweep_once(&app.state.orchestrator).await;
    assert_eq!(report, worker::SweepReport::default());
}

#[tokio::test]
async fn test_second_flow_on_held_slot_is_conflict() {
    let app = setup().await;
    let slot = app.slot(2).await;
    let token = customer("user-1");
    let (first_id, intent_id) = app.flow_awaiting_payment(&token, &slot).await;

    let (_, second) = app
        .send(Method::POST, "/v1/flows", Some(&token), Some(json!({ "service_id": "upsc-mock" })))
        .await;
    let second_id = second["id"].as_str().unwrap().to_string();
    let (status, body) = app
        .send(
            Method::POST,
            &format!("/v1/flows/{}/hold", second_id),
            Some(&token),
            Some(json!({ "slot_id": slot.id })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].is_string());

    let (status, _) = app.send(Method::DELETE, &format!("/v1/flows/{}", second_id), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let signature = app.gateway.sign(&intent_id, "txn_first", "captured").unwrap();
    let (status, ack) = app
        .send_with(
            Method::POST,
            "/v1/webhooks/payments",
            None,
            Some(json!({
                "intent_id": intent_id,
                "reference_id": first_id,
                "transaction_id": "txn_first",
                "status": "captured"
            })),
            &[("x-signature", signature.as_str())],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["payment_status"], "paid");
}

#[tokio::test]
async fn test_capture_after_pay_later_marks_booking_paid() {
    let app = setup().await;
    let slot = app.slot(1).await;
    let token = customer("user-1");
    let (flow_id, intent_id) = app.flow_awaiting_payment(&token, &slot).await;

    let (status, booking) = app
        .send(Method::POST, &format!("/v1/flows/{}/pay-later", flow_id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(booking["payment_status"], "pay_later");

    let signature = app.gateway.sign(&intent_id, "txn_late", "captured").unwrap();
    let (status, ack) = app
        .send_with(
            Method::POST,
            "/v1/webhooks/payments",
            None,
            Some(json!({
                "intent_id": intent_id,
                "reference_id": flow_id,
                "transaction_id": "txn_late",
                "status": "captured"
            })),
            &[("x-signature", signature.as_str())],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["booking_id"], booking["id"]);
    assert_eq!(ack["status"], "upcoming");
    assert_eq!(ack["payment_status"], "paid");
}
