//! Payment gateway flows: signature checks on intake and verify, settling an
//! existing order, and the HTTP gateway client.

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use common::{cod_order, gateway_signature, response_json, TestApp, GATEWAY_KEY_ID, GATEWAY_SECRET};
use rust_decimal_macros::dec;
use sea_orm::{EntityTrait, PaginatorTrait};
use serde_json::json;
use storefront_orders::{
    entities::{Order, PaymentMethod, PaymentStatus},
    errors::ServiceError,
    services::payments::{
        sign, verify_signature, GatewayOrderRequest, HttpPaymentGateway, PaymentGateway,
        VerifiedPayment,
    },
};
use wiremock::{
    matchers::{basic_auth, body_json, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn gateway_checkout(extra: serde_json::Value) -> serde_json::Value {
    let mut payload = json!({
        "items": [{"productId": "p1", "title": "Chili Powder", "price": 100, "quantity": 2}],
        "address": {"phone": "+91 98765 43210"},
        "subtotal": 200,
        "tax": 10,
        "total": 210,
        "paymentMethod": "gateway"
    });
    if let (Some(target), Some(fields)) = (payload.as_object_mut(), extra.as_object()) {
        for (k, v) in fields {
            target.insert(k.clone(), v.clone());
        }
    }
    payload
}

#[test]
fn signature_round_trip_and_tamper() {
    let signature = sign("order_abc", "pay_123", GATEWAY_SECRET).unwrap();
    assert!(verify_signature("order_abc", "pay_123", &signature, GATEWAY_SECRET));
    assert!(!verify_signature("order_abc", "pay_124", &signature, GATEWAY_SECRET));
}

#[tokio::test]
async fn verified_gateway_checkout_is_paid() {
    let app = TestApp::new().await;
    let signature = gateway_signature("order_abc", "pay_123");

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(gateway_checkout(json!({
                "gatewayOrderId": "order_abc",
                "gatewayPaymentId": "pay_123",
                "gatewaySignature": signature
            }))),
            None,
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["paymentMethod"], "gateway");
    assert_eq!(body["data"]["paymentStatus"], "paid");
    assert_eq!(body["data"]["gatewayPaymentId"], "pay_123");
    assert!(body["data"].get("gatewaySignature").is_none());
}

#[tokio::test]
async fn forged_gateway_checkout_is_rejected() {
    let app = TestApp::new().await;
    let signature = gateway_signature("order_abc", "pay_123");

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(gateway_checkout(json!({
                "gatewayOrderId": "order_abc",
                "gatewayPaymentId": "pay_999",
                "gatewaySignature": signature
            }))),
            None,
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["code"], "invalid_signature");
    assert_eq!(Order::find().count(&*app.state.db).await.unwrap(), 0);
}

#[tokio::test]
async fn unverified_gateway_checkout_stays_pending() {
    let app = TestApp::new().await;

    let response = app
        .request(Method::POST, "/api/v1/orders", Some(gateway_checkout(json!({}))), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["paymentStatus"], "pending");
    assert!(body["data"]["gatewayOrderId"].is_null());
}

#[tokio::test]
async fn cod_order_ignores_supplied_payment() {
    let app = TestApp::new().await;
    let payment = VerifiedPayment {
        gateway_order_id: "order_abc".into(),
        gateway_payment_id: "pay_123".into(),
        gateway_signature: gateway_signature("order_abc", "pay_123"),
    };

    let order = app
        .state
        .services
        .orders
        .create_order(cod_order(), None, Some(payment))
        .await
        .unwrap();
    assert_eq!(order.payment_method, PaymentMethod::Cod);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert!(order.gateway_payment_id.is_none());
}

#[tokio::test]
async fn verify_endpoint_checks_fields_then_signature() {
    let app = TestApp::new().await;

    let missing = app
        .request(
            Method::POST,
            "/api/v1/payments/verify",
            Some(json!({"gatewayOrderId": "order_abc", "gatewaySignature": "abc"})),
            None,
        )
        .await;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(missing).await["code"], "missing_payment_details");

    let mismatch = app
        .request(
            Method::POST,
            "/api/v1/payments/verify",
            Some(json!({
                "gatewayOrderId": "order_abc",
                "gatewayPaymentId": "pay_124",
                "gatewaySignature": gateway_signature("order_abc", "pay_123")
            })),
            None,
        )
        .await;
    assert_eq!(mismatch.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(mismatch).await["code"], "invalid_signature");

    let ok = app
        .request(
            Method::POST,
            "/api/v1/payments/verify",
            Some(json!({
                "gatewayOrderId": "order_abc",
                "gatewayPaymentId": "pay_123",
                "gatewaySignature": gateway_signature("order_abc", "pay_123")
            })),
            None,
        )
        .await;
    assert_eq!(ok.status(), StatusCode::OK);
    let body = response_json(ok).await;
    assert_eq!(body["data"]["verified"], true);
    assert!(body["data"].get("order").is_none());
}

#[tokio::test]
async fn verify_settles_pending_gateway_order() {
    let app = TestApp::new().await;
    let created = app
        .request(Method::POST, "/api/v1/orders", Some(gateway_checkout(json!({}))), None)
        .await;
    let order_number = response_json(created).await["data"]["orderId"]
        .as_str()
        .unwrap()
        .to_string();

    let payload = json!({
        "orderId": order_number,
        "gatewayOrderId": "order_xyz",
        "gatewayPaymentId": "pay_777",
        "gatewaySignature": gateway_signature("order_xyz", "pay_777")
    });
    let response = app
        .request(Method::POST, "/api/v1/payments/verify", Some(payload.clone()), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["order"]["paymentStatus"], "paid");
    assert_eq!(body["data"]["order"]["gatewayOrderId"], "order_xyz");

    // Replaying the same callback is harmless
    let replay = app
        .request(Method::POST, "/api/v1/payments/verify", Some(payload), None)
        .await;
    assert_eq!(replay.status(), StatusCode::OK);

    // A different payment for an already-paid order is not
    let other = app
        .request(
            Method::POST,
            "/api/v1/payments/verify",
            Some(json!({
                "orderId": order_number,
                "gatewayOrderId": "order_xyz",
                "gatewayPaymentId": "pay_778",
                "gatewaySignature": gateway_signature("order_xyz", "pay_778")
            })),
            None,
        )
        .await;
    assert_eq!(other.status(), StatusCode::CONFLICT);

    let stored = app
        .state
        .services
        .orders
        .get_by_order_number(&order_number)
        .await
        .unwrap();
    assert_eq!(stored.gateway_payment_id.as_deref(), Some("pay_777"));
}

async fn create_checkout(app: &TestApp, extra: serde_json::Value) -> serde_json::Value {
    let created = app
        .request(Method::POST, "/api/v1/orders", Some(gateway_checkout(extra)), None)
        .await;
    assert_eq!(created.status(), StatusCode::OK);
    response_json(created).await["data"].clone()
}

#[tokio::test]
async fn one_payment_settles_one_order_at_intake() {
    let app = TestApp::new().await;
    let signed = json!({
        "gatewayOrderId": "order_abc",
        "gatewayPaymentId": "pay_123",
        "gatewaySignature": gateway_signature("order_abc", "pay_123")
    });

    let first = create_checkout(&app, signed.clone()).await;
    assert_eq!(first["paymentStatus"], "paid");

    let replay = app
        .request(Method::POST, "/api/v1/orders", Some(gateway_checkout(signed)), None)
        .await;
    assert_eq!(replay.status(), StatusCode::CONFLICT);
    assert_eq!(response_json(replay).await["code"], "payment_already_used");
    assert_eq!(Order::find().count(&*app.state.db).await.unwrap(), 1);
}

#[tokio::test]
async fn verified_payment_cannot_settle_a_second_order() {
    let app = TestApp::new().await;
    let first = create_checkout(&app, json!({})).await;
    let second = create_checkout(&app, json!({})).await;
    let callback = |order_id: &serde_json::Value| {
        json!({
            "orderId": order_id,
            "gatewayOrderId": "order_xyz",
            "gatewayPaymentId": "pay_777",
            "gatewaySignature": gateway_signature("order_xyz", "pay_777")
        })
    };

    let settled = app
        .request(Method::POST, "/api/v1/payments/verify", Some(callback(&first["id"])), None)
        .await;
    assert_eq!(settled.status(), StatusCode::OK);

    let reused = app
        .request(Method::POST, "/api/v1/payments/verify", Some(callback(&second["id"])), None)
        .await;
    assert_eq!(reused.status(), StatusCode::CONFLICT);
    assert_eq!(response_json(reused).await["code"], "payment_already_used");

    let stored = app
        .state
        .services
        .orders
        .get_order(second["id"].as_str().unwrap())
        .await
        .unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
    assert!(stored.gateway_payment_id.is_none());
}

#[tokio::test]
async fn payment_for_another_gateway_order_is_refused() {
    let app = TestApp::new().await;
    let created = create_checkout(&app, json!({"gatewayOrderId": "order_a"})).await;
    assert_eq!(created["paymentStatus"], "pending");
    assert_eq!(created["gatewayOrderId"], "order_a");
    let id = created["id"].as_str().unwrap().to_string();

    let foreign = app
        .request(
            Method::POST,
            "/api/v1/payments/verify",
            Some(json!({
                "orderId": id,
                "gatewayOrderId": "order_b",
                "gatewayPaymentId": "pay_b",
                "gatewaySignature": gateway_signature("order_b", "pay_b")
            })),
            None,
        )
        .await;
    assert_eq!(foreign.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(foreign).await["code"], "gateway_order_mismatch");
    let stored = app.state.services.orders.get_order(&id).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Pending);

    let own = app
        .request(
            Method::POST,
            "/api/v1/payments/verify",
            Some(json!({
                "orderId": id,
                "gatewayOrderId": "order_a",
                "gatewayPaymentId": "pay_a",
                "gatewaySignature": gateway_signature("order_a", "pay_a")
            })),
            None,
        )
        .await;
    assert_eq!(own.status(), StatusCode::OK);
    let body = response_json(own).await;
    assert_eq!(body["data"]["order"]["paymentStatus"], "paid");
    assert_eq!(body["data"]["order"]["gatewayPaymentId"], "pay_a");
}

#[tokio::test]
async fn bad_signature_leaves_order_pending() {
    let app = TestApp::new().await;
    let created = app
        .request(Method::POST, "/api/v1/orders", Some(gateway_checkout(json!({}))), None)
        .await;
    let id = response_json(created).await["data"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/verify",
            Some(json!({
                "orderId": id,
                "gatewayOrderId": "order_xyz",
                "gatewayPaymentId": "pay_777",
                "gatewaySignature": "0".repeat(64)
            })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let stored = app.state.services.orders.get_order(&id).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
    assert!(stored.gateway_payment_id.is_none());
}

#[tokio::test]
async fn cod_orders_cannot_be_settled_through_the_gateway() {
    let app = TestApp::new().await;
    let order = app.place_order(None).await;
    let payment = VerifiedPayment {
        gateway_order_id: "order_abc".into(),
        gateway_payment_id: "pay_123".into(),
        gateway_signature: gateway_signature("order_abc", "pay_123"),
    };

    assert_matches!(
        app.state
            .services
            .orders
            .confirm_gateway_payment(&order.id.to_string(), payment)
            .await,
        Err(ServiceError::InvalidPaymentMethod(_))
    );
}

#[tokio::test]
async fn create_gateway_order_uses_minor_units() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/create-order",
            Some(json!({"amount": "499.50", "receipt": "cart_1"})),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["order"]["amount"], 49950);
    assert_eq!(body["data"]["order"]["currency"], "INR");
    assert_eq!(body["data"]["order"]["receipt"], "cart_1");
    assert_eq!(body["data"]["keyId"], GATEWAY_KEY_ID);

    let zero = app
        .request(
            Method::POST,
            "/api/v1/payments/create-order",
            Some(json!({"amount": 0})),
            None,
        )
        .await;
    assert_eq!(zero.status(), StatusCode::BAD_REQUEST);

    let bad_currency = app
        .request(
            Method::POST,
            "/api/v1/payments/create-order",
            Some(json!({"amount": 10, "currency": "rupees"})),
            None,
        )
        .await;
    assert_eq!(bad_currency.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn http_gateway_posts_order_with_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .and(basic_auth(GATEWAY_KEY_ID, GATEWAY_SECRET))
        .and(body_json(json!({"amount": 21000, "currency": "INR", "receipt": "r-1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "order_live_1",
            "entity": "order",
            "amount": 21000,
            "currency": "INR",
            "receipt": "r-1",
            "status": "created"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = HttpPaymentGateway::new(
        server.uri(),
        GATEWAY_KEY_ID,
        GATEWAY_SECRET,
        Duration::from_secs(5),
    )
    .unwrap();

    let order = gateway
        .create_order(GatewayOrderRequest {
            amount: 21000,
            currency: "INR".into(),
            receipt: Some("r-1".into()),
        })
        .await
        .unwrap();
    assert_eq!(order.id, "order_live_1");
    assert_eq!(order.amount, 21000);
    assert_eq!(order.status.as_deref(), Some("created"));
}

#[tokio::test]
async fn http_gateway_failure_is_external_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let gateway = HttpPaymentGateway::new(
        format!("{}/", server.uri()),
        GATEWAY_KEY_ID,
        GATEWAY_SECRET,
        Duration::from_secs(5),
    )
    .unwrap();

    let err = gateway
        .create_order(GatewayOrderRequest {
            amount: 100,
            currency: "INR".into(),
            receipt: None,
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ExternalServiceError(_));
    assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
}

#[test]
fn minor_unit_rounding() {
    use storefront_orders::services::payments::to_minor_units;
    assert_eq!(to_minor_units(dec!(210)).unwrap(), 21000);
    assert_eq!(to_minor_units(dec!(0.015)).unwrap(), 2);
}
