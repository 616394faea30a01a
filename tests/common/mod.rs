#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use storefront_orders::{
    auth::{AuthConfig, Claims, ROLE_ADMIN, ROLE_SERVICE},
    build_router,
    config::AppConfig,
    db,
    entities::{coupon::Model as CouponModel, order::Model as OrderModel, DiscountType},
    errors::ServiceError,
    events::{self, EventSender},
    handlers::AppServices,
    notifications::LoggingNotifier,
    services::{
        coupons::CreateCouponInput,
        orders::{CreateOrderInput, OrderItemInput, AddressInput},
        payments::{sign, GatewayOrder, GatewayOrderRequest, PaymentGateway},
    },
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;

pub const JWT_SECRET: &str = "test_jwt_secret_for_storefront_orders_suite";
pub const GATEWAY_KEY_ID: &str = "rzp_test_key";
pub const GATEWAY_SECRET: &str = "gateway_secret_for_tests";

/// Gateway double that echoes the request back as a created order.
pub struct FakeGateway;

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_order(
        &self,
        request: GatewayOrderRequest,
    ) -> Result<GatewayOrder, ServiceError> {
        Ok(GatewayOrder {
            id: "order_fake_001".to_string(),
            amount: request.amount,
            currency: request.currency,
            receipt: request.receipt,
            status: Some("created".to_string()),
        })
    }
}

/// Application state over a fresh in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            GATEWAY_KEY_ID.to_string(),
            GATEWAY_SECRET.to_string(),
            "test".to_string(),
        );
        // A single connection keeps the in-memory database alive and shared.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        tweak(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(
            event_rx,
            Arc::new(LoggingNotifier),
        ));

        let services = AppServices::new(
            db_arc.clone(),
            event_sender.clone(),
            &cfg,
            Arc::new(FakeGateway),
        )
        .expect("services for tests");

        let state = AppState {
            db: db_arc,
            config: cfg.clone(),
            auth: AuthConfig::new(&cfg.jwt_secret),
            event_sender,
            services,
        };

        Self {
            router: build_router(state.clone()),
            state,
            _event_task: event_task,
        }
    }

    pub fn token(&self, user_id: &str, roles: &[&str]) -> String {
        let claims = Claims {
            sub: user_id.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            role: None,
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
            iss: None,
        };
        jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .expect("encode access token")
    }

    pub fn admin_token(&self) -> String {
        self.token("admin-1", &[ROLE_ADMIN])
    }

    pub fn service_token(&self) -> String {
        self.token("checkout-worker", &[ROLE_SERVICE])
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Order placed directly through the service; `cod`, no coupon.
    pub async fn place_order(&self, user_id: Option<&str>) -> OrderModel {
        self.state
            .services
            .orders
            .create_order(cod_order(), user_id.map(str::to_string), None)
            .await
            .expect("seed order")
    }

    pub async fn seed_coupon(
        &self,
        code: &str,
        discount_type: DiscountType,
        discount_value: Decimal,
        tweak: impl FnOnce(&mut CreateCouponInput),
    ) -> CouponModel {
        let mut input = CreateCouponInput {
            code: code.to_string(),
            description: None,
            discount_type,
            discount_value,
            min_order_amount: None,
            max_discount_amount: None,
            usage_limit: None,
            valid_from: Utc::now() - Duration::days(1),
            valid_until: Utc::now() + Duration::days(30),
            is_active: true,
        };
        tweak(&mut input);
        self.state
            .services
            .coupons
            .create_coupon(input)
            .await
            .expect("seed coupon")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// The cart from the "Chili Powder" checkout: 2 x 100 + 10 tax.
pub fn cod_order() -> CreateOrderInput {
    CreateOrderInput {
        items: vec![OrderItemInput {
            product_id: Some("p1".to_string()),
            title: Some("Chili Powder".to_string()),
            price: Some(Decimal::from(100)),
            quantity: Some(2),
            image: None,
        }],
        address: Some(AddressInput {
            name: Some("Asha".to_string()),
            phone: Some("+91 98765 43210".to_string()),
            city: Some("Kochi".to_string()),
            ..Default::default()
        }),
        subtotal: Some(Decimal::from(200)),
        tax: Some(Decimal::from(10)),
        discount: None,
        total: Some(Decimal::from(210)),
        payment_method: Some("cod".to_string()),
        ..Default::default()
    }
}

pub fn gateway_signature(gateway_order_id: &str, gateway_payment_id: &str) -> String {
    sign(gateway_order_id, gateway_payment_id, GATEWAY_SECRET).expect("sign")
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
