pub mod coupons;
pub mod orders;
pub mod payments;

use std::sync::Arc;
use std::time::Duration;

use crate::{
    config::AppConfig,
    db::DbPool,
    errors::ServiceError,
    events::EventSender,
    services::{
        cancellations::CancellationService,
        coupons::CouponService,
        orders::OrderService,
        payments::{HttpPaymentGateway, PaymentGateway, PaymentService, PaymentVerifier},
    },
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub coupons: Arc<CouponService>,
    pub cancellations: Arc<CancellationService>,
    pub payments: Arc<PaymentService>,
}

impl AppServices {
    /// Wires every service against one pool and event channel.
    ///
    /// Fails when the gateway secret is missing so the process never serves
    /// traffic with an unusable signature verifier.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        config: &AppConfig,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Result<Self, ServiceError> {
        let coupons = CouponService::new(db_pool.clone(), config.coupon_strict_usage_limit);
        let orders = OrderService::new(db_pool.clone(), coupons.clone(), event_sender.clone());
        let cancellations = CancellationService::new(db_pool, event_sender);
        let verifier = PaymentVerifier::new(config.payment_gateway_key_secret.clone())?;
        let payments = PaymentService::new(verifier, gateway, config.default_currency.clone());

        Ok(Self {
            orders: Arc::new(orders),
            coupons: Arc::new(coupons),
            cancellations: Arc::new(cancellations),
            payments: Arc::new(payments),
        })
    }

    /// Same as [`AppServices::new`] with the HTTP gateway client built from config.
    pub fn from_config(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        config: &AppConfig,
    ) -> Result<Self, ServiceError> {
        let gateway = HttpPaymentGateway::new(
            config.payment_gateway_base_url.clone(),
            config.payment_gateway_key_id.clone(),
            config.payment_gateway_key_secret.clone(),
            Duration::from_secs(config.payment_gateway_timeout_secs),
        )?;
        Self::new(db_pool, event_sender, config, Arc::new(gateway))
    }
}
