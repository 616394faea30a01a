use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::handlers;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront Orders API",
        version = "0.1.0",
        description = r#"
Order intake, coupon discounts, payment gateway reconciliation and the
order / cancellation lifecycle for a storefront backend.

## Authentication

Admin and service endpoints take an HS256 bearer token issued by the
storefront auth service:

```
Authorization: Bearer <token>
```

Order intake, lookup and cancellation requests also accept anonymous callers.

## Error Handling

Errors share one body shape:

```json
{
  "error": "Not Found",
  "code": "order_not_found",
  "message": "Order not found: ...",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "orders", description = "Order intake, lookup and status updates"),
        (name = "cancellations", description = "Customer cancellation requests and admin decisions"),
        (name = "coupons", description = "Coupon validation, usage and administration"),
        (name = "payments", description = "Payment gateway orders and signature verification")
    ),
    paths(
        handlers::orders::create_order,
        handlers::orders::list_orders,
        handlers::orders::get_order,
        handlers::orders::get_order_by_number,
        handlers::orders::update_order_status,
        handlers::orders::request_cancellation,
        handlers::orders::approve_cancellation,
        handlers::orders::reject_cancellation,
        handlers::orders::list_cancellation_requests,
        handlers::coupons::validate_coupon,
        handlers::coupons::apply_coupon,
        handlers::coupons::create_coupon,
        handlers::coupons::list_coupons,
        handlers::payments::create_gateway_order,
        handlers::payments::verify_payment,
    ),
    components(
        schemas(
            crate::entities::order::Model,
            crate::entities::order::OrderItem,
            crate::entities::order::ShippingAddress,
            crate::entities::OrderStatus,
            crate::entities::PaymentStatus,
            crate::entities::PaymentMethod,
            crate::entities::CancellationStatus,
            crate::entities::coupon::Model,
            crate::entities::DiscountType,
            crate::services::orders::CreateOrderInput,
            crate::services::orders::OrderItemInput,
            crate::services::orders::AddressInput,
            crate::services::orders::UpdateStatusInput,
            crate::services::coupons::CreateCouponInput,
            crate::services::payments::PaymentDetails,
            crate::services::payments::GatewayOrder,
            handlers::orders::CancellationRequestBody,
            handlers::coupons::ValidateCouponRequest,
            handlers::coupons::CouponQuote,
            handlers::coupons::ApplyCouponRequest,
            handlers::coupons::CouponUsage,
            handlers::payments::CreateGatewayOrderRequest,
            handlers::payments::GatewayCheckout,
            handlers::payments::VerifyPaymentRequest,
            handlers::payments::PaymentVerification,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDocV1::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_lists_lifecycle_routes() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("Storefront Orders API"));
        assert!(json.contains("/api/v1/orders/{id}/approve-cancellation"));
        assert!(json.contains("/api/v1/payments/verify"));
        assert!(json.contains("bearer_auth"));
    }
}
