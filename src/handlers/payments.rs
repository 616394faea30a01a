use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::{
    entities::order::Model as OrderModel,
    services::payments::{GatewayOrder, PaymentDetails},
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({
    "amount": "499.50",
    "currency": "INR",
    "receipt": "cart_8f2c"
}))]
pub struct CreateGatewayOrderRequest {
    /// Amount in major currency units
    #[schema(example = "499.50")]
    pub amount: Decimal,
    /// ISO 4217 code; the configured default is used when absent
    pub currency: Option<String>,
    pub receipt: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewayCheckout {
    pub order: GatewayOrder,
    /// Public key id the client passes to the gateway checkout widget
    pub key_id: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    #[serde(flatten)]
    pub details: PaymentDetails,
    /// Record id or order id of an existing gateway order to mark paid
    pub order_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentVerification {
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<OrderModel>,
}

/// Register an order with the payment gateway before checkout
#[utoipa::path(
    post,
    path = "/api/v1/payments/create-order",
    request_body = CreateGatewayOrderRequest,
    responses(
        (status = 200, description = "Gateway order created", body = GatewayCheckout),
        (status = 400, description = "Invalid amount or currency", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "payments"
)]
pub async fn create_gateway_order(
    State(state): State<AppState>,
    payload: Result<Json<CreateGatewayOrderRequest>, JsonRejection>,
) -> ApiResult<GatewayCheckout> {
    let Json(request) = payload?;
    let order = state
        .services
        .payments
        .create_gateway_order(request.amount, request.currency, request.receipt)
        .await?;

    Ok(Json(ApiResponse::success(GatewayCheckout {
        order,
        key_id: state.config.payment_gateway_key_id.clone(),
    })))
}

/// Check a gateway callback signature, optionally settling an existing order
#[utoipa::path(
    post,
    path = "/api/v1/payments/verify",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Signature valid", body = PaymentVerification),
        (status = 400, description = "Missing fields or bad signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order cannot move to paid, or the payment already settled another order", body = crate::errors::ErrorResponse)
    ),
    tag = "payments"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    payload: Result<Json<VerifyPaymentRequest>, JsonRejection>,
) -> ApiResult<PaymentVerification> {
    let Json(request) = payload?;
    let payment = state.services.payments.verify(&request.details)?;

    let order = match request
        .order_id
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
    {
        Some(reference) => Some(
            state
                .services
                .orders
                .confirm_gateway_payment(reference, payment)
                .await?,
        ),
        None => {
            info!(
                gateway_order_id = %payment.gateway_order_id,
                "Payment signature verified"
            );
            None
        }
    };

    Ok(Json(ApiResponse::success(PaymentVerification {
        verified: true,
        order,
    })))
}
