use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    response::Json,
};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::{
    auth::{AuthUser, MaybeAuthUser},
    entities::{order::Model as OrderModel, PaymentMethod},
    errors::ServiceError,
    services::{
        orders::{CreateOrderInput, ListOrdersQuery, UpdateStatusInput},
        payments::PaymentDetails,
    },
    ApiResponse, ApiResult, AppState, PaginatedResponse,
};

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CancellationRequestBody {
    pub reason: Option<String>,
}

/// Customers see their own orders, anonymous callers only guest orders.
fn ensure_can_view(caller: &MaybeAuthUser, order: &OrderModel) -> Result<(), ServiceError> {
    match &caller.0 {
        Some(user) if !user.is_admin() && order.is_owned_by_other(&user.user_id) => Err(
            ServiceError::Forbidden("order belongs to another customer".to_string()),
        ),
        None if order.user_id.is_some() => Err(ServiceError::Unauthorized(
            "sign in to view this order".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Create a new order
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CreateOrderInput,
    responses(
        (status = 200, description = "Order created", body = OrderModel),
        (status = 400, description = "Invalid order payload", body = crate::errors::ErrorResponse),
        (status = 503, description = "Order id collision; retry", body = crate::errors::ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    caller: MaybeAuthUser,
    payload: Result<Json<CreateOrderInput>, JsonRejection>,
) -> ApiResult<OrderModel> {
    let Json(input) = payload?;

    // A gateway checkout that already carries the callback fields is verified
    // here; intake itself trusts whatever it is handed.
    let wants_gateway = input.payment_method.as_deref().map(str::trim)
        == Some(PaymentMethod::Gateway.as_str());
    let has_callback = input.gateway_payment_id.is_some() || input.gateway_signature.is_some();
    let payment = if wants_gateway && has_callback {
        let details = PaymentDetails {
            gateway_order_id: input.gateway_order_id.clone(),
            gateway_payment_id: input.gateway_payment_id.clone(),
            gateway_signature: input.gateway_signature.clone(),
        };
        Some(state.services.payments.verify(&details)?)
    } else {
        None
    };

    let user_id = caller.0.map(|user| user.user_id);
    let order = state
        .services
        .orders
        .create_order(input, user_id, payment)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// List orders, newest first
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(ListOrdersQuery),
    responses(
        (status = 200, description = "Page of orders", body = [OrderModel]),
        (status = 400, description = "Invalid query", body = crate::errors::ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    caller: MaybeAuthUser,
    query: Result<Query<ListOrdersQuery>, QueryRejection>,
) -> ApiResult<PaginatedResponse<OrderModel>> {
    let Query(mut query) =
        query.map_err(|e| ServiceError::ValidationError(e.body_text()))?;

    match &caller.0 {
        Some(user) if user.is_admin() => {}
        Some(user) => query.user_id = Some(user.user_id.clone()),
        None => {
            query.user_id = None;
            query.guests_only = true;
        }
    }

    let page = state.services.orders.list_orders(query).await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        page.orders,
        page.total,
        page.page,
        page.limit,
    ))))
}

/// Get an order by its record id
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = String, Path, description = "Order record id (UUID)")),
    responses(
        (status = 200, description = "Order", body = OrderModel),
        (status = 400, description = "Malformed id", body = crate::errors::ErrorResponse),
        (status = 401, description = "Order belongs to a customer; sign in", body = crate::errors::ErrorResponse),
        (status = 403, description = "Order belongs to another customer", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    caller: MaybeAuthUser,
    Path(id): Path<String>,
) -> ApiResult<OrderModel> {
    let order = state.services.orders.get_order(&id).await?;
    ensure_can_view(&caller, &order)?;
    Ok(Json(ApiResponse::success(order)))
}

/// Get an order by its customer-facing order id
#[utoipa::path(
    get,
    path = "/api/v1/orders/by-number/{order_number}",
    params(("order_number" = String, Path, description = "Order id, e.g. ORD-20240101120000-AB12CD")),
    responses(
        (status = 200, description = "Order", body = OrderModel),
        (status = 401, description = "Order belongs to a customer; sign in", body = crate::errors::ErrorResponse),
        (status = 403, description = "Order belongs to another customer", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn get_order_by_number(
    State(state): State<AppState>,
    caller: MaybeAuthUser,
    Path(order_number): Path<String>,
) -> ApiResult<OrderModel> {
    let order = state
        .services
        .orders
        .get_by_order_number(&order_number)
        .await?;
    ensure_can_view(&caller, &order)?;
    Ok(Json(ApiResponse::success(order)))
}

/// Advance `status` and/or `paymentStatus`
#[utoipa::path(
    patch,
    path = "/api/v1/orders/{id}",
    params(("id" = String, Path, description = "Order record id (UUID)")),
    request_body = UpdateStatusInput,
    responses(
        (status = 200, description = "Order updated", body = OrderModel),
        (status = 400, description = "Invalid status value or no fields", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Illegal transition or concurrent update", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    payload: Result<Json<UpdateStatusInput>, JsonRejection>,
) -> ApiResult<OrderModel> {
    user.require_admin()?;
    let Json(input) = payload?;
    let order = state.services.orders.update_status(&id, input).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Customer asks for the order to be cancelled
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/request-cancellation",
    params(("id" = String, Path, description = "Order record id (UUID)")),
    request_body = CancellationRequestBody,
    responses(
        (status = 200, description = "Cancellation requested", body = OrderModel),
        (status = 400, description = "Already requested, terminal order or missing reason", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the order owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "cancellations"
)]
pub async fn request_cancellation(
    State(state): State<AppState>,
    caller: MaybeAuthUser,
    Path(id): Path<String>,
    payload: Result<Json<CancellationRequestBody>, JsonRejection>,
) -> ApiResult<OrderModel> {
    let Json(body) = payload?;
    let requester = caller.0.as_ref().map(|user| user.user_id.as_str());
    let order = state
        .services
        .cancellations
        .request_cancellation(&id, requester, body.reason.as_deref())
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/approve-cancellation",
    params(("id" = String, Path, description = "Order record id (UUID)")),
    responses(
        (status = 200, description = "Order cancelled", body = OrderModel),
        (status = 400, description = "No pending request", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "cancellations"
)]
pub async fn approve_cancellation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<OrderModel> {
    user.require_admin()?;
    let order = state
        .services
        .cancellations
        .approve_cancellation(&id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/reject-cancellation",
    params(("id" = String, Path, description = "Order record id (UUID)")),
    responses(
        (status = 200, description = "Request rejected", body = OrderModel),
        (status = 400, description = "No pending request", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "cancellations"
)]
pub async fn reject_cancellation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<OrderModel> {
    user.require_admin()?;
    let order = state
        .services
        .cancellations
        .reject_cancellation(&id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Admin queue of pending cancellation requests
#[utoipa::path(
    get,
    path = "/api/v1/orders/cancellation-requests",
    responses(
        (status = 200, description = "Pending requests, newest first", body = [OrderModel]),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "cancellations"
)]
pub async fn list_cancellation_requests(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Vec<OrderModel>> {
    user.require_admin()?;
    let orders = state.services.cancellations.list_pending().await?;
    Ok(Json(ApiResponse::success(orders)))
}
