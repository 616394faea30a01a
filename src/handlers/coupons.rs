use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    auth::AuthUser,
    entities::{coupon::Model as CouponModel, DiscountType},
    errors::ServiceError,
    services::coupons::CreateCouponInput,
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidateCouponRequest {
    pub code: String,
    pub order_amount: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CouponQuote {
    pub valid: bool,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ApplyCouponRequest {
    pub code: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CouponUsage {
    pub code: String,
    pub used_count: i32,
    pub usage_limit: Option<i32>,
}

/// Preview a coupon against an order amount. Usage is not counted.
#[utoipa::path(
    post,
    path = "/api/v1/coupons/validate",
    request_body = ValidateCouponRequest,
    responses(
        (status = 200, description = "Coupon applies", body = CouponQuote),
        (status = 400, description = "Minimum not met or not yet valid", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown code", body = crate::errors::ErrorResponse),
        (status = 410, description = "Inactive, expired or exhausted", body = crate::errors::ErrorResponse)
    ),
    tag = "coupons"
)]
pub async fn validate_coupon(
    State(state): State<AppState>,
    payload: Result<Json<ValidateCouponRequest>, JsonRejection>,
) -> ApiResult<CouponQuote> {
    let Json(request) = payload?;
    let result = state
        .services
        .coupons
        .validate(&request.code, request.order_amount)
        .await?;

    let final_amount = (request.order_amount - result.discount_amount).max(Decimal::ZERO);
    Ok(Json(ApiResponse::success(CouponQuote {
        valid: true,
        code: result.coupon.code,
        discount_type: result.coupon.discount_type,
        discount_value: result.coupon.discount_value,
        discount_amount: result.discount_amount,
        final_amount,
    })))
}

/// Record one use of a coupon outside order intake.
#[utoipa::path(
    post,
    path = "/api/v1/coupons/apply",
    request_body = ApplyCouponRequest,
    responses(
        (status = 200, description = "Usage recorded", body = CouponUsage),
        (status = 404, description = "Unknown code", body = crate::errors::ErrorResponse),
        (status = 410, description = "Usage limit reached", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "coupons"
)]
pub async fn apply_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<ApplyCouponRequest>, JsonRejection>,
) -> ApiResult<CouponUsage> {
    user.require_internal()?;
    let Json(request) = payload?;
    if request.code.trim().is_empty() {
        return Err(ServiceError::ValidationError("code is required".to_string()));
    }

    let coupon = state.services.coupons.apply(&request.code).await?;
    Ok(Json(ApiResponse::success(CouponUsage {
        code: coupon.code,
        used_count: coupon.used_count,
        usage_limit: coupon.usage_limit,
    })))
}

#[utoipa::path(
    post,
    path = "/api/v1/coupons",
    request_body = CreateCouponInput,
    responses(
        (status = 201, description = "Coupon created", body = CouponModel),
        (status = 400, description = "Invalid coupon definition", body = crate::errors::ErrorResponse),
        (status = 409, description = "Code already exists", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "coupons"
)]
pub async fn create_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<CreateCouponInput>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<CouponModel>>), ServiceError> {
    user.require_admin()?;
    let Json(input) = payload?;
    let coupon = state.services.coupons.create_coupon(input).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(coupon))))
}

#[utoipa::path(
    get,
    path = "/api/v1/coupons",
    responses(
        (status = 200, description = "All coupons by code", body = [CouponModel])
    ),
    security(("bearer_auth" = [])),
    tag = "coupons"
)]
pub async fn list_coupons(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Vec<CouponModel>> {
    user.require_admin()?;
    let coupons = state.services.coupons.list_coupons().await?;
    Ok(Json(ApiResponse::success(coupons)))
}
