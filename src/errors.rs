use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Bad Request",
    "code": "invalid_items",
    "message": "Invalid items: items must be a non-empty list",
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Stable machine-readable error code
    pub code: String,
    /// Human-readable error description
    pub message: String,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

/// Failure taxonomy shared by every operation of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or missing input; never retried automatically
    Validation,
    /// Unknown id or code
    NotFound,
    /// Illegal state transition or duplicate request
    Conflict,
    /// Ownership or role check failed
    Forbidden,
    /// Caller could not be authenticated
    Unauthorized,
    /// Signature mismatch
    Security,
    /// Retryable at the caller's discretion
    TransientStorage,
    /// Anything the caller cannot fix
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    // ---- validation ----
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid items: {0}")]
    InvalidItems(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Shipping address must include a phone number")]
    MissingPhone,

    #[error("Invalid payment method: {0}")]
    InvalidPaymentMethod(String),

    #[error("Order total {total} does not equal subtotal + tax - discount ({expected})")]
    TotalMismatch { total: Decimal, expected: Decimal },

    #[error("Discount {supplied} does not match coupon discount {computed}")]
    DiscountMismatch { supplied: Decimal, computed: Decimal },

    #[error("Invalid status value: {0}")]
    InvalidStatusValue(String),

    #[error("At least one of status or paymentStatus must be provided")]
    NoFieldsProvided,

    #[error("Invalid id format: {0}")]
    InvalidIdFormat(String),

    #[error("Missing payment details: {0}")]
    MissingPaymentDetails(String),

    // ---- coupon engine ----
    #[error("Coupon {0} not found")]
    CouponNotFound(String),

    #[error("Coupon {0} is not active")]
    CouponInactive(String),

    #[error("Coupon {0} is not valid yet")]
    CouponNotYetValid(String),

    #[error("Coupon {0} has expired")]
    CouponExpired(String),

    #[error("Coupon {0} has reached its usage limit")]
    CouponLimitReached(String),

    #[error("Coupon {code} requires a minimum order amount of {minimum}")]
    MinimumNotMet { code: String, minimum: Decimal },

    #[error("Coupon code {0} already exists")]
    CouponCodeTaken(String),

    // ---- orders ----
    #[error("Order {0} not found")]
    OrderNotFound(String),

    #[error("Illegal {axis} transition from '{from}' to '{to}'")]
    IllegalTransition {
        axis: &'static str,
        from: String,
        to: String,
    },

    #[error("Order {0} was modified concurrently; reload and retry")]
    ConcurrentModification(String),

    #[error("Order {0} already exists; retry with a new order id")]
    DuplicateOrderId(String),

    // ---- cancellation workflow ----
    #[error("Order {0} is already delivered or cancelled")]
    AlreadyTerminal(String),

    #[error("Cancellation already requested for order {0}")]
    AlreadyRequested(String),

    #[error("Order {0} has no pending cancellation request")]
    NoPendingRequest(String),

    // ---- access ----
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    // ---- payments ----
    #[error("Payment signature verification failed")]
    InvalidSignature,

    #[error("Payment {0} is already recorded against another order")]
    PaymentAlreadyUsed(String),

    #[error("Payment belongs to gateway order {supplied}, not {recorded}")]
    GatewayOrderMismatch { recorded: String, supplied: String },

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    // ---- internal ----
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<JsonRejection> for ServiceError {
    fn from(rejection: JsonRejection) -> Self {
        ServiceError::ValidationError(rejection.body_text())
    }
}

impl ServiceError {
    /// Taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ValidationError(_)
            | Self::InvalidItems(_)
            | Self::InvalidAmount(_)
            | Self::MissingPhone
            | Self::InvalidPaymentMethod(_)
            | Self::TotalMismatch { .. }
            | Self::DiscountMismatch { .. }
            | Self::InvalidStatusValue(_)
            | Self::NoFieldsProvided
            | Self::InvalidIdFormat(_)
            | Self::MissingPaymentDetails(_)
            | Self::CouponInactive(_)
            | Self::CouponNotYetValid(_)
            | Self::CouponExpired(_)
            | Self::MinimumNotMet { .. } => ErrorKind::Validation,
            Self::CouponNotFound(_) | Self::OrderNotFound(_) => ErrorKind::NotFound,
            Self::CouponLimitReached(_)
            | Self::CouponCodeTaken(_)
            | Self::IllegalTransition { .. }
            | Self::ConcurrentModification(_)
            | Self::AlreadyTerminal(_)
            | Self::AlreadyRequested(_)
            | Self::NoPendingRequest(_)
            | Self::PaymentAlreadyUsed(_) => ErrorKind::Conflict,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::InvalidSignature | Self::GatewayOrderMismatch { .. } => ErrorKind::Security,
            Self::DuplicateOrderId(_) => ErrorKind::TransientStorage,
            Self::DatabaseError(_)
            | Self::ExternalServiceError(_)
            | Self::ConfigurationError(_)
            | Self::InternalError(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code, one per variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::ValidationError(_) => "validation_error",
            Self::InvalidItems(_) => "invalid_items",
            Self::InvalidAmount(_) => "invalid_amount",
            Self::MissingPhone => "missing_phone",
            Self::InvalidPaymentMethod(_) => "invalid_payment_method",
            Self::TotalMismatch { .. } => "total_mismatch",
            Self::DiscountMismatch { .. } => "discount_mismatch",
            Self::InvalidStatusValue(_) => "invalid_status_value",
            Self::NoFieldsProvided => "no_fields_provided",
            Self::InvalidIdFormat(_) => "invalid_id_format",
            Self::MissingPaymentDetails(_) => "missing_payment_details",
            Self::CouponNotFound(_) => "coupon_not_found",
            Self::CouponInactive(_) => "coupon_inactive",
            Self::CouponNotYetValid(_) => "coupon_not_yet_valid",
            Self::CouponExpired(_) => "coupon_expired",
            Self::CouponLimitReached(_) => "coupon_limit_reached",
            Self::MinimumNotMet { .. } => "minimum_not_met",
            Self::CouponCodeTaken(_) => "coupon_code_taken",
            Self::OrderNotFound(_) => "order_not_found",
            Self::IllegalTransition { .. } => "illegal_transition",
            Self::ConcurrentModification(_) => "concurrent_modification",
            Self::DuplicateOrderId(_) => "duplicate_order_id",
            Self::AlreadyTerminal(_) => "already_terminal",
            Self::AlreadyRequested(_) => "already_requested",
            Self::NoPendingRequest(_) => "no_pending_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidSignature => "invalid_signature",
            Self::PaymentAlreadyUsed(_) => "payment_already_used",
            Self::GatewayOrderMismatch { .. } => "gateway_order_mismatch",
            Self::ExternalServiceError(_) => "external_service_error",
            Self::ConfigurationError(_) => "configuration_error",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::CouponInactive(_) | Self::CouponExpired(_) | Self::CouponLimitReached(_) => {
                StatusCode::GONE
            }
            // The cancellation endpoints report workflow conflicts as bad requests.
            Self::AlreadyTerminal(_) | Self::AlreadyRequested(_) | Self::NoPendingRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            _ => match self.kind() {
                ErrorKind::Validation | ErrorKind::Security => StatusCode::BAD_REQUEST,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::Forbidden => StatusCode::FORBIDDEN,
                ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
                ErrorKind::TransientStorage => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::ConfigurationError(_) | Self::InternalError(_) => {
                "Internal server error".to_string()
            }
            Self::ExternalServiceError(_) => "Payment gateway unavailable".to_string(),
            _ => self.to_string(),
        }
    }

    /// True when the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientStorage
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
