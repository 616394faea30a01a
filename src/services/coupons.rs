use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    sea_query::{Condition, Expr},
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder,
};
use serde::Deserialize;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::is_unique_violation,
    entities::coupon::{self, DiscountType, Entity as CouponEntity, Model as CouponModel},
    errors::ServiceError,
};

/// Outcome of a successful coupon check.
#[derive(Clone, Debug, PartialEq)]
pub struct CouponValidation {
    pub discount_amount: Decimal,
    pub coupon: CouponModel,
}

/// Admin input for a new coupon.
#[derive(Clone, Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateCouponInput {
    #[validate(length(min = 1, max = 32, message = "code must be between 1 and 32 characters"))]
    pub code: String,
    #[validate(length(max = 255))]
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    #[serde(default)]
    pub min_order_amount: Option<Decimal>,
    pub max_discount_amount: Option<Decimal>,
    #[validate(range(min = 1, message = "usageLimit must be at least 1"))]
    pub usage_limit: Option<i32>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Trim and upper-case a code so lookups are case-insensitive exact matches.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Discount granted by `coupon` on `order_amount`, rounded half-up to 2dp.
pub fn compute_discount(coupon: &CouponModel, order_amount: Decimal) -> Decimal {
    let discount = match coupon.discount_type {
        DiscountType::Fixed => coupon.discount_value,
        DiscountType::Percentage => {
            let raw = order_amount * coupon.discount_value / Decimal::ONE_HUNDRED;
            match coupon.max_discount_amount {
                Some(cap) => raw.min(cap),
                None => raw,
            }
        }
    };
    round_money(discount)
}

/// Checks `coupon` against `order_amount` at `now` without touching storage.
///
/// Checks run in a fixed order: active flag, validity window, usage limit,
/// minimum order amount.
pub fn evaluate(
    coupon: &CouponModel,
    order_amount: Decimal,
    now: DateTime<Utc>,
) -> Result<Decimal, ServiceError> {
    if !coupon.is_active {
        return Err(ServiceError::CouponInactive(coupon.code.clone()));
    }
    if now < coupon.valid_from {
        return Err(ServiceError::CouponNotYetValid(coupon.code.clone()));
    }
    if now > coupon.valid_until {
        return Err(ServiceError::CouponExpired(coupon.code.clone()));
    }
    if coupon.is_exhausted() {
        return Err(ServiceError::CouponLimitReached(coupon.code.clone()));
    }
    if order_amount < coupon.min_order_amount {
        return Err(ServiceError::MinimumNotMet {
            code: coupon.code.clone(),
            minimum: coupon.min_order_amount,
        });
    }
    Ok(compute_discount(coupon, order_amount))
}

async fn find_by_code<C: ConnectionTrait>(
    conn: &C,
    code: &str,
) -> Result<Option<CouponModel>, ServiceError> {
    CouponEntity::find()
        .filter(coupon::Column::Code.eq(code))
        .one(conn)
        .await
        .map_err(|e| {
            error!("Failed to fetch coupon {}: {}", code, e);
            ServiceError::DatabaseError(e)
        })
}

#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
    strict_usage_limit: bool,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>, strict_usage_limit: bool) -> Self {
        Self {
            db,
            strict_usage_limit,
        }
    }

    /// Validates a code for an order amount. Never mutates `used_count`.
    #[instrument(skip(self))]
    pub async fn validate(
        &self,
        code: &str,
        order_amount: Decimal,
    ) -> Result<CouponValidation, ServiceError> {
        self.validate_in(&*self.db, code, order_amount, Utc::now())
            .await
    }

    pub(crate) async fn validate_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        code: &str,
        order_amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<CouponValidation, ServiceError> {
        let code = normalize_code(code);
        if order_amount < Decimal::ZERO {
            return Err(ServiceError::InvalidAmount(
                "orderAmount must be non-negative".to_string(),
            ));
        }

        let coupon = find_by_code(conn, &code)
            .await?
            .ok_or_else(|| ServiceError::CouponNotFound(code.clone()))?;

        let discount_amount = evaluate(&coupon, order_amount, now).map_err(|e| {
            debug!(code = %code, reason = e.code(), "Coupon rejected");
            e
        })?;

        Ok(CouponValidation {
            discount_amount,
            coupon,
        })
    }

    /// Counts one use of the coupon. Each call increments exactly once.
    #[instrument(skip(self))]
    pub async fn apply(&self, code: &str) -> Result<CouponModel, ServiceError> {
        let code = normalize_code(code);
        self.apply_in(&*self.db, &code).await?;
        let updated = find_by_code(&*self.db, &code).await?;
        updated.ok_or(ServiceError::CouponNotFound(code))
    }

    /// Atomic increment on `conn`, which may be an open transaction.
    ///
    /// In strict mode the `used_count < usage_limit` guard is part of the
    /// same UPDATE, so racing callers can never push the count past the limit.
    pub(crate) async fn apply_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        code: &str,
    ) -> Result<(), ServiceError> {
        let mut update = CouponEntity::update_many()
            .col_expr(
                coupon::Column::UsedCount,
                Expr::col(coupon::Column::UsedCount).add(1),
            )
            .col_expr(coupon::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(coupon::Column::Code.eq(code));

        if self.strict_usage_limit {
            update = update.filter(
                Condition::any()
                    .add(coupon::Column::UsageLimit.is_null())
                    .add(
                        Expr::col(coupon::Column::UsedCount)
                            .lt(Expr::col(coupon::Column::UsageLimit)),
                    ),
            );
        }

        let result = update.exec(conn).await.map_err(|e| {
            error!("Failed to increment usage for coupon {}: {}", code, e);
            ServiceError::DatabaseError(e)
        })?;

        if result.rows_affected == 0 {
            return match find_by_code(conn, code).await? {
                None => Err(ServiceError::CouponNotFound(code.to_string())),
                Some(_) => {
                    warn!(code = %code, "Coupon usage limit reached at apply time");
                    Err(ServiceError::CouponLimitReached(code.to_string()))
                }
            };
        }

        counter!("coupons.applied", 1);
        info!(code = %code, "Coupon usage recorded");
        Ok(())
    }

    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create_coupon(
        &self,
        input: CreateCouponInput,
    ) -> Result<CouponModel, ServiceError> {
        input.validate()?;

        let code = normalize_code(&input.code);
        if code.is_empty() {
            return Err(ServiceError::ValidationError(
                "code must not be blank".to_string(),
            ));
        }
        if input.discount_value <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "discountValue must be greater than zero".to_string(),
            ));
        }
        if input.discount_type == DiscountType::Percentage
            && input.discount_value > Decimal::ONE_HUNDRED
        {
            return Err(ServiceError::ValidationError(
                "percentage discountValue cannot exceed 100".to_string(),
            ));
        }
        let min_order_amount = input.min_order_amount.unwrap_or(Decimal::ZERO);
        if min_order_amount < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "minOrderAmount must be non-negative".to_string(),
            ));
        }
        if matches!(input.max_discount_amount, Some(cap) if cap <= Decimal::ZERO) {
            return Err(ServiceError::ValidationError(
                "maxDiscountAmount must be greater than zero".to_string(),
            ));
        }
        if input.valid_from >= input.valid_until {
            return Err(ServiceError::ValidationError(
                "validFrom must be earlier than validUntil".to_string(),
            ));
        }

        let now = Utc::now();
        let model = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.clone()),
            description: Set(input.description),
            discount_type: Set(input.discount_type),
            discount_value: Set(round_money(input.discount_value)),
            min_order_amount: Set(round_money(min_order_amount)),
            max_discount_amount: Set(input.max_discount_amount.map(round_money)),
            usage_limit: Set(input.usage_limit),
            used_count: Set(0),
            valid_from: Set(input.valid_from),
            valid_until: Set(input.valid_until),
            is_active: Set(input.is_active),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let created = model.insert(&*self.db).await.map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::CouponCodeTaken(code.clone())
            } else {
                error!("Failed to create coupon {}: {}", code, e);
                ServiceError::DatabaseError(e)
            }
        })?;

        info!(coupon_id = %created.id, "Coupon created");
        Ok(created)
    }

    pub async fn list_coupons(&self) -> Result<Vec<CouponModel>, ServiceError> {
        CouponEntity::find()
            .order_by_asc(coupon::Column::Code)
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn coupon(discount_type: DiscountType, value: Decimal) -> CouponModel {
        let now = Utc::now();
        CouponModel {
            id: Uuid::new_v4(),
            code: "SAVE10".to_string(),
            description: None,
            discount_type,
            discount_value: value,
            min_order_amount: Decimal::ZERO,
            max_discount_amount: None,
            usage_limit: None,
            used_count: 0,
            valid_from: now - Duration::days(1),
            valid_until: now + Duration::days(1),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn percentage_discount_is_capped() {
        let mut c = coupon(DiscountType::Percentage, dec!(10));
        c.max_discount_amount = Some(dec!(15));
        assert_eq!(evaluate(&c, dec!(200), Utc::now()).unwrap(), dec!(15));
        assert_eq!(evaluate(&c, dec!(100), Utc::now()).unwrap(), dec!(10));
    }

    #[test]
    fn fixed_discount_ignores_cap() {
        let mut c = coupon(DiscountType::Fixed, dec!(50));
        c.max_discount_amount = Some(dec!(15));
        assert_eq!(compute_discount(&c, dec!(200)), dec!(50));
    }

    #[test]
    fn discount_rounds_half_up() {
        let c = coupon(DiscountType::Percentage, dec!(12.5));
        // 12.5% of 0.20 = 0.025
        assert_eq!(compute_discount(&c, dec!(0.20)), dec!(0.03));
        // 12.5% of 99.99 = 12.49875
        assert_eq!(compute_discount(&c, dec!(99.99)), dec!(12.50));
    }

    #[test]
    fn rejection_order_is_stable() {
        let now = Utc::now();
        let mut c = coupon(DiscountType::Fixed, dec!(5));
        c.is_active = false;
        c.valid_until = now - Duration::hours(1);
        c.usage_limit = Some(1);
        c.used_count = 1;
        c.min_order_amount = dec!(1000);
        assert_matches!(evaluate(&c, dec!(10), now), Err(ServiceError::CouponInactive(_)));

        c.is_active = true;
        assert_matches!(evaluate(&c, dec!(10), now), Err(ServiceError::CouponExpired(_)));

        c.valid_until = now + Duration::hours(1);
        assert_matches!(
            evaluate(&c, dec!(10), now),
            Err(ServiceError::CouponLimitReached(_))
        );

        c.usage_limit = None;
        assert_matches!(
            evaluate(&c, dec!(10), now),
            Err(ServiceError::MinimumNotMet { minimum, .. }) if minimum == dec!(1000)
        );

        c.min_order_amount = dec!(10);
        assert_eq!(evaluate(&c, dec!(10), now).unwrap(), dec!(5));
    }

    #[test]
    fn not_yet_valid_before_window() {
        let now = Utc::now();
        let mut c = coupon(DiscountType::Fixed, dec!(5));
        c.valid_from = now + Duration::minutes(5);
        assert_matches!(
            evaluate(&c, dec!(10), now),
            Err(ServiceError::CouponNotYetValid(_))
        );
    }

    #[test]
    fn codes_are_normalized() {
        assert_eq!(normalize_code("  save10 "), "SAVE10");
    }
}
