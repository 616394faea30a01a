use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{
    sea_query::Condition,
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::Deserialize;
use tracing::{error, info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
    db::is_unique_violation,
    entities::order::{
        self, CancellationStatus, Entity as OrderEntity, Model as OrderModel, OrderItem,
        OrderItems, OrderStatus, PaymentMethod, PaymentStatus, ShippingAddress,
    },
    errors::ServiceError,
    events::{Event, EventSender, OrderRef},
    services::{
        coupons::{normalize_code, CouponService},
        order_status::{ensure_payment_transition, ensure_status_transition},
        payments::VerifiedPayment,
    },
};

/// Rounding tolerance for monetary comparisons.
pub const AMOUNT_TOLERANCE: Decimal = dec!(0.01);

const DEFAULT_PAGE_SIZE: u64 = 20;
const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemInput {
    pub product_id: Option<String>,
    pub title: Option<String>,
    pub price: Option<Decimal>,
    pub quantity: Option<i32>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddressInput {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

/// Checkout payload. Every field is optional at the parse layer so that
/// intake can report the first missing piece with its own error kind.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderInput {
    #[serde(default)]
    pub items: Vec<OrderItemInput>,
    pub address: Option<AddressInput>,
    pub subtotal: Option<Decimal>,
    pub tax: Option<Decimal>,
    pub discount: Option<Decimal>,
    pub total: Option<Decimal>,
    pub coupon_code: Option<String>,
    pub payment_method: Option<String>,
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub gateway_signature: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusInput {
    pub status: Option<String>,
    pub payment_status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ListOrdersQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub user_id: Option<String>,
    /// Restricts the listing to guest checkouts; set by the handler, never by the client.
    #[serde(skip)]
    pub guests_only: bool,
}

#[derive(Debug, Clone)]
pub struct OrderPage {
    pub orders: Vec<OrderModel>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

/// Intake payload after structural validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedOrder {
    pub items: Vec<OrderItem>,
    pub address: ShippingAddress,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub coupon_code: Option<String>,
    pub payment_method: PaymentMethod,
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn non_negative(value: Option<Decimal>, field: &str) -> Result<Decimal, ServiceError> {
    match value {
        Some(v) if v >= Decimal::ZERO => Ok(v),
        Some(_) => Err(ServiceError::InvalidAmount(format!(
            "{} must be non-negative",
            field
        ))),
        None => Err(ServiceError::InvalidAmount(format!("{} is required", field))),
    }
}

/// Structural checks, in order: items, amounts, phone, payment method,
/// then the arithmetic relation between the amounts.
pub fn validate_payload(input: &CreateOrderInput) -> Result<ValidatedOrder, ServiceError> {
    if input.items.is_empty() {
        return Err(ServiceError::InvalidItems(
            "items must be a non-empty list".to_string(),
        ));
    }
    let mut items = Vec::with_capacity(input.items.len());
    for (idx, item) in input.items.iter().enumerate() {
        let product_id = non_blank(&item.product_id).ok_or_else(|| {
            ServiceError::InvalidItems(format!("item {} is missing productId", idx))
        })?;
        let title = non_blank(&item.title)
            .ok_or_else(|| ServiceError::InvalidItems(format!("item {} is missing title", idx)))?;
        let price = item
            .price
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| ServiceError::InvalidItems(format!("item {} needs a positive price", idx)))?;
        let quantity = item.quantity.filter(|q| *q > 0).ok_or_else(|| {
            ServiceError::InvalidItems(format!("item {} needs a positive quantity", idx))
        })?;
        items.push(OrderItem {
            product_id,
            title,
            price,
            quantity,
            image: non_blank(&item.image),
        });
    }

    let subtotal = non_negative(input.subtotal, "subtotal")?;
    let tax = non_negative(input.tax, "tax")?;
    let total = non_negative(input.total, "total")?;
    let discount = non_negative(Some(input.discount.unwrap_or(Decimal::ZERO)), "discount")?;

    let address = input.address.clone().unwrap_or_default();
    let phone = non_blank(&address.phone).ok_or(ServiceError::MissingPhone)?;

    let payment_method = match input.payment_method.as_deref().map(str::trim) {
        Some("cod") => PaymentMethod::Cod,
        Some("gateway") => PaymentMethod::Gateway,
        Some(other) => {
            return Err(ServiceError::InvalidPaymentMethod(format!(
                "'{}' is not supported; use cod or gateway",
                other
            )))
        }
        None => {
            return Err(ServiceError::InvalidPaymentMethod(
                "paymentMethod is required".to_string(),
            ))
        }
    };

    if discount > subtotal + tax {
        return Err(ServiceError::InvalidAmount(
            "discount cannot exceed subtotal + tax".to_string(),
        ));
    }
    let expected = subtotal + tax - discount;
    if (total - expected).abs() >= AMOUNT_TOLERANCE {
        return Err(ServiceError::TotalMismatch { total, expected });
    }

    Ok(ValidatedOrder {
        items,
        address: ShippingAddress {
            name: non_blank(&address.name),
            phone,
            line1: non_blank(&address.line1),
            line2: non_blank(&address.line2),
            city: non_blank(&address.city),
            state: non_blank(&address.state),
            postal_code: non_blank(&address.postal_code),
            country: non_blank(&address.country),
        },
        subtotal,
        tax,
        discount,
        total,
        coupon_code: non_blank(&input.coupon_code).map(|c| normalize_code(&c)),
        payment_method,
    })
}

/// `ORD-{yyyyMMddHHmmss}-{6 random alphanumerics}`. Uniqueness is enforced
/// by the `order_number` unique index, not by this function.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();
    format!("ORD-{}-{}", now.format("%Y%m%d%H%M%S"), suffix)
}

pub(crate) fn parse_order_id(id: &str) -> Result<Uuid, ServiceError> {
    Uuid::parse_str(id.trim())
        .map_err(|_| ServiceError::InvalidIdFormat(format!("'{}' is not a valid order id", id)))
}

/// Writes `changes` only if the row still carries `current.version`.
///
/// `guard` adds state preconditions to the same UPDATE. Returns false when
/// another writer got there first.
pub(crate) async fn compare_and_set<C: ConnectionTrait>(
    conn: &C,
    current: &OrderModel,
    mut changes: order::ActiveModel,
    guard: Condition,
) -> Result<bool, ServiceError> {
    changes.version = Set(current.version + 1);
    changes.updated_at = Set(Utc::now());

    let result = OrderEntity::update_many()
        .set(changes)
        .filter(order::Column::Id.eq(current.id))
        .filter(order::Column::Version.eq(current.version))
        .filter(guard)
        .exec(conn)
        .await
        .map_err(|e| {
            error!(order_id = %current.id, "Failed to update order: {}", e);
            ServiceError::DatabaseError(e)
        })?;

    Ok(result.rows_affected == 1)
}

pub(crate) async fn load_order<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
) -> Result<OrderModel, ServiceError> {
    OrderEntity::find_by_id(id)
        .one(conn)
        .await
        .map_err(|e| {
            error!("Failed to fetch order {}: {}", id, e);
            ServiceError::DatabaseError(e)
        })?
        .ok_or_else(|| ServiceError::OrderNotFound(id.to_string()))
}

fn is_payment_id_violation(err: &DbErr) -> bool {
    is_unique_violation(err) && err.to_string().contains("gateway_payment_id")
}

/// Fails when `gateway_payment_id` already settled an order other than `except`.
async fn ensure_payment_unused<C: ConnectionTrait>(
    conn: &C,
    gateway_payment_id: &str,
    except: Option<Uuid>,
) -> Result<(), ServiceError> {
    let mut select =
        OrderEntity::find().filter(order::Column::GatewayPaymentId.eq(gateway_payment_id));
    if let Some(id) = except {
        select = select.filter(order::Column::Id.ne(id));
    }
    let existing = select.one(conn).await.map_err(ServiceError::DatabaseError)?;
    match existing {
        Some(other) => {
            warn!(
                gateway_payment_id = %gateway_payment_id,
                order_number = %other.order_number,
                "Gateway payment already recorded"
            );
            Err(ServiceError::PaymentAlreadyUsed(gateway_payment_id.to_string()))
        }
        None => Ok(()),
    }
}

type OrderNumberFn = fn(DateTime<Utc>) -> String;

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    coupons: CouponService,
    events: EventSender,
    order_number: OrderNumberFn,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, coupons: CouponService, events: EventSender) -> Self {
        Self {
            db,
            coupons,
            events,
            order_number: generate_order_number,
        }
    }

    /// Replaces the order number generator.
    pub fn with_order_number_generator(mut self, generator: OrderNumberFn) -> Self {
        self.order_number = generator;
        self
    }

    /// Order Intake.
    ///
    /// `payment` is the result of a signature check done by the caller; intake
    /// marks the order paid only for gateway orders that carry one.
    #[instrument(skip(self, input, payment))]
    pub async fn create_order(
        &self,
        input: CreateOrderInput,
        user_id: Option<String>,
        payment: Option<VerifiedPayment>,
    ) -> Result<OrderModel, ServiceError> {
        let validated = validate_payload(&input)?;
        let now = Utc::now();

        let txn = self.db.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        if let Some(code) = &validated.coupon_code {
            let coupon = self
                .coupons
                .validate_in(&txn, code, validated.subtotal, now)
                .await?;
            if (coupon.discount_amount - validated.discount).abs() >= AMOUNT_TOLERANCE {
                return Err(ServiceError::DiscountMismatch {
                    supplied: validated.discount,
                    computed: coupon.discount_amount,
                });
            }
            self.coupons.apply_in(&txn, code).await?;
        }

        let payment = match validated.payment_method {
            PaymentMethod::Gateway => payment,
            PaymentMethod::Cod => None,
        };
        if let Some(p) = &payment {
            ensure_payment_unused(&txn, &p.gateway_payment_id, None).await?;
        }
        let payment_status = if payment.is_some() {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Pending
        };

        let order_number = (self.order_number)(now);
        let created_payment_id = payment.as_ref().map(|p| p.gateway_payment_id.clone());
        let model = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(order_number.clone()),
            user_id: Set(user_id),
            items: Set(OrderItems(validated.items)),
            shipping_address: Set(validated.address),
            subtotal: Set(validated.subtotal),
            tax: Set(validated.tax),
            discount: Set(validated.discount),
            total: Set(validated.total),
            coupon_code: Set(validated.coupon_code),
            payment_method: Set(validated.payment_method),
            payment_status: Set(payment_status),
            status: Set(OrderStatus::Pending),
            gateway_order_id: Set(match &payment {
                Some(p) => Some(p.gateway_order_id.clone()),
                None if validated.payment_method == PaymentMethod::Gateway => {
                    non_blank(&input.gateway_order_id)
                }
                None => None,
            }),
            gateway_payment_id: Set(payment.as_ref().map(|p| p.gateway_payment_id.clone())),
            gateway_signature: Set(payment.map(|p| p.gateway_signature)),
            cancellation_requested: Set(false),
            cancellation_reason: Set(None),
            cancellation_status: Set(CancellationStatus::None),
            cancellation_requested_at: Set(None),
            cancellation_processed_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            version: Set(1),
        };

        let created = model.insert(&txn).await.map_err(|e| {
            if is_payment_id_violation(&e) {
                warn!(order_number = %order_number, "Gateway payment reused at intake");
                ServiceError::PaymentAlreadyUsed(
                    created_payment_id.clone().unwrap_or_default(),
                )
            } else if is_unique_violation(&e) {
                warn!(order_number = %order_number, "Order number collision");
                ServiceError::DuplicateOrderId(order_number.clone())
            } else {
                error!("Failed to insert order {}: {}", order_number, e);
                ServiceError::DatabaseError(e)
            }
        })?;

        txn.commit().await.map_err(|e| {
            error!("Failed to commit order {}: {}", order_number, e);
            ServiceError::DatabaseError(e)
        })?;

        counter!("orders.created", 1);
        info!(
            order_id = %created.id,
            order_number = %created.order_number,
            payment_status = created.payment_status.as_str(),
            "Order created"
        );
        self.events.emit(Event::OrderCreated(OrderRef::from(&created)));

        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, id: &str) -> Result<OrderModel, ServiceError> {
        let id = parse_order_id(id)?;
        load_order(&*self.db, id).await
    }

    #[instrument(skip(self))]
    pub async fn get_by_order_number(&self, order_number: &str) -> Result<OrderModel, ServiceError> {
        OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(order_number.trim()))
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::OrderNotFound(order_number.to_string()))
    }

    /// Newest first, optionally restricted to one customer.
    #[instrument(skip(self))]
    pub async fn list_orders(&self, query: ListOrdersQuery) -> Result<OrderPage, ServiceError> {
        let page = query.page.unwrap_or(1).max(1);
        let limit = query
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        let mut select = OrderEntity::find();
        if query.guests_only {
            select = select.filter(order::Column::UserId.is_null());
        } else if let Some(user_id) = non_blank(&query.user_id) {
            select = select.filter(order::Column::UserId.eq(user_id));
        }

        let paginator = select
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::Id)
            .paginate(&*self.db, limit);
        let total = paginator.num_items().await.map_err(ServiceError::DatabaseError)?;
        let orders = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(OrderPage {
            orders,
            total,
            page,
            limit,
        })
    }

    /// Order State Machine entry point.
    #[instrument(skip(self, input))]
    pub async fn update_status(
        &self,
        id: &str,
        input: UpdateStatusInput,
    ) -> Result<OrderModel, ServiceError> {
        let id = parse_order_id(id)?;
        if input.status.is_none() && input.payment_status.is_none() {
            return Err(ServiceError::NoFieldsProvided);
        }
        let new_status = input
            .status
            .as_deref()
            .map(|s| s.trim().parse::<OrderStatus>())
            .transpose()?;
        let new_payment_status = input
            .payment_status
            .as_deref()
            .map(|s| s.trim().parse::<PaymentStatus>())
            .transpose()?;

        let current = load_order(&*self.db, id).await?;
        if let Some(to) = new_status {
            ensure_status_transition(current.status, to)?;
        }
        if let Some(to) = new_payment_status {
            ensure_payment_transition(current.payment_status, to)?;
        }

        let mut changes = <order::ActiveModel as Default>::default();
        let mut guard = Condition::all();
        // A terminal status decided by an admin closes any open cancellation request.
        let closed_request = new_status
            .filter(|to| to.is_terminal())
            .filter(|_| current.cancellation_status == CancellationStatus::Pending)
            .map(|to| match to {
                OrderStatus::Cancelled => CancellationStatus::Approved,
                _ => CancellationStatus::Rejected,
            });
        if let Some(to) = new_status {
            changes.status = Set(to);
            guard = guard.add(order::Column::Status.eq(current.status));
        }
        if let Some(decision) = closed_request {
            changes.cancellation_status = Set(decision);
            changes.cancellation_processed_at = Set(Some(Utc::now()));
            guard = guard.add(order::Column::CancellationStatus.eq(CancellationStatus::Pending));
        }
        if let Some(to) = new_payment_status {
            changes.payment_status = Set(to);
            guard = guard.add(order::Column::PaymentStatus.eq(current.payment_status));
        }

        if !compare_and_set(&*self.db, &current, changes, guard).await? {
            warn!(order_id = %id, "Lost update race on status change");
            return Err(ServiceError::ConcurrentModification(
                current.order_number.clone(),
            ));
        }

        let updated = load_order(&*self.db, id).await?;
        let order_ref = OrderRef::from(&updated);
        if let Some(to) = new_status {
            counter!("orders.status_changed", 1);
            info!(
                order_id = %id,
                from = current.status.as_str(),
                to = to.as_str(),
                "Order status updated"
            );
            self.events.emit(Event::OrderStatusChanged {
                order: order_ref.clone(),
                old_status: current.status,
                new_status: to,
            });
        }
        match closed_request {
            Some(CancellationStatus::Approved) => {
                info!(order_id = %id, "Open cancellation request approved by status change");
                self.events
                    .emit(Event::CancellationApproved(order_ref.clone()));
            }
            Some(_) => {
                info!(order_id = %id, "Open cancellation request rejected by status change");
                self.events
                    .emit(Event::CancellationRejected(order_ref.clone()));
            }
            None => {}
        }
        if let Some(to) = new_payment_status {
            info!(
                order_id = %id,
                from = current.payment_status.as_str(),
                to = to.as_str(),
                "Payment status updated"
            );
            self.events.emit(Event::PaymentStatusChanged {
                order: order_ref,
                old_status: current.payment_status,
                new_status: to,
            });
        }

        Ok(updated)
    }

    /// Marks a gateway order paid after its callback signature checked out.
    ///
    /// `reference` is either the record id or the human order number.
    /// Replaying the same verified payment is a no-op.
    #[instrument(skip(self, payment), fields(gateway_payment_id = %payment.gateway_payment_id))]
    pub async fn confirm_gateway_payment(
        &self,
        reference: &str,
        payment: VerifiedPayment,
    ) -> Result<OrderModel, ServiceError> {
        let current = match Uuid::parse_str(reference.trim()) {
            Ok(id) => load_order(&*self.db, id).await?,
            Err(_) => self.get_by_order_number(reference).await?,
        };

        if current.payment_method != PaymentMethod::Gateway {
            return Err(ServiceError::InvalidPaymentMethod(format!(
                "order {} is not a gateway payment",
                current.order_number
            )));
        }
        if current.payment_status == PaymentStatus::Paid
            && current.gateway_payment_id.as_deref() == Some(payment.gateway_payment_id.as_str())
        {
            return Ok(current);
        }
        if let Some(recorded) = &current.gateway_order_id {
            if recorded != &payment.gateway_order_id {
                warn!(
                    order_id = %current.id,
                    gateway_order_id = %payment.gateway_order_id,
                    "Payment presented for a different gateway order"
                );
                return Err(ServiceError::GatewayOrderMismatch {
                    recorded: recorded.clone(),
                    supplied: payment.gateway_order_id.clone(),
                });
            }
        }
        ensure_payment_transition(current.payment_status, PaymentStatus::Paid)?;
        ensure_payment_unused(&*self.db, &payment.gateway_payment_id, Some(current.id)).await?;

        let payment_id = payment.gateway_payment_id.clone();
        let changes = order::ActiveModel {
            payment_status: Set(PaymentStatus::Paid),
            gateway_order_id: Set(Some(payment.gateway_order_id)),
            gateway_payment_id: Set(Some(payment.gateway_payment_id)),
            gateway_signature: Set(Some(payment.gateway_signature)),
            ..Default::default()
        };
        let guard = Condition::all().add(order::Column::PaymentStatus.eq(current.payment_status));
        match compare_and_set(&*self.db, &current, changes, guard).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(ServiceError::ConcurrentModification(
                    current.order_number.clone(),
                ))
            }
            Err(ServiceError::DatabaseError(e)) if is_payment_id_violation(&e) => {
                return Err(ServiceError::PaymentAlreadyUsed(payment_id))
            }
            Err(e) => return Err(e),
        }

        let updated = load_order(&*self.db, current.id).await?;
        info!(order_id = %updated.id, "Gateway payment confirmed");
        self.events.emit(Event::PaymentStatusChanged {
            order: OrderRef::from(&updated),
            old_status: current.payment_status,
            new_status: PaymentStatus::Paid,
        });
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn valid_input() -> CreateOrderInput {
        CreateOrderInput {
            items: vec![OrderItemInput {
                product_id: Some("p1".into()),
                title: Some("Chili Powder".into()),
                price: Some(dec!(100)),
                quantity: Some(2),
                image: None,
            }],
            address: Some(AddressInput {
                phone: Some("+91 98765 43210".into()),
                ..Default::default()
            }),
            subtotal: Some(dec!(200)),
            tax: Some(dec!(10)),
            discount: None,
            total: Some(dec!(210)),
            payment_method: Some("cod".into()),
            ..Default::default()
        }
    }

    #[test]
    fn accepts_well_formed_payload() {
        let v = validate_payload(&valid_input()).unwrap();
        assert_eq!(v.total, dec!(210));
        assert_eq!(v.discount, Decimal::ZERO);
        assert_eq!(v.payment_method, PaymentMethod::Cod);
        assert_eq!(v.items[0].quantity, 2);
    }

    #[test]
    fn reports_failures_in_order() {
        let mut input = valid_input();
        input.items.clear();
        input.subtotal = Some(dec!(-1));
        input.address = None;
        input.payment_method = Some("upi".into());
        assert_matches!(validate_payload(&input), Err(ServiceError::InvalidItems(_)));

        input.items = valid_input().items;
        assert_matches!(validate_payload(&input), Err(ServiceError::InvalidAmount(_)));

        input.subtotal = Some(dec!(200));
        assert_matches!(validate_payload(&input), Err(ServiceError::MissingPhone));

        input.address = valid_input().address;
        assert_matches!(
            validate_payload(&input),
            Err(ServiceError::InvalidPaymentMethod(_))
        );
    }

    #[test]
    fn rejects_non_positive_item_fields() {
        let mut input = valid_input();
        input.items[0].quantity = Some(0);
        assert_matches!(validate_payload(&input), Err(ServiceError::InvalidItems(m)) if m.contains("quantity"));

        let mut input = valid_input();
        input.items[0].price = Some(Decimal::ZERO);
        assert_matches!(validate_payload(&input), Err(ServiceError::InvalidItems(m)) if m.contains("price"));

        let mut input = valid_input();
        input.items[0].title = Some("   ".into());
        assert_matches!(validate_payload(&input), Err(ServiceError::InvalidItems(m)) if m.contains("title"));
    }

    #[test]
    fn total_must_match_within_tolerance() {
        let mut input = valid_input();
        input.total = Some(dec!(210.009));
        assert!(validate_payload(&input).is_ok());

        input.total = Some(dec!(210.01));
        assert_matches!(
            validate_payload(&input),
            Err(ServiceError::TotalMismatch { expected, .. }) if expected == dec!(210)
        );
    }

    #[test]
    fn discount_is_bounded() {
        let mut input = valid_input();
        input.discount = Some(dec!(300));
        input.total = Some(dec!(0));
        assert_matches!(validate_payload(&input), Err(ServiceError::InvalidAmount(_)));

        input.discount = Some(dec!(15));
        input.total = Some(dec!(195));
        assert_eq!(validate_payload(&input).unwrap().discount, dec!(15));
    }

    #[test]
    fn coupon_code_is_normalized() {
        let mut input = valid_input();
        input.coupon_code = Some(" save10 ".into());
        assert_eq!(
            validate_payload(&input).unwrap().coupon_code.as_deref(),
            Some("SAVE10")
        );
    }

    #[test]
    fn order_number_format() {
        let now = DateTime::parse_from_rfc3339("2024-03-05T07:08:09Z")
            .unwrap()
            .with_timezone(&Utc);
        let number = generate_order_number(now);
        assert!(number.starts_with("ORD-20240305070809-"));
        let suffix = number.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn malformed_ids_are_rejected() {
        assert_matches!(parse_order_id("42"), Err(ServiceError::InvalidIdFormat(_)));
        assert!(parse_order_id(&Uuid::new_v4().to_string()).is_ok());
    }
}
