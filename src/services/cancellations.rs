use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    sea_query::Condition, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder,
};
use tracing::{info, instrument, warn};

use crate::{
    entities::order::{
        self, CancellationStatus, Entity as OrderEntity, Model as OrderModel, OrderStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender, OrderRef},
    services::{
        order_status::{is_valid_cancellation_transition, is_valid_status_transition},
        orders::{compare_and_set, load_order, parse_order_id},
    },
};

pub const MAX_REASON_LENGTH: usize = 500;

fn validate_reason(reason: Option<&str>) -> Result<String, ServiceError> {
    let reason = reason.map(str::trim).unwrap_or_default();
    if reason.is_empty() {
        return Err(ServiceError::ValidationError(
            "a cancellation reason is required".to_string(),
        ));
    }
    if reason.chars().count() > MAX_REASON_LENGTH {
        return Err(ServiceError::ValidationError(format!(
            "cancellation reason cannot exceed {} characters",
            MAX_REASON_LENGTH
        )));
    }
    Ok(reason.to_string())
}

fn ensure_pending_request(order: &OrderModel) -> Result<(), ServiceError> {
    if order.cancellation_requested && order.cancellation_status == CancellationStatus::Pending {
        Ok(())
    } else {
        Err(ServiceError::NoPendingRequest(order.order_number.clone()))
    }
}

/// Customer request / admin decision workflow layered over the order status.
#[derive(Clone)]
pub struct CancellationService {
    db: Arc<DatabaseConnection>,
    events: EventSender,
}

impl CancellationService {
    pub fn new(db: Arc<DatabaseConnection>, events: EventSender) -> Self {
        Self { db, events }
    }

    /// One request per order: a rejected request cannot be raised again.
    #[instrument(skip(self, reason))]
    pub async fn request_cancellation(
        &self,
        id: &str,
        requester_id: Option<&str>,
        reason: Option<&str>,
    ) -> Result<OrderModel, ServiceError> {
        let id = parse_order_id(id)?;
        let reason = validate_reason(reason)?;
        let current = load_order(&*self.db, id).await?;

        if current.user_id.is_some() {
            match requester_id {
                Some(requester) if !current.is_owned_by_other(requester) => {}
                _ => {
                    warn!(order_id = %id, "Cancellation requested by non-owner");
                    return Err(ServiceError::Forbidden(
                        "only the customer who placed the order can cancel it".to_string(),
                    ));
                }
            }
        }
        if current.status.is_terminal() {
            return Err(ServiceError::AlreadyTerminal(current.order_number.clone()));
        }
        if current.cancellation_requested
            || !is_valid_cancellation_transition(
                current.cancellation_status,
                CancellationStatus::Pending,
            )
        {
            return Err(ServiceError::AlreadyRequested(current.order_number.clone()));
        }

        let changes = order::ActiveModel {
            cancellation_requested: Set(true),
            cancellation_status: Set(CancellationStatus::Pending),
            cancellation_reason: Set(Some(reason.clone())),
            cancellation_requested_at: Set(Some(Utc::now())),
            ..Default::default()
        };
        let guard = Condition::all()
            .add(order::Column::Status.eq(current.status))
            .add(order::Column::CancellationStatus.eq(CancellationStatus::None))
            .add(order::Column::CancellationRequested.eq(false));

        if !compare_and_set(&*self.db, &current, changes, guard).await? {
            return Err(self.explain_lost_race(id, |latest| {
                if latest.status.is_terminal() {
                    ServiceError::AlreadyTerminal(latest.order_number.clone())
                } else if latest.cancellation_requested {
                    ServiceError::AlreadyRequested(latest.order_number.clone())
                } else {
                    ServiceError::ConcurrentModification(latest.order_number.clone())
                }
            })
            .await);
        }

        let updated = load_order(&*self.db, id).await?;
        info!(order_id = %id, "Cancellation requested");
        self.events.emit(Event::CancellationRequested {
            order: OrderRef::from(&updated),
            reason,
        });
        Ok(updated)
    }

    /// Moves the order to `cancelled`. Re-checks that the order is still
    /// cancellable inside the same conditional write.
    #[instrument(skip(self))]
    pub async fn approve_cancellation(&self, id: &str) -> Result<OrderModel, ServiceError> {
        let id = parse_order_id(id)?;
        let current = load_order(&*self.db, id).await?;
        ensure_pending_request(&current)?;
        if !is_valid_status_transition(current.status, OrderStatus::Cancelled) {
            return Err(ServiceError::AlreadyTerminal(current.order_number.clone()));
        }

        let changes = order::ActiveModel {
            cancellation_status: Set(CancellationStatus::Approved),
            status: Set(OrderStatus::Cancelled),
            cancellation_processed_at: Set(Some(Utc::now())),
            ..Default::default()
        };
        let guard = Condition::all()
            .add(order::Column::CancellationStatus.eq(CancellationStatus::Pending))
            .add(order::Column::Status.eq(current.status));

        if !compare_and_set(&*self.db, &current, changes, guard).await? {
            return Err(self.explain_lost_race(id, decision_conflict).await);
        }

        let updated = load_order(&*self.db, id).await?;
        info!(order_id = %id, previous_status = current.status.as_str(), "Cancellation approved");
        self.events.emit(Event::CancellationApproved(OrderRef::from(&updated)));
        Ok(updated)
    }

    /// Closes the request; the order status is left untouched.
    #[instrument(skip(self))]
    pub async fn reject_cancellation(&self, id: &str) -> Result<OrderModel, ServiceError> {
        let id = parse_order_id(id)?;
        let current = load_order(&*self.db, id).await?;
        ensure_pending_request(&current)?;

        let changes = order::ActiveModel {
            cancellation_status: Set(CancellationStatus::Rejected),
            cancellation_processed_at: Set(Some(Utc::now())),
            ..Default::default()
        };
        let guard =
            Condition::all().add(order::Column::CancellationStatus.eq(CancellationStatus::Pending));

        if !compare_and_set(&*self.db, &current, changes, guard).await? {
            return Err(self.explain_lost_race(id, decision_conflict).await);
        }

        let updated = load_order(&*self.db, id).await?;
        info!(order_id = %id, "Cancellation rejected");
        self.events.emit(Event::CancellationRejected(OrderRef::from(&updated)));
        Ok(updated)
    }

    /// Admin queue, most recent request first.
    pub async fn list_pending(&self) -> Result<Vec<OrderModel>, ServiceError> {
        OrderEntity::find()
            .filter(order::Column::CancellationStatus.eq(CancellationStatus::Pending))
            .order_by_desc(order::Column::CancellationRequestedAt)
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    async fn explain_lost_race<F>(&self, id: uuid::Uuid, classify: F) -> ServiceError
    where
        F: FnOnce(&OrderModel) -> ServiceError,
    {
        match load_order(&*self.db, id).await {
            Ok(latest) => classify(&latest),
            Err(e) => e,
        }
    }
}

fn decision_conflict(latest: &OrderModel) -> ServiceError {
    if ensure_pending_request(latest).is_err() {
        ServiceError::NoPendingRequest(latest.order_number.clone())
    } else if latest.status.is_terminal() {
        ServiceError::AlreadyTerminal(latest.order_number.clone())
    } else {
        ServiceError::ConcurrentModification(latest.order_number.clone())
    }
}
