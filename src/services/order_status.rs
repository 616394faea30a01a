//! Transition tables for the three order state axes.
//!
//! Every mutation of `status`, `paymentStatus` or `cancellationStatus` goes
//! through one of the `is_valid_*_transition` functions below. A pair that is
//! not listed is illegal; same-state requests are illegal too.

use std::str::FromStr;

use crate::{
    entities::order::{CancellationStatus, OrderStatus, PaymentStatus},
    errors::ServiceError,
};

pub fn is_valid_status_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    match (from, to) {
        // From pending
        (Pending, Confirmed) => true,
        (Pending, Cancelled) => true,

        // From confirmed
        (Confirmed, Shipped) => true,
        (Confirmed, Cancelled) => true,

        // From shipped
        (Shipped, Delivered) => true,
        (Shipped, Cancelled) => true,

        // Delivered and cancelled are terminal
        _ => false,
    }
}

pub fn is_valid_payment_transition(from: PaymentStatus, to: PaymentStatus) -> bool {
    use PaymentStatus::*;
    matches!(
        (from, to),
        (Pending, Paid) | (Pending, Failed) | (Paid, Refunded)
    )
}

pub fn is_valid_cancellation_transition(from: CancellationStatus, to: CancellationStatus) -> bool {
    use CancellationStatus::*;
    matches!(
        (from, to),
        (None, Pending) | (Pending, Approved) | (Pending, Rejected)
    )
}

/// Fails with `IllegalTransition` unless `from -> to` is in the status table.
pub fn ensure_status_transition(from: OrderStatus, to: OrderStatus) -> Result<(), ServiceError> {
    if is_valid_status_transition(from, to) {
        Ok(())
    } else {
        Err(ServiceError::IllegalTransition {
            axis: "status",
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
        })
    }
}

pub fn ensure_payment_transition(
    from: PaymentStatus,
    to: PaymentStatus,
) -> Result<(), ServiceError> {
    if is_valid_payment_transition(from, to) {
        Ok(())
    } else {
        Err(ServiceError::IllegalTransition {
            axis: "paymentStatus",
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
        })
    }
}

impl FromStr for OrderStatus {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(ServiceError::InvalidStatusValue(format!(
                "'{}' is not a valid status; expected one of pending, confirmed, shipped, delivered, cancelled",
                other
            ))),
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(ServiceError::InvalidStatusValue(format!(
                "'{}' is not a valid paymentStatus; expected one of pending, paid, failed, refunded",
                other
            ))),
        }
    }
}
