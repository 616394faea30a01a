use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    entities::order::{CancellationStatus, Model as OrderModel, OrderStatus, PaymentStatus},
    notifications::{Notification, NotificationType, Notifier},
};

/// Minimal order reference carried by every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRef {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Option<String>,
}

impl From<&OrderModel> for OrderRef {
    fn from(order: &OrderModel) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number.clone(),
            user_id: order.user_id.clone(),
        }
    }
}

// Define the various events that can occur in the order lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(OrderRef),
    OrderStatusChanged {
        order: OrderRef,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    PaymentStatusChanged {
        order: OrderRef,
        old_status: PaymentStatus,
        new_status: PaymentStatus,
    },
    CancellationRequested {
        order: OrderRef,
        reason: String,
    },
    CancellationApproved(OrderRef),
    CancellationRejected(OrderRef),
}

impl Event {
    pub fn order(&self) -> &OrderRef {
        match self {
            Event::OrderCreated(order)
            | Event::CancellationApproved(order)
            | Event::CancellationRejected(order) => order,
            Event::OrderStatusChanged { order, .. }
            | Event::PaymentStatusChanged { order, .. }
            | Event::CancellationRequested { order, .. } => order,
        }
    }

    /// Renders the event as a customer-facing notification.
    pub fn to_notification(&self) -> Notification {
        let order = self.order();
        let (notification_type, message) = match self {
            Event::OrderCreated(_) => (
                NotificationType::OrderPlaced,
                format!("Order {} has been placed", order.order_number),
            ),
            Event::OrderStatusChanged { new_status, .. } => (
                NotificationType::OrderStatus,
                format!("Order {} is now {}", order.order_number, new_status.as_str()),
            ),
            Event::PaymentStatusChanged { new_status, .. } => (
                NotificationType::PaymentStatus,
                format!(
                    "Payment for order {} is {}",
                    order.order_number,
                    new_status.as_str()
                ),
            ),
            Event::CancellationRequested { .. } => (
                NotificationType::CancellationRequested,
                format!("Cancellation requested for order {}", order.order_number),
            ),
            Event::CancellationApproved(_) => (
                NotificationType::CancellationDecided,
                format!(
                    "Cancellation {} for order {}",
                    CancellationStatus::Approved.as_str(),
                    order.order_number
                ),
            ),
            Event::CancellationRejected(_) => (
                NotificationType::CancellationDecided,
                format!(
                    "Cancellation {} for order {}",
                    CancellationStatus::Rejected.as_str(),
                    order.order_number
                ),
            ),
        };

        Notification {
            id: Uuid::new_v4(),
            order_id: order.id,
            order_number: order.order_number.clone(),
            user_id: order.user_id.clone(),
            notification_type,
            message,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Queues an event without waiting. A full or closed channel drops the
    /// event with a warning; the caller's operation has already committed.
    pub fn emit(&self, event: Event) {
        if let Err(e) = self.sender.try_send(event) {
            warn!("Dropping domain event: {}", e);
        }
    }
}

/// Drains the channel and forwards each event to the notifier.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, notifier: Arc<dyn Notifier>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        debug!("Received event: {:?}", event);
        let notification = event.to_notification();
        let order_number = notification.order_number.clone();

        if let Err(e) = notifier.send(notification).await {
            error!(
                order_number = %order_number,
                error = %e,
                "Failed to deliver notification; discarding"
            );
        }
    }

    info!("Event processing loop stopped");
}
