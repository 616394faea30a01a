use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Message handed to the outbound notifier (email, SMS, push).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    pub order_id: Uuid,
    pub order_number: String,
    /// Customer to notify; `None` for guest checkouts and admin-only alerts
    pub user_id: Option<String>,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    OrderPlaced,
    OrderStatus,
    PaymentStatus,
    CancellationRequested,
    CancellationDecided,
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outbound notification channel.
///
/// Callers treat delivery as fire-and-forget: an error is logged by the
/// event loop and never reaches the order operation that caused it.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), NotificationError>;
}

/// Writes notifications to the log. Used when no delivery channel is wired up.
#[derive(Debug, Clone, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send(&self, notification: Notification) -> Result<(), NotificationError> {
        let payload = serde_json::to_string(&notification)?;
        info!(
            notification_id = %notification.id,
            order_number = %notification.order_number,
            payload = %payload,
            "Notification dispatched"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn logging_notifier_accepts_notifications() {
        let notification = Notification {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            order_number: "ORD-20240101120000-ABC123".into(),
            user_id: None,
            notification_type: NotificationType::OrderPlaced,
            message: "Order placed".into(),
            created_at: Utc::now(),
        };
        assert!(LoggingNotifier.send(notification).await.is_ok());
    }

    #[test]
    fn notification_type_serializes_snake_case() {
        let json = serde_json::to_string(&NotificationType::CancellationDecided).unwrap();
        assert_eq!(json, "\"cancellation_decided\"");
    }
}
