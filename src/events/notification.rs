use std::fmt;

/// Which chat-room notification channel an event should be relayed to.
/// `Ignored` events are fused into the aggregate status but never surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationCategory {
    Ignored,
    Status,
}

impl fmt::Display for NotificationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationCategory::Ignored => write!(f, ""),
            NotificationCategory::Status => write!(f, "status"),
        }
    }
}

/// Implemented by events the chat adapter may relay as a plain-text
/// notification. Subscribing to `Arc<dyn Notification>` on the event bus
/// receives every concrete event published through [`super::Bus::notify`].
pub trait Notification: Send + Sync {
    fn category(&self) -> NotificationCategory;
    fn message(&self) -> String;
}
