use tokio::sync::{mpsc, Mutex};

use crate::error::Error;
use crate::path::Path;
use crate::priority::ProviderId;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub path: Path,
    pub old: Value,
    /// Value stored after coercion.
    pub new: Value,
    pub provider: ProviderId,
}

/// Outcome of one fetch round.
#[derive(Debug, Clone)]
pub enum Notification {
    /// Updates in the order they were applied; possibly empty.
    Updates(Vec<FieldUpdate>),
    Failed(Error),
}

impl Notification {
    pub fn updates(&self) -> &[FieldUpdate] {
        match self {
            Self::Updates(updates) => updates,
            Self::Failed(_) => &[],
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::Updates(_) => None,
            Self::Failed(err) => Some(err),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Updates(_))
    }
}

/// Fans notifications out to bounded subscriber channels. A full channel
/// blocks the publisher until the subscriber catches up.
pub struct NotificationBus {
    capacity: usize,
    // None once closed.
    subscribers: Mutex<Option<Vec<mpsc::Sender<Notification>>>>,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Some(Vec::new())),
        }
    }

    /// A bus that has been closed hands out receivers that are already closed.
    pub async fn subscribe(&self) -> mpsc::Receiver<Notification> {
        let (sender, receiver) = mpsc::channel(self.capacity);
        if let Some(subscribers) = self.subscribers.lock().await.as_mut() {
            subscribers.push(sender);
        }
        receiver
    }

    pub async fn publish(&self, notification: Notification) {
        let mut guard = self.subscribers.lock().await;
        let Some(subscribers) = guard.as_mut() else {
            return;
        };
        let mut delivered = Vec::with_capacity(subscribers.len());
        for sender in subscribers.drain(..) {
            if sender.send(notification.clone()).await.is_ok() {
                delivered.push(sender);
            } else {
                tracing::debug!("dropping closed subscriber");
            }
        }
        *subscribers = delivered;
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.as_ref().map_or(0, Vec::len)
    }

    /// Drops every sender, ending each subscriber's stream.
    pub async fn close(&self) {
        if let Some(subscribers) = self.subscribers.lock().await.take() {
            tracing::debug!(subscribers = subscribers.len(), "closing notification bus");
        }
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(16)
    }
}
