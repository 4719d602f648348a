// src/utils/notify.rs

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::error::AppError;

/// What a participant is being told about.
#[derive(Debug, Clone)]
pub enum Notification {
    Enrolled {
        participant_id: i64,
        campaign_id: i64,
        enrollment_id: i64,
    },
    RosterAttached {
        campaign_id: i64,
        participant_ids: Vec<i64>,
    },
}

/// Outbound notification collaborator (e-mail in production deployments).
#[async_trait]
pub trait Notifier: Send + Sync + fmt::Debug {
    async fn notify(&self, notification: Notification) -> Result<(), AppError>;
}

/// Default notifier: records the notification in the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), AppError> {
        tracing::info!(?notification, "notification dispatched");
        Ok(())
    }
}

/// Fire-and-forget dispatch. A failed notification is logged and never
/// reaches the caller, so it cannot roll back an enrollment.
pub fn dispatch(notifier: &Arc<dyn Notifier>, notification: Notification) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(notification).await {
            tracing::warn!("Failed to send notification: {}", e);
        }
    });
}
