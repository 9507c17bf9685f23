use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

pub const CHANNEL_ID: &str = "timetable";

/// When a scheduled notification fires: every week at a weekday/time, or
/// once at an absolute instant. Weekday numbering is the platform's
/// (Sunday = 1 through Saturday = 7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationTrigger {
    Weekly { weekday: u32, hour: u32, minute: u32 },
    At(DateTime<Utc>),
}

/// Declarative descriptor handed to the platform notification service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    pub id: u32,
    pub title: String,
    pub body: String,
    pub trigger: NotificationTrigger,
    pub sound: Option<String>,
    pub channel_id: String,
}

/// The host platform's local notification service. All four operations may
/// fail; the scheduler decides which failures are fatal.
#[async_trait]
pub trait NotificationClient: Send + Sync {
    async fn request_permission(&self) -> Result<bool, InfraError>;

    /// Ids of every notification currently pending in the platform queue.
    async fn pending(&self) -> Result<Vec<u32>, InfraError>;

    async fn cancel(&self, ids: &[u32]) -> Result<(), InfraError>;

    async fn schedule(&self, requests: &[NotificationRequest]) -> Result<(), InfraError>;
}

/// Mutex-held stand-in for the platform queue, for tests and embedding
/// hosts without a native notification service.
#[derive(Debug, Default)]
pub struct InMemoryNotificationClient {
    queue: Mutex<HashMap<u32, NotificationRequest>>,
}

impl InMemoryNotificationClient {
    pub fn snapshot(&self) -> Result<Vec<NotificationRequest>, InfraError> {
        let queue = self
            .queue
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("notification queue lock poisoned: {error}")))?;
        let mut requests: Vec<NotificationRequest> = queue.values().cloned().collect();
        requests.sort_by_key(|request| request.id);
        Ok(requests)
    }
}

#[async_trait]
impl NotificationClient for InMemoryNotificationClient {
    async fn request_permission(&self) -> Result<bool, InfraError> {
        Ok(true)
    }

    async fn pending(&self) -> Result<Vec<u32>, InfraError> {
        let queue = self
            .queue
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("notification queue lock poisoned: {error}")))?;
        Ok(queue.keys().copied().collect())
    }

    async fn cancel(&self, ids: &[u32]) -> Result<(), InfraError> {
        let mut queue = self
            .queue
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("notification queue lock poisoned: {error}")))?;
        for id in ids {
            queue.remove(id);
        }
        Ok(())
    }

    async fn schedule(&self, requests: &[NotificationRequest]) -> Result<(), InfraError> {
        let mut queue = self
            .queue
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("notification queue lock poisoned: {error}")))?;
        for request in requests {
            queue.insert(request.id, request.clone());
        }
        Ok(())
    }
}
