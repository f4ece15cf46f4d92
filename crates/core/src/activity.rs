use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::repository::RepositoryError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityTarget {
    Offer,
    Project,
}

impl ActivityTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Project => "project",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "offer" => Some(Self::Offer),
            "project" => Some(Self::Project),
            _ => None,
        }
    }
}

/// Immutable record describing one change, owned by the activity log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: String,
    pub target_type: ActivityTarget,
    pub target_id: String,
    pub title: String,
    pub body: String,
    pub actor: String,
    pub occurred_at: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn new(
        target_type: ActivityTarget,
        target_id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            target_type,
            target_id: target_id.into(),
            title: title.into(),
            body: body.into(),
            actor: actor.into(),
            occurred_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait ActivitySink: Send + Sync {
    async fn record(&self, entry: ActivityEntry) -> Result<(), RepositoryError>;
}

/// Records an entry, logging instead of returning a failure.
pub async fn record_quietly(sink: &dyn ActivitySink, entry: ActivityEntry) {
    let target_type = entry.target_type.as_str();
    let target_id = entry.target_id.clone();
    if let Err(error) = sink.record(entry).await {
        tracing::warn!(
            event_name = "activity.record.failed",
            target_type,
            target_id = %target_id,
            error = %error,
            "failed to record activity"
        );
    }
}

#[derive(Clone, Default)]
pub struct InMemoryActivityLog {
    entries: Arc<Mutex<Vec<ActivityEntry>>>,
}

impl InMemoryActivityLog {
    pub fn entries(&self) -> Vec<ActivityEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn entries_for(&self, target_id: &str) -> Vec<ActivityEntry> {
        self.entries().into_iter().filter(|entry| entry.target_id == target_id).collect()
    }
}

#[async_trait]
impl ActivitySink for InMemoryActivityLog {
    async fn record(&self, entry: ActivityEntry) -> Result<(), RepositoryError> {
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
        Ok(())
    }
}

#[cfg(test)]
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct FailingActivitySink;

#[cfg(test)]
#[async_trait]
impl ActivitySink for FailingActivitySink {
    async fn record(&self, _entry: ActivityEntry) -> Result<(), RepositoryError> {
        Err(RepositoryError::Database("activity log unavailable".to_string()))
    }
}
