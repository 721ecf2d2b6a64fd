//! Append-only audit trail attached to a credit request.
//!
//! Insertion order is the audit order. The trail serializes as a plain JSON
//! array so the order survives the round trip through the Gateway.

use crate::models::timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task status code carried by each [`StatusEntry`].
///
/// Codes the worker does not produce itself are preserved as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum TaskStatus {
    Started,
    Failed,
    Completed,
    Other(i64),
}

impl TaskStatus {
    pub fn code(&self) -> i64 {
        match self {
            TaskStatus::Started => 2,
            TaskStatus::Failed => 3,
            TaskStatus::Completed => 4,
            TaskStatus::Other(code) => *code,
        }
    }

    /// Failed and Completed end processing for a request.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Completed)
    }
}

impl From<i64> for TaskStatus {
    fn from(code: i64) -> Self {
        match code {
            2 => TaskStatus::Started,
            3 => TaskStatus::Failed,
            4 => TaskStatus::Completed,
            other => TaskStatus::Other(other),
        }
    }
}

impl From<TaskStatus> for i64 {
    fn from(status: TaskStatus) -> Self {
        status.code()
    }
}

/// One event in the status trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    /// When the event happened.
    #[serde(rename = "Data", with = "timestamp")]
    pub date: DateTime<Utc>,
    /// Human-readable description of the event.
    #[serde(rename = "Message", default)]
    pub message: Option<String>,
    #[serde(rename = "TaskStatusId")]
    pub status: TaskStatus,
    /// Id of the request that owns this entry.
    #[serde(rename = "TaskCreditEngineSenderId", default)]
    pub sender_id: i64,
    /// Assigned by the Gateway once persisted; zero for new entries.
    #[serde(rename = "Id", default)]
    pub id: i64,
    #[serde(rename = "CreatedAt", with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "UpdatedAt", with = "timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "Status", default)]
    pub active: bool,
    /// Validation reason code, only present on Failed entries from validation.
    #[serde(
        rename = "ReasonCode",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub reason_code: Option<String>,
}

impl StatusEntry {
    /// Creates an active entry stamped with the current UTC time.
    pub fn new(message: impl Into<String>, status: TaskStatus, sender_id: i64) -> Self {
        let now = Utc::now();
        Self {
            date: now,
            message: Some(message.into()),
            status,
            sender_id,
            id: 0,
            created_at: now,
            updated_at: now,
            active: true,
            reason_code: None,
        }
    }

    pub fn started(message: impl Into<String>, sender_id: i64) -> Self {
        Self::new(message, TaskStatus::Started, sender_id)
    }

    pub fn failed(message: impl Into<String>, sender_id: i64) -> Self {
        Self::new(message, TaskStatus::Failed, sender_id)
    }

    pub fn completed(message: impl Into<String>, sender_id: i64) -> Self {
        Self::new(message, TaskStatus::Completed, sender_id)
    }

    pub fn with_reason_code(mut self, code: impl Into<String>) -> Self {
        self.reason_code = Some(code.into());
        self
    }
}

/// Ordered, append-only list of [`StatusEntry`] values.
///
/// Entries can only be appended; nothing removes, replaces or reorders them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusTrail(Vec<StatusEntry>);

impl StatusTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: StatusEntry) {
        self.0.push(entry);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&StatusEntry> {
        self.0.last()
    }

    pub fn entries(&self) -> &[StatusEntry] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StatusEntry> {
        self.0.iter()
    }
}

impl From<Vec<StatusEntry>> for StatusTrail {
    fn from(entries: Vec<StatusEntry>) -> Self {
        Self(entries)
    }
}

impl<'a> IntoIterator for &'a StatusTrail {
    type Item = &'a StatusEntry;
    type IntoIter = std::slice::Iter<'a, StatusEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
