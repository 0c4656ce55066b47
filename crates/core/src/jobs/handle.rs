// crates/core/src/jobs/handle.rs
//! Cancellable handle for one background job.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unique identifier for a job handle.
pub type JobId = Uuid;

/// Handle to a running job.
///
/// Clones share the same cancellation token, so the copy kept by the work
/// loop observes a cancel issued through the copy stored in a [`Group`].
///
/// [`Group`]: super::Group
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: JobId,
    token: CancellationToken,
    options: HashMap<String, serde_json::Value>,
    started_at: DateTime<Utc>,
    alone: bool,
    op: String,
    cache_key: String,
}

impl JobHandle {
    /// Create a handle whose token is a child of `parent`.
    ///
    /// Cancelling `parent` cancels the job; cancelling the job never
    /// touches `parent`.
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            token: parent.child_token(),
            options: HashMap::new(),
            started_at: Utc::now(),
            alone: true,
            op: String::new(),
            cache_key: String::new(),
        }
    }

    /// Attach a free-form option, e.g. the file being imported.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn options(&self) -> &HashMap<String, serde_json::Value> {
        &self.options
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// True until a registry installs this handle in a group.
    pub fn is_alone(&self) -> bool {
        self.alone
    }

    pub fn op(&self) -> &str {
        &self.op
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// Cancel the job. Cancelling twice is a no-op.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn bind(&mut self, op: &str, cache_key: &str) {
        self.op = op.to_string();
        self.cache_key = cache_key.to_string();
        self.alone = false;
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            op: self.op.clone(),
            cache_key: self.cache_key.clone(),
            started_at: self.started_at,
            options: self.options.clone(),
            cancelled: self.is_cancelled(),
        }
    }
}

/// Read-only view of a registered job, served to status pages.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: JobId,
    pub op: String,
    pub cache_key: String,
    pub started_at: DateTime<Utc>,
    pub options: HashMap<String, serde_json::Value>,
    pub cancelled: bool,
}
