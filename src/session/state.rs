//! Per-run session state

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::MessageLog;
use crate::environment::{EnvironmentAdapter, Task};
use crate::transport::TransportBinding;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Active,
    Completed,
    Failed,
    TimedOut,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::TimedOut
        )
    }
}

/// One evaluation run against one subject.
///
/// Owned by a single engine while it runs; nothing in here is shared with
/// other sessions apart from the read-only task.
pub struct Session {
    pub id: String,
    pub task: Arc<Task>,
    pub binding: TransportBinding,
    pub log: MessageLog,
    pub status: SessionStatus,
    pub environment: Option<EnvironmentAdapter>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(task: Arc<Task>, binding: TransportBinding) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task,
            binding,
            log: MessageLog::new(),
            status: SessionStatus::Pending,
            environment: None,
            created_at: Utc::now(),
        }
    }

    /// Drop the environment, releasing whatever it holds
    pub fn release_environment(&mut self) {
        if let Some(mut env) = self.environment.take() {
            env.close();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("task", &self.task.id)
            .field("peer", &self.binding.peer_id)
            .field("status", &self.status)
            .field("messages", &self.log.len())
            .finish()
    }
}
