//! Assessment results handed to reporting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{EngineState, SessionOutcome};
use crate::error::SessionError;
use crate::session::{Message, SessionStatus};
use crate::transport::TransportMode;

/// Everything a reporter needs about one assessment, including the full
/// trace up to the point where the session ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentResult {
    /// Absent when the session never got past transport setup
    pub session_id: Option<String>,
    pub task_id: String,
    pub peer_id: String,
    pub mode: TransportMode,
    pub state: EngineState,
    pub status: SessionStatus,
    pub reward: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SessionError>,
    /// Subject turns taken
    pub turns: u32,
    /// Sessions started, retries included
    pub attempts: u32,
    pub trace: Vec<Message>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl AssessmentResult {
    pub(crate) fn from_outcome(
        outcome: SessionOutcome,
        task_id: &str,
        peer_id: &str,
        mode: TransportMode,
        attempts: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: Some(outcome.session_id),
            task_id: task_id.to_string(),
            peer_id: peer_id.to_string(),
            mode,
            state: outcome.state,
            status: outcome.status,
            reward: outcome.reward,
            error: outcome.error,
            turns: outcome.log.subject_turns(),
            attempts,
            trace: outcome.log.into_messages(),
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub(crate) fn setup_failure(
        error: SessionError,
        task_id: &str,
        peer_id: &str,
        mode: TransportMode,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: None,
            task_id: task_id.to_string(),
            peer_id: peer_id.to_string(),
            mode,
            state: EngineState::Failed,
            status: SessionStatus::Failed,
            reward: 0.0,
            error: Some(error),
            turns: 0,
            attempts: 0,
            trace: Vec::new(),
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SessionStatus::Completed
    }
}
