// Core persisted records for the verification protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of one verification attempt. Terminal once not `Active`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    TimedOut,
    Failed,
}

/// One end-to-end verification attempt. Mutated only by the single state
/// machine instance that owns the session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub failed_challenge_count: u32,
}

impl Session {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Session {
            session_id: session_id.into(),
            user_id: user_id.into(),
            status: SessionStatus::Active,
            start_time: Utc::now(),
            end_time: None,
            failed_challenge_count: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != SessionStatus::Active
    }

    /// Seconds elapsed since the session was created.
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.start_time).num_seconds()
    }
}

/// Written exactly once, at session termination.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub session_id: String,
    pub liveness_score: f64,
    pub emotion_score: f64,
    pub deepfake_score: f64,
    pub final_score: f64,
    pub passed: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    SessionStart,
    ChallengeIssued,
    ChallengeCompleted,
    ChallengeFailed,
    ClientDisconnected,
    SessionCompleted,
    SessionFailed,
    SessionTimedOut,
    SessionError,
}

/// Append-only audit record. Written at session start, at every challenge
/// transition, and at the terminal outcome.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub session_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
}

impl AuditEvent {
    pub fn new(
        event_type: AuditEventType,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        AuditEvent {
            event_type,
            session_id: session_id.into(),
            user_id: user_id.into(),
            timestamp: Utc::now(),
            details,
        }
    }
}
