// Per-session protocol core: the verification state machine, the runner task
// that drives it, and the transport seams it talks through.

pub mod registry;
pub mod runner;
pub mod state_machine;
pub mod transport;

pub use registry::ActiveSessions;
pub use runner::SessionRunner;
pub use state_machine::VerificationStateMachine;

use std::time::Duration;

use crate::data_structures::AuditEventType;
use crate::protocol::{CloseCode, ServerFeedback};
use crate::scoring::orchestrator::RollingConfidence;
use crate::scoring::{ScoreSample, VerificationOutcome};

/// Lifecycle phase of the state machine. `Success`, `Failed`, `TimedOut` and
/// `Error` are terminal; `Disconnected` ends the connection but leaves the
/// session record untouched so the client may reconnect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Connected,
    Active(usize),
    Success,
    Failed,
    TimedOut,
    Error,
    Disconnected,
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionPhase::Success | SessionPhase::Failed | SessionPhase::TimedOut | SessionPhase::Error
        )
    }
}

/// Typed events consumed by the state machine. Each yields a state transition
/// plus a list of outbound messages and side effects.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// A frame was scored against the active challenge.
    SampleScored { sample: ScoreSample, confidence: RollingConfidence },
    /// A frame could not be decoded.
    DecodeFailed { detail: String },
    /// A scoring capability failed or timed out on a frame.
    CapabilityFailed { detail: String },
    /// The client claims the current challenge is done.
    ChallengeClaimed { challenge_id: Option<String>, confidence: RollingConfidence },
    /// The per-challenge timer elapsed for the challenge at `index`.
    ChallengeTimedOut { index: usize },
    /// The overall session deadline elapsed.
    SessionDeadline,
    /// The client sent something that does not parse as a protocol message.
    InvalidMessage { detail: String },
    /// The client went away.
    Disconnected,
}

/// Side effects requested by a state transition, interpreted by the runner
/// in order.
#[derive(Clone, Debug)]
pub enum SessionEffect {
    Send(ServerFeedback),
    ArmChallengeTimer { index: usize, timeout: Duration },
    Audit { event_type: AuditEventType, details: serde_json::Value },
    /// Persist the terminal `VerificationResult` and session record.
    Finalize { outcome: VerificationOutcome },
    /// Issue a credential and deliver VERIFICATION_SUCCESS.
    IssueToken { final_score: f64 },
    Close { code: CloseCode, reason: String },
}
