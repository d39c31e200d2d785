// Scoring: the uniform capability interface, parallel per-frame dispatch with
// rolling per-challenge confidence, and session-wide aggregation.

pub mod aggregator;
pub mod baseline;
pub mod capability;
pub mod orchestrator;

pub use aggregator::{SessionAggregator, VerificationOutcome};
pub use capability::{ChallengeContext, ScoringCapability};
pub use orchestrator::{RollingConfidence, ScoringOrchestrator};

/// Ephemeral per-frame scores, each component in [0, 1]. Not persisted;
/// folded into the rolling confidence and the session aggregate.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoreSample {
    pub challenge_id: String,
    pub liveness: f64,
    pub emotion: f64,
    pub deepfake: f64,
    pub frame_timestamp: f64,
}
