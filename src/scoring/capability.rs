use async_trait::async_trait;

use crate::challenge::types::ChallengeKind;
use crate::errors::CapabilityError;
use crate::ingest::RawFrame;

/// Challenge context handed to a capability alongside each frame.
#[derive(Clone, Debug)]
pub struct ChallengeContext {
    pub challenge_id: String,
    pub kind: ChallengeKind,
}

/// Uniform interface over the three external scoring backends
/// (liveness, emotion, deepfake).
///
/// The orchestrator is written once against this trait and is agnostic to
/// which concrete scorer is plugged in; tests substitute fixed-score stubs.
/// Implementations return a confidence in [0, 1]; out-of-range values are
/// clamped by the caller.
#[async_trait]
pub trait ScoringCapability: Send + Sync {
    fn name(&self) -> &'static str;

    async fn score(&self, frame: &RawFrame, ctx: &ChallengeContext) -> Result<f64, CapabilityError>;
}
