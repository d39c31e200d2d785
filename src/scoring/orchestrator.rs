use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::warn;

use crate::config::SystemConfig;
use crate::errors::CapabilityError;
use crate::ingest::RawFrame;
use crate::scoring::capability::{ChallengeContext, ScoringCapability};
use crate::scoring::ScoreSample;

/// Rolling per-challenge confidence: an exponential moving average of the
/// liveness signal plus the number of samples observed. O(1) memory per
/// challenge and monotonically approaches sustained input values.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RollingConfidence {
    pub ema: f64,
    pub samples: u32,
}

impl RollingConfidence {
    pub fn observe(&mut self, value: f64, alpha: f64) {
        if self.samples == 0 {
            self.ema = value;
        } else {
            self.ema = alpha * value + (1.0 - alpha) * self.ema;
        }
        self.samples += 1;
    }

    /// Whether the confidence is sufficient to complete a challenge.
    pub fn meets(&self, threshold: f64, min_samples: u32) -> bool {
        self.samples >= min_samples && self.ema >= threshold
    }
}

/// Dispatches each accepted frame to the three scoring capabilities in
/// parallel and maintains the per-challenge rolling confidence.
pub struct ScoringOrchestrator {
    liveness: Arc<dyn ScoringCapability>,
    emotion: Arc<dyn ScoringCapability>,
    deepfake: Arc<dyn ScoringCapability>,
    call_timeout: Duration,
    ema_alpha: f64,
    rolling: HashMap<String, RollingConfidence>,
}

impl ScoringOrchestrator {
    pub fn new(
        liveness: Arc<dyn ScoringCapability>,
        emotion: Arc<dyn ScoringCapability>,
        deepfake: Arc<dyn ScoringCapability>,
        config: &SystemConfig,
    ) -> Self {
        ScoringOrchestrator {
            liveness,
            emotion,
            deepfake,
            call_timeout: config.capability_timeout(),
            ema_alpha: config.confidence_ema_alpha,
            rolling: HashMap::new(),
        }
    }

    /// Scores one frame against the active challenge. The three capability
    /// calls run concurrently with no ordering dependency, each bounded by
    /// the configured timeout. On success the liveness component is folded
    /// into the challenge's rolling confidence.
    pub async fn score_frame(
        &mut self,
        frame: &RawFrame,
        ctx: &ChallengeContext,
    ) -> Result<ScoreSample, CapabilityError> {
        let (liveness, emotion, deepfake) = tokio::join!(
            bounded_score(self.liveness.as_ref(), frame, ctx, self.call_timeout),
            bounded_score(self.emotion.as_ref(), frame, ctx, self.call_timeout),
            bounded_score(self.deepfake.as_ref(), frame, ctx, self.call_timeout),
        );

        let sample = ScoreSample {
            challenge_id: ctx.challenge_id.clone(),
            liveness: liveness?,
            emotion: emotion?,
            deepfake: deepfake?,
            frame_timestamp: frame.timestamp,
        };

        self.rolling
            .entry(ctx.challenge_id.clone())
            .or_default()
            .observe(sample.liveness, self.ema_alpha);
        Ok(sample)
    }

    /// Snapshot of the rolling confidence for a challenge.
    pub fn confidence(&self, challenge_id: &str) -> RollingConfidence {
        self.rolling.get(challenge_id).copied().unwrap_or_default()
    }

    /// Drops rolling state for every challenge except the given one. Called
    /// when a challenge resolves; late samples for resolved challenges are
    /// discarded upstream.
    pub fn retain_only(&mut self, challenge_id: Option<&str>) {
        self.rolling.retain(|id, _| Some(id.as_str()) == challenge_id);
    }
}

async fn bounded_score(
    capability: &dyn ScoringCapability,
    frame: &RawFrame,
    ctx: &ChallengeContext,
    call_timeout: Duration,
) -> Result<f64, CapabilityError> {
    match tokio::time::timeout(call_timeout, capability.score(frame, ctx)).await {
        Ok(Ok(value)) => {
            if !(0.0..=1.0).contains(&value) {
                warn!("capability '{}' returned out-of-range score {value}", capability.name());
            }
            Ok(value.clamp(0.0, 1.0))
        }
        Ok(Err(err)) => Err(err),
        Err(_) => Err(CapabilityError::Timeout {
            name: capability.name(),
            timeout_ms: call_timeout.as_millis() as u64,
        }),
    }
}
