// Built-in pixel-statistics scorers.
//
// These are deliberately lightweight stand-ins that let the server run end to
// end without external model backends: real deployments plug their own
// `ScoringCapability` implementations into the orchestrator. Each one maps a
// cheap image statistic onto [0, 1].

use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::CapabilityError;
use crate::ingest::RawFrame;
use crate::scoring::capability::{ChallengeContext, ScoringCapability};

fn luma(frame: &RawFrame) -> Vec<f64> {
    frame
        .data
        .chunks_exact(3)
        .map(|px| 0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64)
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64
}

/// Scores frame-to-frame luminance change: a static replay shows near-zero
/// motion, a live subject does not.
#[derive(Debug, Default)]
pub struct MotionLivenessScorer {
    previous_mean: Mutex<Option<f64>>,
}

impl MotionLivenessScorer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScoringCapability for MotionLivenessScorer {
    fn name(&self) -> &'static str {
        "liveness"
    }

    async fn score(&self, frame: &RawFrame, _ctx: &ChallengeContext) -> Result<f64, CapabilityError> {
        let current = mean(&luma(frame));
        let mut previous = self.previous_mean.lock().expect("liveness scorer lock poisoned");
        let score = match previous.replace(current) {
            // First frame carries no motion evidence either way.
            None => 0.5,
            Some(prior) => ((current - prior).abs() / 2.0).clamp(0.0, 1.0),
        };
        Ok(score)
    }
}

/// Scores contrast in the central face region as a proxy for expressive
/// detail.
#[derive(Debug, Default)]
pub struct ContrastEmotionScorer;

#[async_trait]
impl ScoringCapability for ContrastEmotionScorer {
    fn name(&self) -> &'static str {
        "emotion"
    }

    async fn score(&self, frame: &RawFrame, _ctx: &ChallengeContext) -> Result<f64, CapabilityError> {
        let all = luma(frame);
        let w = frame.width as usize;
        let h = frame.height as usize;
        if w < 4 || h < 4 {
            return Ok(0.0);
        }
        // Central crop, half the frame in each dimension.
        let mut center = Vec::with_capacity(w * h / 4);
        for y in h / 4..(3 * h / 4) {
            for x in w / 4..(3 * w / 4) {
                center.push(all[y * w + x]);
            }
        }
        Ok((variance(&center).sqrt() / 64.0).clamp(0.0, 1.0))
    }
}

/// Scores high-frequency texture energy; synthetic faces tend toward overly
/// smooth gradients. Higher score means less likely to be generated.
#[derive(Debug, Default)]
pub struct TextureDeepfakeScorer;

#[async_trait]
impl ScoringCapability for TextureDeepfakeScorer {
    fn name(&self) -> &'static str {
        "deepfake"
    }

    async fn score(&self, frame: &RawFrame, _ctx: &ChallengeContext) -> Result<f64, CapabilityError> {
        let all = luma(frame);
        let w = frame.width as usize;
        let h = frame.height as usize;
        if w < 2 || h == 0 {
            return Ok(0.0);
        }
        let mut gradient_sum = 0.0;
        let mut count = 0u64;
        for y in 0..h {
            for x in 1..w {
                gradient_sum += (all[y * w + x] - all[y * w + x - 1]).abs();
                count += 1;
            }
        }
        let mean_gradient = if count == 0 { 0.0 } else { gradient_sum / count as f64 };
        Ok((mean_gradient / 16.0).clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_frame(value: u8) -> RawFrame {
        RawFrame { data: vec![value; 16 * 16 * 3], width: 16, height: 16, timestamp: 0.0 }
    }

    fn noisy_frame() -> RawFrame {
        let mut data = Vec::with_capacity(16 * 16 * 3);
        for i in 0..16 * 16 {
            let v = if i % 2 == 0 { 10 } else { 240 };
            data.extend_from_slice(&[v, v, v]);
        }
        RawFrame { data, width: 16, height: 16, timestamp: 0.0 }
    }

    fn ctx() -> ChallengeContext {
        ChallengeContext {
            challenge_id: "c1".into(),
            kind: crate::challenge::types::ChallengeKind::Smile,
        }
    }

    #[tokio::test]
    async fn motion_scorer_flags_static_input() {
        let scorer = MotionLivenessScorer::new();
        assert_eq!(scorer.score(&flat_frame(100), &ctx()).await.unwrap(), 0.5);
        // Identical second frame: no motion.
        assert_eq!(scorer.score(&flat_frame(100), &ctx()).await.unwrap(), 0.0);
        // A bright change registers as motion.
        assert!(scorer.score(&flat_frame(200), &ctx()).await.unwrap() > 0.5);
    }

    #[tokio::test]
    async fn contrast_and_texture_scores_stay_in_range() {
        let emotion = ContrastEmotionScorer;
        let deepfake = TextureDeepfakeScorer;
        for frame in [flat_frame(0), flat_frame(255), noisy_frame()] {
            let e = emotion.score(&frame, &ctx()).await.unwrap();
            let d = deepfake.score(&frame, &ctx()).await.unwrap();
            assert!((0.0..=1.0).contains(&e));
            assert!((0.0..=1.0).contains(&d));
        }
        assert!(deepfake.score(&noisy_frame(), &ctx()).await.unwrap() > 0.5);
        assert_eq!(deepfake.score(&flat_frame(128), &ctx()).await.unwrap(), 0.0);
    }
}
