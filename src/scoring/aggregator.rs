use crate::config::SystemConfig;
use crate::scoring::ScoreSample;

/// Session-wide verdict computed from the aggregate score.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VerificationOutcome {
    pub liveness_score: f64,
    pub emotion_score: f64,
    pub deepfake_score: f64,
    pub final_score: f64,
    pub passed: bool,
}

/// Maintains the running mean of each score dimension over all processed
/// samples in the session, and decides pass/fail on the weighted aggregate.
///
/// Individual challenge failures never short-circuit the sequence; the final
/// decision is taken on the aggregate alone. Correct under arbitrary frame
/// loss: only observed values matter, never the frame count.
#[derive(Clone, Debug)]
pub struct SessionAggregator {
    count: u64,
    liveness_sum: f64,
    emotion_sum: f64,
    deepfake_sum: f64,
    liveness_weight: f64,
    emotion_weight: f64,
    deepfake_weight: f64,
    pass_threshold: f64,
}

impl SessionAggregator {
    pub fn new(config: &SystemConfig) -> Self {
        SessionAggregator {
            count: 0,
            liveness_sum: 0.0,
            emotion_sum: 0.0,
            deepfake_sum: 0.0,
            liveness_weight: config.liveness_weight,
            emotion_weight: config.emotion_weight,
            deepfake_weight: config.deepfake_weight,
            pass_threshold: config.pass_threshold,
        }
    }

    pub fn fold(&mut self, sample: &ScoreSample) {
        self.count += 1;
        self.liveness_sum += sample.liveness;
        self.emotion_sum += sample.emotion;
        self.deepfake_sum += sample.deepfake;
    }

    pub fn sample_count(&self) -> u64 {
        self.count
    }

    /// Weighted final score over the whole session. Zero samples yields zero
    /// scores and a failed outcome.
    pub fn finalize(&self) -> VerificationOutcome {
        let (liveness, emotion, deepfake) = if self.count == 0 {
            (0.0, 0.0, 0.0)
        } else {
            let n = self.count as f64;
            (self.liveness_sum / n, self.emotion_sum / n, self.deepfake_sum / n)
        };
        let final_score = self.liveness_weight * liveness
            + self.emotion_weight * emotion
            + self.deepfake_weight * deepfake;
        VerificationOutcome {
            liveness_score: liveness,
            emotion_score: emotion,
            deepfake_score: deepfake,
            final_score,
            passed: final_score >= self.pass_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(liveness: f64, emotion: f64, deepfake: f64) -> ScoreSample {
        ScoreSample {
            challenge_id: "c1".into(),
            liveness,
            emotion,
            deepfake,
            frame_timestamp: 0.0,
        }
    }

    #[test]
    fn final_score_is_exact_weighted_mean() {
        let mut aggregator = SessionAggregator::new(&SystemConfig::default());
        for _ in 0..7 {
            aggregator.fold(&sample(0.9, 0.8, 0.85));
        }
        let outcome = aggregator.finalize();
        assert!((outcome.liveness_score - 0.9).abs() < 1e-12);
        assert!((outcome.emotion_score - 0.8).abs() < 1e-12);
        assert!((outcome.deepfake_score - 0.85).abs() < 1e-12);
        assert!((outcome.final_score - 0.8625).abs() < 1e-12);
        assert!(outcome.passed);
    }

    #[test]
    fn low_liveness_fails_despite_strong_other_dimensions() {
        let mut aggregator = SessionAggregator::new(&SystemConfig::default());
        for _ in 0..10 {
            aggregator.fold(&sample(0.3, 0.8, 0.85));
        }
        let outcome = aggregator.finalize();
        assert!((outcome.final_score - 0.5625).abs() < 1e-12);
        assert!(!outcome.passed);
    }

    #[test]
    fn means_span_all_challenges_not_just_the_last() {
        let mut aggregator = SessionAggregator::new(&SystemConfig::default());
        let mut first = sample(1.0, 1.0, 1.0);
        first.challenge_id = "c1".into();
        let mut second = sample(0.0, 0.0, 0.0);
        second.challenge_id = "c2".into();
        aggregator.fold(&first);
        aggregator.fold(&second);
        let outcome = aggregator.finalize();
        assert!((outcome.liveness_score - 0.5).abs() < 1e-12);
        assert!((outcome.final_score - 0.5).abs() < 1e-12);
    }

    #[test]
    fn zero_samples_fail() {
        let aggregator = SessionAggregator::new(&SystemConfig::default());
        let outcome = aggregator.finalize();
        assert_eq!(outcome.final_score, 0.0);
        assert!(!outcome.passed);
    }

    #[test]
    fn threshold_boundary_passes() {
        let mut aggregator = SessionAggregator::new(&SystemConfig::default());
        aggregator.fold(&sample(0.7, 0.7, 0.7));
        let outcome = aggregator.finalize();
        assert!((outcome.final_score - 0.7).abs() < 1e-12);
        assert!(outcome.passed);
    }
}
