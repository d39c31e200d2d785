use std::time::Duration;

/// System-wide tunables for the verification protocol.
///
/// Defaults mirror the intended production behaviour; individual fields can be
/// overridden through `PRESENCE_*` environment variables via [`SystemConfig::from_env`].
#[derive(Clone, Debug)]
pub struct SystemConfig {
    // Session lifecycle
    pub session_timeout_secs: u64,
    pub challenge_timeout_secs: u64,
    pub num_challenges: usize,

    // Frame ingestion
    pub frame_queue_depth: usize,
    pub decode_failure_budget: u32,

    // Replay prevention
    pub nonce_ttl_secs: u64,

    // Scoring
    pub challenge_confidence_threshold: f64,
    pub min_challenge_samples: u32,
    pub confidence_ema_alpha: f64,
    pub capability_timeout_ms: u64,
    pub capability_failure_budget: u32,

    // Aggregation
    pub liveness_weight: f64,
    pub emotion_weight: f64,
    pub deepfake_weight: f64,
    pub pass_threshold: f64,

    // Credential issuance
    pub token_expiry_minutes: i64,

    // Persistence
    pub store_retry_budget: u32,

    // Server
    pub listen_addr: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfig {
            session_timeout_secs: 120,
            challenge_timeout_secs: 10,
            num_challenges: 3,

            frame_queue_depth: 3,
            decode_failure_budget: 3,

            nonce_ttl_secs: 300, // 5 minutes

            challenge_confidence_threshold: 0.6,
            min_challenge_samples: 5,
            confidence_ema_alpha: 0.3,
            capability_timeout_ms: 2000,
            capability_failure_budget: 3,

            liveness_weight: 0.5,
            emotion_weight: 0.25,
            deepfake_weight: 0.25,
            pass_threshold: 0.70,

            token_expiry_minutes: 15,

            store_retry_budget: 2,

            listen_addr: "0.0.0.0:8000".to_string(),
        }
    }
}

impl SystemConfig {
    /// Defaults with `PRESENCE_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut cfg = SystemConfig::default();
        if let Some(v) = env_parse("PRESENCE_SESSION_TIMEOUT_SECS") {
            cfg.session_timeout_secs = v;
        }
        if let Some(v) = env_parse("PRESENCE_CHALLENGE_TIMEOUT_SECS") {
            cfg.challenge_timeout_secs = v;
        }
        if let Some(v) = env_parse("PRESENCE_NUM_CHALLENGES") {
            cfg.num_challenges = v;
        }
        if let Some(v) = env_parse("PRESENCE_FRAME_QUEUE_DEPTH") {
            cfg.frame_queue_depth = v;
        }
        if let Some(v) = env_parse("PRESENCE_DECODE_FAILURE_BUDGET") {
            cfg.decode_failure_budget = v;
        }
        if let Some(v) = env_parse("PRESENCE_NONCE_TTL_SECS") {
            cfg.nonce_ttl_secs = v;
        }
        if let Some(v) = env_parse("PRESENCE_CHALLENGE_CONFIDENCE_THRESHOLD") {
            cfg.challenge_confidence_threshold = v;
        }
        if let Some(v) = env_parse("PRESENCE_MIN_CHALLENGE_SAMPLES") {
            cfg.min_challenge_samples = v;
        }
        if let Some(v) = env_parse("PRESENCE_CONFIDENCE_EMA_ALPHA") {
            cfg.confidence_ema_alpha = v;
        }
        if let Some(v) = env_parse("PRESENCE_CAPABILITY_TIMEOUT_MS") {
            cfg.capability_timeout_ms = v;
        }
        if let Some(v) = env_parse("PRESENCE_CAPABILITY_FAILURE_BUDGET") {
            cfg.capability_failure_budget = v;
        }
        if let Some(v) = env_parse("PRESENCE_LIVENESS_WEIGHT") {
            cfg.liveness_weight = v;
        }
        if let Some(v) = env_parse("PRESENCE_EMOTION_WEIGHT") {
            cfg.emotion_weight = v;
        }
        if let Some(v) = env_parse("PRESENCE_DEEPFAKE_WEIGHT") {
            cfg.deepfake_weight = v;
        }
        if let Some(v) = env_parse("PRESENCE_PASS_THRESHOLD") {
            cfg.pass_threshold = v;
        }
        if let Some(v) = env_parse("PRESENCE_TOKEN_EXPIRY_MINUTES") {
            cfg.token_expiry_minutes = v;
        }
        if let Some(v) = env_parse("PRESENCE_STORE_RETRY_BUDGET") {
            cfg.store_retry_budget = v;
        }
        if let Ok(v) = std::env::var("PRESENCE_LISTEN_ADDR") {
            cfg.listen_addr = v;
        }
        cfg
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn challenge_timeout(&self) -> Duration {
        Duration::from_secs(self.challenge_timeout_secs)
    }

    pub fn nonce_ttl(&self) -> Duration {
        Duration::from_secs(self.nonce_ttl_secs)
    }

    pub fn capability_timeout(&self) -> Duration {
        Duration::from_millis(self.capability_timeout_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SystemConfig::default();
        assert_eq!(config.session_timeout_secs, 120);
        assert_eq!(config.challenge_timeout_secs, 10);
        assert_eq!(config.num_challenges, 3);
        assert_eq!(config.frame_queue_depth, 3);
        assert_eq!(config.nonce_ttl_secs, 300);
        assert_eq!(config.token_expiry_minutes, 15);
        assert_eq!(config.pass_threshold, 0.70);
        assert_eq!(config.liveness_weight, 0.5);
        assert_eq!(config.emotion_weight, 0.25);
        assert_eq!(config.deepfake_weight, 0.25);
    }

    #[test]
    fn env_overrides_apply() {
        std::env::set_var("PRESENCE_FRAME_QUEUE_DEPTH", "5");
        std::env::set_var("PRESENCE_PASS_THRESHOLD", "0.9");
        std::env::set_var("PRESENCE_CAPABILITY_TIMEOUT_MS", "750");
        std::env::set_var("PRESENCE_EMOTION_WEIGHT", "0.3");
        let config = SystemConfig::from_env();
        std::env::remove_var("PRESENCE_FRAME_QUEUE_DEPTH");
        std::env::remove_var("PRESENCE_PASS_THRESHOLD");
        std::env::remove_var("PRESENCE_CAPABILITY_TIMEOUT_MS");
        std::env::remove_var("PRESENCE_EMOTION_WEIGHT");

        assert_eq!(config.frame_queue_depth, 5);
        assert_eq!(config.pass_threshold, 0.9);
        assert_eq!(config.capability_timeout_ms, 750);
        assert_eq!(config.emotion_weight, 0.3);
        // Untouched fields keep their defaults.
        assert_eq!(config.session_timeout_secs, 120);
        assert_eq!(config.min_challenge_samples, 5);
    }

    #[test]
    fn weights_sum_to_one() {
        let config = SystemConfig::default();
        let sum = config.liveness_weight + config.emotion_weight + config.deepfake_weight;
        assert!((sum - 1.0).abs() < f64::EPSILON);
    }
}
