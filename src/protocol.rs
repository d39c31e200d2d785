// Wire protocol for the bidirectional verification stream.
//
// Client messages arrive as JSON text; server feedback is uniformly shaped
// `{type, message, data}`.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::challenge::types::Challenge;
use crate::scoring::ScoreSample;

/// Messages the client may send over the stream.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    VideoFrame {
        frame: String,
        #[serde(default)]
        timestamp: Option<f64>,
    },
    ChallengeComplete {
        #[serde(default)]
        challenge_id: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedbackType {
    ChallengeIssued,
    ChallengeCompleted,
    ChallengeFailed,
    ScoreUpdate,
    VerificationSuccess,
    VerificationFailed,
    Error,
}

/// One server-to-client feedback message.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ServerFeedback {
    #[serde(rename = "type")]
    pub feedback_type: FeedbackType,
    pub message: String,
    pub data: serde_json::Value,
}

impl ServerFeedback {
    pub fn challenge_issued(challenge: &Challenge) -> Self {
        ServerFeedback {
            feedback_type: FeedbackType::ChallengeIssued,
            message: format!("Challenge: {}", challenge.instruction),
            data: json!({
                "challenge_id": challenge.challenge_id,
                "instruction": challenge.instruction,
                "timeout_seconds": challenge.timeout.as_secs(),
                "kind": challenge.kind.label(),
            }),
        }
    }

    pub fn challenge_completed(confidence: f64, completed_count: usize, total: usize) -> Self {
        ServerFeedback {
            feedback_type: FeedbackType::ChallengeCompleted,
            message: format!("Challenge completed ({completed_count}/{total})"),
            data: json!({
                "confidence": confidence,
                "completed_count": completed_count,
                "total_challenges": total,
            }),
        }
    }

    pub fn challenge_failed(challenge: &Challenge, reason: &str) -> Self {
        ServerFeedback {
            feedback_type: FeedbackType::ChallengeFailed,
            message: format!("Challenge failed: {}", challenge.instruction),
            data: json!({
                "challenge_id": challenge.challenge_id,
                "reason": reason,
            }),
        }
    }

    pub fn score_update(sample: &ScoreSample) -> Self {
        ServerFeedback {
            feedback_type: FeedbackType::ScoreUpdate,
            message: "Score update".to_string(),
            data: json!({
                "liveness_score": sample.liveness,
                "emotion_score": sample.emotion,
                "deepfake_score": sample.deepfake,
            }),
        }
    }

    pub fn verification_success(token: &str, final_score: f64, expires_in_minutes: i64) -> Self {
        ServerFeedback {
            feedback_type: FeedbackType::VerificationSuccess,
            message: "Verification successful".to_string(),
            data: json!({
                "token": token,
                "final_score": final_score,
                "expires_in_minutes": expires_in_minutes,
            }),
        }
    }

    pub fn verification_failed(final_score: f64, threshold: f64, reason: &str) -> Self {
        ServerFeedback {
            feedback_type: FeedbackType::VerificationFailed,
            message: "Verification failed".to_string(),
            data: json!({
                "final_score": final_score,
                "threshold": threshold,
                "reason": reason,
            }),
        }
    }

    pub fn error(detail: &str) -> Self {
        ServerFeedback {
            feedback_type: FeedbackType::Error,
            message: "Error".to_string(),
            data: json!({ "detail": detail }),
        }
    }
}

/// Connection close codes: 1000 normal outcome delivered, 1008 invalid or
/// timed-out session, 1011 internal error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseCode {
    Normal,
    PolicyViolation,
    InternalError,
}

impl CloseCode {
    pub fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::PolicyViolation => 1008,
            CloseCode::InternalError => 1011,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_video_frame_message() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"video_frame","frame":"QUJD","timestamp":12.5}"#)
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::VideoFrame { frame: "QUJD".into(), timestamp: Some(12.5) }
        );
    }

    #[test]
    fn parses_challenge_complete_without_id() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"challenge_complete"}"#).unwrap();
        assert_eq!(msg, ClientMessage::ChallengeComplete { challenge_id: None });
    }

    #[test]
    fn rejects_unknown_message_type() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"selfie"}"#).is_err());
    }

    #[test]
    fn feedback_type_serializes_screaming() {
        let fb = ServerFeedback::error("boom");
        let value = serde_json::to_value(&fb).unwrap();
        assert_eq!(value["type"], "ERROR");
        assert_eq!(value["data"]["detail"], "boom");
    }

    #[test]
    fn success_feedback_carries_token_fields() {
        let fb = ServerFeedback::verification_success("tok", 0.8625, 15);
        let value = serde_json::to_value(&fb).unwrap();
        assert_eq!(value["type"], "VERIFICATION_SUCCESS");
        assert_eq!(value["data"]["token"], "tok");
        assert_eq!(value["data"]["expires_in_minutes"], 15);
    }

    #[test]
    fn close_codes_match_protocol() {
        assert_eq!(CloseCode::Normal.as_u16(), 1000);
        assert_eq!(CloseCode::PolicyViolation.as_u16(), 1008);
        assert_eq!(CloseCode::InternalError.as_u16(), 1011);
    }
}
