use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Catalog of actions the subject can be asked to perform: head gestures and
/// facial expressions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    NodUp,
    NodDown,
    TurnLeft,
    TurnRight,
    TiltLeft,
    TiltRight,
    OpenMouth,
    CloseEyes,
    RaiseEyebrows,
    Blink,
    Smile,
    Frown,
    Surprised,
    Neutral,
    Angry,
}

impl ChallengeKind {
    pub const CATALOG: [ChallengeKind; 15] = [
        ChallengeKind::NodUp,
        ChallengeKind::NodDown,
        ChallengeKind::TurnLeft,
        ChallengeKind::TurnRight,
        ChallengeKind::TiltLeft,
        ChallengeKind::TiltRight,
        ChallengeKind::OpenMouth,
        ChallengeKind::CloseEyes,
        ChallengeKind::RaiseEyebrows,
        ChallengeKind::Blink,
        ChallengeKind::Smile,
        ChallengeKind::Frown,
        ChallengeKind::Surprised,
        ChallengeKind::Neutral,
        ChallengeKind::Angry,
    ];

    /// Stable label used in challenge ids and audit details.
    pub fn label(&self) -> &'static str {
        match self {
            ChallengeKind::NodUp => "nod_up",
            ChallengeKind::NodDown => "nod_down",
            ChallengeKind::TurnLeft => "turn_left",
            ChallengeKind::TurnRight => "turn_right",
            ChallengeKind::TiltLeft => "tilt_left",
            ChallengeKind::TiltRight => "tilt_right",
            ChallengeKind::OpenMouth => "open_mouth",
            ChallengeKind::CloseEyes => "close_eyes",
            ChallengeKind::RaiseEyebrows => "raise_eyebrows",
            ChallengeKind::Blink => "blink",
            ChallengeKind::Smile => "smile",
            ChallengeKind::Frown => "frown",
            ChallengeKind::Surprised => "surprised",
            ChallengeKind::Neutral => "neutral",
            ChallengeKind::Angry => "angry",
        }
    }

    /// Human-readable instruction shown to the subject.
    pub fn instruction(&self) -> &'static str {
        match self {
            ChallengeKind::NodUp => "Nod your head up",
            ChallengeKind::NodDown => "Nod your head down",
            ChallengeKind::TurnLeft => "Turn your head to the left",
            ChallengeKind::TurnRight => "Turn your head to the right",
            ChallengeKind::TiltLeft => "Tilt your head to the left",
            ChallengeKind::TiltRight => "Tilt your head to the right",
            ChallengeKind::OpenMouth => "Open your mouth wide",
            ChallengeKind::CloseEyes => "Close your eyes",
            ChallengeKind::RaiseEyebrows => "Raise your eyebrows",
            ChallengeKind::Blink => "Blink your eyes",
            ChallengeKind::Smile => "Smile",
            ChallengeKind::Frown => "Frown",
            ChallengeKind::Surprised => "Look surprised",
            ChallengeKind::Neutral => "Keep a neutral expression",
            ChallengeKind::Angry => "Look angry",
        }
    }

    pub fn is_expression(&self) -> bool {
        matches!(
            self,
            ChallengeKind::Smile
                | ChallengeKind::Frown
                | ChallengeKind::Surprised
                | ChallengeKind::Neutral
                | ChallengeKind::Angry
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChallengeState {
    Issued,
    InProgress,
    Completed,
    Failed,
}

/// One discrete action the subject must perform, bound to a nonce and timeout.
/// Immutable once resolved.
#[derive(Clone, Debug)]
pub struct Challenge {
    pub challenge_id: String,
    pub kind: ChallengeKind,
    pub instruction: String,
    pub nonce: String,
    pub issued_at: Option<Instant>,
    pub timeout: Duration,
    pub state: ChallengeState,
}

impl Challenge {
    pub fn is_resolved(&self) -> bool {
        matches!(self.state, ChallengeState::Completed | ChallengeState::Failed)
    }

    /// Marks the challenge as delivered to the client.
    pub fn mark_issued(&mut self) {
        self.issued_at = Some(Instant::now());
        self.state = ChallengeState::InProgress;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_labels_are_distinct() {
        let mut labels: Vec<&str> = ChallengeKind::CATALOG.iter().map(|k| k.label()).collect();
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), ChallengeKind::CATALOG.len());
    }

    #[test]
    fn catalog_has_gestures_and_expressions() {
        let expressions = ChallengeKind::CATALOG.iter().filter(|k| k.is_expression()).count();
        assert_eq!(expressions, 5);
        assert_eq!(ChallengeKind::CATALOG.len() - expressions, 10);
    }

    #[test]
    fn resolution_states() {
        let mut challenge = Challenge {
            challenge_id: "c1".into(),
            kind: ChallengeKind::Smile,
            instruction: ChallengeKind::Smile.instruction().into(),
            nonce: "n".into(),
            issued_at: None,
            timeout: Duration::from_secs(10),
            state: ChallengeState::Issued,
        };
        assert!(!challenge.is_resolved());
        challenge.mark_issued();
        assert_eq!(challenge.state, ChallengeState::InProgress);
        assert!(challenge.issued_at.is_some());
        challenge.state = ChallengeState::Completed;
        assert!(challenge.is_resolved());
    }
}
