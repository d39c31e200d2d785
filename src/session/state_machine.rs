// The per-session verification state machine.
//
// Transitions are synchronous and side-effect free: every event yields a list
// of `SessionEffect`s which the runner interprets (send, persist, audit, arm
// timers, close). Exactly one state machine instance owns a session's mutable
// state at a time, and it reaches a terminal decision exactly once.

use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use serde_json::json;

use crate::challenge::types::{Challenge, ChallengeState};
use crate::config::SystemConfig;
use crate::data_structures::{AuditEventType, Session, SessionStatus};
use crate::nonce::NonceStore;
use crate::protocol::{CloseCode, ServerFeedback};
use crate::scoring::capability::ChallengeContext;
use crate::scoring::{SessionAggregator, VerificationOutcome};
use crate::session::{SessionEffect, SessionEvent, SessionPhase};

pub struct VerificationStateMachine {
    config: SystemConfig,
    session: Session,
    challenges: Vec<Challenge>,
    current: usize,
    phase: SessionPhase,
    aggregator: SessionAggregator,
    nonces: Arc<NonceStore>,
    completed_count: usize,
    consecutive_decode_failures: u32,
    consecutive_capability_failures: u32,
}

impl VerificationStateMachine {
    pub fn new(
        config: SystemConfig,
        session: Session,
        challenges: Vec<Challenge>,
        nonces: Arc<NonceStore>,
    ) -> Self {
        let aggregator = SessionAggregator::new(&config);
        VerificationStateMachine {
            config,
            session,
            challenges,
            current: 0,
            phase: SessionPhase::Connected,
            aggregator,
            nonces,
            completed_count: 0,
            consecutive_decode_failures: 0,
            consecutive_capability_failures: 0,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn current_challenge_id(&self) -> Option<&str> {
        self.challenges.get(self.current).map(|c| c.challenge_id.as_str())
    }

    /// Context for scoring the active challenge, if any.
    pub fn current_context(&self) -> Option<ChallengeContext> {
        self.challenges.get(self.current).map(|c| ChallengeContext {
            challenge_id: c.challenge_id.clone(),
            kind: c.kind,
        })
    }

    /// Enters ACTIVE and issues the first challenge.
    pub fn on_connect(&mut self) -> Vec<SessionEffect> {
        self.phase = SessionPhase::Active(0);
        self.issue_current()
    }

    pub fn handle(&mut self, event: SessionEvent) -> Vec<SessionEffect> {
        if self.phase.is_terminal() || self.phase == SessionPhase::Disconnected {
            return Vec::new();
        }
        match event {
            SessionEvent::SampleScored { sample, confidence } => {
                let active_id = match self.current_challenge_id() {
                    Some(id) => id.to_string(),
                    None => return Vec::new(),
                };
                if sample.challenge_id != active_id {
                    // Late score for an already-resolved challenge.
                    return Vec::new();
                }
                self.consecutive_decode_failures = 0;
                self.consecutive_capability_failures = 0;
                self.aggregator.fold(&sample);

                let mut effects = vec![SessionEffect::Send(ServerFeedback::score_update(&sample))];
                if confidence.meets(
                    self.config.challenge_confidence_threshold,
                    self.config.min_challenge_samples,
                ) {
                    effects.extend(self.resolve_current(true, confidence.ema, "confidence threshold met"));
                }
                effects
            }

            SessionEvent::ChallengeClaimed { challenge_id, confidence } => {
                let active = match self.challenges.get(self.current) {
                    Some(c) => c,
                    None => return Vec::new(),
                };
                if let Some(claimed) = &challenge_id {
                    if *claimed != active.challenge_id {
                        return self.handle_stale_claim(claimed);
                    }
                }
                if !self.nonces.validate(&self.session.session_id, &active.nonce) {
                    // Replayed or expired nonce: reject with no state change
                    // and no audit write.
                    warn!(
                        "session {}: challenge_complete with invalid nonce for {}, ignoring",
                        self.session.session_id, active.challenge_id
                    );
                    return Vec::new();
                }
                let completed = confidence.meets(
                    self.config.challenge_confidence_threshold,
                    self.config.min_challenge_samples,
                );
                let reason = if completed { "confidence threshold met" } else { "insufficient confidence" };
                self.resolve_current(completed, confidence.ema, reason)
            }

            SessionEvent::ChallengeTimedOut { index } => {
                if index != self.current {
                    return Vec::new(); // stale timer
                }
                match self.challenges.get(self.current) {
                    Some(c) if !c.is_resolved() => {}
                    _ => return Vec::new(),
                }
                self.resolve_current(false, 0.0, "timeout")
            }

            SessionEvent::SessionDeadline => {
                info!("session {}: overall deadline elapsed", self.session.session_id);
                self.phase = SessionPhase::TimedOut;
                self.session.status = SessionStatus::TimedOut;
                self.session.end_time = Some(Utc::now());
                let mut outcome = self.aggregator.finalize();
                outcome.passed = false;
                vec![
                    SessionEffect::Audit {
                        event_type: AuditEventType::SessionTimedOut,
                        details: json!({ "final_score": outcome.final_score }),
                    },
                    SessionEffect::Finalize { outcome },
                    SessionEffect::Close {
                        code: CloseCode::PolicyViolation,
                        reason: "session timeout exceeded".to_string(),
                    },
                ]
            }

            SessionEvent::DecodeFailed { detail } => {
                self.consecutive_decode_failures += 1;
                if self.consecutive_decode_failures >= self.config.decode_failure_budget {
                    return self.internal_error("consecutive frame decode failures exceeded budget");
                }
                vec![SessionEffect::Send(ServerFeedback::error(&detail))]
            }

            SessionEvent::CapabilityFailed { detail } => {
                self.consecutive_capability_failures += 1;
                warn!("session {}: {}", self.session.session_id, detail);
                if self.consecutive_capability_failures >= self.config.capability_failure_budget {
                    return self.internal_error("scoring capability unavailable");
                }
                Vec::new()
            }

            SessionEvent::InvalidMessage { detail } => {
                vec![SessionEffect::Send(ServerFeedback::error(&detail))]
            }

            SessionEvent::Disconnected => {
                info!("session {}: client disconnected mid-verification", self.session.session_id);
                self.phase = SessionPhase::Disconnected;
                vec![SessionEffect::Audit {
                    event_type: AuditEventType::ClientDisconnected,
                    details: json!({ "challenge_index": self.current }),
                }]
            }
        }
    }

    /// A claim naming something other than the active challenge: replays of
    /// resolved challenges are dropped without state change or audit; unknown
    /// ids get a validation error back.
    fn handle_stale_claim(&self, claimed: &str) -> Vec<SessionEffect> {
        match self.challenges.iter().find(|c| c.challenge_id == claimed) {
            Some(resolved) if resolved.is_resolved() => {
                warn!(
                    "session {}: replayed challenge_complete for {}, ignoring",
                    self.session.session_id, claimed
                );
                Vec::new()
            }
            Some(_) => {
                vec![SessionEffect::Send(ServerFeedback::error("challenge is not active"))]
            }
            None => vec![SessionEffect::Send(ServerFeedback::error("unknown challenge id"))],
        }
    }

    /// Marks the active challenge delivered and emits its feedback and timer.
    fn issue_current(&mut self) -> Vec<SessionEffect> {
        let index = self.current;
        let challenge = &mut self.challenges[index];
        challenge.mark_issued();
        vec![
            SessionEffect::Audit {
                event_type: AuditEventType::ChallengeIssued,
                details: json!({
                    "challenge_id": challenge.challenge_id,
                    "kind": challenge.kind.label(),
                    "index": index,
                }),
            },
            SessionEffect::Send(ServerFeedback::challenge_issued(challenge)),
            SessionEffect::ArmChallengeTimer { index, timeout: challenge.timeout },
        ]
    }

    /// Resolves the active challenge, consumes its nonce, and either advances
    /// to the next challenge or finalizes the session.
    fn resolve_current(&mut self, completed: bool, confidence: f64, reason: &str) -> Vec<SessionEffect> {
        let total = self.challenges.len();
        let challenge = &mut self.challenges[self.current];
        self.nonces.consume(&challenge.nonce);

        let mut effects = Vec::new();
        if completed {
            challenge.state = ChallengeState::Completed;
            self.completed_count += 1;
            effects.push(SessionEffect::Audit {
                event_type: AuditEventType::ChallengeCompleted,
                details: json!({
                    "challenge_id": challenge.challenge_id,
                    "confidence": confidence,
                }),
            });
            effects.push(SessionEffect::Send(ServerFeedback::challenge_completed(
                confidence,
                self.completed_count,
                total,
            )));
        } else {
            challenge.state = ChallengeState::Failed;
            self.session.failed_challenge_count += 1;
            effects.push(SessionEffect::Audit {
                event_type: AuditEventType::ChallengeFailed,
                details: json!({
                    "challenge_id": challenge.challenge_id,
                    "reason": reason,
                }),
            });
            effects.push(SessionEffect::Send(ServerFeedback::challenge_failed(challenge, reason)));
        }

        self.current += 1;
        if self.current < total {
            self.phase = SessionPhase::Active(self.current);
            effects.extend(self.issue_current());
        } else {
            effects.extend(self.finalize_outcome());
        }
        effects
    }

    /// All challenges resolved: decide on the aggregate score.
    fn finalize_outcome(&mut self) -> Vec<SessionEffect> {
        let outcome = self.aggregator.finalize();
        self.session.end_time = Some(Utc::now());
        info!(
            "session {}: final score {:.4} (passed: {})",
            self.session.session_id, outcome.final_score, outcome.passed
        );

        if outcome.passed {
            self.phase = SessionPhase::Success;
            self.session.status = SessionStatus::Completed;
            vec![
                SessionEffect::Audit {
                    event_type: AuditEventType::SessionCompleted,
                    details: json!({
                        "final_score": outcome.final_score,
                        "failed_challenges": self.session.failed_challenge_count,
                    }),
                },
                SessionEffect::Finalize { outcome },
                SessionEffect::IssueToken { final_score: outcome.final_score },
                SessionEffect::Close {
                    code: CloseCode::Normal,
                    reason: "verification complete".to_string(),
                },
            ]
        } else {
            self.phase = SessionPhase::Failed;
            self.session.status = SessionStatus::Failed;
            vec![
                SessionEffect::Audit {
                    event_type: AuditEventType::SessionFailed,
                    details: json!({
                        "final_score": outcome.final_score,
                        "threshold": self.config.pass_threshold,
                    }),
                },
                SessionEffect::Finalize { outcome },
                SessionEffect::Send(ServerFeedback::verification_failed(
                    outcome.final_score,
                    self.config.pass_threshold,
                    "final score below threshold",
                )),
                SessionEffect::Close {
                    code: CloseCode::Normal,
                    reason: "verification complete".to_string(),
                },
            ]
        }
    }

    /// Unrecoverable internal fault: terminal ERROR, close 1011, no token.
    fn internal_error(&mut self, detail: &str) -> Vec<SessionEffect> {
        warn!("session {}: {}", self.session.session_id, detail);
        self.phase = SessionPhase::Error;
        self.session.status = SessionStatus::Failed;
        self.session.end_time = Some(Utc::now());
        let mut outcome: VerificationOutcome = self.aggregator.finalize();
        outcome.passed = false;
        vec![
            SessionEffect::Audit {
                event_type: AuditEventType::SessionError,
                details: json!({ "detail": detail }),
            },
            SessionEffect::Finalize { outcome },
            SessionEffect::Close {
                code: CloseCode::InternalError,
                reason: detail.to_string(),
            },
        ]
    }
}
