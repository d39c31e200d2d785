// Drives one session from connection to terminal outcome.
//
// Layout per the concurrency model: a reader task owns the receive half and
// feeds the bounded frame queue (the sole structure shared with the
// processing path); the runner task owns every other piece of session state
// and interprets the state machine's effects in order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use crate::challenge::ChallengeEngine;
use crate::config::SystemConfig;
use crate::data_structures::{AuditEvent, AuditEventType, Session, SessionStatus, VerificationResult};
use crate::errors::StoreError;
use crate::ingest::{decode_frame, EncodedFrame, FrameQueue};
use crate::nonce::NonceStore;
use crate::protocol::{ClientMessage, CloseCode, ServerFeedback};
use crate::scoring::ScoringOrchestrator;
use crate::session::registry::ActiveSessions;
use crate::session::state_machine::VerificationStateMachine;
use crate::session::transport::{FeedbackSink, InboundSource};
use crate::session::{SessionEffect, SessionEvent};
use crate::store::SessionStore;
use crate::token::TokenIssuer;

/// Messages forwarded from the reader task to the processing loop.
#[derive(Debug)]
enum ReaderMessage {
    Claim { challenge_id: Option<String> },
    Invalid { detail: String },
    Disconnected,
}

pub struct SessionRunner {
    config: SystemConfig,
    store: Arc<dyn SessionStore>,
    nonces: Arc<NonceStore>,
    registry: Arc<ActiveSessions>,
    orchestrator: ScoringOrchestrator,
    issuer: Arc<TokenIssuer>,
    engine: ChallengeEngine,
}

impl SessionRunner {
    pub fn new(
        config: SystemConfig,
        store: Arc<dyn SessionStore>,
        nonces: Arc<NonceStore>,
        registry: Arc<ActiveSessions>,
        orchestrator: ScoringOrchestrator,
        issuer: Arc<TokenIssuer>,
        engine: ChallengeEngine,
    ) -> Self {
        SessionRunner { config, store, nonces, registry, orchestrator, issuer, engine }
    }

    /// Runs the session protocol over the given connection until a terminal
    /// outcome or disconnect. Consumes the runner: one instance per session.
    pub async fn run(
        mut self,
        session_id: &str,
        inbound: Box<dyn InboundSource>,
        mut sink: Box<dyn FeedbackSink>,
    ) {
        // At most one live state machine per session. The claim is held for
        // the whole run and releases on every teardown path.
        let _claim = match self.registry.acquire(session_id) {
            Some(claim) => claim,
            None => {
                warn!("rejecting concurrent connection for session {session_id}");
                sink.close(CloseCode::PolicyViolation, "session already connected").await;
                return;
            }
        };

        // CREATED -> CONNECTED: validate the session against the store.
        let session = {
            let store = self.store.clone();
            let id = session_id.to_string();
            with_retries(self.config.store_retry_budget, || {
                let store = store.clone();
                let id = id.clone();
                async move { store.get_session(&id).await }
            })
            .await
        };
        let session = match session {
            Ok(Some(session)) => session,
            Ok(None) => {
                warn!("connection for unknown session {session_id}");
                sink.close(CloseCode::PolicyViolation, "session not found").await;
                return;
            }
            Err(err) => {
                error!("session store unavailable for {session_id}: {err}");
                sink.close(CloseCode::InternalError, "session store unavailable").await;
                return;
            }
        };

        if session.is_terminal() {
            warn!("connection for already-resolved session {session_id}");
            sink.close(CloseCode::PolicyViolation, "session already resolved").await;
            return;
        }

        let elapsed = Utc::now() - session.start_time;
        let timeout = chrono::Duration::from_std(self.config.session_timeout())
            .unwrap_or_else(|_| chrono::Duration::seconds(120));
        if elapsed > timeout {
            self.persist_connect_timeout(session).await;
            sink.close(CloseCode::PolicyViolation, "session timed out").await;
            return;
        }

        // CONNECTED -> ACTIVE: generate the challenge sequence.
        let challenges = match self.engine.generate(
            &session.session_id,
            self.config.num_challenges,
            self.config.challenge_timeout(),
            self.config.nonce_ttl(),
            &self.nonces,
        ) {
            Ok(challenges) => challenges,
            Err(err) => {
                error!("challenge generation failed for {session_id}: {err}");
                sink.close(CloseCode::InternalError, "challenge generation failed").await;
                return;
            }
        };

        let session_deadline = Instant::now()
            + (timeout - elapsed).to_std().unwrap_or(Duration::from_secs(0));

        // Reader task: the only other task touching this connection.
        let queue = Arc::new(FrameQueue::new(self.config.frame_queue_depth));
        let (control_tx, mut control_rx) = mpsc::channel::<ReaderMessage>(16);
        let reader = tokio::spawn(read_loop(inbound, queue.clone(), control_tx));

        info!("session {}: connected, starting verification", session.session_id);
        let mut fsm = VerificationStateMachine::new(
            self.config.clone(),
            session,
            challenges,
            self.nonces.clone(),
        );

        let mut challenge_timer: Option<(usize, Instant)> = None;
        let mut closed = false;
        let mut queue_open = true;

        let effects = fsm.on_connect();
        self.apply_effects(&fsm, effects, &mut sink, &mut challenge_timer, &mut closed).await;

        while !closed {
            let challenge_deadline = challenge_timer
                .map(|(_, deadline)| deadline)
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));

            let mut disconnect = false;
            tokio::select! {
                maybe_frame = queue.recv(), if queue_open => {
                    match maybe_frame {
                        Some(frame) => {
                            let effects = self.process_frame(&mut fsm, frame).await;
                            self.apply_effects(&fsm, effects, &mut sink, &mut challenge_timer, &mut closed).await;
                        }
                        None => queue_open = false,
                    }
                }
                Some(message) = control_rx.recv() => {
                    let event = match message {
                        ReaderMessage::Claim { challenge_id } => {
                            let confidence = fsm
                                .current_challenge_id()
                                .map(|id| self.orchestrator.confidence(id))
                                .unwrap_or_default();
                            SessionEvent::ChallengeClaimed { challenge_id, confidence }
                        }
                        ReaderMessage::Invalid { detail } => SessionEvent::InvalidMessage { detail },
                        ReaderMessage::Disconnected => {
                            disconnect = true;
                            SessionEvent::Disconnected
                        }
                    };
                    let effects = fsm.handle(event);
                    self.apply_effects(&fsm, effects, &mut sink, &mut challenge_timer, &mut closed).await;
                }
                _ = sleep_until(challenge_deadline), if challenge_timer.is_some() => {
                    let (index, _) = challenge_timer.take().expect("guarded by is_some");
                    let effects = fsm.handle(SessionEvent::ChallengeTimedOut { index });
                    self.apply_effects(&fsm, effects, &mut sink, &mut challenge_timer, &mut closed).await;
                }
                _ = sleep_until(session_deadline) => {
                    let effects = fsm.handle(SessionEvent::SessionDeadline);
                    self.apply_effects(&fsm, effects, &mut sink, &mut challenge_timer, &mut closed).await;
                }
            }

            // Rolling state for resolved challenges is no longer needed; late
            // samples for them are discarded by the state machine.
            self.orchestrator.retain_only(fsm.current_challenge_id());

            if disconnect {
                break;
            }
        }

        queue.close();
        reader.abort();
        info!("session {}: runner finished ({:?})", fsm.session().session_id, fsm.phase());
    }

    /// Decode and score one frame, mapping failures onto state machine events.
    async fn process_frame(
        &mut self,
        fsm: &mut VerificationStateMachine,
        frame: EncodedFrame,
    ) -> Vec<SessionEffect> {
        let raw = match decode_frame(&frame.payload, frame.timestamp) {
            Ok(raw) => raw,
            Err(err) => {
                debug!("frame decode failed: {err}");
                return fsm.handle(SessionEvent::DecodeFailed { detail: err.to_string() });
            }
        };

        let ctx = match fsm.current_context() {
            Some(ctx) => ctx,
            None => return Vec::new(),
        };
        match self.orchestrator.score_frame(&raw, &ctx).await {
            Ok(sample) => {
                let confidence = self.orchestrator.confidence(&ctx.challenge_id);
                fsm.handle(SessionEvent::SampleScored { sample, confidence })
            }
            Err(err) => fsm.handle(SessionEvent::CapabilityFailed { detail: err.to_string() }),
        }
    }

    /// Interprets effects in order. Stops early once the connection closes.
    async fn apply_effects(
        &self,
        fsm: &VerificationStateMachine,
        effects: Vec<SessionEffect>,
        sink: &mut Box<dyn FeedbackSink>,
        challenge_timer: &mut Option<(usize, Instant)>,
        closed: &mut bool,
    ) {
        let session = fsm.session();
        for effect in effects {
            if *closed {
                return;
            }
            match effect {
                SessionEffect::Send(feedback) => {
                    if let Err(err) = sink.send(&feedback).await {
                        debug!("session {}: send failed: {err}", session.session_id);
                    }
                }
                SessionEffect::ArmChallengeTimer { index, timeout } => {
                    *challenge_timer = Some((index, Instant::now() + timeout));
                }
                SessionEffect::Audit { event_type, details } => {
                    self.append_audit(session, event_type, details).await;
                }
                SessionEffect::Finalize { outcome } => {
                    let result = VerificationResult {
                        session_id: session.session_id.clone(),
                        liveness_score: outcome.liveness_score,
                        emotion_score: outcome.emotion_score,
                        deepfake_score: outcome.deepfake_score,
                        final_score: outcome.final_score,
                        passed: outcome.passed,
                        timestamp: Utc::now(),
                    };
                    if self.persist_terminal(session.clone(), result).await.is_err() {
                        error!(
                            "session {}: failed to persist terminal outcome",
                            session.session_id
                        );
                        sink.close(CloseCode::InternalError, "persistence failure").await;
                        *closed = true;
                    }
                }
                SessionEffect::IssueToken { final_score } => {
                    match self.issuer.issue(&session.session_id, &session.user_id, final_score) {
                        Ok(token) => {
                            let feedback = ServerFeedback::verification_success(
                                &token,
                                final_score,
                                self.config.token_expiry_minutes,
                            );
                            if let Err(err) = sink.send(&feedback).await {
                                debug!("session {}: send failed: {err}", session.session_id);
                            }
                        }
                        Err(err) => {
                            error!("session {}: token issuance failed: {err}", session.session_id);
                            sink.close(CloseCode::InternalError, "token issuance failed").await;
                            *closed = true;
                        }
                    }
                }
                SessionEffect::Close { code, reason } => {
                    sink.close(code, &reason).await;
                    *closed = true;
                }
            }
        }
    }

    async fn append_audit(
        &self,
        session: &Session,
        event_type: AuditEventType,
        details: serde_json::Value,
    ) {
        let event = AuditEvent::new(event_type, &session.session_id, &session.user_id, details);
        let store = self.store.clone();
        let outcome = with_retries(self.config.store_retry_budget, || {
            let store = store.clone();
            let event = event.clone();
            async move { store.append_audit(event).await }
        })
        .await;
        if let Err(err) = outcome {
            error!("session {}: audit write failed: {err}", session.session_id);
        }
    }

    async fn persist_terminal(
        &self,
        session: Session,
        result: VerificationResult,
    ) -> Result<(), StoreError> {
        let store = self.store.clone();
        with_retries(self.config.store_retry_budget, || {
            let store = store.clone();
            let session = session.clone();
            async move { store.update_session(session).await }
        })
        .await?;
        let store = self.store.clone();
        with_retries(self.config.store_retry_budget, || {
            let store = store.clone();
            let result = result.clone();
            async move { store.write_result(result).await }
        })
        .await
    }

    /// A connection arrived after the session deadline: persist the timeout
    /// before rejecting. No challenges were issued, so the result is empty.
    async fn persist_connect_timeout(&self, mut session: Session) {
        warn!(
            "session {}: connection after timeout ({}s elapsed)",
            session.session_id,
            session.elapsed_secs(Utc::now())
        );
        session.status = SessionStatus::TimedOut;
        session.end_time = Some(Utc::now());
        let result = VerificationResult {
            session_id: session.session_id.clone(),
            liveness_score: 0.0,
            emotion_score: 0.0,
            deepfake_score: 0.0,
            final_score: 0.0,
            passed: false,
            timestamp: Utc::now(),
        };
        self.append_audit(&session, AuditEventType::SessionTimedOut, serde_json::json!({
            "reason": "connection after session timeout",
        }))
        .await;
        if self.persist_terminal(session, result).await.is_err() {
            error!("failed to persist connect-time session timeout");
        }
    }
}

/// Forwards inbound traffic: frames into the bounded queue (dropping the
/// oldest under overload), control messages to the processing loop.
async fn read_loop(
    mut inbound: Box<dyn InboundSource>,
    queue: Arc<FrameQueue>,
    control: mpsc::Sender<ReaderMessage>,
) {
    while let Some(text) = inbound.recv().await {
        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::VideoFrame { frame, timestamp }) => {
                queue.push(EncodedFrame {
                    payload: frame,
                    timestamp: timestamp.unwrap_or(0.0),
                });
            }
            Ok(ClientMessage::ChallengeComplete { challenge_id }) => {
                if control.send(ReaderMessage::Claim { challenge_id }).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                let detail = format!("malformed message: {err}");
                if control.send(ReaderMessage::Invalid { detail }).await.is_err() {
                    break;
                }
            }
        }
    }
    queue.close();
    let _ = control.send(ReaderMessage::Disconnected).await;
}

/// Bounded retry for transient store failures: one initial attempt plus
/// `budget` retries.
async fn with_retries<T, F, Fut>(budget: u32, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut last = None;
    for attempt in 0..=budget {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!("store operation failed (attempt {}): {err}", attempt + 1);
                last = Some(err);
            }
        }
    }
    Err(last.expect("at least one attempt was made"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn with_retries_succeeds_within_budget() {
        let attempts = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = attempts.clone();
        let result: Result<u32, StoreError> = with_retries(2, move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if n < 2 {
                    Err(StoreError::Unavailable("flaky".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn with_retries_gives_up_past_budget() {
        let result: Result<(), StoreError> =
            with_retries(1, || async { Err(StoreError::Unavailable("down".into())) }).await;
        assert!(result.is_err());
    }
}
