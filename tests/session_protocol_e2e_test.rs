// End-to-end protocol tests driving a full session runner over an in-memory
// transport, from connection through scoring to the terminal close.

use std::sync::Arc;
use std::time::Duration;

use presence_protocol::challenge::ChallengeEngine;
use presence_protocol::config::SystemConfig;
use presence_protocol::data_structures::{AuditEventType, Session, SessionStatus};
use presence_protocol::nonce::NonceStore;
use presence_protocol::protocol::FeedbackType;
use presence_protocol::scoring::ScoringOrchestrator;
use presence_protocol::session::{ActiveSessions, SessionRunner};
use presence_protocol::store::{InMemoryStore, SessionStore};
use presence_protocol::test_utils::{
    channel_transport, encoded_test_frame, fixed_capability, test_config, SentItem,
};
use presence_protocol::token::{validate_with_key, TokenIssuer};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const SESSION_ID: &str = "sess-e2e";
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct Harness {
    client_tx: mpsc::UnboundedSender<String>,
    feedback_rx: mpsc::UnboundedReceiver<SentItem>,
    store: Arc<dyn SessionStore>,
    issuer: Arc<TokenIssuer>,
    runner: JoinHandle<()>,
    frame_seq: u32,
}

impl Harness {
    /// Spins up a runner for a fresh session with scripted capability scores.
    async fn start(config: SystemConfig, scores: (f64, f64, f64), session: Session) -> Self {
        let store: Arc<dyn SessionStore> = Arc::new(InMemoryStore::new());
        store.create_session(session.clone()).await.unwrap();
        let registry = Arc::new(ActiveSessions::new());
        Harness::connect(config, scores, store, registry, &session.session_id).await
    }

    async fn connect(
        config: SystemConfig,
        scores: (f64, f64, f64),
        store: Arc<dyn SessionStore>,
        registry: Arc<ActiveSessions>,
        session_id: &str,
    ) -> Self {
        let nonces = Arc::new(NonceStore::new());
        let issuer = Arc::new(TokenIssuer::generate(config.token_expiry_minutes));
        let orchestrator = ScoringOrchestrator::new(
            fixed_capability("liveness", scores.0),
            fixed_capability("emotion", scores.1),
            fixed_capability("deepfake", scores.2),
            &config,
        );
        let runner = SessionRunner::new(
            config,
            store.clone(),
            nonces,
            registry,
            orchestrator,
            issuer.clone(),
            ChallengeEngine::with_seed(7),
        );

        let (client_tx, feedback_rx, source, sink) = channel_transport();
        let id = session_id.to_string();
        let runner = tokio::spawn(async move { runner.run(&id, source, sink).await });
        Harness { client_tx, feedback_rx, store, issuer, runner, frame_seq: 0 }
    }

    fn send_frame(&mut self) {
        let seq = self.frame_seq;
        self.frame_seq += 1;
        let message = serde_json::json!({
            "type": "video_frame",
            "frame": encoded_test_frame(seq),
            "timestamp": seq as f64,
        });
        let _ = self.client_tx.send(message.to_string());
    }

    fn send_claim(&self) {
        let _ = self.client_tx.send(r#"{"type":"challenge_complete"}"#.to_string());
    }

    fn send_claim_for(&self, challenge_id: &str) {
        let message = serde_json::json!({
            "type": "challenge_complete",
            "challenge_id": challenge_id,
        });
        let _ = self.client_tx.send(message.to_string());
    }

    async fn recv(&mut self) -> SentItem {
        timeout(RECV_TIMEOUT, self.feedback_rx.recv())
            .await
            .expect("timed out waiting for feedback")
            .expect("feedback channel closed early")
    }

    /// Sends one frame and collects feedback up to and including the
    /// resulting SCORE_UPDATE (or the close, if the session ends first).
    async fn frame_step(&mut self, collected: &mut Vec<SentItem>) -> bool {
        self.send_frame();
        loop {
            let item = self.recv().await;
            let done = matches!(item, SentItem::Closed { .. });
            let score_update = matches!(
                &item,
                SentItem::Feedback(fb) if fb.feedback_type == FeedbackType::ScoreUpdate
            );
            collected.push(item);
            if done {
                return true;
            }
            if score_update {
                return false;
            }
        }
    }

    /// Collects remaining feedback until the close frame arrives.
    async fn collect_until_closed(&mut self, collected: &mut Vec<SentItem>) {
        loop {
            let item = self.recv().await;
            let done = matches!(item, SentItem::Closed { .. });
            collected.push(item);
            if done {
                return;
            }
        }
    }
}

fn count_type(items: &[SentItem], feedback_type: FeedbackType) -> usize {
    items
        .iter()
        .filter(|i| matches!(i, SentItem::Feedback(fb) if fb.feedback_type == feedback_type))
        .count()
}

fn find_data(items: &[SentItem], feedback_type: FeedbackType) -> serde_json::Value {
    items
        .iter()
        .find_map(|i| match i {
            SentItem::Feedback(fb) if fb.feedback_type == feedback_type => Some(fb.data.clone()),
            _ => None,
        })
        .unwrap_or_else(|| panic!("no {feedback_type:?} feedback found"))
}

fn close_code(items: &[SentItem]) -> u16 {
    items
        .iter()
        .find_map(|i| match i {
            SentItem::Closed { code, .. } => Some(*code),
            _ => None,
        })
        .expect("no close frame recorded")
}

fn quick_config() -> SystemConfig {
    SystemConfig { min_challenge_samples: 3, ..test_config() }
}

#[tokio::test]
async fn passing_session_earns_validated_token() {
    let mut harness =
        Harness::start(quick_config(), (0.9, 0.8, 0.85), Session::new(SESSION_ID, "u1")).await;

    let mut items = Vec::new();
    while !harness.frame_step(&mut items).await {}
    harness.runner.await.unwrap();

    assert_eq!(count_type(&items, FeedbackType::ChallengeIssued), 3);
    assert_eq!(count_type(&items, FeedbackType::ChallengeCompleted), 3);
    assert_eq!(count_type(&items, FeedbackType::VerificationSuccess), 1);
    assert_eq!(close_code(&items), 1000);

    // The delivered token validates against the issuer's public key alone.
    let data = find_data(&items, FeedbackType::VerificationSuccess);
    assert!((data["final_score"].as_f64().unwrap() - 0.8625).abs() < 1e-9);
    let token = data["token"].as_str().unwrap();
    let validation = validate_with_key(token, harness.issuer.public_key());
    assert!(validation.valid);
    assert_eq!(validation.user_id.as_deref(), Some("u1"));
    assert_eq!(validation.session_id.as_deref(), Some(SESSION_ID));

    // Terminal state is persisted.
    let session = harness.store.get_session(SESSION_ID).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.end_time.is_some());
    let result = harness.store.get_result(SESSION_ID).await.unwrap().unwrap();
    assert!(result.passed);
    assert!((result.final_score - 0.8625).abs() < 1e-9);

    let events = harness.store.audit_events(SESSION_ID).await.unwrap();
    assert!(events.iter().any(|e| e.event_type == AuditEventType::SessionCompleted));
    assert_eq!(
        events.iter().filter(|e| e.event_type == AuditEventType::ChallengeCompleted).count(),
        3
    );
}

#[tokio::test]
async fn weak_liveness_fails_verification_without_token() {
    let mut harness =
        Harness::start(quick_config(), (0.3, 0.8, 0.85), Session::new(SESSION_ID, "u1")).await;

    // Confidence never reaches the completion threshold; claim each challenge
    // so it resolves failed and the session runs through all three.
    let mut items = Vec::new();
    for _ in 0..3 {
        for _ in 0..2 {
            assert!(!harness.frame_step(&mut items).await);
        }
        harness.send_claim();
        loop {
            let item = harness.recv().await;
            let failed = matches!(
                &item,
                SentItem::Feedback(fb) if fb.feedback_type == FeedbackType::ChallengeFailed
            );
            items.push(item);
            if failed {
                break;
            }
        }
    }
    harness.collect_until_closed(&mut items).await;
    harness.runner.await.unwrap();

    assert_eq!(count_type(&items, FeedbackType::ChallengeFailed), 3);
    assert_eq!(count_type(&items, FeedbackType::VerificationSuccess), 0);
    assert_eq!(count_type(&items, FeedbackType::VerificationFailed), 1);
    assert_eq!(close_code(&items), 1000);

    let data = find_data(&items, FeedbackType::VerificationFailed);
    assert!((data["final_score"].as_f64().unwrap() - 0.5625).abs() < 1e-9);

    let session = harness.store.get_session(SESSION_ID).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    let result = harness.store.get_result(SESSION_ID).await.unwrap().unwrap();
    assert!(!result.passed);
}

#[tokio::test]
async fn ignored_challenges_time_out_and_session_fails() {
    let config = SystemConfig { challenge_timeout_secs: 1, ..quick_config() };
    let mut harness =
        Harness::start(config, (0.9, 0.8, 0.85), Session::new(SESSION_ID, "u1")).await;

    // Send nothing at all; every challenge times out in turn.
    let mut items = Vec::new();
    harness.collect_until_closed(&mut items).await;
    harness.runner.await.unwrap();

    assert_eq!(count_type(&items, FeedbackType::ChallengeIssued), 3);
    assert_eq!(count_type(&items, FeedbackType::ChallengeFailed), 3);
    assert_eq!(count_type(&items, FeedbackType::VerificationFailed), 1);
    assert_eq!(close_code(&items), 1000);

    // No frames were scored, so the aggregate is zero.
    let result = harness.store.get_result(SESSION_ID).await.unwrap().unwrap();
    assert_eq!(result.final_score, 0.0);
    assert!(!result.passed);
}

#[tokio::test]
async fn connection_after_session_timeout_is_rejected() {
    let mut session = Session::new(SESSION_ID, "u1");
    session.start_time = chrono::Utc::now() - chrono::Duration::seconds(130);
    let mut harness = Harness::start(quick_config(), (0.9, 0.8, 0.85), session).await;

    let mut items = Vec::new();
    harness.collect_until_closed(&mut items).await;
    harness.runner.await.unwrap();

    // Rejected before any challenge is issued.
    assert_eq!(count_type(&items, FeedbackType::ChallengeIssued), 0);
    assert_eq!(close_code(&items), 1008);

    let session = harness.store.get_session(SESSION_ID).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::TimedOut);
    let result = harness.store.get_result(SESSION_ID).await.unwrap().unwrap();
    assert!(!result.passed);
    let events = harness.store.audit_events(SESSION_ID).await.unwrap();
    assert!(events.iter().any(|e| e.event_type == AuditEventType::SessionTimedOut));
}

#[tokio::test]
async fn unknown_session_is_closed_with_policy_code() {
    let store: Arc<dyn SessionStore> = Arc::new(InMemoryStore::new());
    let registry = Arc::new(ActiveSessions::new());
    let mut harness =
        Harness::connect(quick_config(), (0.9, 0.8, 0.85), store, registry, "no-such-session")
            .await;

    let mut items = Vec::new();
    harness.collect_until_closed(&mut items).await;
    harness.runner.await.unwrap();

    assert_eq!(items.len(), 1);
    assert_eq!(close_code(&items), 1008);
}

#[tokio::test]
async fn concurrent_connection_for_same_session_is_rejected() {
    let store: Arc<dyn SessionStore> = Arc::new(InMemoryStore::new());
    store.create_session(Session::new(SESSION_ID, "u1")).await.unwrap();
    let registry = Arc::new(ActiveSessions::new());

    let mut first = Harness::connect(
        quick_config(),
        (0.9, 0.8, 0.85),
        store.clone(),
        registry.clone(),
        SESSION_ID,
    )
    .await;
    assert!(matches!(
        first.recv().await,
        SentItem::Feedback(fb) if fb.feedback_type == FeedbackType::ChallengeIssued
    ));

    // A second connection while the first runner is live gets no challenges,
    // only the policy close. The first session is untouched.
    let mut second = Harness::connect(
        quick_config(),
        (0.9, 0.8, 0.85),
        store.clone(),
        registry.clone(),
        SESSION_ID,
    )
    .await;
    let mut items = Vec::new();
    second.collect_until_closed(&mut items).await;
    second.runner.await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(close_code(&items), 1008);

    // Tearing down the first runner releases the session for a reconnect.
    drop(first.client_tx);
    first.runner.await.unwrap();
    let mut third =
        Harness::connect(quick_config(), (0.9, 0.8, 0.85), store, registry, SESSION_ID).await;
    assert!(matches!(
        third.recv().await,
        SentItem::Feedback(fb) if fb.feedback_type == FeedbackType::ChallengeIssued
    ));
    drop(third.client_tx);
    third.runner.await.unwrap();
}

#[tokio::test]
async fn already_resolved_session_cannot_reconnect() {
    let mut session = Session::new(SESSION_ID, "u1");
    session.status = SessionStatus::Completed;
    let mut harness = Harness::start(quick_config(), (0.9, 0.8, 0.85), session).await;

    let mut items = Vec::new();
    harness.collect_until_closed(&mut items).await;
    harness.runner.await.unwrap();

    assert_eq!(count_type(&items, FeedbackType::ChallengeIssued), 0);
    assert_eq!(close_code(&items), 1008);
}

#[tokio::test]
async fn replayed_challenge_complete_is_ignored() {
    let mut harness =
        Harness::start(quick_config(), (0.9, 0.8, 0.85), Session::new(SESSION_ID, "u1")).await;

    // Capture the first challenge id, then complete it through scoring.
    let first = harness.recv().await;
    let first_id = match &first {
        SentItem::Feedback(fb) if fb.feedback_type == FeedbackType::ChallengeIssued => {
            fb.data["challenge_id"].as_str().unwrap().to_string()
        }
        other => panic!("expected CHALLENGE_ISSUED, got {other:?}"),
    };
    let mut items = vec![first];
    for _ in 0..3 {
        assert!(!harness.frame_step(&mut items).await);
    }

    // Replay a claim for the now-resolved first challenge, then finish.
    harness.send_claim_for(&first_id);
    while !harness.frame_step(&mut items).await {}
    harness.runner.await.unwrap();

    assert_eq!(count_type(&items, FeedbackType::VerificationSuccess), 1);
    assert_eq!(count_type(&items, FeedbackType::ChallengeFailed), 0);

    // The replay left no trace: exactly one completion per challenge.
    let events = harness.store.audit_events(SESSION_ID).await.unwrap();
    assert_eq!(
        events.iter().filter(|e| e.event_type == AuditEventType::ChallengeCompleted).count(),
        3
    );
    assert_eq!(
        events.iter().filter(|e| e.event_type == AuditEventType::ChallengeFailed).count(),
        0
    );
}

#[tokio::test]
async fn disconnect_mid_session_leaves_it_reconnectable() {
    let mut harness =
        Harness::start(quick_config(), (0.9, 0.8, 0.85), Session::new(SESSION_ID, "u1")).await;

    // First challenge arrives, then the client goes away.
    let first = harness.recv().await;
    assert!(matches!(
        first,
        SentItem::Feedback(fb) if fb.feedback_type == FeedbackType::ChallengeIssued
    ));
    drop(harness.client_tx);
    harness.runner.await.unwrap();

    // No terminal outcome was written; the session stays open for another
    // connection within its deadline.
    let session = harness.store.get_session(SESSION_ID).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Active);
    assert!(harness.store.get_result(SESSION_ID).await.unwrap().is_none());
    let events = harness.store.audit_events(SESSION_ID).await.unwrap();
    assert!(events.iter().any(|e| e.event_type == AuditEventType::ClientDisconnected));
}

#[tokio::test]
async fn malformed_messages_get_error_feedback_but_session_survives() {
    let mut harness =
        Harness::start(quick_config(), (0.9, 0.8, 0.85), Session::new(SESSION_ID, "u1")).await;

    let first = harness.recv().await;
    assert!(matches!(
        first,
        SentItem::Feedback(fb) if fb.feedback_type == FeedbackType::ChallengeIssued
    ));

    let _ = harness.client_tx.send("this is not json".to_string());
    let item = harness.recv().await;
    assert!(matches!(
        item,
        SentItem::Feedback(fb) if fb.feedback_type == FeedbackType::Error
    ));

    // The session is still live and completes normally afterwards.
    let mut items = Vec::new();
    while !harness.frame_step(&mut items).await {}
    harness.runner.await.unwrap();
    assert_eq!(count_type(&items, FeedbackType::VerificationSuccess), 1);
    assert_eq!(close_code(&items), 1000);
}
