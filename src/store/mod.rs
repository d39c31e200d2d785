// Persistence seam: sessions, verification results, and the append-only
// audit log live behind a narrow async interface so the protocol core stays
// agnostic of the backing store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::data_structures::{AuditEvent, Session, VerificationResult};
use crate::errors::StoreError;

/// Narrow create/read/update interface over the external session store.
/// Writes are at-least-once with idempotent upserts keyed by `session_id`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: Session) -> Result<(), StoreError>;

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError>;

    /// Idempotent upsert of the full session record.
    async fn update_session(&self, session: Session) -> Result<(), StoreError>;

    /// Writes the terminal verification result. Upsert keyed by session id.
    async fn write_result(&self, result: VerificationResult) -> Result<(), StoreError>;

    async fn get_result(&self, session_id: &str) -> Result<Option<VerificationResult>, StoreError>;

    /// Appends to the audit log.
    async fn append_audit(&self, event: AuditEvent) -> Result<(), StoreError>;

    /// Audit events for one session, in append order.
    async fn audit_events(&self, session_id: &str) -> Result<Vec<AuditEvent>, StoreError>;
}

/// In-memory store used by the default server wiring and by tests.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    sessions: Mutex<HashMap<String, Session>>,
    results: Mutex<HashMap<String, VerificationResult>>,
    audit: Mutex<Vec<AuditEvent>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore::default()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn create_session(&self, session: Session) -> Result<(), StoreError> {
        self.sessions
            .lock()
            .expect("session store lock poisoned")
            .insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self
            .sessions
            .lock()
            .expect("session store lock poisoned")
            .get(session_id)
            .cloned())
    }

    async fn update_session(&self, session: Session) -> Result<(), StoreError> {
        self.sessions
            .lock()
            .expect("session store lock poisoned")
            .insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn write_result(&self, result: VerificationResult) -> Result<(), StoreError> {
        self.results
            .lock()
            .expect("result store lock poisoned")
            .insert(result.session_id.clone(), result);
        Ok(())
    }

    async fn get_result(&self, session_id: &str) -> Result<Option<VerificationResult>, StoreError> {
        Ok(self
            .results
            .lock()
            .expect("result store lock poisoned")
            .get(session_id)
            .cloned())
    }

    async fn append_audit(&self, event: AuditEvent) -> Result<(), StoreError> {
        self.audit.lock().expect("audit log lock poisoned").push(event);
        Ok(())
    }

    async fn audit_events(&self, session_id: &str) -> Result<Vec<AuditEvent>, StoreError> {
        Ok(self
            .audit
            .lock()
            .expect("audit log lock poisoned")
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::{AuditEventType, SessionStatus};
    use chrono::Utc;

    #[tokio::test]
    async fn session_roundtrip_and_upsert() {
        let store = InMemoryStore::new();
        let mut session = Session::new("sess-1", "u1");
        store.create_session(session.clone()).await.unwrap();

        let loaded = store.get_session("sess-1").await.unwrap().unwrap();
        assert_eq!(loaded, session);

        session.status = SessionStatus::Completed;
        store.update_session(session.clone()).await.unwrap();
        // update is idempotent
        store.update_session(session.clone()).await.unwrap();
        let loaded = store.get_session("sess-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn missing_session_is_none() {
        let store = InMemoryStore::new();
        assert!(store.get_session("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn result_written_once_then_readable() {
        let store = InMemoryStore::new();
        let result = VerificationResult {
            session_id: "sess-1".into(),
            liveness_score: 0.9,
            emotion_score: 0.8,
            deepfake_score: 0.85,
            final_score: 0.8625,
            passed: true,
            timestamp: Utc::now(),
        };
        store.write_result(result.clone()).await.unwrap();
        let loaded = store.get_result("sess-1").await.unwrap().unwrap();
        assert_eq!(loaded, result);
    }

    #[tokio::test]
    async fn audit_log_preserves_append_order_per_session() {
        let store = InMemoryStore::new();
        for (i, event_type) in [
            AuditEventType::SessionStart,
            AuditEventType::ChallengeIssued,
            AuditEventType::SessionCompleted,
        ]
        .into_iter()
        .enumerate()
        {
            store
                .append_audit(AuditEvent::new(
                    event_type,
                    "sess-1",
                    "u1",
                    serde_json::json!({ "seq": i }),
                ))
                .await
                .unwrap();
        }
        store
            .append_audit(AuditEvent::new(
                AuditEventType::SessionStart,
                "sess-2",
                "u2",
                serde_json::Value::Null,
            ))
            .await
            .unwrap();

        let events = store.audit_events("sess-1").await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_type, AuditEventType::SessionStart);
        assert_eq!(events[2].event_type, AuditEventType::SessionCompleted);
    }
}
