// Request/response types and handler logic for the HTTP surface. The axum
// routing lives in `server`; this module keeps the protocol-level behaviour
// testable without a listening socket.

use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::data_structures::{AuditEvent, AuditEventType, Session};
use crate::errors::ApiError;
use crate::store::SessionStore;

/// `POST /api/auth/verify` request body.
#[derive(Clone, Debug, Deserialize)]
pub struct VerifyRequest {
    pub user_id: String,
}

/// `POST /api/auth/verify` response: where to connect for the stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub session_id: String,
    pub websocket_url: String,
    pub message: String,
}

/// `POST /api/token/validate` request body.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenValidateRequest {
    pub token: String,
}

/// Creates a pending verification session for the given user and records the
/// start in the audit log. The client must connect to the returned stream URL
/// before the session timeout elapses.
pub async fn create_session(
    store: &Arc<dyn SessionStore>,
    request: &VerifyRequest,
) -> Result<VerifyResponse, ApiError> {
    let user_id = request.user_id.trim();
    if user_id.is_empty() {
        return Err(ApiError::InvalidRequest("user_id must not be empty".into()));
    }

    let session_id = Uuid::new_v4().to_string();
    let session = Session::new(&session_id, user_id);
    store.create_session(session).await?;
    store
        .append_audit(AuditEvent::new(
            AuditEventType::SessionStart,
            &session_id,
            user_id,
            serde_json::json!({ "source": "api" }),
        ))
        .await?;

    info!("created verification session {session_id} for user {user_id}");
    Ok(VerifyResponse {
        websocket_url: format!("/ws/{session_id}"),
        session_id,
        message: "Connect to the websocket URL to begin verification".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::SessionStatus;
    use crate::store::InMemoryStore;

    fn store() -> Arc<dyn SessionStore> {
        Arc::new(InMemoryStore::new())
    }

    #[tokio::test]
    async fn creates_active_session_with_stream_url() {
        let store = store();
        let request = VerifyRequest { user_id: "u1".into() };
        let response = create_session(&store, &request).await.unwrap();

        assert_eq!(response.websocket_url, format!("/ws/{}", response.session_id));
        let session = store.get_session(&response.session_id).await.unwrap().unwrap();
        assert_eq!(session.user_id, "u1");
        assert_eq!(session.status, SessionStatus::Active);

        let events = store.audit_events(&response.session_id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, AuditEventType::SessionStart);
    }

    #[tokio::test]
    async fn distinct_requests_get_distinct_sessions() {
        let store = store();
        let request = VerifyRequest { user_id: "u1".into() };
        let a = create_session(&store, &request).await.unwrap();
        let b = create_session(&store, &request).await.unwrap();
        assert_ne!(a.session_id, b.session_id);
    }

    #[tokio::test]
    async fn blank_user_id_is_rejected() {
        let store = store();
        for user_id in ["", "   "] {
            let request = VerifyRequest { user_id: user_id.into() };
            let err = create_session(&store, &request).await.unwrap_err();
            assert!(matches!(err, ApiError::InvalidRequest(_)));
        }
    }
}
