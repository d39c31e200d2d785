// Tracks which sessions currently have a live connection. Exactly one runner
// may own a session's mutable state at a time; the registry is what enforces
// that at the connection layer.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use log::debug;

/// Registry of session ids with an attached runner.
///
/// A connection must hold a [`SessionClaim`] for its session id for the
/// lifetime of the runner. The claim releases on drop, so teardown on any
/// path (terminal outcome, disconnect, panic) frees the session for a later
/// reconnection.
#[derive(Debug, Default)]
pub struct ActiveSessions {
    inner: Mutex<HashSet<String>>,
}

impl ActiveSessions {
    pub fn new() -> Self {
        ActiveSessions::default()
    }

    /// Claims the session for one connection. `None` if another connection
    /// already holds it.
    pub fn acquire(self: &Arc<Self>, session_id: &str) -> Option<SessionClaim> {
        let mut live = self.inner.lock().expect("session registry lock poisoned");
        if !live.insert(session_id.to_string()) {
            return None;
        }
        Some(SessionClaim { registry: self.clone(), session_id: session_id.to_string() })
    }

    /// Whether some connection currently holds the session.
    pub fn is_live(&self, session_id: &str) -> bool {
        self.inner
            .lock()
            .expect("session registry lock poisoned")
            .contains(session_id)
    }
}

/// Exclusive hold on a session id. Released on drop.
pub struct SessionClaim {
    registry: Arc<ActiveSessions>,
    session_id: String,
}

impl Drop for SessionClaim {
    fn drop(&mut self) {
        self.registry
            .inner
            .lock()
            .expect("session registry lock poisoned")
            .remove(&self.session_id);
        debug!("released session claim for {}", self.session_id);
    }
}
