// Single-use, time-boxed nonces preventing challenge replay.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::debug;
use rand::RngCore;

/// State tracked per issued nonce.
#[derive(Clone, Debug)]
pub struct NonceRecord {
    pub session_id: String,
    pub expires_at: Instant,
    pub used: bool,
}

/// In-memory store of issued nonces.
///
/// A nonce validates at most once across its lifetime: only while present,
/// unused, unexpired, and bound to the session it was issued for. `consume`
/// is idempotent. Expiry is independent of use.
#[derive(Debug, Default)]
pub struct NonceStore {
    entries: Mutex<HashMap<String, NonceRecord>>,
}

impl NonceStore {
    pub fn new() -> Self {
        NonceStore::default()
    }

    /// Mints a fresh nonce bound to `session_id`, valid for `ttl`.
    pub fn issue(&self, session_id: &str, ttl: Duration) -> String {
        let mut bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let value = hex::encode(bytes);

        let record = NonceRecord {
            session_id: session_id.to_string(),
            expires_at: Instant::now() + ttl,
            used: false,
        };
        self.entries
            .lock()
            .expect("nonce store lock poisoned")
            .insert(value.clone(), record);
        debug!("issued nonce for session {}", session_id);
        value
    }

    /// True only if the nonce exists, is unused, unexpired, and was issued
    /// for the given session.
    pub fn validate(&self, session_id: &str, value: &str) -> bool {
        let entries = self.entries.lock().expect("nonce store lock poisoned");
        match entries.get(value) {
            Some(record) => {
                !record.used
                    && record.session_id == session_id
                    && record.expires_at > Instant::now()
            }
            None => false,
        }
    }

    /// Marks the nonce as used. Idempotent; unknown values are a no-op.
    pub fn consume(&self, value: &str) {
        let mut entries = self.entries.lock().expect("nonce store lock poisoned");
        if let Some(record) = entries.get_mut(value) {
            record.used = true;
        }
    }

    /// Maintenance sweep removing expired entries. Not on the request path.
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().expect("nonce store lock poisoned");
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, record| record.expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("nonce store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
