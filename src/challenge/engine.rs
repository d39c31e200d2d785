use std::collections::HashSet;
use std::time::Duration;

use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::challenge::types::{Challenge, ChallengeKind, ChallengeState};
use crate::errors::ChallengeError;
use crate::nonce::NonceStore;

/// Produces the randomized, non-repeating challenge sequence for a session.
///
/// Every generated challenge carries a freshly minted nonce from the
/// [`NonceStore`] and the configured per-challenge timeout. The random source
/// is seedable so sequences are deterministic in tests; the production path
/// seeds from OS entropy.
pub struct ChallengeEngine {
    rng: StdRng,
}

impl ChallengeEngine {
    pub fn new() -> Self {
        ChallengeEngine { rng: StdRng::from_entropy() }
    }

    pub fn with_seed(seed: u64) -> Self {
        ChallengeEngine { rng: StdRng::seed_from_u64(seed) }
    }

    /// Draws `n` challenges from the catalog with no two consecutive
    /// challenges of the same kind, binding each to a nonce and timeout.
    pub fn generate(
        &mut self,
        session_id: &str,
        n: usize,
        challenge_timeout: Duration,
        nonce_ttl: Duration,
        nonces: &NonceStore,
    ) -> Result<Vec<Challenge>, ChallengeError> {
        let distinct: HashSet<ChallengeKind> = ChallengeKind::CATALOG.iter().copied().collect();
        if distinct.len() < 2 {
            // Unreachable with the built-in catalog; guards future edits.
            return Err(ChallengeError::CatalogTooSmall(distinct.len()));
        }

        let mut challenges = Vec::with_capacity(n);
        let mut previous: Option<ChallengeKind> = None;
        for index in 0..n {
            let kind = self.draw_kind(previous);
            let nonce = nonces.issue(session_id, nonce_ttl);
            challenges.push(Challenge {
                challenge_id: format!("{}_{}_{}", session_id, index, kind.label()),
                kind,
                instruction: kind.instruction().to_string(),
                nonce,
                issued_at: None,
                timeout: challenge_timeout,
                state: ChallengeState::Issued,
            });
            previous = Some(kind);
        }

        info!(
            "generated {} challenges for session {}: {:?}",
            challenges.len(),
            session_id,
            challenges.iter().map(|c| c.kind.label()).collect::<Vec<_>>()
        );
        Ok(challenges)
    }

    fn draw_kind(&mut self, previous: Option<ChallengeKind>) -> ChallengeKind {
        loop {
            let idx = self.rng.gen_range(0..ChallengeKind::CATALOG.len());
            let kind = ChallengeKind::CATALOG[idx];
            if Some(kind) != previous {
                return kind;
            }
        }
    }
}

impl Default for ChallengeEngine {
    fn default() -> Self {
        ChallengeEngine::new()
    }
}
