// Randomized physical/expression challenges issued during a session.

pub mod engine;
pub mod types;

pub use engine::ChallengeEngine;
pub use types::{Challenge, ChallengeKind, ChallengeState};
