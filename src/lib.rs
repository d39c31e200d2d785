// Real-time human-presence verification: challenge-response sessions over a
// WebSocket stream, per-frame scoring across three dimensions, and signed
// credential issuance for passing sessions.

pub mod api;
pub mod challenge;
pub mod config;
pub mod crypto;
pub mod data_structures;
pub mod errors;
pub mod ingest;
pub mod nonce;
pub mod protocol;
pub mod scoring;
pub mod server;
pub mod session;
pub mod store;
pub mod test_utils;
pub mod token;
