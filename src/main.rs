use std::sync::Arc;
use std::time::Duration;

use presence_protocol::config::SystemConfig;
use presence_protocol::nonce::NonceStore;
use presence_protocol::scoring::baseline::{
    ContrastEmotionScorer, MotionLivenessScorer, TextureDeepfakeScorer,
};
use presence_protocol::server::{router, AppState};
use presence_protocol::session::ActiveSessions;
use presence_protocol::store::InMemoryStore;
use presence_protocol::token::TokenIssuer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = SystemConfig::from_env();
    let issuer = Arc::new(TokenIssuer::generate(config.token_expiry_minutes));
    let nonces = Arc::new(NonceStore::new());
    spawn_nonce_sweeper(nonces.clone());

    let state = AppState {
        store: Arc::new(InMemoryStore::new()),
        nonces,
        registry: Arc::new(ActiveSessions::new()),
        issuer,
        liveness: Arc::new(MotionLivenessScorer::new()),
        emotion: Arc::new(ContrastEmotionScorer),
        deepfake: Arc::new(TextureDeepfakeScorer),
        config: config.clone(),
    };

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("presence verification server listening on {}", config.listen_addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn spawn_nonce_sweeper(nonces: Arc<NonceStore>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        loop {
            tick.tick().await;
            let removed = nonces.purge_expired();
            if removed > 0 {
                tracing::debug!("purged {removed} expired nonces");
            }
        }
    });
}
