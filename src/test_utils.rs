// Shared fixtures for unit and integration tests: scripted scoring
// capabilities, an in-memory transport pair, and encoded frame payloads.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::{DynamicImage, RgbImage};
use tokio::sync::mpsc;

use crate::config::SystemConfig;
use crate::errors::{CapabilityError, TransportError};
use crate::ingest::RawFrame;
use crate::protocol::{CloseCode, ServerFeedback};
use crate::scoring::capability::{ChallengeContext, ScoringCapability};
use crate::session::transport::{FeedbackSink, InboundSource};

/// Config with short timers so protocol tests run quickly.
pub fn test_config() -> SystemConfig {
    SystemConfig {
        challenge_timeout_secs: 2,
        capability_timeout_ms: 200,
        min_challenge_samples: 5,
        ..SystemConfig::default()
    }
}

struct FixedCapability {
    name: &'static str,
    value: f64,
}

#[async_trait]
impl ScoringCapability for FixedCapability {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn score(&self, _frame: &RawFrame, _ctx: &ChallengeContext) -> Result<f64, CapabilityError> {
        Ok(self.value)
    }
}

struct FailingCapability {
    name: &'static str,
}

#[async_trait]
impl ScoringCapability for FailingCapability {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn score(&self, _frame: &RawFrame, _ctx: &ChallengeContext) -> Result<f64, CapabilityError> {
        Err(CapabilityError::Failed { name: self.name, reason: "scripted failure".into() })
    }
}

struct SlowCapability {
    name: &'static str,
    delay: Duration,
}

#[async_trait]
impl ScoringCapability for SlowCapability {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn score(&self, _frame: &RawFrame, _ctx: &ChallengeContext) -> Result<f64, CapabilityError> {
        tokio::time::sleep(self.delay).await;
        Ok(0.5)
    }
}

/// Capability that always returns `value`.
pub fn fixed_capability(name: &'static str, value: f64) -> Arc<dyn ScoringCapability> {
    Arc::new(FixedCapability { name, value })
}

/// Capability that always fails.
pub fn failing_capability(name: &'static str) -> Arc<dyn ScoringCapability> {
    Arc::new(FailingCapability { name })
}

/// Capability that sleeps for `delay` before answering.
pub fn slow_capability(name: &'static str, delay: Duration) -> Arc<dyn ScoringCapability> {
    Arc::new(SlowCapability { name, delay })
}

/// A valid base64 PNG payload suitable for `video_frame` messages. The seed
/// varies the pixel content so motion-based scorers see frame-to-frame change.
pub fn encoded_test_frame(seed: u32) -> String {
    let image = DynamicImage::ImageRgb8(RgbImage::from_fn(16, 16, |x, y| {
        image::Rgb([
            ((x * 13 + seed * 29) % 256) as u8,
            ((y * 17 + seed * 7) % 256) as u8,
            ((x + y + seed) % 256) as u8,
        ])
    }));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("png encoding of test frame");
    BASE64.encode(&bytes)
}

/// Inbound half of the in-memory transport: yields whatever the test sends.
pub struct ChannelSource {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl InboundSource for ChannelSource {
    async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// What the session sent to the client, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum SentItem {
    Feedback(ServerFeedback),
    Closed { code: u16, reason: String },
}

/// Outbound half of the in-memory transport: records feedback and the close.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SentItem>,
}

#[async_trait]
impl FeedbackSink for ChannelSink {
    async fn send(&mut self, feedback: &ServerFeedback) -> Result<(), TransportError> {
        self.tx
            .send(SentItem::Feedback(feedback.clone()))
            .map_err(|_| TransportError::Closed("test sink dropped".into()))
    }

    async fn close(&mut self, code: CloseCode, reason: &str) {
        let _ = self.tx.send(SentItem::Closed { code: code.as_u16(), reason: reason.to_string() });
    }
}

/// Builds a connected in-memory transport. The test drives the session
/// through `client_tx` and observes feedback through `feedback_rx`.
pub fn channel_transport() -> (
    mpsc::UnboundedSender<String>,
    mpsc::UnboundedReceiver<SentItem>,
    Box<dyn InboundSource>,
    Box<dyn FeedbackSink>,
) {
    let (client_tx, inbound_rx) = mpsc::unbounded_channel();
    let (sink_tx, feedback_rx) = mpsc::unbounded_channel();
    (
        client_tx,
        feedback_rx,
        Box::new(ChannelSource { rx: inbound_rx }),
        Box::new(ChannelSink { tx: sink_tx }),
    )
}
