// Frame ingestion: decoding inbound video frames and the bounded per-session
// queue that applies backpressure between the receive path and the
// processing path.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::debug;
use tokio::sync::Notify;

use crate::errors::DecodeError;

/// A decoded RGB8 pixel buffer.
#[derive(Clone, Debug)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: f64,
}

/// An inbound frame as received off the wire, prior to decoding.
#[derive(Clone, Debug)]
pub struct EncodedFrame {
    pub payload: String,
    pub timestamp: f64,
}

/// Decodes a base64 frame payload (optionally carrying a browser data-URL
/// prefix such as `data:image/jpeg;base64,`) into a raw RGB8 buffer.
pub fn decode_frame(payload: &str, timestamp: f64) -> Result<RawFrame, DecodeError> {
    let body = match payload.split_once(',') {
        Some((_, rest)) => rest,
        None => payload,
    };
    let body = body.trim();
    if body.is_empty() {
        return Err(DecodeError::Empty);
    }

    let bytes = BASE64.decode(body)?;
    let image = image::load_from_memory(&bytes)?;
    let rgb = image.to_rgb8();
    Ok(RawFrame {
        width: rgb.width(),
        height: rgb.height(),
        data: rgb.into_raw(),
        timestamp,
    })
}

/// Bounded FIFO queue between the socket receive task and the session runner.
///
/// When full, `push` drops the **oldest** queued frame in favour of the newest
/// (bias toward freshness). This is the backpressure policy, not an error.
/// FIFO order is preserved for frames that are retained.
#[derive(Debug)]
pub struct FrameQueue {
    inner: Mutex<VecDeque<EncodedFrame>>,
    depth: usize,
    notify: Notify,
    closed: AtomicBool,
}

impl FrameQueue {
    pub fn new(depth: usize) -> Self {
        assert!(depth > 0, "frame queue depth must be positive");
        FrameQueue {
            inner: Mutex::new(VecDeque::with_capacity(depth)),
            depth,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueues a frame, dropping and returning the oldest entry if the queue
    /// is at capacity. Frames pushed after `close` are discarded.
    pub fn push(&self, frame: EncodedFrame) -> Option<EncodedFrame> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let dropped = {
            let mut queue = self.inner.lock().expect("frame queue lock poisoned");
            let dropped = if queue.len() == self.depth { queue.pop_front() } else { None };
            queue.push_back(frame);
            dropped
        };
        if dropped.is_some() {
            debug!("frame queue full, dropped oldest frame");
        }
        self.notify.notify_one();
        dropped
    }

    /// Awaits the next frame in arrival order. Returns `None` once the queue
    /// is closed and drained.
    pub async fn recv(&self) -> Option<EncodedFrame> {
        loop {
            let notified = self.notify.notified();
            if let Some(frame) = self.inner.lock().expect("frame queue lock poisoned").pop_front() {
                return Some(frame);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Stops accepting new frames and wakes any pending `recv`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("frame queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
