//! Destination of encoded batches.
//!
//! A send can fail in two ways that must be told apart: the stream is gone
//! (fatal for the job) or the send did not complete in time (worth another
//! try).

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use federa_core::{FederaError, Result, RetryPolicy};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::warn;

use crate::frame::Frame;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    StreamLost,
    Transient(String),
}

#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Send one IPC-encoded batch.
    async fn send(&self, payload: Bytes) -> std::result::Result<(), SendError>;

    /// Whether the receiving side has gone away.
    fn is_cancelled(&self) -> bool;
}

/// Sink backed by a bounded channel; the receiver feeds the response body.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Frame>,
    send_timeout: Duration,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Frame>, send_timeout: Duration) -> Self {
        Self { tx, send_timeout }
    }

    /// Channel and sink with `capacity` frames of buffering.
    pub fn channel(capacity: usize, send_timeout: Duration) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx, send_timeout), rx)
    }

    /// Send the terminal error frame. Failures are ignored: the caller is
    /// already gone.
    pub async fn send_error(&self, message: String) {
        let _ = self
            .tx
            .send_timeout(Frame::Error(message), self.send_timeout)
            .await;
    }
}

#[async_trait]
impl BatchSink for ChannelSink {
    async fn send(&self, payload: Bytes) -> std::result::Result<(), SendError> {
        match self
            .tx
            .send_timeout(Frame::Batch(payload), self.send_timeout)
            .await
        {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Closed(_)) => Err(SendError::StreamLost),
            Err(SendTimeoutError::Timeout(_)) => Err(SendError::Transient(format!(
                "send not accepted within {:?}",
                self.send_timeout
            ))),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Send with linear backoff. A lost stream is never retried.
pub async fn send_with_retry(
    sink: &dyn BatchSink,
    payload: Bytes,
    policy: &RetryPolicy,
) -> Result<()> {
    let mut attempt = 1;
    loop {
        if sink.is_cancelled() {
            return Err(FederaError::StreamLost("client disconnected".to_string()));
        }
        match sink.send(payload.clone()).await {
            Ok(()) => return Ok(()),
            Err(SendError::StreamLost) => {
                return Err(FederaError::StreamLost("stream closed during send".to_string()))
            }
            Err(SendError::Transient(msg)) if attempt < policy.max_attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    "send attempt {}/{} failed: {}; retrying in {:?}",
                    attempt, policy.max_attempts, msg, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(SendError::Transient(msg)) => {
                return Err(FederaError::Retryable(format!(
                    "send failed after {} attempts: {}",
                    attempt, msg
                )))
            }
        }
    }
}
