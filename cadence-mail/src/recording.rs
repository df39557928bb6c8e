//! In-memory transport that records deliveries.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::transport::{OutboundEmail, SendReceipt, Transport};
use crate::{MailError, Result};

/// Transport double with scripted failures and latency.
///
/// ```
/// use cadence_mail::{OutboundEmail, RecordingTransport, Transport};
///
/// # tokio_test::block_on(async {
/// let transport = RecordingTransport::new();
/// transport.fail_next(1).await;
///
/// let email = OutboundEmail {
///     to: "owner@example.com".into(),
///     subject: "Hi".into(),
///     html: "<p>Hi</p>".into(),
///     text: None,
///     metadata: Default::default(),
/// };
/// assert!(transport.send(&email).await.is_err());
/// assert!(transport.send(&email).await.is_ok());
/// assert_eq!(transport.attempts(), 2);
/// assert_eq!(transport.sent().await.len(), 1);
/// # });
/// ```
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<OutboundEmail>>,
    attempts: AtomicUsize,
    fail_next: Mutex<usize>,
    always_fail: Mutex<HashSet<String>>,
    latency: Option<Duration>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Reject the next `count` calls.
    pub async fn fail_next(&self, count: usize) {
        *self.fail_next.lock().await = count;
    }

    /// Reject every message to `address`.
    pub async fn fail_for(&self, address: impl Into<String>) {
        self.always_fail.lock().await.insert(address.into());
    }

    /// Messages accepted so far.
    pub async fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().await.clone()
    }

    /// Total calls, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<SendReceipt> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        {
            let mut remaining = self.fail_next.lock().await;
            if *remaining > 0 {
                *remaining -= 1;
                return Err(MailError::Transport("scripted failure".to_string()));
            }
        }
        if self.always_fail.lock().await.contains(&email.to) {
            return Err(MailError::Transport(format!("mailbox {} unavailable", email.to)));
        }

        self.sent.lock().await.push(email.clone());
        Ok(SendReceipt {
            message_id: format!("<{}@recording.local>", Uuid::new_v4()),
        })
    }
}
