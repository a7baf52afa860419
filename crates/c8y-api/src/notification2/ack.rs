//! Acknowledgment tracking.
//!
//! Each connection owns one [`AckTracker`]. Messages delivered on that
//! connection carry an [`AckHandle`] feeding the tracker's outbound queue;
//! the run loop drains the queue onto the socket. Tearing the connection
//! down drops the queue, so late acks fail fast and are only logged.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::connection::{Connection, Session};
use crate::error::Error;

#[derive(Debug)]
struct AckSlot {
    token: String,
    sent: AtomicBool,
    outbound: mpsc::UnboundedSender<String>,
}

/// Handle for acknowledging one delivered message.
#[derive(Debug, Clone)]
pub struct AckHandle(Arc<AckSlot>);

impl AckHandle {
    /// Queue the acknowledgment for this message's token.
    ///
    /// At most one ack is ever queued per message. If the delivering
    /// connection is already closed the ack is dropped with a warning.
    pub fn ack(&self) {
        if self.0.sent.swap(true, Ordering::AcqRel) {
            debug!(token = %self.0.token, "message already acknowledged");
            return;
        }
        if self.0.outbound.send(self.0.token.clone()).is_err() {
            warn!(
                token = %self.0.token,
                "connection closed before ack could be sent, server will redeliver"
            );
        }
    }

    /// Whether [`ack`](Self::ack) has been called.
    pub fn is_sent(&self) -> bool {
        self.0.sent.load(Ordering::Acquire)
    }

    /// The token this handle acknowledges.
    pub fn token(&self) -> &str {
        &self.0.token
    }
}

/// Per-connection outbound ack queue.
#[derive(Debug)]
pub(crate) struct AckTracker {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
    sent: u64,
}

impl AckTracker {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx, sent: 0 }
    }

    /// Create the handle for a message delivered on this connection.
    pub(crate) fn handle(&self, token: &str) -> AckHandle {
        AckHandle(Arc::new(AckSlot {
            token: token.to_owned(),
            sent: AtomicBool::new(false),
            outbound: self.tx.clone(),
        }))
    }

    /// Wait for the next queued ack. Never yields `None` while the tracker lives.
    pub(crate) async fn next(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// The next queued ack, if one is ready.
    pub(crate) fn try_next(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// Send a single ack frame.
    pub(crate) async fn send<C: Connection>(
        &mut self,
        session: &mut Session<C>,
        token: String,
    ) -> Result<(), Error> {
        session.send(token).await?;
        self.sent += 1;
        Ok(())
    }

    /// Send every ack queued so far, in queue order.
    pub(crate) async fn flush<C: Connection>(
        &mut self,
        session: &mut Session<C>,
    ) -> Result<(), Error> {
        while let Some(token) = self.try_next() {
            self.send(session, token).await?;
        }
        Ok(())
    }

    /// Drop the queue with the connection. Unsent acks are reported, not replayed.
    pub(crate) fn discard(mut self) {
        self.rx.close();
        let mut pending = 0_usize;
        while self.rx.try_recv().is_ok() {
            pending += 1;
        }
        if pending > 0 {
            warn!(
                pending,
                sent = self.sent,
                "discarding unsent acks with the connection, server will redeliver"
            );
        } else {
            debug!(sent = self.sent, "ack tracker closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_is_queued_once() {
        let mut tracker = AckTracker::new();
        let handle = tracker.handle("m-1");
        let clone = handle.clone();

        handle.ack();
        clone.ack();

        assert!(handle.is_sent());
        assert_eq!(tracker.try_next().as_deref(), Some("m-1"));
        assert!(tracker.try_next().is_none());
    }

    #[test]
    fn ack_after_discard_does_not_panic() {
        let tracker = AckTracker::new();
        let handle = tracker.handle("m-2");
        tracker.discard();

        handle.ack();
        assert!(handle.is_sent());
    }

    #[test]
    fn handles_keep_their_token() {
        let tracker = AckTracker::new();
        assert_eq!(tracker.handle("abc").token(), "abc");
    }
}
