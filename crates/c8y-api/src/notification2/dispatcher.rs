//! Frame-to-sink routing.
//!
//! The dispatcher runs on the listener task. It decodes one frame, binds
//! the message to the current connection's ack queue, hands it to the
//! sink and applies the auto-ack policy. It never reads ahead: the next
//! frame is only received after `on_frame` returns.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use super::ack::AckTracker;
use super::config::{AckMode, ListenerConfig};
use super::message::Message;
use super::sink::{HandlerResult, MessageSink};
use crate::error::{Error, HandlerError};

/// Outcome of dispatching one frame.
#[derive(Debug)]
pub(crate) enum Dispatch {
    /// Handed to the sink successfully.
    Delivered,
    /// The handler returned an error or panicked (already logged).
    HandlerFailed,
    /// The frame could not be decoded; nothing was delivered or logged.
    Malformed(Error),
    /// Stop was requested while the sink was busy.
    Cancelled,
    /// The queue consumer is gone; nothing can be delivered any more.
    SinkClosed,
}

#[derive(Debug, Clone, Copy)]
struct AckPolicy {
    mode: AckMode,
    on_handler_error: bool,
}

impl AckPolicy {
    fn settle(self, message: &Message, result: HandlerResult) -> Dispatch {
        match result {
            Ok(()) => {
                if self.mode == AckMode::Auto {
                    message.ack();
                }
                Dispatch::Delivered
            }
            Err(e) => {
                let err = Error::Handler(e);
                warn!(id = %message.id(), error = %err, "message handler failed");
                if self.mode == AckMode::Auto && self.on_handler_error {
                    message.ack();
                }
                Dispatch::HandlerFailed
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct Dispatcher {
    sink: MessageSink,
    policy: AckPolicy,
}

impl Dispatcher {
    pub(crate) fn new(sink: MessageSink, config: &ListenerConfig) -> Self {
        Self {
            sink,
            policy: AckPolicy {
                mode: config.ack_mode,
                on_handler_error: config.ack_on_handler_error,
            },
        }
    }

    /// Decode `raw` and deliver it.
    ///
    /// Async handlers and blocked queue sends race against `cancel`.
    pub(crate) async fn on_frame(
        &mut self,
        raw: &str,
        acks: &AckTracker,
        cancel: &CancellationToken,
    ) -> Dispatch {
        let message = match Message::parse(raw) {
            Ok(message) => message,
            Err(e) => return Dispatch::Malformed(e),
        };
        let handle = acks.handle(message.id());
        let message = message.with_ack(handle);
        trace!(id = %message.id(), action = %message.action(), "dispatching message");

        let policy = self.policy;
        match &mut self.sink {
            MessageSink::Callback(handler) => {
                let result = panic::catch_unwind(AssertUnwindSafe(|| handler(&message)))
                    .unwrap_or_else(|payload| Err(panicked(&*payload)));
                policy.settle(&message, result)
            }
            MessageSink::AsyncCallback(handler) => {
                let call = panic::catch_unwind(AssertUnwindSafe(|| handler(message.clone())));
                let pending = match call {
                    Ok(pending) => pending,
                    Err(payload) => return policy.settle(&message, Err(panicked(&*payload))),
                };
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => Dispatch::Cancelled,
                    result = AssertUnwindSafe(pending).catch_unwind() => {
                        let result = result.unwrap_or_else(|payload| Err(panicked(&*payload)));
                        policy.settle(&message, result)
                    }
                }
            }
            MessageSink::Queue(tx) => {
                let ack = message.ack_handle().cloned();
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => Dispatch::Cancelled,
                    sent = tx.send(message) => match sent {
                        Ok(()) => {
                            if let (AckMode::Auto, Some(ack)) = (policy.mode, ack) {
                                ack.ack();
                            }
                            Dispatch::Delivered
                        }
                        Err(rejected) => {
                            warn!(id = %rejected.0.id(), "message queue consumer is gone");
                            Dispatch::SinkClosed
                        }
                    },
                }
            }
        }
    }
}

/// A panicking handler counts as a failed one.
fn panicked(payload: &(dyn Any + Send)) -> HandlerError {
    let reason = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_owned());
    format!("handler panicked: {reason}").into()
}
