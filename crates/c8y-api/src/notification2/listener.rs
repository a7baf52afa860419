//! The notification listener: connect, dispatch, reconnect, stop.
//!
//! ```text
//! Idle ─▶ Connecting ─▶ Listening ◀─▶ Reconnecting{n}
//!              │            │               │
//!              └────────────┴─── stop ──────┴─▶ Stopped
//!              └──── auth error / retries exhausted ───▶ Failed
//! ```
//!
//! State is published through a [`watch`] channel; `Stopped` and `Failed`
//! are terminal and never overwritten.

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ack::AckTracker;
use super::channel::ChannelSubscription;
use super::config::ListenerConfig;
use super::connection::{ConnectionManager, Connector, Session, WsConnector};
use super::dispatcher::{Dispatch, Dispatcher};
use super::sink::MessageSink;
use super::tokens::TokenProvider;
use crate::error::Error;

/// Bound on the close handshake after a stop.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// WebSocket code for an abnormal closure (no close frame).
const ABNORMAL_CLOSURE: u16 = 1006;

// ── ListenerState ────────────────────────────────────────────────────

/// Lifecycle state of a [`Listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Connecting,
    Listening,
    /// Waiting for, or performing, reconnect attempt `attempt` (1-based).
    Reconnecting { attempt: u32 },
    Stopped,
    Failed,
}

impl ListenerState {
    /// `Stopped` or `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connecting => f.write_str("connecting"),
            Self::Listening => f.write_str("listening"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Stopped => f.write_str("stopped"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

// ── Handles ──────────────────────────────────────────────────────────

/// Requests a stop from any thread or task.
#[derive(Debug, Clone)]
pub struct StopHandle(CancellationToken);

impl StopHandle {
    /// Stop the listener. Idempotent; a no-op once it is stopped or failed.
    pub fn stop(&self) {
        self.0.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// A listener running as a tokio task.
#[derive(Debug)]
pub struct ListenerHandle {
    stop: StopHandle,
    state: watch::Receiver<ListenerState>,
    task: JoinHandle<Result<(), Error>>,
}

impl ListenerHandle {
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ListenerState> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the listener to end.
    ///
    /// `Ok(())` after a stop; the terminal error after a failure.
    pub async fn wait(self) -> Result<(), Error> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(Error::TaskAborted(e.to_string())),
        }
    }
}

// ── Listener ─────────────────────────────────────────────────────────

type StateObserver = Box<dyn Fn(&ListenerState) + Send + Sync>;

/// How one connection ended.
enum Ended {
    Stopped,
    Dropped(Error),
}

/// Listens on one Notification 2.0 channel.
///
/// A listener runs once: after it stopped or failed, build a new one.
pub struct Listener<T, C = WsConnector> {
    channel: ChannelSubscription,
    config: ListenerConfig,
    tokens: T,
    connector: C,
    state: watch::Sender<ListenerState>,
    cancel: CancellationToken,
    observer: Option<StateObserver>,
}

impl<T, C> fmt::Debug for Listener<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("channel", &self.channel)
            .field("config", &self.config)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl<T: TokenProvider> Listener<T> {
    /// Listener over the WebSocket transport.
    pub fn new(tokens: T, channel: ChannelSubscription, config: ListenerConfig) -> Self {
        Self::with_connector(tokens, WsConnector, channel, config)
    }
}

impl<T: TokenProvider, C: Connector> Listener<T, C> {
    /// Listener over a custom transport.
    pub fn with_connector(
        tokens: T,
        connector: C,
        channel: ChannelSubscription,
        config: ListenerConfig,
    ) -> Self {
        let (state, _) = watch::channel(ListenerState::Idle);
        Self {
            channel,
            config,
            tokens,
            connector,
            state,
            cancel: CancellationToken::new(),
            observer: None,
        }
    }

    /// Call `observer` on every state transition, on the listener task.
    pub fn on_state_change<F>(mut self, observer: F) -> Self
    where
        F: Fn(&ListenerState) + Send + Sync + 'static,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn channel(&self) -> &ChannelSubscription {
        &self.channel
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.cancel.clone())
    }

    /// Request a stop. The running loop closes the connection and ends
    /// in `Stopped`; a stop before `listen` makes it end immediately.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Spawn [`listen`](Self::listen) on the current tokio runtime.
    pub fn start(self, sink: MessageSink) -> ListenerHandle {
        let stop = self.stop_handle();
        let state = self.state_changes();
        let task = tokio::spawn(async move { self.listen(sink).await });
        ListenerHandle { stop, state, task }
    }

    /// Run the listener in the calling task until it stops or fails.
    pub async fn listen(&self, sink: MessageSink) -> Result<(), Error> {
        let started = self.state.send_if_modified(|state| {
            if *state == ListenerState::Idle {
                *state = ListenerState::Connecting;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(Error::NotIdle {
                state: self.state().to_string(),
            });
        }
        self.notify(ListenerState::Connecting);
        info!(
            subscription = %self.channel.name(),
            subscriber = %self.channel.subscriber(),
            ack_mode = %self.config.ack_mode,
            tenant = self.channel.tenant().unwrap_or_default(),
            context = %self.channel.context(),
            "listener started"
        );

        let mut dispatcher = Dispatcher::new(sink, &self.config);
        let mut manager =
            ConnectionManager::new(&self.tokens, &self.connector, &self.channel, &self.config);

        match self.run(&mut manager, &mut dispatcher).await {
            Ok(()) => {
                self.transition(ListenerState::Stopped);
                if self.config.unsubscribe_on_stop {
                    manager.unsubscribe().await;
                }
                info!("listener stopped");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "listener failed");
                self.transition(ListenerState::Failed);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        manager: &mut ConnectionManager<'_, T, C>,
        dispatcher: &mut Dispatcher,
    ) -> Result<(), Error> {
        let mut attempt: u32 = 0;

        loop {
            let connected = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(()),
                result = manager.connect() => result,
            };

            let last = match connected {
                Ok(session) => {
                    attempt = 0;
                    self.transition(ListenerState::Listening);
                    match self.pump(session, dispatcher).await {
                        Ended::Stopped => return Ok(()),
                        Ended::Dropped(e) => e,
                    }
                }
                Err(e) => e,
            };

            if last.is_fatal() {
                return Err(last);
            }

            attempt += 1;
            if attempt > self.config.max_retries {
                error!(
                    max_retries = self.config.max_retries,
                    "Reconnection limit reached, giving up"
                );
                return Err(Error::RetriesExhausted {
                    attempts: self.config.max_retries,
                    last: Box::new(last),
                });
            }

            let delay = self.config.backoff_delay(attempt);
            warn!(
                error = %last,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Connection lost, waiting before reconnect"
            );
            self.transition(ListenerState::Reconnecting { attempt });

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Read, dispatch and ack on one connection until it ends.
    async fn pump(
        &self,
        mut session: Session<C::Connection>,
        dispatcher: &mut Dispatcher,
    ) -> Ended {
        let mut acks = AckTracker::new();
        let threshold = self.config.effective_max_protocol_errors();
        let mut protocol_errors: u32 = 0;

        let ended = loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break Ended::Stopped,
                Some(token) = acks.next() => {
                    tokio::select! {
                        biased;
                        sent = acks.send(&mut session, token) => {
                            if let Err(e) = sent {
                                break Ended::Dropped(e);
                            }
                        }
                        () = self.cancel.cancelled() => break Ended::Stopped,
                    }
                }
                frame = session.recv() => {
                    let dispatched = match frame {
                        Some(Ok(raw)) => dispatcher.on_frame(&raw, &acks, &self.cancel).await,
                        Some(Err(Error::Protocol { reason })) => {
                            Dispatch::Malformed(Error::Protocol { reason })
                        }
                        Some(Err(e)) => break Ended::Dropped(e),
                        None => {
                            break Ended::Dropped(Error::WebSocketClosed {
                                code: ABNORMAL_CLOSURE,
                                reason: "stream ended".into(),
                            });
                        }
                    };

                    match dispatched {
                        Dispatch::Delivered | Dispatch::HandlerFailed => protocol_errors = 0,
                        Dispatch::Malformed(e) => {
                            protocol_errors += 1;
                            warn!(error = %e, consecutive = protocol_errors, "skipping malformed frame");
                            if protocol_errors >= threshold {
                                break Ended::Dropped(Error::Protocol {
                                    reason: format!("{protocol_errors} consecutive malformed frames"),
                                });
                            }
                        }
                        Dispatch::Cancelled => break Ended::Stopped,
                        Dispatch::SinkClosed => {
                            warn!("message consumer dropped, stopping listener");
                            self.cancel.cancel();
                            break Ended::Stopped;
                        }
                    }

                    tokio::select! {
                        biased;
                        flushed = acks.flush(&mut session) => {
                            if let Err(e) = flushed {
                                break Ended::Dropped(e);
                            }
                        }
                        () = self.cancel.cancelled() => break Ended::Stopped,
                    }
                }
            }
        };

        debug!(connection = %session.state(), "connection ended");
        match ended {
            Ended::Stopped => {
                // A stalled peer must not hold up stop.
                match tokio::time::timeout(CLOSE_TIMEOUT, acks.flush(&mut session)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!(error = %e, "could not flush acks before close"),
                    Err(_) => warn!("timed out flushing acks before close"),
                }
                session.close(CLOSE_TIMEOUT).await;
            }
            Ended::Dropped(_) => session.abandon().await,
        }
        acks.discard();
        ended
    }

    /// Publish `next` unless the state is terminal or unchanged.
    fn transition(&self, next: ListenerState) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if state.is_terminal() || *state == next {
                return false;
            }
            *state = next;
            true
        });
        if changed {
            self.notify(next);
        }
        changed
    }

    fn notify(&self, state: ListenerState) {
        debug!(%state, "listener state changed");
        if let Some(ref observer) = self.observer {
            observer(&state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(ListenerState::Stopped.is_terminal());
        assert!(ListenerState::Failed.is_terminal());
        assert!(!ListenerState::Idle.is_terminal());
        assert!(!ListenerState::Reconnecting { attempt: 3 }.is_terminal());
    }

    #[test]
    fn state_display() {
        assert_eq!(ListenerState::Listening.to_string(), "listening");
        assert_eq!(
            ListenerState::Reconnecting { attempt: 2 }.to_string(),
            "reconnecting (attempt 2)"
        );
    }

    #[test]
    fn stop_handle_is_shared() {
        let token = CancellationToken::new();
        let handle = StopHandle(token.clone());
        let copy = handle.clone();
        copy.stop();
        assert!(handle.is_stop_requested());
        assert!(token.is_cancelled());
    }
}
