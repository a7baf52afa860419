//! Blocking facade over [`Listener`](super::Listener).
//!
//! Each blocking listener owns a current-thread tokio runtime, so it can
//! be used from plain threads without an ambient runtime. None of these
//! methods may be called from inside an async context.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::channel::ChannelSubscription;
use super::config::ListenerConfig;
use super::connection::{Connector, WsConnector};
use super::listener::{self, ListenerState, StopHandle};
use super::message::Message;
use super::sink::{MessageQueue, MessageSink};
use super::tokens::TokenProvider;
use crate::error::Error;

/// Internal feed backing [`Listener::receive`].
enum Feed {
    Running {
        queue: MessageQueue,
        task: JoinHandle<Result<(), Error>>,
    },
    Finished,
}

/// A listener driven by its own runtime.
pub struct Listener<T, C = WsConnector> {
    inner: Arc<listener::Listener<T, C>>,
    runtime: Runtime,
    feed: Mutex<Option<Feed>>,
}

impl<T: TokenProvider> Listener<T> {
    pub fn new(
        tokens: T,
        channel: ChannelSubscription,
        config: ListenerConfig,
    ) -> Result<Self, Error> {
        Self::from_listener(listener::Listener::new(tokens, channel, config))
    }
}

impl<T: TokenProvider, C: Connector> Listener<T, C> {
    /// Wrap a configured async listener.
    pub fn from_listener(inner: listener::Listener<T, C>) -> Result<Self, Error> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            inner: Arc::new(inner),
            runtime,
            feed: Mutex::new(None),
        })
    }

    pub fn state(&self) -> ListenerState {
        self.inner.state()
    }

    pub fn state_changes(&self) -> watch::Receiver<ListenerState> {
        self.inner.state_changes()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.inner.stop_handle()
    }

    /// Request a stop; callable from any thread.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Listen on the calling thread until the listener stops or fails.
    pub fn listen(&self, sink: MessageSink) -> Result<(), Error> {
        self.runtime.block_on(self.inner.listen(sink))
    }

    /// Listen on a dedicated OS thread.
    pub fn start(self, sink: MessageSink) -> Result<BlockingHandle, Error> {
        let stop = self.stop_handle();
        let state = self.state_changes();
        let name = format!("c8y-listener-{}", self.inner.channel().subscriber());
        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || self.listen(sink))?;
        Ok(BlockingHandle {
            stop,
            state,
            thread,
        })
    }

    /// Wait up to `timeout` for the next message.
    ///
    /// The first call starts the listener behind a queue sink; frames are
    /// only read while a `receive` call is waiting. Returns `Ok(None)` when
    /// the timeout elapses or after the listener has stopped, and the
    /// terminal error once if it failed.
    pub fn receive(&self, timeout: Duration) -> Result<Option<Message>, Error> {
        let mut feed = self.feed.lock().unwrap_or_else(PoisonError::into_inner);
        let current = feed.get_or_insert_with(|| {
            let (sink, queue) = MessageSink::queue(self.inner.config().effective_queue_capacity());
            let inner = Arc::clone(&self.inner);
            let task = self.runtime.spawn(async move { inner.listen(sink).await });
            Feed::Running { queue, task }
        });

        let Feed::Running { queue, task } = &mut *current else {
            return Ok(None);
        };

        let next = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, queue.recv()).await });
        match next {
            Err(_elapsed) => Ok(None),
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => {
                let finished = self.runtime.block_on(task);
                *current = Feed::Finished;
                debug!("receive feed finished");
                match finished {
                    Ok(result) => result.map(|()| None),
                    Err(e) => Err(Error::TaskAborted(e.to_string())),
                }
            }
        }
    }
}

/// A blocking listener running on its own thread.
#[derive(Debug)]
pub struct BlockingHandle {
    stop: StopHandle,
    state: watch::Receiver<ListenerState>,
    thread: thread::JoinHandle<Result<(), Error>>,
}

impl BlockingHandle {
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the listener thread to end.
    pub fn join(self) -> Result<(), Error> {
        self.thread
            .join()
            .unwrap_or_else(|_| Err(Error::TaskAborted("listener thread panicked".into())))
    }
}
