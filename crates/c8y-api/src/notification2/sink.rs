use std::fmt;
use std::future::Future;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use super::message::Message;
use crate::error::HandlerError;

/// What a message handler returns.
pub type HandlerResult = Result<(), HandlerError>;

type SyncHandler = Box<dyn FnMut(&Message) -> HandlerResult + Send>;
type AsyncHandler = Box<dyn FnMut(Message) -> BoxFuture<'static, HandlerResult> + Send>;

/// Where the listener delivers messages.
pub enum MessageSink {
    /// Called in place on the listener task; the next frame is read only
    /// after it returns.
    Callback(SyncHandler),
    /// Awaited in place on the listener task.
    AsyncCallback(AsyncHandler),
    /// Bounded queue; a full queue stalls the listener (backpressure).
    Queue(mpsc::Sender<Message>),
}

impl MessageSink {
    pub fn callback<F>(handler: F) -> Self
    where
        F: FnMut(&Message) -> HandlerResult + Send + 'static,
    {
        Self::Callback(Box::new(handler))
    }

    pub fn async_callback<F, Fut>(mut handler: F) -> Self
    where
        F: FnMut(Message) -> Fut + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::AsyncCallback(Box::new(move |message| handler(message).boxed()))
    }

    /// A queue sink and the consumer end for it. Capacity is at least 1.
    pub fn queue(capacity: usize) -> (Self, MessageQueue) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::Queue(tx), MessageQueue { rx })
    }
}

impl fmt::Debug for MessageSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callback(_) => f.write_str("MessageSink::Callback"),
            Self::AsyncCallback(_) => f.write_str("MessageSink::AsyncCallback"),
            Self::Queue(tx) => f
                .debug_struct("MessageSink::Queue")
                .field("capacity", &tx.max_capacity())
                .finish(),
        }
    }
}

/// Consumer end of a queue sink.
///
/// `None` from any receive method means the listener has finished
/// (stopped or failed) and every queued message has been taken.
#[derive(Debug)]
pub struct MessageQueue {
    rx: mpsc::Receiver<Message>,
}

impl MessageQueue {
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Blocking receive for consumers on plain threads.
    ///
    /// Panics when called inside an async runtime.
    pub fn blocking_recv(&mut self) -> Option<Message> {
        self.rx.blocking_recv()
    }

    /// A message if one is ready right now.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Messages currently buffered.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Stop accepting messages; already queued ones can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
