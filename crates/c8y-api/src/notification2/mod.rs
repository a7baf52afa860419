//! Cumulocity Notification 2.0.
//!
//! - [`Subscriptions`]: create, list, count and delete subscriptions.
//! - [`Tokens`]: channel tokens and consumer URLs.
//! - [`Listener`]: consume a channel with reconnect, backpressure and
//!   acknowledgments; [`blocking::Listener`] for non-async callers.

mod ack;
pub mod blocking;
mod channel;
mod config;
mod connection;
mod dispatcher;
mod listener;
mod message;
mod sink;
mod subscriptions;
mod tokens;

pub use ack::AckHandle;
pub use channel::ChannelSubscription;
pub use config::{AckMode, ListenerConfig};
pub use connection::{Connection, ConnectionState, Connector, WsConnection, WsConnector};
pub use listener::{Listener, ListenerHandle, ListenerState, StopHandle};
pub use message::Message;
pub use sink::{HandlerResult, MessageQueue, MessageSink};
pub use subscriptions::{
    ApiFilter, SourceRef, Subscription, SubscriptionContext, SubscriptionFilter,
    SubscriptionQuery, Subscriptions,
};
pub use tokens::{TokenProvider, TokenRequest, Tokens, build_websocket_uri};
