// c8y-api: Async Rust client for Cumulocity Notification 2.0 (subscriptions, tokens, listener)

pub mod auth;
pub mod client;
pub mod error;
pub mod notification2;
pub mod transport;

pub use auth::Credentials;
pub use client::RestClient;
pub use error::{Error, HandlerError};
pub use transport::{TlsMode, TransportConfig};
