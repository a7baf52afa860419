// Notification 2.0 token API
//
// A listener never talks to the channel with tenant credentials directly:
// it asks for a short-lived token bound to (subscription, subscriber) and
// opens the consumer WebSocket with that token in the query string.

use std::future::Future;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::client::RestClient;
use crate::error::Error;

const TOKEN_PATH: &str = "notification2/token";
const UNSUBSCRIBE_PATH: &str = "notification2/unsubscribe";
const CONSUMER_PATH: &str = "/notification2/consumer/";

/// Body of a token request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub subscriber: String,
    pub subscription: String,
    pub expires_in_minutes: u32,
    pub shared: bool,
    #[serde(rename = "type")]
    pub token_type: String,
    pub non_persistent: bool,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

/// Source of channel tokens and consumer URLs.
///
/// The listener calls [`issue`](Self::issue) before every connection
/// attempt, so expired tokens are replaced transparently. [`Tokens`] is
/// the REST implementation; tests and custom deployments inject their own.
pub trait TokenProvider: Send + Sync + 'static {
    /// Request a fresh channel token.
    fn issue(
        &self,
        request: &TokenRequest,
    ) -> impl Future<Output = Result<SecretString, Error>> + Send;

    /// The WebSocket URL to consume with `token`.
    fn consumer_url(&self, token: &SecretString, consumer: Option<&str>) -> Result<Url, Error>;

    /// Remove the subscriber the token was issued for.
    fn unsubscribe(&self, token: &SecretString) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Token endpoints over the REST client.
#[derive(Debug, Clone)]
pub struct Tokens {
    client: RestClient,
}

impl Tokens {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }

    /// The REST client tokens are requested through.
    pub fn client(&self) -> &RestClient {
        &self.client
    }

    /// `POST /notification2/token`
    pub async fn generate(&self, request: &TokenRequest) -> Result<SecretString, Error> {
        let url = self.client.url(TOKEN_PATH)?;
        let resp: TokenResponse = self.client.post(url, request).await?;
        debug!(subscriber = %request.subscriber, "token issued");
        Ok(SecretString::from(resp.token))
    }

    /// `POST /notification2/unsubscribe?token=...`
    pub async fn unsubscribe_subscriber(&self, token: &SecretString) -> Result<(), Error> {
        let mut url = self.client.url(UNSUBSCRIBE_PATH)?;
        url.query_pairs_mut()
            .append_pair("token", token.expose_secret());
        let resp: Value = self.client.post_empty(url).await?;
        debug!(result = %resp["result"], "unsubscribe response");
        Ok(())
    }
}

impl TokenProvider for Tokens {
    async fn issue(&self, request: &TokenRequest) -> Result<SecretString, Error> {
        self.generate(request).await
    }

    fn consumer_url(&self, token: &SecretString, consumer: Option<&str>) -> Result<Url, Error> {
        build_websocket_uri(self.client.base_url(), token, consumer)
    }

    async fn unsubscribe(&self, token: &SecretString) -> Result<(), Error> {
        self.unsubscribe_subscriber(token).await
    }
}

/// Consumer URL for a tenant base URL.
///
/// `https` maps to `wss`, anything else to `ws`; the base path is replaced.
pub fn build_websocket_uri(
    base_url: &Url,
    token: &SecretString,
    consumer: Option<&str>,
) -> Result<Url, Error> {
    let host = base_url
        .host_str()
        .ok_or(Error::InvalidUrl(url::ParseError::EmptyHost))?;
    let scheme = if base_url.scheme() == "https" { "wss" } else { "ws" };
    let authority = match base_url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    };

    let mut url = Url::parse(&format!("{scheme}://{authority}{CONSUMER_PATH}"))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("token", token.expose_secret());
        if let Some(consumer) = consumer {
            query.append_pair("consumer", consumer);
        }
    }
    Ok(url)
}

/// The URL with its query (token) stripped, for logging.
pub(crate) fn redacted(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}
