// Cumulocity REST client
//
// Wraps `reqwest::Client` with tenant credentials, base-URL-relative path
// construction, and status/JSON error mapping. Endpoint groups (tokens,
// subscriptions) live in their own modules and borrow this client.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::auth::Credentials;
use crate::error::Error;
use crate::transport::TransportConfig;

/// Raw HTTP client for the platform's REST API.
///
/// Every request carries the configured credentials. Responses are
/// checked for status and decoded into the caller's type; 401 becomes
/// [`Error::Authentication`], any other failure [`Error::Api`].
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
    credentials: Credentials,
}

impl RestClient {
    /// Create a new client from a `TransportConfig`.
    ///
    /// The `base_url` is the tenant root, e.g. `https://t12345.eu-latest.cumulocity.com`.
    pub fn new(
        base_url: Url,
        credentials: Credentials,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url,
            credentials,
        })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url, credentials: Credentials) -> Self {
        Self {
            http,
            base_url,
            credentials,
        }
    }

    /// The tenant base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The credentials attached to every request.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// The underlying HTTP client.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build a full URL for a resource path, keeping any base path prefix.
    ///
    /// `url("notification2/token")` on `https://host/prefix/` yields
    /// `https://host/prefix/notification2/token`.
    pub(crate) fn url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Send a GET request and decode the JSON response.
    pub(crate) async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url.path());

        let builder = self.credentials.apply(self.http.get(url));
        let resp = builder.send().await?;

        Self::parse_json(resp).await
    }

    /// Send a POST request with JSON body and decode the JSON response.
    pub(crate) async fn post<T: DeserializeOwned>(
        &self,
        url: Url,
        body: &(impl Serialize + Sync),
    ) -> Result<T, Error> {
        debug!("POST {}", url.path());

        let builder = self.credentials.apply(self.http.post(url).json(body));
        let resp = builder.send().await?;

        Self::parse_json(resp).await
    }

    /// Send a body-less POST request and decode the JSON response.
    pub(crate) async fn post_empty<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("POST {}", url.path());

        let builder = self.credentials.apply(self.http.post(url));
        let resp = builder.send().await?;

        Self::parse_json(resp).await
    }

    /// Send a DELETE request, discarding any response body.
    pub(crate) async fn delete(&self, url: Url) -> Result<(), Error> {
        debug!("DELETE {}", url.path());

        let builder = self.credentials.apply(self.http.delete(url));
        let resp = builder.send().await?;

        Self::check_status(resp).await.map(drop)
    }

    /// Map error statuses, passing successful responses through.
    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
        let status = resp.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication {
                message: "invalid or expired credentials (HTTP 401)".into(),
            });
        }

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message: preview(&body).to_owned(),
            });
        }

        Ok(resp)
    }

    /// Check the status, then decode the body as JSON.
    async fn parse_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
        let resp = Self::check_status(resp).await?;
        let body = resp.text().await?;

        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: format!("{e} (body preview: {:?})", preview(&body)),
            body,
        })
    }
}

/// The first 200 bytes of a body, cut on a char boundary.
fn preview(body: &str) -> &str {
    let mut end = body.len().min(200);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
