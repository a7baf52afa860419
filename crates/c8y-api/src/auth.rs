use secrecy::{ExposeSecret, SecretString};

/// Credentials for authenticating against a Cumulocity tenant.
///
/// Each variant carries the secret material needed for its auth flow.
/// Secrets are redacted in `Debug` output.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// HTTP basic auth with a tenant-qualified principal (`{tenant}/{username}`).
    Basic {
        tenant: String,
        username: String,
        password: SecretString,
    },

    /// OAuth/OAI-Secure bearer token.
    Bearer { token: SecretString },
}

impl Credentials {
    /// Basic auth credentials for a tenant user.
    pub fn basic(
        tenant: impl Into<String>,
        username: impl Into<String>,
        password: SecretString,
    ) -> Self {
        Self::Basic {
            tenant: tenant.into(),
            username: username.into(),
            password,
        }
    }

    /// Bearer token credentials.
    pub fn bearer(token: SecretString) -> Self {
        Self::Bearer { token }
    }

    /// The tenant-qualified principal (`t12345/jane`), if known.
    pub fn principal(&self) -> Option<String> {
        match self {
            Self::Basic {
                tenant, username, ..
            } => Some(if tenant.is_empty() {
                username.clone()
            } else {
                format!("{tenant}/{username}")
            }),
            Self::Bearer { .. } => None,
        }
    }

    /// The tenant id, if these are basic credentials with a tenant.
    pub fn tenant(&self) -> Option<&str> {
        match self {
            Self::Basic { tenant, .. } if !tenant.is_empty() => Some(tenant),
            _ => None,
        }
    }

    /// Attach the `Authorization` header to a request.
    pub(crate) fn apply(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::Basic { password, .. } => builder.basic_auth(
                self.principal().unwrap_or_default(),
                Some(password.expose_secret()),
            ),
            Self::Bearer { token } => builder.bearer_auth(token.expose_secret()),
        }
    }
}
