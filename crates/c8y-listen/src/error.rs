//! CLI error types with miette diagnostics.
//!
//! Maps `c8y_api::Error` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use c8y_config::ConfigError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in {path}")]
    #[diagnostic(
        code(c8y::profile_not_found),
        help(
            "Add a [profiles.{name}] table with base_url and credentials,\n\
             or pick another profile with --profile."
        )
    )]
    ProfileNotFound { name: String, path: String },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(c8y::no_credentials),
        help("Set token/token_env, or tenant + username + password_env in the profile.")
    )]
    NoCredentials { profile: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(c8y::validation))]
    Validation { field: String, reason: String },

    #[error("Could not load configuration")]
    #[diagnostic(code(c8y::config))]
    Config(#[source] ConfigError),

    // ── Platform ─────────────────────────────────────────────────────

    #[error("Authentication failed for profile '{profile}'")]
    #[diagnostic(
        code(c8y::auth_failed),
        help("Check the credentials and that the user has the ROLE_NOTIFICATION_2_ADMIN role.")
    )]
    AuthFailed {
        profile: String,
        #[source]
        source: c8y_api::Error,
    },

    #[error("Subscription '{name}' not found")]
    #[diagnostic(
        code(c8y::subscription_not_found),
        help("Create it first, or rerun with --create (and --source for device subscriptions).")
    )]
    SubscriptionNotFound {
        name: String,
        #[source]
        source: c8y_api::Error,
    },

    #[error("Gave up reconnecting after {attempts} attempts")]
    #[diagnostic(
        code(c8y::connection_lost),
        help("Raise listener.max_retries or --max-retries to keep trying longer.")
    )]
    ConnectionLost {
        attempts: u32,
        #[source]
        source: Box<c8y_api::Error>,
    },

    #[error(transparent)]
    #[diagnostic(code(c8y::api))]
    Api(c8y_api::Error),

    #[error("Could not write to stdout")]
    #[diagnostic(code(c8y::io))]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ProfileNotFound { .. }
            | Self::NoCredentials { .. }
            | Self::Validation { .. }
            | Self::Config(_) => exit_code::USAGE,
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::SubscriptionNotFound { .. } => exit_code::NOT_FOUND,
            Self::ConnectionLost { .. } => exit_code::CONNECTION,
            Self::Api(c8y_api::Error::Timeout { .. }) => exit_code::TIMEOUT,
            Self::Api(_) | Self::Io(_) => exit_code::GENERAL,
        }
    }

    /// Classify a listener or REST failure for `profile` / `subscription`.
    pub fn from_api(err: c8y_api::Error, profile: &str, subscription: &str) -> Self {
        match err {
            c8y_api::Error::RetriesExhausted { attempts, last } => Self::ConnectionLost {
                attempts,
                source: last,
            },
            err if err.is_auth() => Self::AuthFailed {
                profile: profile.into(),
                source: err,
            },
            err if err.is_not_found() => Self::SubscriptionNotFound {
                name: subscription.into(),
                source: err,
            },
            err => Self::Api(err),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::UnknownProfile { profile } => Self::ProfileNotFound {
                name: profile,
                path: c8y_config::config_path().display().to_string(),
            },
            ConfigError::NoCredentials { profile } => Self::NoCredentials { profile },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::Client(err) => Self::Api(err),
            other => Self::Config(other),
        }
    }
}
