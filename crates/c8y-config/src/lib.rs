//! Shared configuration for Cumulocity tools.
//!
//! TOML profiles, a `[listener]` table, credential resolution (env +
//! plaintext) and translation to `c8y_api` types. Layering: built-in
//! defaults, then the config file, then `C8Y_*` environment variables
//! (`C8Y_LISTENER__MAX_RETRIES=10` sets `listener.max_retries`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use c8y_api::notification2::{AckMode, ListenerConfig};
use c8y_api::{Credentials, RestClient, TlsMode, TransportConfig};

const ENV_PREFIX: &str = "C8Y_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("unknown profile '{profile}'")]
    UnknownProfile { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Client(#[from] c8y_api::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named.
    pub default_profile: Option<String>,

    /// Listener behaviour shared by all profiles.
    #[serde(default)]
    pub listener: ListenerSettings,

    /// Named tenant profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            listener: ListenerSettings::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Select a profile by name, falling back to `default_profile`.
    pub fn profile<'a>(&'a self, name: Option<&'a str>) -> Result<(&'a str, &'a Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get(name)
            .map(|profile| (name, profile))
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.into(),
            })
    }
}

/// `[listener]` table; durations are plain integers so env vars can set them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerSettings {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub connect_timeout_secs: u64,
    /// `manual` or `auto`.
    pub ack_mode: String,
    pub ack_on_handler_error: bool,
    pub queue_capacity: usize,
    pub max_protocol_errors: u32,
    pub token_validity_minutes: u32,
    pub non_persistent: bool,
    pub unsubscribe_on_stop: bool,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        let defaults = ListenerConfig::default();
        Self {
            max_retries: defaults.max_retries,
            backoff_base_ms: millis(defaults.backoff_base),
            backoff_max_ms: millis(defaults.backoff_max),
            connect_timeout_secs: defaults.connect_timeout.as_secs(),
            ack_mode: defaults.ack_mode.to_string(),
            ack_on_handler_error: defaults.ack_on_handler_error,
            queue_capacity: defaults.queue_capacity,
            max_protocol_errors: defaults.max_protocol_errors,
            token_validity_minutes: defaults.token_validity_minutes,
            non_persistent: defaults.non_persistent,
            unsubscribe_on_stop: defaults.unsubscribe_on_stop,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl ListenerSettings {
    /// Validate and convert to the listener's runtime config.
    pub fn to_listener_config(&self) -> Result<ListenerConfig, ConfigError> {
        let ack_mode: AckMode = self.ack_mode.parse().map_err(|_| ConfigError::Validation {
            field: "listener.ack_mode".into(),
            reason: format!("expected 'manual' or 'auto', got '{}'", self.ack_mode),
        })?;
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(ConfigError::Validation {
                field: "listener.backoff_max_ms".into(),
                reason: format!(
                    "must be at least backoff_base_ms ({}), got {}",
                    self.backoff_base_ms, self.backoff_max_ms
                ),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Validation {
                field: "listener.queue_capacity".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(ListenerConfig {
            max_retries: self.max_retries,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            ack_mode,
            ack_on_handler_error: self.ack_on_handler_error,
            queue_capacity: self.queue_capacity,
            max_protocol_errors: self.max_protocol_errors,
            token_validity_minutes: self.token_validity_minutes,
            non_persistent: self.non_persistent,
            unsubscribe_on_stop: self.unsubscribe_on_stop,
        })
    }
}

/// A named tenant profile.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Tenant base URL (e.g., "https://t12345.eu-latest.cumulocity.com").
    pub base_url: String,

    /// Tenant id, e.g. "t12345". Required for basic auth.
    pub tenant: Option<String>,

    pub username: Option<String>,

    /// Password (plaintext; prefer `password_env`).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// Bearer token (plaintext; prefer `token_env`).
    pub token: Option<String>,

    /// Environment variable name containing a bearer token.
    pub token_env: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Accept invalid certificates.
    pub insecure: Option<bool>,

    /// Request timeout in seconds.
    pub timeout: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "cumulocity", "c8y-listen").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("c8y-listen");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load config from `path` + environment. A missing file is not an error.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if it cannot be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

/// Serialize config to TOML at `path`, creating parent directories.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve credentials from the profile and the process environment.
///
/// Order: bearer token (`token_env`, then `token`), then basic auth with
/// the password from `password_env`, `C8Y_PASSWORD`, then `password`.
pub fn resolve_credentials(profile: &Profile, profile_name: &str) -> Result<Credentials, ConfigError> {
    resolve_credentials_with(profile, profile_name, |name| std::env::var(name).ok())
}

/// [`resolve_credentials`] with an explicit environment lookup.
pub fn resolve_credentials_with(
    profile: &Profile,
    profile_name: &str,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Credentials, ConfigError> {
    // 1. Bearer token
    let token = profile
        .token_env
        .as_deref()
        .and_then(&env)
        .or_else(|| profile.token.clone());
    if let Some(token) = token {
        return Ok(Credentials::bearer(SecretString::from(token)));
    }

    // 2. Basic auth
    let Some(ref username) = profile.username else {
        return Err(ConfigError::NoCredentials {
            profile: profile_name.into(),
        });
    };
    let password = profile
        .password_env
        .as_deref()
        .and_then(&env)
        .or_else(|| env("C8Y_PASSWORD"))
        .or_else(|| profile.password.clone())
        .ok_or_else(|| ConfigError::NoCredentials {
            profile: profile_name.into(),
        })?;
    let tenant = profile.tenant.clone().ok_or_else(|| ConfigError::Validation {
        field: "tenant".into(),
        reason: format!("profile '{profile_name}' uses basic auth but has no tenant"),
    })?;

    Ok(Credentials::basic(
        tenant,
        username.clone(),
        SecretString::from(password),
    ))
}

/// Transport settings for a profile.
pub fn profile_transport(profile: &Profile) -> TransportConfig {
    let tls = if profile.insecure.unwrap_or(false) {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };

    TransportConfig {
        tls,
        timeout: Duration::from_secs(profile.timeout.unwrap_or(30)),
    }
}

/// Build a `RestClient` from a profile.
pub fn profile_to_rest_client(profile: &Profile, profile_name: &str) -> Result<RestClient, ConfigError> {
    let url: url::Url = profile.base_url.parse().map_err(|_| ConfigError::Validation {
        field: "base_url".into(),
        reason: format!("invalid URL: {}", profile.base_url),
    })?;
    let credentials = resolve_credentials(profile, profile_name)?;
    Ok(RestClient::new(url, credentials, &profile_transport(profile))?)
}
