//! Shared configuration for Pi-hole tools.
//!
//! TOML profiles, password resolution (env + keyring + plaintext),
//! translation to `pihole_api::ClientConfig`, and tracing setup.

pub mod logging;

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
use tracing::debug;
use url::Url;

use pihole_api::{ClientConfig, TlsMode, TransportConfig};

pub use logging::{LogFormat, init_tracing, init_tracing_with};

const APP_NAME: &str = "piholectl";

/// Keyring service under which passwords are stored as `{profile}/password`.
pub const KEYRING_SERVICE: &str = APP_NAME;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value was present but unusable.
    #[error("{field} is invalid: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{profile}' has no password (set password_env, a keyring entry, or password)")]
    NoCredentials { profile: String },

    #[error("could not encode config as TOML: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("could not load config: {0}")]
    Figment(Box<figment::Error>),

    #[error("config file I/O failed: {0}")]
    Io(#[from] std::io::Error),
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

    #[serde(default)]
    pub defaults: Defaults,

    /// Named appliance profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up `name`, or the default profile when `name` is `None`.
    pub fn profile<'a>(&'a self, name: Option<&'a str>) -> Result<(&'a str, &'a Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .ok_or_else(|| ConfigError::Validation {
                field: "default_profile".into(),
                reason: "no profile named and no default configured".into(),
            })?;
        let profile = self
            .profiles
            .get(name)
            .ok_or_else(|| ConfigError::Validation {
                field: "profile".into(),
                reason: format!("unknown profile '{name}'"),
            })?;
        Ok((name, profile))
    }
}

/// Client tuning applied to every profile unless overridden.
#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_backoff_base_ms")]
    pub retry_backoff_base_ms: u64,

    #[serde(default)]
    pub insecure: bool,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            request_delay_ms: default_request_delay_ms(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_base_ms: default_retry_backoff_base_ms(),
            insecure: false,
            timeout: default_timeout(),
        }
    }
}

fn default_max_connections() -> usize {
    1
}
fn default_request_delay_ms() -> u64 {
    300
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_backoff_base_ms() -> u64 {
    500
}
fn default_timeout() -> u64 {
    60
}

/// A named appliance profile.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Appliance base URL (e.g., "https://pi.hole").
    pub url: String,

    /// Admin password in plaintext. Prefer the keyring or `password_env`.
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    // Per-profile overrides of `[defaults]`.
    pub insecure: Option<bool>,
    pub timeout: Option<u64>,
    pub max_connections: Option<usize>,
    pub request_delay_ms: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub retry_backoff_base_ms: Option<u64>,
}

impl Profile {
    /// Parse and validate the profile's base URL.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let url: Url = self.url.parse().map_err(|e| ConfigError::Validation {
            field: "url".into(),
            reason: format!("invalid URL '{}': {e}", self.url),
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigError::Validation {
                field: "url".into(),
                reason: format!("unsupported scheme '{other}'"),
            }),
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Platform config file location, e.g. `~/.config/piholectl/config.toml`.
///
/// Falls back to `$HOME/.config/piholectl` when no home directory can be
/// determined by `directories`.
pub fn config_path() -> PathBuf {
    let dir = match ProjectDirs::from("", "", APP_NAME) {
        Some(dirs) => dirs.config_dir().to_path_buf(),
        None => std::env::var_os("HOME")
            .map_or_else(|| PathBuf::from("."), PathBuf::from)
            .join(".config")
            .join(APP_NAME),
    };
    dir.join("config.toml")
}

// ── Config loading ──────────────────────────────────────────────────

/// Load [`config_path`] plus environment overrides.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load Config from `path`, then apply `PIHOLE_` environment overrides.
///
/// Nested keys use a double underscore: `PIHOLE_DEFAULTS__TIMEOUT=10`.
/// A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("PIHOLE_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// [`load_config`], or the built-in defaults if it fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Write `cfg` to [`config_path`].
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(&config_path(), cfg)
}

/// Write `cfg` to `path`, creating parent directories as needed.
pub fn save_config_to(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    let rendered = toml::to_string_pretty(cfg)?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, rendered)?;
    debug!(path = %path.display(), "config saved");
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve a profile's admin password.
///
/// Order: the variable named by `password_env`, the system keyring
/// (`piholectl` / `{profile_name}/password`), then plaintext `password`.
pub fn resolve_password(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    if let Some(ref env_name) = profile.password_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
        debug!(env = %env_name, "password variable not set");
    }

    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/password")) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    if let Some(ref pw) = profile.password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

// ── Client config ───────────────────────────────────────────────────

/// Build the API client tuning for a profile, applying its overrides on
/// top of `defaults`.
///
/// `insecure` wins over `ca_cert`; with neither, the system trust store
/// is used.
pub fn profile_to_client_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<ClientConfig, ConfigError> {
    let max_connections = profile.max_connections.unwrap_or(defaults.max_connections);
    if max_connections == 0 {
        return Err(ConfigError::Validation {
            field: "max_connections".into(),
            reason: "must be at least 1".into(),
        });
    }

    let timeout = profile.timeout.unwrap_or(defaults.timeout);
    if timeout == 0 {
        return Err(ConfigError::Validation {
            field: "timeout".into(),
            reason: "must be at least 1 second".into(),
        });
    }

    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };

    Ok(ClientConfig {
        max_connections,
        request_delay: Duration::from_millis(
            profile.request_delay_ms.unwrap_or(defaults.request_delay_ms),
        ),
        retry_attempts: profile.retry_attempts.unwrap_or(defaults.retry_attempts),
        retry_backoff_base: Duration::from_millis(
            profile
                .retry_backoff_base_ms
                .unwrap_or(defaults.retry_backoff_base_ms),
        ),
        transport: TransportConfig {
            tls,
            timeout: Duration::from_secs(timeout),
        },
    })
}
