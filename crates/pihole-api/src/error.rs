use std::error::Error as _;

use thiserror::Error;

use crate::records::UpdateState;

/// Top-level error type for the `pihole-api` crate.
///
/// Covers every failure mode of the client layer: authentication,
/// transport, application-level API errors, and configuration path
/// navigation. Each variant carries enough context (operation, key,
/// status, body) for the caller to log it meaningfully.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The appliance rejected the credential or reported an invalid session.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The appliance answered the login with HTTP 429.
    #[error("Rate limited by the appliance: {message}")]
    RateLimited { message: String },

    /// An authenticated request was attempted without a session token.
    #[error("No active session -- authenticate before issuing requests")]
    NotAuthenticated,

    /// The client was closed and releases no further requests.
    #[error("Client has been closed")]
    Closed,

    /// A backoff or throttle delay was interrupted by cancellation.
    #[error("Operation cancelled")]
    Cancelled,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, reset, timeout, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── API ─────────────────────────────────────────────────────────
    /// Any non-2xx response outside of authentication.
    #[error("{operation} failed (HTTP {status}): {body}")]
    Api {
        operation: String,
        status: u16,
        body: String,
    },

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Configuration ───────────────────────────────────────────────
    /// A dotted configuration key could not be navigated.
    #[error("Configuration key '{key}': {reason}")]
    ConfigPath { key: String, reason: String },

    /// The top-level configuration namespace is not handled by this client.
    #[error("Configuration section '{section}' is not supported")]
    UnsupportedSection { section: String },

    // ── Reconciliation ──────────────────────────────────────────────
    /// An update removed the old record but failed before re-creating it.
    #[error("Update of '{domain}' stopped at {state:?}: {source}")]
    PartialUpdate {
        domain: String,
        state: UpdateState,
        #[source]
        source: Box<Error>,
    },
}

/// Fragments of transport error text that mark a failure as transient.
const TRANSIENT_MARKERS: &[&str] = &[
    "connection refused",
    "connection reset",
    "timed out",
    "timeout",
    "unexpected eof",
    "eof while",
    "end of file",
    "connection closed before message completed",
];

impl Error {
    /// Returns `true` if this is a transient transport failure worth retrying.
    ///
    /// Only transport-level errors qualify. HTTP status codes are never
    /// transient at this layer.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || is_transient_message(&error_chain(e)),
            Self::PartialUpdate { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Returns `true` if the session is gone and a new client is required.
    ///
    /// A rejected login is not an expired session.
    pub fn is_auth_expired(&self) -> bool {
        match self {
            Self::NotAuthenticated => true,
            Self::Api { status, .. } => matches!(status, 401 | 403),
            _ => false,
        }
    }

    /// HTTP status code associated with this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            Self::PartialUpdate { source, .. } => source.status(),
            _ => None,
        }
    }
}

/// Classify raw transport error text.
pub(crate) fn is_transient_message(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Flatten an error and its sources into one string. `reqwest` keeps the
/// interesting part (e.g. "Connection refused") several levels down.
fn error_chain(err: &reqwest::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text
}
