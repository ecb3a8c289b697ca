// Transport and client tuning configuration.
//
// `TransportConfig` decides how the underlying `reqwest::Client` is built
// (TLS verification, per-request deadline). `ClientConfig` adds the
// request pacing knobs the API client applies on top of it.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};

use crate::error::Error;

const USER_AGENT: &str = concat!("pihole-api/", env!("CARGO_PKG_VERSION"));

/// TLS verification mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// Use the platform certificate store.
    #[default]
    System,
    /// Trust an additional CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (self-signed appliances).
    DangerAcceptInvalid,
}

/// Settings for building the HTTP transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub tls: TlsMode,
    /// Overall deadline for a single request.
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(60),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(USER_AGENT)
            .default_headers(headers);

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }
}

/// Tuning for one API client. Immutable once the client is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Ceiling on simultaneous in-flight requests to the appliance.
    pub max_connections: usize,
    /// Pause applied before every mutating call.
    pub request_delay: Duration,
    /// Retries after the first attempt of a request.
    pub retry_attempts: u32,
    /// Backoff unit: the delay before retry `n` is `n² × retry_backoff_base`.
    pub retry_backoff_base: Duration,
    pub transport: TransportConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_connections: 1,
            request_delay: Duration::from_millis(300),
            retry_attempts: 3,
            retry_backoff_base: Duration::from_millis(500),
            transport: TransportConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Toggle certificate verification. `true` skips it entirely.
    pub fn insecure(mut self, skip_verification: bool) -> Self {
        self.transport.tls = if skip_verification {
            TlsMode::DangerAcceptInvalid
        } else {
            TlsMode::System
        };
        self
    }
}
