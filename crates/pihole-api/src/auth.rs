// Session authentication
//
// `POST /api/auth` exchanges the admin password for a session id and a
// CSRF token. Both are attached as headers to every later request.
// Transient failures are retried; a rejected password or a 429 never is.

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;

use crate::client::PiholeClient;
use crate::error::Error;
use crate::transport::ClientConfig;

/// Header carrying the session identifier.
pub const SID_HEADER: &str = "X-FTL-SID";
/// Header carrying the anti-forgery token.
pub const CSRF_HEADER: &str = "X-FTL-CSRF";

// ── Wire shapes ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct AuthResponse {
    session: AuthSession,
}

#[derive(Deserialize)]
struct AuthSession {
    valid: bool,
    #[serde(default)]
    sid: Option<String>,
    #[serde(default)]
    csrf: Option<String>,
    #[serde(default)]
    validity: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

// ── Session ──────────────────────────────────────────────────────────

/// An authenticated session: session id + anti-forgery token.
///
/// Only built from a login the appliance reported valid. Never mutated
/// after creation; re-authentication swaps in a new one.
#[derive(Debug)]
pub struct Session {
    sid: SecretString,
    csrf: SecretString,
    /// Seconds the appliance promised the session stays alive, if reported.
    validity: Option<i64>,
    headers: HeaderMap,
}

impl Session {
    /// Build a session from raw tokens. An empty session id is rejected.
    pub fn new(sid: String, csrf: String, validity: Option<i64>) -> Result<Self, Error> {
        if sid.is_empty() {
            return Err(Error::Authentication {
                message: "appliance returned no session id".into(),
            });
        }

        let mut headers = HeaderMap::new();
        headers.insert(SID_HEADER, sensitive_header(&sid)?);
        if !csrf.is_empty() {
            headers.insert(CSRF_HEADER, sensitive_header(&csrf)?);
        }

        Ok(Self {
            sid: SecretString::from(sid),
            csrf: SecretString::from(csrf),
            validity,
            headers,
        })
    }

    pub fn sid(&self) -> &SecretString {
        &self.sid
    }

    pub fn csrf(&self) -> &SecretString {
        &self.csrf
    }

    pub fn validity_secs(&self) -> Option<i64> {
        self.validity
    }

    pub(crate) fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

fn sensitive_header(token: &str) -> Result<HeaderValue, Error> {
    let mut value = HeaderValue::from_str(token).map_err(|e| Error::Authentication {
        message: format!("session token is not a valid header value: {e}"),
    })?;
    value.set_sensitive(true);
    Ok(value)
}

/// Login failures worth another attempt: flaky network, a struggling
/// appliance (5xx), or a response body that did not arrive intact.
fn is_retryable_login_error(err: &Error) -> bool {
    match err {
        Error::Api { status, .. } => *status >= 500,
        Error::Deserialization { .. } => true,
        other => other.is_transient(),
    }
}

impl PiholeClient {
    /// Build a client and authenticate it before returning.
    pub async fn connect(
        base_url: Url,
        password: &SecretString,
        config: ClientConfig,
    ) -> Result<Self, Error> {
        let client = Self::new(base_url, config)?;
        client.authenticate(password).await?;
        Ok(client)
    }

    /// Authenticate with the appliance password.
    ///
    /// On success the session id and CSRF token are stored on the client
    /// and used for every later request. Invalid credentials and rate
    /// limiting surface immediately; transient failures are retried up to
    /// the configured budget with quadratic backoff.
    pub async fn authenticate(&self, password: &SecretString) -> Result<(), Error> {
        if self.cancel().is_cancelled() {
            return Err(Error::Closed);
        }
        let url = self.api_url("auth")?;
        let body = json!({ "password": password.expose_secret() });

        debug!("authenticating at {}", url);

        let session = self
            .retry_policy()
            .run(self.cancel(), is_retryable_login_error, |_| {
                self.login_once(url.clone(), &body)
            })
            .await?;

        self.store_session(session);
        info!(base_url = %self.base_url(), "authenticated");
        Ok(())
    }

    async fn login_once(&self, url: Url, body: &serde_json::Value) -> Result<Session, Error> {
        let resp = self.dispatch(self.http().post(url).json(body)).await?;
        let status = resp.status();
        let text = resp.text().await.map_err(Error::Transport)?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication {
                message: format!("credential rejected (HTTP 401): {text}"),
            });
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited { message: text });
        }
        if !status.is_success() {
            return Err(Error::Api {
                operation: "authenticate".into(),
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: AuthResponse =
            serde_json::from_str(&text).map_err(|e| Error::Deserialization {
                message: format!("unexpected auth response: {e}"),
                body: text.clone(),
            })?;

        let session = parsed.session;
        if !session.valid {
            return Err(Error::Authentication {
                message: session
                    .message
                    .unwrap_or_else(|| "session reported invalid".into()),
            });
        }

        Session::new(
            session.sid.unwrap_or_default(),
            session.csrf.unwrap_or_default(),
            session.validity,
        )
    }

    /// End the session on the appliance (best effort), then [`close`](Self::close).
    ///
    /// `DELETE /api/auth`. Failures are logged and otherwise ignored.
    pub async fn logout(&self) {
        if let Some(session) = self.session() {
            if let Ok(url) = self.api_url("auth") {
                debug!("logging out at {}", url);
                let request = self.http().delete(url).headers(session.headers().clone());
                match self.dispatch(request).await {
                    Ok(resp) if resp.status().is_success() => debug!("logout complete"),
                    Ok(resp) => debug!(status = %resp.status(), "logout not acknowledged"),
                    Err(e) => warn!(error = %e, "logout failed (non-fatal)"),
                }
            }
        }
        self.close();
    }
}
