// Pi-hole API HTTP client
//
// Wraps `reqwest::Client` with session header injection, the retry
// executor, a connection ceiling, and response status handling. Endpoint
// groups (auth, records, settings) are implemented as inherent methods
// in separate files to keep this module focused on transport mechanics.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use reqwest::Method;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

use crate::auth::Session;
use crate::error::Error;
use crate::retry::RetryPolicy;
use crate::transport::ClientConfig;

/// Client for one Pi-hole appliance and one authenticated session.
///
/// The session is created by [`authenticate`](Self::authenticate) and
/// replaced wholesale on re-authentication. Every request issued through
/// [`execute`](Self::execute) carries its two tokens as headers. There is
/// no automatic token refresh: once the appliance drops the session,
/// calls fail and a new client is required.
pub struct PiholeClient {
    http: reqwest::Client,
    base_url: Url,
    config: ClientConfig,
    retry: RetryPolicy,
    session: ArcSwapOption<Session>,
    /// Soft ceiling on simultaneous requests; callers over it wait here.
    connections: Semaphore,
    cancel: CancellationToken,
}

impl std::fmt::Debug for PiholeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PiholeClient")
            .field("base_url", &self.base_url.as_str())
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}

impl PiholeClient {
    /// Create an unauthenticated client.
    ///
    /// `base_url` is the appliance root (e.g. `https://pi.hole`); API
    /// paths are appended below it.
    pub fn new(base_url: Url, config: ClientConfig) -> Result<Self, Error> {
        let http = config.transport.build_client()?;
        Ok(Self::with_client(http, base_url, config))
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url, config: ClientConfig) -> Self {
        let retry = RetryPolicy::new(config.retry_attempts, config.retry_backoff_base);
        let connections = Semaphore::new(config.max_connections.max(1));
        Self {
            http,
            base_url,
            config,
            retry,
            session: ArcSwapOption::empty(),
            connections,
            cancel: CancellationToken::new(),
        }
    }

    /// The appliance base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The tuning this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The underlying HTTP client.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Token that aborts in-progress backoff and throttle delays.
    ///
    /// Cancelling it also closes the client: later calls fail with
    /// [`Error::Closed`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    // ── Session state ────────────────────────────────────────────────

    /// The current session, if authenticated.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.session.load_full()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.load().is_some()
    }

    pub(crate) fn store_session(&self, session: Session) {
        self.session.store(Some(Arc::new(session)));
    }

    /// Drop the session tokens and refuse further requests.
    ///
    /// Any task waiting in a backoff or throttle delay is woken with
    /// [`Error::Cancelled`].
    pub fn close(&self) {
        self.session.store(None);
        self.cancel.cancel();
        self.connections.close();
        debug!(base_url = %self.base_url, "client closed");
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build `{base}/api/{path}`.
    pub(crate) fn api_url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/api/{path}"))?)
    }

    /// Build `{base}/api/{path}/{segment}` with `segment` percent-encoded as
    /// a single path segment (space becomes `%20`, `,` is kept literally).
    pub(crate) fn api_url_with_segment(&self, path: &str, segment: &str) -> Result<Url, Error> {
        let mut url = self.api_url(path)?;
        url.path_segments_mut()
            .map_err(|()| Error::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .push(segment);
        Ok(url)
    }

    // ── Request execution ────────────────────────────────────────────

    /// Pause for the configured inter-request delay.
    pub(crate) async fn throttle(&self) -> Result<(), Error> {
        let delay = self.config.request_delay;
        if delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::Cancelled),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Send one request under the connection ceiling.
    pub(crate) async fn dispatch(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, Error> {
        let _permit = self.connections.acquire().await.map_err(|_| Error::Closed)?;
        builder.send().await.map_err(Error::Transport)
    }

    /// Issue an authenticated request through the retry executor.
    ///
    /// Transient transport failures are retried with quadratic backoff.
    /// HTTP status codes are returned untouched; callers decide what a
    /// non-2xx response means for their operation.
    pub async fn execute(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<reqwest::Response, Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::Closed);
        }
        let session = self.session().ok_or(Error::NotAuthenticated)?;

        self.retry
            .run(&self.cancel, Error::is_transient, |attempt| {
                debug!(attempt, "{method} {url}");
                trace!("attaching session headers");
                let mut builder = self
                    .http
                    .request(method.clone(), url.clone())
                    .headers(session.headers().clone());
                if let Some(body) = body {
                    builder = builder.json(body);
                }
                self.dispatch(builder)
            })
            .await
    }

    // ── Response helpers ─────────────────────────────────────────────

    /// Require a 2xx status, discarding the body.
    pub(crate) async fn expect_success(
        resp: reqwest::Response,
        operation: impl FnOnce() -> String,
    ) -> Result<(), Error> {
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = error_body(resp).await;
        Err(Error::Api {
            operation: operation(),
            status: status.as_u16(),
            body,
        })
    }

    /// Require a 2xx status and parse the body as JSON.
    pub(crate) async fn read_json(
        resp: reqwest::Response,
        operation: impl FnOnce() -> String,
    ) -> Result<Value, Error> {
        let status = resp.status();
        if !status.is_success() {
            let body = error_body(resp).await;
            return Err(Error::Api {
                operation: operation(),
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.text().await.map_err(Error::Transport)?;
        serde_json::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(200).collect();
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body: body.clone(),
            }
        })
    }
}

/// Body of a failed response. A body that cannot be read is reported in
/// its place.
async fn error_body(resp: reqwest::Response) -> String {
    match resp.text().await {
        Ok(body) => body,
        Err(e) => format!("<unreadable body: {e}>"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    fn client(base: &str) -> PiholeClient {
        PiholeClient::new(Url::parse(base).unwrap(), ClientConfig::default()).unwrap()
    }

    #[test]
    fn api_url_appends_below_base() {
        let c = client("https://pi.hole/");
        assert_eq!(
            c.api_url("config/dns/hosts").unwrap().as_str(),
            "https://pi.hole/api/config/dns/hosts"
        );

        let c = client("https://gateway.lan/pihole");
        assert_eq!(
            c.api_url("auth").unwrap().as_str(),
            "https://gateway.lan/pihole/api/auth"
        );
    }

    #[test]
    fn composite_key_is_one_escaped_segment() {
        let c = client("https://pi.hole");
        let url = c
            .api_url_with_segment("config/dns/hosts", "10.0.0.5 a.example.com")
            .unwrap();
        assert_eq!(
            url.path(),
            "/api/config/dns/hosts/10.0.0.5%20a.example.com"
        );

        let url = c
            .api_url_with_segment("config/dns/cnameRecords", "www.example.com,example.com")
            .unwrap();
        assert_eq!(
            url.path(),
            "/api/config/dns/cnameRecords/www.example.com,example.com"
        );
    }

    #[test]
    fn slash_inside_segment_is_escaped() {
        let c = client("https://pi.hole");
        let url = c.api_url_with_segment("config/dns/hosts", "a/b").unwrap();
        assert_eq!(url.path(), "/api/config/dns/hosts/a%2Fb");
    }

    #[tokio::test]
    async fn execute_without_session_is_refused() {
        let c = client("https://pi.hole");
        let url = c.api_url("config/dns/hosts").unwrap();
        let result = c.execute(Method::GET, url, None).await;
        assert!(matches!(result, Err(Error::NotAuthenticated)), "got: {result:?}");
    }

    #[tokio::test]
    async fn closed_client_refuses_requests() {
        let c = client("https://pi.hole");
        c.close();
        let url = c.api_url("config/dns/hosts").unwrap();
        let result = c.execute(Method::GET, url, None).await;
        assert!(matches!(result, Err(Error::Closed)), "got: {result:?}");
        assert!(!c.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_throttle() {
        let config = ClientConfig {
            request_delay: Duration::from_secs(3600),
            ..ClientConfig::default()
        };
        let c = PiholeClient::new(Url::parse("https://pi.hole").unwrap(), config).unwrap();
        let token = c.cancellation_token();
        let started = tokio::time::Instant::now();

        let (result, ()) = tokio::join!(c.throttle(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });

        assert!(matches!(result, Err(Error::Cancelled)), "got: {result:?}");
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn truncated_error_body_is_reported() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0_u8; 1024];
            let _ = socket.read(&mut request).await;
            socket
                .write_all(b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 100\r\n\r\ntruncated")
                .await
                .unwrap();
        });

        let resp = reqwest::get(format!("http://{addr}/api/config/dns/hosts"))
            .await
            .unwrap();
        let err = PiholeClient::expect_success(resp, || "list host records".into())
            .await
            .unwrap_err();

        match err {
            Error::Api { status, body, .. } => {
                assert_eq!(status, 500);
                assert!(body.starts_with("<unreadable body:"), "body: {body}");
            }
            other => panic!("expected Api error, got: {other:?}"),
        }
    }
}
