// Stateful fake appliance for integration tests.
//
// Keeps record and config state between requests so that tests observe
// the effect of a mutation through a later read, the way they would
// against a real Pi-hole.

#![allow(dead_code, clippy::unwrap_used)]

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use pihole_api::{ClientConfig, PiholeClient, TransportConfig};
use secrecy::SecretString;

pub const PASSWORD: &str = "correct horse battery staple";
pub const SID: &str = "fake-sid-0001";
pub const CSRF: &str = "fake-csrf-0001";

#[derive(Debug, Default)]
pub struct FakeState {
    pub hosts: Vec<String>,
    pub cnames: Vec<String>,
    pub webserver: Value,
    /// Mutations in arrival order, e.g. `PUT hosts 10.0.0.5 a.example.com`.
    pub log: Vec<String>,
    pub logins: usize,
    pub logouts: usize,
}

#[derive(Clone, Default)]
pub struct FakePihole {
    state: Arc<Mutex<FakeState>>,
    login_delay: Duration,
}

impl FakePihole {
    pub fn new() -> Self {
        let fake = Self::default();
        fake.state().webserver = json!({
            "domain": "pi.hole",
            "port": "80o,443os,[::]:80o,[::]:443os",
            "api": { "app_sudo": false, "max_sessions": 16, "pwhash": "$BALLOON$" }
        });
        fake
    }

    pub fn with_login_delay(mut self, delay: Duration) -> Self {
        self.login_delay = delay;
        self
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub async fn mount(&self, server: &MockServer) {
        Mock::given(any())
            .respond_with(self.clone())
            .mount(server)
            .await;
    }

    fn login(&self, request: &Request) -> ResponseTemplate {
        self.state().logins += 1;
        let body: Value = serde_json::from_slice(&request.body).unwrap_or_default();
        if body["password"] != PASSWORD {
            return ResponseTemplate::new(401).set_body_json(json!({
                "session": { "valid": false, "message": "password incorrect" }
            }));
        }
        ResponseTemplate::new(200)
            .set_body_json(json!({
                "session": {
                    "valid": true,
                    "totp": false,
                    "sid": SID,
                    "csrf": CSRF,
                    "validity": 1800,
                    "message": "password correct"
                },
                "took": 0.01
            }))
            .set_delay(self.login_delay)
    }

    fn records(&self, method: &str, collection: &str, key: Option<String>) -> ResponseTemplate {
        let mut state = self.state();
        let state = &mut *state;
        let (list, log) = match collection {
            "hosts" => (&mut state.hosts, &mut state.log),
            "cnameRecords" => (&mut state.cnames, &mut state.log),
            _ => return ResponseTemplate::new(404),
        };

        match (method, key) {
            ("GET", None) => {
                let mut dns = serde_json::Map::new();
                dns.insert(collection.to_owned(), json!(list));
                ResponseTemplate::new(200).set_body_json(json!({
                    "config": { "dns": dns },
                    "took": 0.001
                }))
            }
            ("PUT", Some(key)) => {
                log.push(format!("PUT {collection} {key}"));
                if list.contains(&key) {
                    return ResponseTemplate::new(400)
                        .set_body_json(json!({ "error": { "message": "Item already present" } }));
                }
                list.push(key);
                ResponseTemplate::new(201)
            }
            ("DELETE", Some(key)) => {
                log.push(format!("DELETE {collection} {key}"));
                let before = list.len();
                list.retain(|line| *line != key);
                if list.len() == before {
                    ResponseTemplate::new(404)
                } else {
                    ResponseTemplate::new(204)
                }
            }
            _ => ResponseTemplate::new(405),
        }
    }

    fn webserver(&self, method: &str, request: &Request) -> ResponseTemplate {
        let mut state = self.state();
        match method {
            "GET" => ResponseTemplate::new(200).set_body_json(json!({
                "config": { "webserver": state.webserver.clone() },
                "took": 0.002
            })),
            "PUT" => {
                let Ok(body) = serde_json::from_slice::<Value>(&request.body) else {
                    return ResponseTemplate::new(400);
                };
                state.log.push("PUT webserver".to_owned());
                state.webserver = body;
                ResponseTemplate::new(200)
            }
            _ => ResponseTemplate::new(405),
        }
    }
}

impl Respond for FakePihole {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let method = request.method.as_str().to_owned();
        let segments: Vec<String> = request
            .url
            .path_segments()
            .map(|s| s.map(decode_segment).collect())
            .unwrap_or_default();
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

        if segments == ["api", "auth"] {
            return match method.as_str() {
                "POST" => self.login(request),
                "DELETE" => {
                    self.state().logouts += 1;
                    ResponseTemplate::new(204)
                }
                _ => ResponseTemplate::new(405),
            };
        }

        let authorized = request
            .headers
            .get("X-FTL-SID")
            .and_then(|v| v.to_str().ok())
            == Some(SID);
        if !authorized {
            return ResponseTemplate::new(401)
                .set_body_json(json!({ "error": { "key": "unauthorized" } }));
        }

        match segments.as_slice() {
            ["api", "config", "dns", collection] => self.records(&method, collection, None),
            ["api", "config", "dns", collection, key] => {
                self.records(&method, collection, Some((*key).to_owned()))
            }
            ["api", "config", "webserver"] => self.webserver(&method, request),
            _ => ResponseTemplate::new(404),
        }
    }
}

fn decode_segment(raw: &str) -> String {
    url::form_urlencoded::parse(raw.as_bytes())
        .map(|(k, v)| if v.is_empty() { k.into_owned() } else { format!("{k}={v}") })
        .collect()
}

/// Config with no pacing and a short backoff.
pub fn fast_config() -> ClientConfig {
    ClientConfig {
        max_connections: 1,
        request_delay: Duration::ZERO,
        retry_attempts: 3,
        retry_backoff_base: Duration::from_millis(10),
        transport: TransportConfig::default(),
    }
}

pub fn password() -> SecretString {
    SecretString::from(PASSWORD)
}

pub fn base_url(server: &MockServer) -> Url {
    Url::parse(&server.uri()).unwrap()
}

/// Fake appliance plus a client already logged in to it.
pub async fn connected() -> (MockServer, FakePihole, PiholeClient) {
    let server = MockServer::start().await;
    let fake = FakePihole::new();
    fake.mount(&server).await;
    let client = PiholeClient::connect(base_url(&server), &password(), fast_config())
        .await
        .unwrap();
    (server, fake, client)
}
