#![allow(clippy::unwrap_used)]
// Integration tests for request pacing: the connection ceiling and the
// cancellable inter-request delay.

mod common;

use std::time::{Duration, Instant};

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pihole_api::{ClientConfig, Error, PiholeClient};

use common::{CSRF, SID, base_url, fast_config, password};

const SLOW: Duration = Duration::from_millis(200);

async fn slow_appliance() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "session": { "valid": true, "sid": SID, "csrf": CSRF }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/config/dns/hosts"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "config": { "dns": { "hosts": [] } } }))
                .set_delay(SLOW),
        )
        .expect(2)
        .mount(&server)
        .await;
    server
}

// ── Connection ceiling ──────────────────────────────────────────────

#[tokio::test]
async fn test_requests_beyond_ceiling_wait_for_a_permit() {
    let server = slow_appliance().await;
    let config = ClientConfig {
        max_connections: 1,
        ..fast_config()
    };
    let client = PiholeClient::connect(base_url(&server), &password(), config)
        .await
        .unwrap();

    let started = Instant::now();
    let (hosts_a, hosts_b) = (client.hosts(), client.hosts());
    let (first, second) = tokio::join!(hosts_a.list(), hosts_b.list());
    let elapsed = started.elapsed();

    first.unwrap();
    second.unwrap();
    // Two slow responses served one after the other.
    assert!(elapsed >= SLOW * 2, "elapsed: {elapsed:?}");
}

// ── Throttle ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_cancelling_token_interrupts_request_delay() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "session": { "valid": true, "sid": SID, "csrf": CSRF }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/config/dns/hosts"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = ClientConfig {
        request_delay: Duration::from_secs(3600),
        ..fast_config()
    };
    let client = PiholeClient::connect(base_url(&server), &password(), config)
        .await
        .unwrap();
    let token = client.cancellation_token();

    let started = Instant::now();
    let hosts = client.hosts();
    let (result, ()) = tokio::join!(hosts.upsert("a.example.com", "10.0.0.5"), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    assert!(matches!(result, Err(Error::Cancelled)), "got: {result:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
    let later = client.hosts().list().await;
    assert!(matches!(later, Err(Error::Closed)), "got: {later:?}");
}
