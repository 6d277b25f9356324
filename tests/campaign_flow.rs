//! HTTP-level integration tests for the control plane, grounded on the
//! teacher's own integration-test style in
//! `examples/remails-com-remails/src/test.rs`: bind a real server on a random
//! port, drive it with `reqwest`. None of these exercise a real SMTP
//! connection; they stay within the validation/admission/status surface that
//! doesn't require a reachable relay to observe.

use std::sync::Arc;
use std::time::Duration;

use campaign_engine::{Config, build};
use rand::Rng;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

fn random_port() -> u16 {
    rand::rng().random_range(20_000..40_000)
}

async fn spawn_test_server() -> (String, CancellationToken, tokio::task::JoinHandle<()>) {
    let port = random_port();
    let config = Arc::new(Config {
        port,
        environment: campaign_engine::Environment::Development,
        max_concurrent_campaigns: 3,
    });
    let shutdown = CancellationToken::new();
    let server = build(config, shutdown.clone()).await;
    let handle = server.spawn();

    // give the listener a moment to bind before the first request
    tokio::time::sleep(Duration::from_millis(100)).await;

    (format!("http://127.0.0.1:{port}"), shutdown, handle)
}

fn relay_payload() -> Value {
    json!({
        "host": "203.0.113.10",
        "port": 587,
        "user": "marketing@example.com",
        "secret": "s3cret",
    })
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let (base, shutdown, _handle) = spawn_test_server().await;

    let response = reqwest::get(format!("{base}/api/health")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "ok");

    shutdown.cancel();
}

#[tokio::test]
async fn root_endpoint_describes_service() {
    let (base, shutdown, _handle) = spawn_test_server().await;

    let response = reqwest::get(&base).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["name"], "campaign-engine");

    shutdown.cancel();
}

#[tokio::test]
async fn unknown_path_returns_404() {
    let (base, shutdown, _handle) = spawn_test_server().await;

    let response = reqwest::get(format!("{base}/api/does-not-exist")).await.unwrap();
    assert_eq!(response.status(), 404);

    shutdown.cancel();
}

#[tokio::test]
async fn smtp_test_rejects_missing_fields() {
    let (base, shutdown, _handle) = spawn_test_server().await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/api/smtp/test"))
        .json(&json!({ "host": "", "user": "", "secret": "" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(!body["details"].as_array().unwrap().is_empty());

    shutdown.cancel();
}

#[tokio::test]
async fn campaign_start_rejects_malformed_recipient_and_creates_nothing() {
    let (base, shutdown, _handle) = spawn_test_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/api/campaign/start"))
        .json(&json!({
            "smtpServer": relay_payload(),
            "recipients": ["bad-email", "ok@x.io"],
            "subject": "Hello",
            "content": "World",
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);

    let stats = client
        .get(format!("{base}/api/stats"))
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap();
    assert_eq!(stats["total_campaigns"], 0);

    shutdown.cancel();
}

#[tokio::test]
async fn campaign_lifecycle_admit_status_rotation_stop() {
    let (base, shutdown, _handle) = spawn_test_server().await;
    let client = reqwest::Client::new();

    let start_response = client
        .post(format!("{base}/api/campaign/start"))
        .json(&json!({
            "smtpServer": relay_payload(),
            "recipients": ["alice@example.com"],
            "subject": "Hello {{name}}",
            "content": "Hi {{name}}",
            "delayBetweenEmails": 0,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(start_response.status(), 200);
    let start_body: Value = start_response.json().await.unwrap();
    assert_eq!(start_body["success"], true);
    let campaign_id = start_body["campaignId"].as_str().unwrap().to_string();
    assert!(campaign_id.starts_with("campaign_"));

    let status_body: Value = client
        .get(format!("{base}/api/campaign/{campaign_id}/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status_body["success"], true);
    assert_eq!(status_body["id"], campaign_id);
    assert_eq!(status_body["total_recipients"], 1);
    assert!(matches!(
        status_body["status"].as_str().unwrap(),
        "pending" | "running"
    ));

    let rotation_body: Value = client
        .get(format!("{base}/api/campaign/{campaign_id}/smtp-rotation"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let relays = rotation_body["relays"].as_array().unwrap();
    assert_eq!(relays.len(), 1);
    assert_eq!(relays[0]["active"], true);

    let stop_body: Value = client
        .post(format!("{base}/api/campaign/{campaign_id}/stop"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stop_body["success"], true);
    assert_eq!(stop_body["stopped"], true);

    shutdown.cancel();
}

#[tokio::test]
async fn status_for_unknown_campaign_is_404() {
    let (base, shutdown, _handle) = spawn_test_server().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base}/api/campaign/does-not-exist/status"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let stop_response = client
        .post(format!("{base}/api/campaign/does-not-exist/stop"))
        .send()
        .await
        .unwrap();
    assert_eq!(stop_response.status(), 404);

    shutdown.cancel();
}

#[tokio::test]
async fn fourth_concurrent_campaign_is_rejected() {
    let (base, shutdown, _handle) = spawn_test_server().await;
    let client = reqwest::Client::new();

    let submission = |n: usize| {
        json!({
            "smtpServer": relay_payload(),
            "recipients": [format!("user{n}@example.com")],
            "subject": "Hello",
            "content": "World",
            "delayBetweenEmails": 0,
        })
    };

    for n in 0..3 {
        let response = client
            .post(format!("{base}/api/campaign/start"))
            .json(&submission(n))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200, "campaign {n} should be admitted");
    }

    let fourth = client
        .post(format!("{base}/api/campaign/start"))
        .json(&submission(3))
        .send()
        .await
        .unwrap();
    assert_eq!(fourth.status(), 429);

    shutdown.cancel();
}
