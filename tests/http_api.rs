//! Chat API over a real socket.

mod common;

use serde_json::{json, Value};
use std::sync::Arc;

use common::{harness, test_config, ScriptedGenerator};
use rag_support::server::{router, AppState};

const KEY: &str = "test-key_0123456789abcdefghijklmnop";

async fn serve() -> String {
    serve_with_generator().await.0
}

async fn serve_with_generator() -> (String, Arc<ScriptedGenerator>) {
    let mut config = test_config();
    config.api.api_key = Some(KEY.to_string());
    let h = harness(&config, vec![], vec![]).await;
    let generator = h.generator.clone();

    let app = router(AppState::new(h.pipeline, &config.api).unwrap());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), generator)
}

#[tokio::test]
async fn test_health_is_open() {
    let base = serve().await;
    let resp = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["index"]["status"], "healthy");
    assert_eq!(body["index"]["documents"], 1);
    assert!(body["index"]["chunks"].as_u64().unwrap() > 0);
    assert_eq!(body["generator"]["status"], "healthy");
    assert_eq!(body["generator"]["model"], "scripted");
}

#[tokio::test]
async fn test_health_degraded_when_generator_down() {
    let (base, generator) = serve_with_generator().await;
    generator.set_reachable(false);

    let resp = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["index"]["status"], "healthy");
    assert_eq!(body["generator"]["status"], "down");
    assert!(body["generator"]["error"]
        .as_str()
        .unwrap()
        .contains("unreachable"));
}

#[tokio::test]
async fn test_metrics_count_chat_requests() {
    let base = serve().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/v1/metrics", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    for _ in 0..2 {
        let resp = client
            .post(format!("{}/api/v1/chat/metrics-session", base))
            .header("X-API-Key", KEY)
            .json(&json!({"question": "How do I reset my password?"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    let resp = client
        .get(format!("{}/api/v1/metrics", base))
        .header("X-API-Key", KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["requests"]["requests_total"], 2);
    assert_eq!(body["requests"]["failures_total"], 0);
    assert_eq!(body["requests"]["success_rate"], 100.0);
    assert_eq!(body["active_sessions"], 1);
    assert_eq!(body["index"]["documents"], 1);
    assert_eq!(body["generator"]["status"], "healthy");
}

#[tokio::test]
async fn test_requires_api_key() {
    let base = serve().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/v1/chat/session", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unauthorized");

    let resp = client
        .post(format!("{}/api/v1/chat/session", base))
        .header("X-API-Key", "wrong-key_0123456789abcdefghijklmno")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_chat_round_trip() {
    let base = serve().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/v1/chat/session", base))
        .header("X-API-Key", KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let created: Value = resp.json().await.unwrap();
    let session_id = created["session_id"].as_str().unwrap().to_string();

    let resp = client
        .post(format!("{}/api/v1/chat/{}", base, session_id))
        .header("X-API-Key", KEY)
        .json(&json!({"question": "How do I reset my password?"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let answer: Value = resp.json().await.unwrap();
    assert_eq!(answer["session_id"], session_id.as_str());
    assert_eq!(answer["confidence"]["accepted"], true);
    assert_eq!(answer["confidence"]["level"], "excellent");
    assert_eq!(answer["sources"][0]["source_document"], "account.md");
    assert!(answer["confidence"]["details"]["similarity"].is_number());

    let resp = client
        .get(format!("{}/api/v1/chat/{}", base, session_id))
        .header("X-API-Key", KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let info: Value = resp.json().await.unwrap();
    assert_eq!(info["history"].as_array().unwrap().len(), 2);
    assert_eq!(info["history"][0]["role"], "user");

    let resp = client
        .delete(format!("{}/api/v1/chat/{}", base, session_id))
        .header("X-API-Key", KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .delete(format!("{}/api/v1/chat/{}", base, session_id))
        .header("X-API-Key", KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_bad_requests() {
    let base = serve().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/v1/chat/some-session", base))
        .header("X-API-Key", KEY)
        .json(&json!({"question": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
    assert_eq!(body["error"]["retriable"], false);

    let resp = client
        .post(format!("{}/api/v1/chat/some-session", base))
        .header("X-API-Key", KEY)
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}
