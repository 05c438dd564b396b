//! HTTP surface tests against an in-memory mailbox.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum_test::TestServer;
use chrono::{Duration as ChronoDuration, Utc};
use common::{mail_at, passcode_mail, resolver, router, MemoryBackend};
use passcode_bridge::config::ServerConfig;
use passcode_bridge::poller::{BridgeClient, PollingConfig};
use passcode_bridge::web::WebServer;
use passcode_bridge::Error;
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;

fn test_server(backend: MemoryBackend) -> TestServer {
    TestServer::new(router(backend)).unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// /health
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_reports_settings() {
    let server = test_server(MemoryBackend::default());

    let response = server.get("/health").await;
    response.assert_status_ok();
    assert_eq!(
        response.json::<Value>(),
        json!({
            "ok": true,
            "backend": "memory",
            "subjectKeyword": "パスコード",
            "lastMinutes": 10,
            "queryMinutes": 30
        })
    );
}

#[tokio::test]
async fn test_cors_allows_any_origin() {
    let app = router(MemoryBackend::default());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header(header::ORIGIN, "https://shop.example.jp")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}

// ─────────────────────────────────────────────────────────────────────────────
// /code
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_code_found_for_recipient() {
    let backend = MemoryBackend::new(vec![
        passcode_mail("1", 1, "other@icloud.com", "パスコード：111111"),
        passcode_mail("2", 3, "me@icloud.com", "パスコード：222222"),
    ]);
    let counters = backend.counters.clone();
    let server = test_server(backend);

    let response = server
        .get("/code")
        .add_query_param("to", "Me@iCloud.com")
        .await;
    response.assert_status_ok();
    assert_eq!(
        response.json::<Value>(),
        json!({"ok": true, "found": true, "code": "222222"})
    );

    assert_eq!(counters.opened(), 1);
    assert_eq!(counters.closed(), 1);
}

#[tokio::test]
async fn test_code_not_found_is_ok_with_reason() {
    let server = test_server(MemoryBackend::default());

    let response = server.get("/code").add_query_param("to", "me@icloud.com").await;
    response.assert_status_ok();

    let body = response.json::<Value>();
    assert_eq!(body["ok"], true);
    assert_eq!(body["found"], false);
    assert_eq!(body["code"], Value::Null);
    assert!(!body["reason"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_code_respects_watermark() {
    let backend = MemoryBackend::new(vec![passcode_mail(
        "1",
        2,
        "me@icloud.com",
        "【パスコード】482913",
    )]);
    let server = test_server(backend);

    let after = (Utc::now() - ChronoDuration::minutes(1)).timestamp_millis();
    let response = server
        .get("/code")
        .add_query_param("after", after.to_string())
        .await;
    let body = response.json::<Value>();
    assert_eq!(body["found"], false);
    let reason = body["reason"].as_str().unwrap();
    assert!(reason.starts_with("no code found after"));
}

#[tokio::test]
async fn test_invalid_after_is_ignored() {
    let backend = MemoryBackend::new(vec![passcode_mail(
        "1",
        2,
        "me@icloud.com",
        "【パスコード】482913",
    )]);
    let server = test_server(backend);

    let response = server
        .get("/code")
        .add_query_param("after", "not-a-number")
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["code"], "482913");
}

#[tokio::test]
async fn test_backend_failure_is_500() {
    let backend = MemoryBackend::failing();
    let counters = backend.counters.clone();
    let server = test_server(backend);

    let response = server.get("/code").await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);

    let body = response.json::<Value>();
    assert_eq!(body["ok"], false);
    assert!(body["error"].as_str().unwrap().contains("timeout"));

    // Session is released even when the scan fails
    assert_eq!(counters.closed(), 1);
}

#[tokio::test]
async fn test_concurrent_requests_do_not_cross_talk() {
    let backend = MemoryBackend::new(vec![
        passcode_mail("1", 1, "a@icloud.com", "パスコード：111111"),
        passcode_mail("2", 2, "b@icloud.com", "パスコード：222222"),
        passcode_mail("3", 3, "c@icloud.com", "パスコード：333333"),
    ]);
    let app = router(backend);

    let requests = ["a", "b", "c", "a", "b", "c"].map(|who| {
        let app = app.clone();
        tokio::spawn(async move {
            let response = app
                .oneshot(
                    Request::builder()
                        .uri(format!("/code?to={who}%40icloud.com"))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let body: Value = serde_json::from_slice(&bytes).unwrap();
            (who, body["code"].as_str().unwrap().to_string())
        })
    });

    for handle in requests {
        let (who, code) = handle.await.unwrap();
        let expected = match who {
            "a" => "111111",
            "b" => "222222",
            _ => "333333",
        };
        assert_eq!(code, expected, "wrong code for {who}");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// /recent
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_recent_lists_keyword_messages_newest_first() {
    let now = Utc::now();
    let at = |m: i64| now - ChronoDuration::minutes(m);
    let backend = MemoryBackend::new(vec![
        mail_at("1", at(5), "パスコード 1", "me@icloud.com", ""),
        mail_at("2", at(1), "パスコード 2", "me@icloud.com", ""),
        mail_at("3", at(2), "ご注文の確認", "me@icloud.com", ""),
        mail_at("4", at(3), "パスコード 4", "me@icloud.com", ""),
    ]);
    let server = test_server(backend);

    let response = server.get("/recent").add_query_param("limit", 2).await;
    response.assert_status_ok();

    let body = response.json::<Vec<Value>>();
    let ids: Vec<&str> = body.iter().map(|m| m["id"].as_str().unwrap()).collect();
    assert_eq!(ids, ["2", "4"]);
    assert_eq!(body[0]["to"], "me@icloud.com");
    let newest = body[0]["timestamp"].as_i64().unwrap();
    assert!(newest > body[1]["timestamp"].as_i64().unwrap());
}

#[tokio::test]
async fn test_recent_failure_is_500() {
    let server = test_server(MemoryBackend::failing());

    let response = server.get("/recent").await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.json::<Value>()["ok"], false);
}

// ─────────────────────────────────────────────────────────────────────────────
// Bound server + polling client
// ─────────────────────────────────────────────────────────────────────────────

async fn spawn_bridge(backend: MemoryBackend) -> String {
    let config = ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
    };
    let addr = WebServer::new(&config, resolver(backend))
        .run_with_addr()
        .await
        .unwrap();
    format!("http://{addr}")
}

fn fast_polling() -> PollingConfig {
    PollingConfig {
        interval: Duration::from_millis(50),
        max_wait: Duration::from_millis(300),
    }
}

#[tokio::test]
async fn test_client_waits_for_code() {
    let backend = MemoryBackend::new(vec![passcode_mail(
        "1",
        1,
        "me@icloud.com",
        "ご本人確認のためパスコードを入力してください。\n\n  731204\n",
    )]);
    let base_url = spawn_bridge(backend).await;

    let client = BridgeClient::new(base_url).unwrap().with_polling(fast_polling());
    let since = Utc::now() - ChronoDuration::minutes(5);
    let code = client
        .wait_for_code(Some("me@icloud.com"), Some(since))
        .await
        .unwrap();
    assert_eq!(code, "731204");
}

#[tokio::test]
async fn test_client_times_out_without_code() {
    let backend = MemoryBackend::new(vec![passcode_mail(
        "1",
        1,
        "someone-else@icloud.com",
        "パスコード：111111",
    )]);
    let base_url = spawn_bridge(backend).await;

    let client = BridgeClient::new(base_url).unwrap().with_polling(fast_polling());
    let err = client
        .wait_for_code(Some("me@icloud.com"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::WaitTimeout { .. }));
}

#[tokio::test]
async fn test_client_surfaces_bridge_failure() {
    let base_url = spawn_bridge(MemoryBackend::failing()).await;

    let client = BridgeClient::new(base_url).unwrap().with_polling(fast_polling());
    let err = client.wait_for_code(None, None).await.unwrap_err();
    match err {
        Error::BridgeStatus { status, message } => {
            assert_eq!(status, 500);
            assert!(message.contains("timeout"));
        }
        other => panic!("unexpected error: {other}"),
    }
}
