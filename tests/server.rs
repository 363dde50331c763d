//! HTTP API tests against a server on a free local port.

mod common;

use std::sync::Arc;
use tempfile::TempDir;

use common::*;
use report_agent::server::run_server;

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

/// Start a server with fake providers; returns its base URL.
async fn start(tmp: &TempDir) -> String {
    let service = Arc::new(service_with(tmp, copy_ocr(), Arc::new(echo_context_model()), 15).await);
    let port = find_free_port();
    let bind = format!("127.0.0.1:{}", port);
    tokio::spawn(async move {
        run_server(service, &bind, 10 * 1024 * 1024).await.unwrap();
    });
    wait_for_server(port).await;
    format!("http://127.0.0.1:{}", port)
}

fn upload_form(user_id: &str, filename: &str, bytes: Vec<u8>) -> reqwest::multipart::Form {
    reqwest::multipart::Form::new()
        .text("user_id", user_id.to_string())
        .part(
            "file",
            reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string()),
        )
}

#[tokio::test]
async fn health_and_root() {
    let tmp = TempDir::new().unwrap();
    let base = start(&tmp).await;
    let client = reqwest::Client::new();

    let health: serde_json::Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert!(health["version"].is_string());

    let root = client.get(&base).send().await.unwrap();
    assert!(root.status().is_success());
}

#[tokio::test]
async fn upload_query_delete_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let base = start(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/upload", base))
        .multipart(upload_form("alice", "report.pdf", health_report_pdf()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["user_id"], "alice");
    assert_eq!(body["filename"], "report.pdf");
    assert!(body["chunks"].as_u64().unwrap() >= 1);

    let resp = client
        .post(format!("{}/api/query", base))
        .json(&serde_json::json!({ "user_id": "alice", "query": "How is my glucose?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["found"], true);
    assert_eq!(body["outcome"], "completed");
    assert_eq!(body["query"], "How is my glucose?");
    assert!(body["response"].as_str().unwrap().contains("110"));

    let delete = |user: &'static str| {
        client
            .delete(format!("{}/api/delete_index", base))
            .json(&serde_json::json!({ "user_id": user }))
            .send()
    };
    let body: serde_json::Value = delete("alice").await.unwrap().json().await.unwrap();
    assert_eq!(body["deleted"], true);
    let body: serde_json::Value = delete("alice").await.unwrap().json().await.unwrap();
    assert_eq!(body["deleted"], false);

    let body: serde_json::Value = client
        .post(format!("{}/api/query", base))
        .json(&serde_json::json!({ "user_id": "alice", "query": "How is my glucose?" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "not_found");
    assert_eq!(body["found"], false);
    assert!(body.get("outcome").is_none());
}

#[tokio::test]
async fn upload_rejects_non_pdf() {
    let tmp = TempDir::new().unwrap();
    let base = start(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/upload", base))
        .multipart(upload_form("bob", "notes.txt", b"hello".to_vec()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unsupported_format");

    // Right extension, wrong content.
    let resp = client
        .post(format!("{}/api/upload", base))
        .multipart(upload_form("bob", "fake.pdf", b"not really a pdf".to_vec()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unsupported_format");
}

#[tokio::test]
async fn blank_user_id_is_bad_request() {
    let tmp = TempDir::new().unwrap();
    let base = start(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/query", base))
        .json(&serde_json::json!({ "user_id": "   ", "query": "hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "invalid_identity");

    let resp = client
        .post(format!("{}/api/query", base))
        .json(&serde_json::json!({ "user_id": " alice ", "query": "hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "invalid_identity");
}

#[tokio::test]
async fn delete_all_clears_storage() {
    let tmp = TempDir::new().unwrap();
    let base = start(&tmp).await;
    let client = reqwest::Client::new();

    for user in ["u1", "u2"] {
        let resp = client
            .post(format!("{}/api/upload", base))
            .multipart(upload_form(user, "r.pdf", health_report_pdf()))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }
    assert_eq!(index_dirs(&tmp.path().join("indexes")).len(), 2);

    let body: serde_json::Value = client
        .delete(format!("{}/api/delete/all", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(body["message"].as_str().unwrap().contains("deleted"));
    assert!(body["path_cleared"].as_str().unwrap().ends_with("indexes"));
    assert!(index_dirs(&tmp.path().join("indexes")).is_empty());
}
