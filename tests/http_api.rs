mod common;

use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use common::{CANNED_ANSWER, laptop_guide};
use ragchat::server::{AppState, router};
use serde_json::{Value, json};
use tower::ServiceExt;

const BOUNDARY: &str = "ragchat-test-boundary";

fn app(documents_dir: &Path) -> (Router, common::CannedCompletion) {
    let (pipeline, completion) = common::pipeline(documents_dir);
    let state = AppState::new(
        Arc::new(Mutex::new(pipeline)),
        documents_dir.to_path_buf(),
    );
    (router(state), completion)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn post_empty(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::post(uri).body(Body::empty()).unwrap()).await
}

async fn delete(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::delete(uri).body(Body::empty()).unwrap()).await
}

async fn chat(app: &Router, question: &str) -> (StatusCode, Value) {
    let body = json!({ "question": question, "chat_history": [] });
    send(
        app,
        Request::post("/chat")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

async fn upload(app: &Router, files: &[(&str, &[u8])]) -> (StatusCode, Value) {
    let mut body = Vec::new();
    for (name, data) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; \
                 filename=\"{name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    send(
        app,
        Request::post("/upload")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap(),
    )
    .await
}

async fn document_count(app: &Router) -> u64 {
    let (status, body) = get(app, "/status").await;
    assert_eq!(status, StatusCode::OK);
    body["document_count"].as_u64().unwrap()
}

#[tokio::test]
async fn root_reports_online() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _) = app(tmp.path());

    let (status, body) = get(&app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "online");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn cors_preflight_allows_any_origin() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _) = app(tmp.path());

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/chat")
        .header("origin", "http://localhost:3000")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "content-type")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers["access-control-allow-origin"], "*");
    assert!(headers.contains_key("access-control-allow-methods"));
}

#[tokio::test]
async fn status_without_documents() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _) = app(tmp.path());

    let (status, body) = get(&app, "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "no_documents");
    assert_eq!(body["document_count"], 0);
    assert_eq!(body["message"], "No documents uploaded yet");
}

#[tokio::test]
async fn chat_before_sync_is_a_client_error() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, completion) = app(tmp.path());

    let (status, body) = chat(&app, "how do I set up the laptop").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["detail"],
        "No documents loaded. Please upload documents first."
    );
    assert!(completion.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unsupported_upload_is_rejected_without_side_effects() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _) = app(tmp.path());

    let (status, _) = upload(&app, &[("guide.pdf", &laptop_guide())]).await;
    assert_eq!(status, StatusCode::OK);
    let before = document_count(&app).await;

    let (status, body) = upload(
        &app,
        &[("other.pdf", &laptop_guide()), ("notes.txt", b"plain text")],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["detail"],
        "Unsupported file type: notes.txt. Only PDF and DOCX are supported."
    );

    assert_eq!(document_count(&app).await, before);
    assert!(!tmp.path().join("notes.txt").exists());
    assert!(!tmp.path().join("other.pdf").exists());
}

#[tokio::test]
async fn upload_then_chat_cites_the_pdf() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, completion) = app(tmp.path());
    assert_eq!(document_count(&app).await, 0);

    let (status, body) =
        upload(&app, &[("laptop-guide.pdf", &laptop_guide())]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["files"], json!(["laptop-guide.pdf"]));
    let chunks = body["chunks"].as_u64().unwrap();
    assert!(chunks >= 1);
    assert!(tmp.path().join("laptop-guide.pdf").is_file());

    let (status, body) = get(&app, "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
    assert_eq!(body["document_count"].as_u64().unwrap(), chunks);

    let (status, body) = chat(&app, "how do I set up the laptop").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sources"], json!(["laptop-guide.pdf"]));
    assert_eq!(body["answer"], CANNED_ANSWER);

    let prompts = completion.prompts.lock().unwrap();
    let knowledge = &prompts[0][1].content;
    assert!(knowledge.starts_with("Specialized Knowledge Base: "));
    assert!(knowledge.contains("--- Source: laptop-guide.pdf (Page 1) ---"));
    assert!(knowledge.contains("Plug in the laptop"));
    // Pages come back in reading order.
    let page1 = knowledge.find("(Page 1)").unwrap();
    let page3 = knowledge.find("(Page 3)").unwrap();
    assert!(page1 < page3);
}

#[tokio::test]
async fn sync_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let guide = tmp.path().join("laptop-guide.pdf");
    std::fs::write(guide, laptop_guide()).unwrap();
    let nested = tmp.path().join("policies");
    std::fs::create_dir_all(&nested).unwrap();
    std::fs::write(
        nested.join("vpn.pdf"),
        common::pdf_bytes(&["Open the VPN client"]),
    )
    .unwrap();
    let (app, _) = app(tmp.path());

    let (status, first) = post_empty(&app, "/sync").await;
    assert_eq!(status, StatusCode::OK);
    let (_, second) = post_empty(&app, "/sync").await;

    let chunks = first["chunks"].as_u64().unwrap();
    assert!(chunks >= 4);
    assert_eq!(second["chunks"], first["chunks"]);
    assert_eq!(document_count(&app).await, chunks);
    assert_eq!(
        first["message"],
        format!("Sync complete. Total document chunks: {chunks}")
    );
}

#[tokio::test]
async fn sync_of_missing_folder_creates_it() {
    let tmp = tempfile::tempdir().unwrap();
    let docs = tmp.path().join("uploaded_documents");
    let (app, _) = app(&docs);

    let (status, body) = post_empty(&app, "/sync").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["chunks"], 0);
    assert!(docs.is_dir());
}

#[tokio::test]
async fn list_and_delete_documents() {
    let tmp = tempfile::tempdir().unwrap();
    let guide = laptop_guide();
    std::fs::write(tmp.path().join("laptop-guide.pdf"), &guide).unwrap();
    std::fs::create_dir_all(tmp.path().join("hr")).unwrap();
    std::fs::write(tmp.path().join("hr/leave.pdf"), &guide).unwrap();
    std::fs::write(tmp.path().join("readme.txt"), "ignored").unwrap();
    let (app, _) = app(tmp.path());

    let (status, body) = get(&app, "/documents").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    let docs = body["documents"].as_array().unwrap();
    assert_eq!(docs[0]["name"], "leave.pdf");
    assert_eq!(docs[0]["rel_path"], "hr/leave.pdf");
    assert_eq!(docs[1]["name"], "laptop-guide.pdf");
    assert_eq!(docs[1]["size"].as_u64().unwrap(), guide.len() as u64);

    let (status, body) = delete(&app, "/documents/laptop-guide.pdf").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Deleted laptop-guide.pdf");
    assert!(!tmp.path().join("laptop-guide.pdf").exists());

    let (status, _) = delete(&app, "/documents/laptop-guide.pdf").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn clearing_the_vectorstore_returns_to_not_ready() {
    let tmp = tempfile::tempdir().unwrap();
    let guide = tmp.path().join("laptop-guide.pdf");
    std::fs::write(guide, laptop_guide()).unwrap();
    let (app, _) = app(tmp.path());

    post_empty(&app, "/sync").await;
    assert!(document_count(&app).await > 0);

    let (status, body) = delete(&app, "/vectorstore").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Vector store cleared");
    assert_eq!(document_count(&app).await, 0);

    let (status, _) = chat(&app, "how do I set up the laptop").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    // Source files are untouched.
    assert!(tmp.path().join("laptop-guide.pdf").is_file());
}
