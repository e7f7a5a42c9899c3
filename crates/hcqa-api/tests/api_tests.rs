//! API Integration Tests
//!
//! The router runs against an offline service: feature-hashing embeddings
//! and a model that answers with the first retrieved document.
//!
//! Author: hephaex@gmail.com

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use hcqa_api::testing::{spawn_state, spawn_state_with, test_config};
use hcqa_api::{create_router, create_router_for_testing};
use hcqa_core::Query;
use hcqa_rag::NO_CONTEXT_ANSWER;
use serde_json::{json, Value};
use tower::ServiceExt;

/// Helper to create a test request
fn create_json_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json");

    match body {
        Some(json_body) => builder
            .body(Body::from(serde_json::to_string(&json_body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn create_ndjson_request(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/x-ndjson")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Upload documents and wait until they are searchable
async fn seed(app: &Router, docs: &[&str]) -> Vec<u64> {
    let documents: Vec<Value> = docs.iter().map(|doc| json!({ "doc": doc })).collect();
    let response = app
        .clone()
        .oneshot(create_json_request(
            "POST",
            "/api/v1/documents?wait=true",
            Some(json!({ "documents": documents })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    body_json(response)
        .await["accepted"]
        .as_array()
        .unwrap()
        .iter()
        .map(|id| id.as_u64().unwrap())
        .collect()
}

// =============================================================================
// Health Check Tests
// =============================================================================

#[tokio::test]
async fn test_health_check() {
    let app = create_router_for_testing();

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_readiness_follows_ingestor() {
    let (state, shutdown) = spawn_state();
    let app = create_router(state.clone());
    state.service.ingest.flush().await.unwrap();

    let response = app.clone().oneshot(get("/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["ready"], true);
    assert!(json["checks"].is_object());

    shutdown.cancel();
    while state.is_ready() {
        tokio::task::yield_now().await;
    }

    let response = app.oneshot(get("/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = create_router_for_testing();

    let response = app.oneshot(get("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert!(json["uptime_seconds"].is_number());
    assert!(json["total_requests"].is_number());
    assert_eq!(json["pending_queries"], 0);
    assert_eq!(json["index"]["live_entries"], 0);
    assert!(json["caches"].is_array());
}

#[tokio::test]
async fn test_openapi_document() {
    let app = create_router_for_testing();

    let response = app.oneshot(get("/api-docs/openapi.json")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(json["paths"]["/"].is_object());
    assert!(json["paths"]["/api/v1/documents"].is_object());
}

// =============================================================================
// Query API Tests
// =============================================================================

#[tokio::test]
async fn test_answer_on_empty_corpus() {
    let app = create_router_for_testing();

    let request = create_json_request(
        "POST",
        "/",
        Some(json!({ "query": "What treats headaches?", "user": "alice" })),
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!(NO_CONTEXT_ANSWER));
}

#[tokio::test]
async fn test_answer_uses_nearest_document() {
    let app = create_router_for_testing();
    seed(
        &app,
        &["Aspirin treats headaches.", "Insulin regulates blood sugar."],
    )
    .await;

    let request = create_json_request(
        "POST",
        "/",
        Some(json!({ "query": "What treats headaches?", "user": "alice" })),
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!("Aspirin treats headaches."));
}

#[tokio::test]
async fn test_structured_query() {
    let app = create_router_for_testing();
    let ids = seed(
        &app,
        &["Aspirin treats headaches.", "Insulin regulates blood sugar."],
    )
    .await;

    let request = create_json_request(
        "POST",
        "/api/v1/query",
        Some(json!({ "query": "insulin and blood sugar", "user": "bob" })),
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert!(json["query_id"].is_string());
    assert_eq!(json["answer"], "Insulin regulates blood sugar.");
    assert!(json["processing_time_ms"].is_number());

    let sources = json["sources"].as_array().unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0]["id"], ids[1]);
    assert!(sources[0]["distance"].is_number());
}

#[tokio::test]
async fn test_query_endpoint_empty_question() {
    let app = create_router_for_testing();

    let request = create_json_request(
        "POST",
        "/api/v1/query",
        Some(json!({ "query": "   ", "user": "carol" })),
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let app = create_router_for_testing();

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("Content-Type", "application/json")
        .body(Body::from("{\"query\": "))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "BAD_REQUEST");
    assert!(json["message"].is_string());

    let missing_user = create_json_request("POST", "/", Some(json!({ "query": "hi" })));
    let response = app.oneshot(missing_user).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_answered_queries_leave_pending_set() {
    let (state, _shutdown) = spawn_state();
    let app = create_router(state.clone());

    for user in ["dave", "erin"] {
        let request = create_json_request(
            "POST",
            "/",
            Some(json!({ "query": "anything indexed?", "user": user })),
        );
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(state.pending_queries(), 0);
    assert_eq!(state.get_request_count(), 2);

    let json = body_json(app.oneshot(get("/metrics")).await.unwrap()).await;
    assert_eq!(json["endpoints"]["POST /"]["requests"], 2);
}

#[tokio::test]
async fn test_metrics_lists_unanswered_queries() {
    let (state, _shutdown) = spawn_state();
    let app = create_router(state.clone());

    let query = Query::new("What treats headaches?", "frank");
    let _pending = state.track_query(&query);

    let json = body_json(app.oneshot(get("/metrics")).await.unwrap()).await;
    assert_eq!(json["pending_queries"], 1);
    assert_eq!(json["pending"][0]["user"], "frank");
    assert_eq!(json["pending"][0]["query_id"], query.id.to_string());
    assert!(json["pending"][0]["waiting_ms"].is_u64());
}

// =============================================================================
// Document API Tests
// =============================================================================

#[tokio::test]
async fn test_ndjson_upload_reports_rejected_lines() {
    let app = create_router_for_testing();

    let payload = "{\"doc\": \"Aspirin treats headaches.\"}\n\
                   not json\n\
                   \n\
                   {\"doc\": \"Insulin regulates blood sugar.\"}\n\
                   {\"text\": \"wrong field\"}\n";
    let response = app
        .oneshot(create_ndjson_request("/api/v1/documents", payload))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let json = body_json(response).await;
    assert_eq!(json["accepted"].as_array().unwrap().len(), 2);
    assert_eq!(json["rejected_lines"], json!([2, 5]));
    assert_eq!(json["committed"], false);
}

#[tokio::test]
async fn test_json_upload_rejects_blank_entries() {
    let app = create_router_for_testing();

    let request = create_json_request(
        "POST",
        "/api/v1/documents",
        Some(json!({ "documents": [{ "doc": "Aspirin treats headaches." }, { "doc": " " }] })),
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["accepted"], json!([1]));
    assert_eq!(json["rejected_lines"], json!([2]));
}

#[tokio::test]
async fn test_json_upload_skips_malformed_entries() {
    let app = create_router_for_testing();

    let request = create_json_request(
        "POST",
        "/api/v1/documents?wait=true",
        Some(json!({ "documents": [
            { "text": "no doc field" },
            { "doc": "Insulin regulates blood sugar." },
            { "doc": 42 }
        ] })),
    );
    let response = app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["rejected_lines"], json!([1, 3]));
    let accepted = json["accepted"].as_array().unwrap();
    assert_eq!(accepted.len(), 1);

    let id = accepted[0].as_u64().unwrap();
    let response = app
        .oneshot(get(&format!("/api/v1/documents/{id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await["text"],
        "Insulin regulates blood sugar."
    );
}

#[tokio::test]
async fn test_empty_upload_is_bad_request() {
    let app = create_router_for_testing();

    let request = create_json_request("POST", "/api/v1/documents", Some(json!({ "documents": [] })));
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_document() {
    let app = create_router_for_testing();
    let ids = seed(&app, &["Aspirin treats headaches."]).await;

    let response = app
        .clone()
        .oneshot(get(&format!("/api/v1/documents/{}", ids[0])))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["id"], ids[0]);
    assert_eq!(json["text"], "Aspirin treats headaches.");
    assert!(json["ingested_at"].is_string());

    let response = app.oneshot(get("/api/v1/documents/999")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_document() {
    let app = create_router_for_testing();
    let ids = seed(
        &app,
        &["Aspirin treats headaches.", "Insulin regulates blood sugar."],
    )
    .await;
    let uri = format!("/api/v1/documents/{}", ids[0]);

    let response = app
        .clone()
        .oneshot(create_json_request("DELETE", &uri, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // The removed document no longer answers its own question
    let request = create_json_request(
        "POST",
        "/",
        Some(json!({ "query": "What treats headaches?", "user": "frank" })),
    );
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(
        body_json(response).await,
        json!("Insulin regulates blood sugar.")
    );

    let response = app
        .oneshot(create_json_request("DELETE", &uri, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_after_shutdown_is_unavailable() {
    let (state, shutdown) = spawn_state_with(test_config());
    let app = create_router(state.clone());
    state.service.ingest.flush().await.unwrap();

    shutdown.cancel();
    while state.is_ready() {
        tokio::task::yield_now().await;
    }

    let request = create_json_request(
        "POST",
        "/api/v1/documents",
        Some(json!({ "documents": [{ "doc": "late arrival" }] })),
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["code"], "UNAVAILABLE");
}
