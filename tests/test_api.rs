//! HTTP route tests
//!
//! Requests go through the full warp filter stack with `warp::test`, so
//! status codes and bodies are what a client would see.

mod test_helpers;

use agentdeploy::api::routes;
use agentdeploy::observability::HealthMonitor;
use agentdeploy::testing::{FlakyContentBackend, MockAgentStore, MockRegistry, RegistryMode};
use serde_json::{json, Value};
use std::sync::Arc;
use test_helpers::{Harness, OWNER};
use warp::http::StatusCode;

fn health_for(harness: &Harness) -> Arc<HealthMonitor> {
    Arc::new(HealthMonitor::new("agentdeploy").with_queue(harness.queue.clone()))
}

fn body(response: &warp::http::Response<bytes::Bytes>) -> Value {
    serde_json::from_slice(response.body()).unwrap()
}

fn bot_a_body() -> Value {
    json!({
        "name": "Bot A",
        "config": {"modules": ["PriceFeed", "Notifier"], "trigger": "cron"},
        "owner": OWNER
    })
}

#[tokio::test]
async fn test_create_agent_returns_composite_result() {
    let harness = Harness::new();
    let api = routes(harness.pipeline.clone(), health_for(&harness));

    let response = warp::test::request()
        .method("POST")
        .path("/api/agents")
        .json(&bot_a_body())
        .reply(&api)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let created = body(&response);
    assert_eq!(created["success"], true);
    assert_eq!(created["agentId"], 1);
    assert!(created["txHash"].as_str().unwrap().starts_with("0x"));
    assert!(created["jobId"].is_string());
    assert_eq!(created["agent"]["name"], "Bot A");
    assert_eq!(created["agent"]["owner"], OWNER);
    assert_eq!(created["agent"]["chainAgentId"], 1);
}

#[tokio::test]
async fn test_create_then_lookup() {
    let harness = Harness::new();
    let api = routes(harness.pipeline.clone(), health_for(&harness));

    let created = warp::test::request()
        .method("POST")
        .path("/api/agents")
        .json(&bot_a_body())
        .reply(&api)
        .await;
    let id = body(&created)["agent"]["id"].as_i64().unwrap();

    let response = warp::test::request()
        .path(&format!("/api/agents/{id}"))
        .reply(&api)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let record = body(&response);
    assert_eq!(record["id"], id);
    assert_eq!(record["cid"], body(&created)["agent"]["cid"]);
}

#[tokio::test]
async fn test_missing_config_is_400() {
    let harness = Harness::new();
    let api = routes(harness.pipeline.clone(), health_for(&harness));

    let response = warp::test::request()
        .method("POST")
        .path("/api/agents")
        .json(&json!({"name": "Bot A", "owner": OWNER}))
        .reply(&api)
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = body(&response);
    assert!(error["error"].as_str().unwrap().contains("Missing config"));
    assert_eq!(error["stage"], "validating");
    assert_eq!(error["kind"], "validation");
    assert_eq!(harness.external_calls(), 0);
}

#[tokio::test]
async fn test_malformed_json_is_400() {
    let harness = Harness::new();
    let api = routes(harness.pipeline.clone(), health_for(&harness));

    let response = warp::test::request()
        .method("POST")
        .path("/api/agents")
        .header("content-type", "application/json")
        .body("{not json")
        .reply(&api)
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body(&response)["kind"], "validation");
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let harness = Harness::new();
    let api = routes(harness.pipeline.clone(), health_for(&harness));

    let response = warp::test::request()
        .method("POST")
        .path("/api/agents")
        .header("content-type", "application/json")
        .body(vec![b' '; 3 * 1024 * 1024])
        .reply(&api)
        .await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_persistence_failure_reports_artifacts() {
    let harness = Harness::builder().store(MockAgentStore::failing()).build();
    let api = routes(harness.pipeline.clone(), health_for(&harness));

    let response = warp::test::request()
        .method("POST")
        .path("/api/agents")
        .json(&bot_a_body())
        .reply(&api)
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let error = body(&response);
    assert_eq!(error["stage"], "persisting");
    assert_eq!(error["kind"], "persistence");
    assert_eq!(error["agentId"], 1);
    assert!(error["txHash"].is_string());
    assert!(error["cid"].is_string());
    assert!(error.get("recordId").is_none());
}

#[tokio::test]
async fn test_chain_failure_is_502() {
    let harness = Harness::builder()
        .registry(MockRegistry::with_mode(RegistryMode::Reverted))
        .build();
    let api = routes(harness.pipeline.clone(), health_for(&harness));

    let response = warp::test::request()
        .method("POST")
        .path("/api/agents")
        .json(&bot_a_body())
        .reply(&api)
        .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let error = body(&response);
    assert_eq!(error["kind"], "chain");
    assert_eq!(error["stage"], "registering");
    assert!(error["txHash"].as_str().unwrap().starts_with("0x"));
}

#[tokio::test]
async fn test_content_outage_is_502() {
    let harness = Harness::builder()
        .content(FlakyContentBackend::always_failing())
        .build();
    let api = routes(harness.pipeline.clone(), health_for(&harness));

    let response = warp::test::request()
        .method("POST")
        .path("/api/agents")
        .json(&bot_a_body())
        .reply(&api)
        .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let error = body(&response);
    assert_eq!(error["stage"], "pinning");
    assert_eq!(error["kind"], "transient");
}

#[tokio::test]
async fn test_unknown_agent_is_404() {
    let harness = Harness::new();
    let api = routes(harness.pipeline.clone(), health_for(&harness));

    for path in ["/api/agents/999", "/api/agents/not-a-number"] {
        let response = warp::test::request().path(path).reply(&api).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{path}");
        assert_eq!(body(&response)["error"], "Not found");
    }
}

#[tokio::test]
async fn test_registration_route_reconciles() {
    let harness = Harness::builder()
        .registry(MockRegistry::with_mode(RegistryMode::Unindexed))
        .build();
    let api = routes(harness.pipeline.clone(), health_for(&harness));

    let created = harness.pipeline.create_agent(test_helpers::bot_a_request()).await.unwrap();
    harness.registry.index_transaction(&created.tx_hash, 17).await;

    let response = warp::test::request()
        .path(&format!("/api/agents/{}/registration", created.agent.id))
        .reply(&api)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let receipt = body(&response);
    assert_eq!(receipt["agentId"], 17);
    assert_eq!(receipt["txHash"], created.tx_hash);
}

#[tokio::test]
async fn test_content_cache_routes() {
    let harness = Harness::new();
    let api = routes(harness.pipeline.clone(), health_for(&harness));
    harness.pipeline.create_agent(test_helpers::bot_a_request()).await.unwrap();

    let stats = warp::test::request().path("/api/content/cache").reply(&api).await;
    assert_eq!(stats.status(), StatusCode::OK);
    assert_eq!(body(&stats)["size"], 2);

    let cleared = warp::test::request()
        .method("DELETE")
        .path("/api/content/cache")
        .reply(&api)
        .await;
    assert_eq!(body(&cleared)["cleared"], 2);

    let stats = warp::test::request().path("/api/content/cache").reply(&api).await;
    assert_eq!(body(&stats)["size"], 0);
}

#[tokio::test]
async fn test_health_ready_live_and_metrics() {
    let harness = Harness::new();
    let api = routes(harness.pipeline.clone(), health_for(&harness));

    let health = warp::test::request().path("/health").reply(&api).await;
    assert_eq!(health.status(), StatusCode::OK);
    let status = body(&health);
    assert_eq!(status["status"], "healthy");
    assert_eq!(status["service"], "agentdeploy");
    assert!(status["checks"]["queue"].is_object());

    let ready = warp::test::request().path("/ready").reply(&api).await;
    assert_eq!(ready.status(), StatusCode::OK);
    assert_eq!(body(&ready)["ready"], true);

    let live = warp::test::request().path("/live").reply(&api).await;
    assert_eq!(body(&live)["alive"], true);

    let metrics = warp::test::request().path("/metrics").reply(&api).await;
    assert_eq!(metrics.status(), StatusCode::OK);
    let snapshot = body(&metrics);
    assert!(snapshot["pipeline"].is_object());
    assert!(snapshot["jobs"].is_object());

    let root = warp::test::request().path("/").reply(&api).await;
    assert_eq!(body(&root)["service"], "agentdeploy");
}
