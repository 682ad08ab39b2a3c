//! End-to-end checks of the HTTP API against an in-process router.

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use pheromone_hub::{build_app, Hub, HubConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

struct TestHub {
    app: Router,
    _dir: TempDir,
}

impl TestHub {
    fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    fn with_config(config: HubConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = HubConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..config
        };
        let hub = Arc::new(Hub::new(config).unwrap());
        Self {
            app: build_app(hub),
            _dir: dir,
        }
    }

    async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, Some(body)).await
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.call(Method::GET, uri, None).await
    }

    async fn register(&self, id: &str, role: &str) {
        let (status, body) = self
            .post("/register", json!({"agent": {"id": id, "role": role}}))
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
    }
}

fn envelope(id: &str, to: &str) -> Value {
    json!({
        "id": id,
        "type": "message.direct",
        "version": "1.0.0",
        "timestamp": "2026-01-01T00:00:00.000Z",
        "sender": {"id": "boss", "role": "manager"},
        "recipient": {"id": to},
        "payload": {"content": "hello"},
    })
}

#[tokio::test]
async fn test_register_contract() {
    let hub = TestHub::new();
    let (status, body) = hub
        .post(
            "/register",
            json!({"agent": {"id": "a", "role": "developer", "callbackUrl": "http://127.0.0.1:1/cb"}}),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["agentId"], "a");
    assert_eq!(body["callbackEnabled"], true);
    assert_eq!(body["config"]["heartbeatInterval"], 30_000);
    assert_eq!(body["config"]["heartbeatTimeout"], 90_000);
}

#[tokio::test]
async fn test_direct_message_then_pull_is_destructive() {
    let hub = TestHub::new();
    hub.register("a", "developer").await;

    let (status, body) = hub.post("/message", envelope("m-1", "a")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["queued"], true);
    assert_eq!(body["reason"], "no_callback_url");

    let (_, first) = hub.get("/messages?agentId=a").await;
    assert_eq!(first["count"], 1);
    assert_eq!(first["messages"][0]["id"], "m-1");

    let (_, second) = hub.get("/messages?agentId=a").await;
    assert_eq!(second["count"], 0);

    // history is independent of the queue
    let (_, history) = hub.get("/messages/history?agentId=a").await;
    assert_eq!(history["count"], 1);
    let (status, stored) = hub.get("/messages/m-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored["message"]["_id"], "m-1");
}

#[tokio::test]
async fn test_broadcast_reaches_current_agents_only() {
    let hub = TestHub::new();
    for id in ["a", "b", "c"] {
        hub.register(id, "developer").await;
    }

    let (status, body) = hub
        .post("/broadcast", json!({"sender": "boss", "subject": "sync", "content": "status please"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["broadcast"], true);
    assert_eq!(body["delivered"], 3);

    hub.register("d", "tester").await;

    for id in ["a", "b", "c"] {
        let (_, pulled) = hub.get(&format!("/messages?agentId={}", id)).await;
        assert_eq!(pulled["count"], 1, "agent {}", id);
        assert_eq!(pulled["messages"][0]["payload"]["subject"], "sync");
    }
    let (_, pulled) = hub.get("/messages?agentId=d").await;
    assert_eq!(pulled["count"], 0);
}

#[tokio::test]
async fn test_broadcast_without_sender_reaches_everyone() {
    let hub = TestHub::new();
    for id in ["a", "b", "c"] {
        hub.register(id, "developer").await;
    }

    let (status, body) = hub.post("/broadcast", json!({"subject": "x"})).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["delivered"], 3);

    for id in ["a", "b", "c"] {
        let (_, pulled) = hub.get(&format!("/messages?agentId={}", id)).await;
        assert_eq!(pulled["count"], 1, "agent {}", id);
        assert_eq!(pulled["messages"][0]["sender"]["id"], "hub");
    }
}

#[tokio::test]
async fn test_permissions_use_registered_role() {
    let hub = TestHub::with_config(HubConfig {
        enforce_permissions: true,
        ..HubConfig::default()
    });
    hub.register("t1", "tester").await;
    hub.register("dev", "developer").await;

    let mut spoofed = envelope("m-1", "dev");
    spoofed["type"] = json!("task.assign");
    spoofed["sender"] = json!({"id": "t1", "role": "manager"});
    let (status, body) = hub.post("/message", spoofed).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");

    let (_, pulled) = hub.get("/messages?agentId=dev").await;
    assert_eq!(pulled["count"], 0);
}

#[tokio::test]
async fn test_role_targeted_message_in_history() {
    let hub = TestHub::new();
    hub.register("r1", "reviewer").await;

    let mut review = envelope("m-1", "r1");
    review["type"] = json!("task.assign");
    review["recipient"] = json!({"type": "role", "target": "reviewer"});
    let (status, _) = hub.post("/message", review).await;
    assert_eq!(status, StatusCode::OK);

    let (_, history) = hub.get("/messages/history?agentId=r1").await;
    assert_eq!(history["count"], 1);
    assert_eq!(history["messages"][0]["id"], "m-1");
}

#[tokio::test]
async fn test_mark_message_read() {
    let hub = TestHub::new();
    hub.post("/message", envelope("m-1", "a")).await;

    let (_, stored) = hub.get("/messages/m-1").await;
    assert_eq!(stored["message"]["_read"], false);

    let (status, body) = hub.call(Method::POST, "/messages/m-1/read", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "messageId": "m-1", "read": true}));

    let (_, stored) = hub.get("/messages/m-1").await;
    assert_eq!(stored["message"]["_read"], true);

    let (status, _) = hub.call(Method::POST, "/messages/nope/read", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_loop_breaker() {
    let hub = TestHub::new();

    let mut at_limit = envelope("m-20", "a");
    at_limit["metadata"] = json!({"turn": 20});
    let (status, _) = hub.post("/message", at_limit).await;
    assert_eq!(status, StatusCode::OK);

    let mut over = envelope("m-21", "a");
    over["metadata"] = json!({"turn": 21});
    let (status, body) = hub.post("/message", over).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "loop_detected");

    let (status, _) = hub.get("/messages/m-21").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_validation_errors() {
    let hub = TestHub::new();

    let mut bad = envelope("m-1", "a");
    bad["type"] = json!("gossip.rumor");
    bad.as_object_mut().unwrap().remove("sender");
    let (status, body) = hub.post("/message", bad).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");
    let fields: Vec<&str> = body["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["field"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"type"));
    assert!(fields.contains(&"sender"));

    let (status, _) = hub
        .post("/register", json!({"agent": {"id": "x", "role": "janitor"}}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/message")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = hub.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (status, _) = hub.get("/messages").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_type_is_router_error() {
    let hub = TestHub::new();
    let mut unknown = envelope("m-1", "a");
    unknown["type"] = json!("task.archive");

    let (status, body) = hub.post("/message", unknown).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Unknown message type: task.archive");
}

#[tokio::test]
async fn test_heartbeat_drains_and_unknown_agent_404() {
    let hub = TestHub::new();
    hub.register("a", "developer").await;
    hub.post("/message", envelope("m-1", "a")).await;

    let (status, body) = hub
        .post("/heartbeat", json!({"agentId": "a", "status": "busy"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "busy");
    assert_eq!(body["messages"].as_array().unwrap().len(), 1);

    let (status, _) = hub.post("/heartbeat", json!({"agentId": "ghost"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_heartbeat_reports_current_task() {
    let hub = TestHub::new();
    hub.register("a", "developer").await;

    let (status, body) = hub
        .post("/heartbeat", json!({"agentId": "a", "status": "busy", "currentTask": "task-9"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["currentTask"], "task-9");

    hub.post("/heartbeat", json!({"agentId": "a"})).await;
    let (_, list) = hub.get("/agents").await;
    assert_eq!(list["agents"][0]["currentTask"], "task-9");

    hub.post("/heartbeat", json!({"agentId": "a", "currentTask": null})).await;
    let (_, list) = hub.get("/agents").await;
    assert!(list["agents"][0]["currentTask"].is_null());

    let (status, _) = hub
        .post("/heartbeat", json!({"agentId": "a", "currentTask": 7}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_agent_lifecycle() {
    let hub = TestHub::new();
    hub.register("a", "reviewer").await;

    let (_, list) = hub.get("/agents").await;
    assert_eq!(list["count"], 1);
    assert_eq!(list["agents"][0]["role"], "reviewer");

    let (status, _) = hub.call(Method::DELETE, "/agents/a", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = hub.get("/agents/a").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_search_stats_and_health() {
    let hub = TestHub::new();
    hub.post("/message", envelope("m-1", "a")).await;
    let mut other = envelope("m-2", "b");
    other["payload"] = json!({"content": "Deploy NOW"});
    hub.post("/message", other).await;

    let (_, found) = hub.get("/messages/search?q=deploy").await;
    assert_eq!(found["count"], 1);
    assert_eq!(found["messages"][0]["id"], "m-2");

    let (status, _) = hub.get("/messages/search").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, stats) = hub.get("/messages/stats").await;
    assert_eq!(stats["stats"]["total"], 2);
    assert_eq!(stats["stats"]["byType"]["message.direct"], 2);

    let (status, health) = hub.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["messages"]["queued"], 2);
    assert_eq!(health["messages"]["stored"], 2);
}
