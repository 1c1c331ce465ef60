mod common;

use axum::http::StatusCode;
use common::harness;
use mailflow_engine::{
    config::ExecutionConfig,
    metrics,
    server::Server,
    template::FileTemplateLoader,
    workflow::EventKind,
};
use serde_json::json;
use std::sync::Arc;

async fn test_server(templates_dir: &std::path::Path) -> (axum_test::TestServer, common::Harness) {
    metrics::register_metrics();
    let h = harness(ExecutionConfig::default()).await;
    let server = Server::new(
        h.engine.clone(),
        h.contacts.clone(),
        Arc::new(FileTemplateLoader::new(templates_dir)),
    );
    let client = axum_test::TestServer::new(server.build_router()).unwrap();
    (client, h)
}

#[tokio::test]
async fn test_server_endpoints() {
    let templates = tempfile::tempdir().unwrap();
    std::fs::write(templates.path().join("welcome.html"), "<h1>Welcome</h1>").unwrap();
    let (client, h) = test_server(templates.path()).await;

    // Test health endpoint
    let response = client.get("/health").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "healthy");

    // Submit a workflow the way the web client does, with the steps as a string
    let workflow = json!([
        { "type": "email", "to": "ada@example.com", "subject": "Hi", "template": "welcome" },
        { "type": "conditional", "condition": "emailEventStates['ada@example.com'].opened",
          "truePath": [{ "type": "email", "to": "ada@example.com", "subject": "Again", "body": "<p>again</p>" }] }
    ]);
    let response = client
        .post("/api/emailWorkflow")
        .json(&json!({
            "senderEmail": "sam@example.com",
            "senderName": "Sam",
            "workflow": workflow.to_string(),
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["state"], "Parked");
    assert_eq!(body["message"], "Workflow submitted successfully");
    let id = body["workflowId"].as_u64().unwrap();

    // Test get workflow
    let response = client.get(&format!("/api/workflows/{}", id)).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["state"], "Parked");
    assert_eq!(body["waitingOn"]["recipient"], "ada@example.com");
    assert_eq!(body["waitingOn"]["kind"], "opened");

    // Mailgun reports the open
    let response = client
        .post("/webhook/emailEvent")
        .json(&json!({ "event-data": { "event": "opened", "recipient": "ada@example.com" } }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["tracked"], true);
    assert_eq!(body["resumed"], json!([id]));

    let response = client.get(&format!("/api/workflows/{}", id)).await;
    let body: serde_json::Value = response.json();
    assert_eq!(body["state"], "Exhausted");
    assert_eq!(h.transport.recipients(), vec!["ada@example.com", "ada@example.com"]);

    // Test templates
    let response = client.get("/api/templates").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["templates"], json!(["welcome"]));

    // Test metrics
    let response = client.get("/metrics").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert!(response.text().contains("mailflow_workflows_submitted_total"));
}

#[tokio::test]
async fn test_rejected_workflows() {
    let templates = tempfile::tempdir().unwrap();
    let (client, h) = test_server(templates.path()).await;

    let response = client
        .post("/api/emailWorkflow")
        .json(&json!({
            "senderEmail": "sam@example.com",
            "workflow": [{ "type": "fax", "to": "x" }],
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "UnknownStepType");

    let response = client
        .post("/api/emailWorkflow")
        .json(&json!({
            "senderEmail": "sam@example.com",
            "workflow": [{ "type": "goto", "targetIndex": -1 }],
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "InvalidTarget");

    let response = client
        .post("/api/emailWorkflow")
        .json(&json!({ "senderEmail": " ", "workflow": [] }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    // Nothing was registered
    assert_eq!(h.engine.workflow_count().await, 0);

    let response = client.get("/api/workflows/999").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "NotFound");
}

#[tokio::test]
async fn test_failed_workflow_retry() {
    let templates = tempfile::tempdir().unwrap();
    let (client, h) = test_server(templates.path()).await;
    h.transport.set_failing(true);

    let response = client
        .post("/api/emailWorkflow")
        .json(&json!({
            "senderEmail": "sam@example.com",
            "workflow": [{ "type": "email", "to": "ada@example.com", "body": "<p>hi</p>" }],
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "TransportError");
    let id = body["workflowId"].as_u64().unwrap();

    h.transport.set_failing(false);
    let response = client.post(&format!("/api/workflows/{}/retry", id)).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["state"], "Exhausted");
}

#[tokio::test]
async fn test_webhook_ignores_untracked_events() {
    let templates = tempfile::tempdir().unwrap();
    let (client, h) = test_server(templates.path()).await;

    let response = client
        .post("/webhook/emailEvent")
        .json(&json!({ "event-data": { "event": "delivered", "recipient": "ada@example.com" } }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["tracked"], false);
    assert_eq!(h.engine.events().get("ada@example.com", EventKind::Opened), None);

    let response = client
        .post("/webhook/emailEvent")
        .json(&json!({ "event-data": { "event": "clicked", "recipient": "" } }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_create_contact() {
    let templates = tempfile::tempdir().unwrap();
    let (client, _h) = test_server(templates.path()).await;

    let response = client
        .post("/api/createContact")
        .json(&json!({ "name": "Grace", "email": "Grace@Example.com", "phone": "555-0100" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["message"], "Contact created/updated successfully");
    assert_eq!(body["contact"]["email"], "grace@example.com");
    let first_id = body["contact"]["id"].clone();

    // Same email updates the existing record
    let response = client
        .post("/api/createContact")
        .json(&json!({ "email": "grace@example.com" }))
        .await;
    let body: serde_json::Value = response.json();
    assert_eq!(body["contact"]["id"], first_id);
    assert_eq!(body["contact"]["name"], "Grace");

    let response = client
        .post("/api/createContact")
        .json(&json!({ "name": "Nobody", "email": "" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}
