use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Json,
};
use http::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::{error, info};

use super::Server;
use crate::{
    metrics::gather_metrics,
    store::ContactFields,
    workflow::{parse_workflow_payload, Attachment, SenderIdentity, WorkflowId},
    Error, Result,
};

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else if matches!(self, Error::NotFound(_)) {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        let body = json!({ "error": self.kind(), "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitWorkflowRequest {
    pub sender_email: String,
    #[serde(default)]
    pub sender_name: String,
    /// Step list, either inline or as a JSON-encoded string.
    pub workflow: JsonValue,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

pub async fn health() -> Json<JsonValue> {
    Json(json!({ "status": "healthy" }))
}

pub async fn submit_workflow(
    State(server): State<Arc<Server>>,
    Json(request): Json<SubmitWorkflowRequest>,
) -> Result<Response> {
    if request.sender_email.trim().is_empty() {
        return Err(Error::Validation("senderEmail is required".to_string()));
    }
    let steps = parse_workflow_payload(request.workflow)?;
    info!(
        "New workflow from {} with {} step(s)",
        request.sender_email,
        steps.len()
    );

    let sender = SenderIdentity {
        name: request.sender_name,
        email: request.sender_email,
    };
    let (id, result) = server.engine.submit(sender, steps, request.attachments).await;

    let response = match result {
        Ok(state) => (
            StatusCode::OK,
            Json(json!({
                "workflowId": id,
                "state": state,
                "message": "Workflow submitted successfully",
            })),
        ),
        Err(e) => {
            error!("Error processing workflow {}: {}", id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "workflowId": id,
                    "error": e.kind(),
                    "message": e.to_string(),
                })),
            )
        }
    };
    Ok(response.into_response())
}

pub async fn get_workflow(
    State(server): State<Arc<Server>>,
    Path(id): Path<u64>,
) -> Result<Json<JsonValue>> {
    let snapshot = server
        .engine
        .snapshot(WorkflowId(id))
        .await
        .ok_or_else(|| Error::NotFound(format!("workflow {}", id)))?;
    Ok(Json(serde_json::to_value(snapshot)?))
}

pub async fn retry_workflow(
    State(server): State<Arc<Server>>,
    Path(id): Path<u64>,
) -> Result<Json<JsonValue>> {
    let id = WorkflowId(id);
    let state = server.engine.run_to_suspension(id).await?;
    info!("Workflow {} is {} after retry", id, state);

    let snapshot = server
        .engine
        .snapshot(id)
        .await
        .ok_or_else(|| Error::NotFound(format!("workflow {}", id)))?;
    Ok(Json(serde_json::to_value(snapshot)?))
}

pub async fn list_templates(State(server): State<Arc<Server>>) -> Result<Json<JsonValue>> {
    let templates = server.templates.list().await?;
    Ok(Json(json!({ "templates": templates })))
}

pub async fn create_contact(
    State(server): State<Arc<Server>>,
    Json(fields): Json<ContactFields>,
) -> Result<Json<JsonValue>> {
    info!("Contact form submitted for {}", fields.email);
    let contact = server.contacts.upsert(fields, None).await?;
    Ok(Json(json!({
        "message": "Contact created/updated successfully",
        "contact": contact,
    })))
}

pub async fn metrics() -> Result<String> {
    gather_metrics()
}
