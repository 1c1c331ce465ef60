use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::{debug, info};

use super::Server;
use crate::{workflow::EventKind, Error, Result};

/// Mailgun tracking webhook body.
#[derive(Debug, Deserialize, Serialize)]
pub struct EmailEventPayload {
    #[serde(rename = "event-data")]
    pub event_data: EventData,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct EventData {
    pub event: String,
    #[serde(default)]
    pub recipient: String,
}

pub async fn email_event(
    State(server): State<Arc<Server>>,
    Json(payload): Json<EmailEventPayload>,
) -> Result<Json<JsonValue>> {
    let EventData { event, recipient } = payload.event_data;
    info!("Received email event: {} for recipient: {}", event, recipient);

    // Delivered, bounced and the rest are acknowledged but not tracked.
    let Ok(kind) = event.parse::<EventKind>() else {
        debug!("Ignoring {} event", event);
        return Ok(Json(json!({ "message": "Event received", "tracked": false })));
    };
    if recipient.trim().is_empty() {
        return Err(Error::Validation("event-data.recipient is required".to_string()));
    }

    let report = server.engine.report_event(&recipient, kind).await;
    Ok(Json(json!({
        "message": "Event received",
        "tracked": true,
        "newlyRecorded": report.newly_recorded,
        "resumed": report.resumed,
    })))
}
