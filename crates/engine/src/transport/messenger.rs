use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{DeliveryReport, Messenger};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessengerUser {
    client_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendPayload<'a> {
    platform: &'a str,
    recipient_id: &'a str,
    message_text: &'a str,
}

/// Broadcasts to every user known to the messenger backend.
///
/// Every request is bounded by `timeout`, and deliveries run concurrently so
/// a slow recipient only costs its own report.
pub struct HttpMessenger {
    client: reqwest::Client,
    backend_url: String,
}

impl HttpMessenger {
    pub fn new(backend_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            backend_url: backend_url.trim_end_matches('/').to_string(),
        })
    }

    async fn users(&self) -> Result<Vec<MessengerUser>> {
        let response = self
            .client
            .get(format!("{}/getUsers", self.backend_url))
            .send()
            .await
            .map_err(|e| Error::Broadcast(format!("failed to list messenger users: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Broadcast(format!(
                "messenger backend returned {} for user list",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Broadcast(format!("invalid messenger user list: {}", e)))
    }

    async fn deliver(&self, recipient_id: &str, message: &str) -> DeliveryReport {
        let payload = SendPayload {
            platform: "messenger",
            recipient_id,
            message_text: message,
        };

        let result = self
            .client
            .post(format!("{}/send", self.backend_url))
            .json(&payload)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => DeliveryReport::delivered(recipient_id),
            Ok(response) => DeliveryReport::failed(recipient_id, format!("status {}", response.status())),
            Err(e) => DeliveryReport::failed(recipient_id, e.to_string()),
        }
    }
}

#[async_trait]
impl Messenger for HttpMessenger {
    async fn broadcast(&self, message: &str) -> Result<Vec<DeliveryReport>> {
        let users = self.users().await?;
        info!("Broadcasting messenger message to {} users", users.len());

        let reports = join_all(users.iter().map(|user| self.deliver(&user.client_id, message))).await;
        for report in &reports {
            if let Some(error) = &report.error {
                warn!("Messenger delivery to {} failed: {}", report.recipient_id, error);
            }
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::{get, post}, Json, Router};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_partial_failure_does_not_fail_broadcast() {
        let sent: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let log = sent.clone();
        let router = Router::new()
            .route(
                "/getUsers",
                get(|| async { Json(json!([{ "clientId": "u1" }, { "clientId": "u2" }, { "clientId": "u3" }])) }),
            )
            .route(
                "/send",
                post(move |Json(body): Json<Value>| {
                    let log = log.clone();
                    async move {
                        let failing = body["recipientId"] == "u2";
                        log.lock().unwrap().push(body);
                        if failing {
                            http::StatusCode::BAD_GATEWAY
                        } else {
                            http::StatusCode::OK
                        }
                    }
                }),
            );
        let base = serve(router).await;

        let reports = HttpMessenger::new(&base, TIMEOUT)
            .unwrap()
            .broadcast("hello")
            .await
            .unwrap();

        assert_eq!(reports.len(), 3);
        assert!(reports[0].is_delivered());
        assert!(!reports[1].is_delivered());
        assert!(reports[2].is_delivered());

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0]["platform"], "messenger");
        assert_eq!(sent[0]["messageText"], "hello");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_broadcast_error() {
        let router = Router::new().route("/getUsers", get(|| async { http::StatusCode::INTERNAL_SERVER_ERROR }));
        let base = serve(router).await;

        let err = HttpMessenger::new(&base, TIMEOUT)
            .unwrap()
            .broadcast("hello")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Broadcast(_)));
    }

    #[tokio::test]
    async fn test_hung_recipient_does_not_block_others() {
        let sent: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let log = sent.clone();
        let router = Router::new()
            .route(
                "/getUsers",
                get(|| async { Json(json!([{ "clientId": "u1" }, { "clientId": "u2" }])) }),
            )
            .route(
                "/send",
                post(move |Json(body): Json<Value>| {
                    let log = log.clone();
                    async move {
                        let recipient = body["recipientId"].as_str().unwrap_or_default().to_string();
                        if recipient == "u1" {
                            tokio::time::sleep(Duration::from_secs(30)).await;
                        }
                        log.lock().unwrap().push(recipient);
                        http::StatusCode::OK
                    }
                }),
            );
        let base = serve(router).await;

        let started = Instant::now();
        let reports = HttpMessenger::new(&base, Duration::from_millis(300))
            .unwrap()
            .broadcast("hello")
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].recipient_id, "u1");
        assert!(!reports[0].is_delivered());
        assert!(reports[1].is_delivered());
        assert_eq!(*sent.lock().unwrap(), vec!["u2".to_string()]);
    }
}
