use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tracing::{debug, error};

use super::{OutboundEmail, Transport};
use crate::{config::MailgunConfig, Error, Result};

/// Sends email through the Mailgun messages API.
pub struct MailgunTransport {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl MailgunTransport {
    pub fn new(config: &MailgunConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            endpoint: format!(
                "{}/v3/{}/messages",
                config.base_url.trim_end_matches('/'),
                config.domain
            ),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn form_fields(message: &OutboundEmail) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("from", message.from.clone()),
            ("to", message.to.clone()),
            ("subject", message.subject.clone()),
            ("html", message.html_body.clone()),
        ];
        if message.tracking_enabled {
            fields.push(("o:tracking", "yes".to_string()));
            fields.push(("o:tracking-opens", "yes".to_string()));
            fields.push(("o:tracking-clicks", "yes".to_string()));
        }
        fields
    }

    async fn multipart_form(message: &OutboundEmail) -> Result<Form> {
        let mut form = Form::new();
        for (name, value) in Self::form_fields(message) {
            form = form.text(name, value);
        }
        for attachment in &message.attachments {
            let bytes = tokio::fs::read(&attachment.path).await.map_err(|e| {
                Error::Transport(format!(
                    "failed to read attachment {}: {}",
                    attachment.path, e
                ))
            })?;
            form = form.part(
                "attachment",
                Part::bytes(bytes).file_name(attachment.filename.clone()),
            );
        }
        Ok(form)
    }
}

#[async_trait]
impl Transport for MailgunTransport {
    async fn send_email(&self, message: OutboundEmail) -> Result<()> {
        debug!("Posting message for {} to {}", message.to, self.endpoint);

        let request = self
            .client
            .post(&self.endpoint)
            .basic_auth("api", Some(&self.api_key));

        let request = if message.attachments.is_empty() {
            request.form(&Self::form_fields(&message))
        } else {
            request.multipart(Self::multipart_form(&message).await?)
        };

        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(format!("failed to reach mail provider: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Mail provider rejected message to {}: {} {}", message.to, status, body);
            return Err(Error::Transport(format!(
                "mail provider returned {}: {}",
                status, body
            )));
        }

        Ok(())
    }
}
