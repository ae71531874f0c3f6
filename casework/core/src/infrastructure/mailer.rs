// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mail delivery backends.
//!
//! - [`LogMailer`] writes messages to the log (development).
//! - [`NotifyMailer`] sends through GOV.UK Notify, one request per recipient.
//! - [`InMemoryMailer`] keeps messages for inspection in tests.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::application::notifications::{EmailMessage, Mailer, MailerError};

pub struct LogMailer {
    from: String,
}

impl LogMailer {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailerError> {
        info!(
            from = %self.from,
            to = ?message.to,
            template = %message.template,
            subject = %message.subject,
            "Email (log backend)"
        );
        debug!(body = %message.body, "Email body");
        Ok(())
    }
}

// ============================================================================
// GOV.UK Notify
// ============================================================================

/// Service id and secret carried in a Notify API key
/// (`{key_name}-{service_id}-{secret_key}`, both ids 36 characters).
#[derive(Debug, Clone, PartialEq, Eq)]
struct NotifyKey {
    service_id: String,
    secret: String,
}

impl NotifyKey {
    fn parse(api_key: &str) -> Result<Self, MailerError> {
        const UUID_LEN: usize = 36;
        let len = api_key.len();
        if len < UUID_LEN * 2 + 2 || !api_key.is_ascii() {
            return Err(MailerError::Configuration("Notify API key is malformed".to_string()));
        }
        Ok(Self {
            service_id: api_key[len - (UUID_LEN * 2 + 1)..len - (UUID_LEN + 1)].to_string(),
            secret: api_key[len - UUID_LEN..].to_string(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct NotifyClaims {
    iss: String,
    iat: i64,
}

#[derive(Serialize)]
struct NotifyEmailRequest<'a> {
    email_address: &'a str,
    template_id: &'a str,
    personalisation: NotifyPersonalisation<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference: Option<String>,
}

#[derive(Serialize)]
struct NotifyPersonalisation<'a> {
    subject: &'a str,
    body: &'a str,
}

/// Sends every message through one generic Notify template with `subject`
/// and `body` personalisation fields.
pub struct NotifyMailer {
    client: Client,
    base_url: String,
    key: NotifyKey,
    template_id: String,
}

impl NotifyMailer {
    pub fn new(base_url: impl Into<String>, api_key: &str, template_id: impl Into<String>) -> Result<Self, MailerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| MailerError::Configuration(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key: NotifyKey::parse(api_key)?,
            template_id: template_id.into(),
        })
    }

    fn bearer_token(&self) -> Result<String, MailerError> {
        let claims = NotifyClaims {
            iss: self.key.service_id.clone(),
            iat: Utc::now().timestamp(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.key.secret.as_bytes()),
        )
        .map_err(|e| MailerError::Configuration(format!("Failed to sign Notify token: {e}")))
    }
}

#[async_trait]
impl Mailer for NotifyMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailerError> {
        let url = format!("{}/v2/notifications/email", self.base_url);

        for recipient in &message.to {
            let request = NotifyEmailRequest {
                email_address: recipient,
                template_id: &self.template_id,
                personalisation: NotifyPersonalisation {
                    subject: &message.subject,
                    body: &message.body,
                },
                reference: message.process_id.map(|id| id.to_string()),
            };

            let response = self
                .client
                .post(&url)
                .bearer_auth(self.bearer_token()?)
                .json(&request)
                .send()
                .await
                .map_err(|e| MailerError::Transport(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(MailerError::Rejected {
                    status: status.as_u16(),
                    body,
                });
            }
            debug!(template = %message.template, "Notify accepted email");
        }
        Ok(())
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Default)]
pub struct InMemoryMailer {
    sent: Mutex<Vec<EmailMessage>>,
}

impl InMemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Mailer for InMemoryMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailerError> {
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, DecodingKey, Validation};
    use mockito::Matcher;

    use crate::domain::template::EmailTemplateCode;

    const SERVICE_ID: &str = "26785a09-ab16-4eb0-8407-a37497a57506";
    const SECRET: &str = "3d844edf-8d35-48ac-975b-e847b4f122b0";

    fn api_key() -> String {
        format!("icms_test-{SERVICE_ID}-{SECRET}")
    }

    fn message(to: &[&str]) -> EmailMessage {
        EmailMessage {
            template: EmailTemplateCode::ApplicationComplete,
            subject: "Application complete".to_string(),
            body: "Your application IMA/2026/00001 is complete".to_string(),
            to: to.iter().map(|s| s.to_string()).collect(),
            process_id: None,
        }
    }

    #[test]
    fn test_notify_key_parsing() {
        let key = NotifyKey::parse(&api_key()).unwrap();
        assert_eq!(key.service_id, SERVICE_ID);
        assert_eq!(key.secret, SECRET);
        assert!(NotifyKey::parse("too-short").is_err());
    }

    #[test]
    fn test_bearer_token_is_signed_with_secret() {
        let mailer = NotifyMailer::new("https://notify.example.com", &api_key(), "template").unwrap();
        let token = mailer.bearer_token().unwrap();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        let claims = decode::<NotifyClaims>(&token, &DecodingKey::from_secret(SECRET.as_bytes()), &validation)
            .unwrap()
            .claims;
        assert_eq!(claims.iss, SERVICE_ID);
    }

    #[tokio::test]
    async fn test_notify_sends_one_request_per_recipient() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v2/notifications/email")
            .match_header("authorization", Matcher::Regex("^Bearer ".to_string()))
            .match_body(Matcher::PartialJsonString(
                r#"{"template_id": "generic-template", "personalisation": {"subject": "Application complete"}}"#
                    .to_string(),
            ))
            .with_status(201)
            .with_body("{}")
            .expect(2)
            .create_async()
            .await;

        let mailer = NotifyMailer::new(server.url(), &api_key(), "generic-template").unwrap();
        mailer
            .send(&message(&["a@example.com", "b@example.com"]))
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_notify_rejection_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v2/notifications/email")
            .with_status(400)
            .with_body(r#"{"errors": [{"error": "BadRequestError"}]}"#)
            .create_async()
            .await;

        let mailer = NotifyMailer::new(server.url(), &api_key(), "generic-template").unwrap();
        match mailer.send(&message(&["a@example.com"])).await {
            Err(MailerError::Rejected { status, body }) => {
                assert_eq!(status, 400);
                assert!(body.contains("BadRequestError"));
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_in_memory_mailer_records_messages() {
        let mailer = InMemoryMailer::new();
        mailer.send(&message(&["a@example.com"])).await.unwrap();
        assert_eq!(mailer.sent().len(), 1);
    }
}
