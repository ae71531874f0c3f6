// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! ICMS-HMRC Client
//!
//! Sends licence data to ICMS-HMRC, which relays it to CHIEF. Requests are
//! Hawk-signed with the shared credentials and the `Server-Authorization`
//! header of every successful reply is verified before the send counts.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Outbound half of the CHIEF integration
//! - **Integration:** `ChiefService` → `ChiefGateway` → ICMS-HMRC HTTP API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use tracing::{debug, info, warn};

use crate::application::chief::{ChiefClientError, ChiefGateway};
use crate::domain::chief::LicenceDataPayload;
use crate::infrastructure::hawk::{self, HawkCredentials, HawkRequest};

pub const HAWK_REQUEST_HEADER: &str = "Hawk-Authentication";
pub const HAWK_RESPONSE_HEADER: &str = "Server-Authorization";

const JSON: &str = "application/json";

pub struct ChiefClient {
    client: Client,
    endpoint: Url,
    credentials: HawkCredentials,
}

impl ChiefClient {
    pub fn new(
        base_url: &str,
        update_licence_path: &str,
        credentials: HawkCredentials,
        timeout: Duration,
    ) -> Result<Self, ChiefClientError> {
        let endpoint = Url::parse(base_url)
            .and_then(|base| base.join(update_licence_path))
            .map_err(|e| ChiefClientError::Transport(format!("Invalid ICMS-HMRC URL {base_url}: {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChiefClientError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            credentials,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn resource(&self) -> String {
        match self.endpoint.query() {
            Some(query) => format!("{}?{}", self.endpoint.path(), query),
            None => self.endpoint.path().to_string(),
        }
    }
}

#[async_trait]
impl ChiefGateway for ChiefClient {
    async fn send_licence_data(&self, payload: &LicenceDataPayload) -> Result<(), ChiefClientError> {
        let body = serde_json::to_vec(payload)
            .map_err(|e| ChiefClientError::Transport(format!("Failed to encode licence data: {e}")))?;

        let host = self.endpoint.host_str().unwrap_or_default().to_string();
        let port = self.endpoint.port_or_known_default().unwrap_or(80);
        let resource = self.resource();
        let (authorization, artifacts) = hawk::sign_request(
            &self.credentials,
            &HawkRequest {
                method: "POST",
                resource: &resource,
                host: &host,
                port,
                content_type: JSON,
                body: &body,
            },
        )
        .map_err(|e| ChiefClientError::Authentication(e.to_string()))?;

        debug!(url = %self.endpoint, licence_id = %payload.licence.id, "Sending licence data to ICMS-HMRC");
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, JSON)
            .header(HAWK_REQUEST_HEADER, authorization)
            .body(body)
            .send()
            .await
            .map_err(|e| ChiefClientError::Transport(e.to_string()))?;

        let status = response.status();
        let server_authorization = response
            .headers()
            .get(HAWK_RESPONSE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let reply = response
            .bytes()
            .await
            .map_err(|e| ChiefClientError::Transport(e.to_string()))?;

        if !status.is_success() {
            let body = String::from_utf8_lossy(&reply).into_owned();
            warn!(status = status.as_u16(), body = %body, "ICMS-HMRC rejected licence data");
            return Err(ChiefClientError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        hawk::verify_response(
            &self.credentials,
            &artifacts,
            server_authorization.as_deref(),
            &content_type,
            &reply,
        )
        .map_err(|e| ChiefClientError::Authentication(e.to_string()))?;

        info!(licence_id = %payload.licence.id, reference = %payload.licence.reference, "Licence data accepted by ICMS-HMRC");
        Ok(())
    }
}

/// Used when no ICMS-HMRC URL is configured; every send fails, parking the
/// licence on CHIEF_ERROR.
pub struct DisabledChiefGateway;

#[async_trait]
impl ChiefGateway for DisabledChiefGateway {
    async fn send_licence_data(&self, payload: &LicenceDataPayload) -> Result<(), ChiefClientError> {
        warn!(licence_id = %payload.licence.id, "CHIEF integration is not configured");
        Err(ChiefClientError::Transport("ICMS-HMRC URL is not configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use mockito::Matcher;
    use uuid::Uuid;

    use crate::domain::chief::{LicenceData, LicenceDataType, OrganisationData};

    fn credentials() -> HawkCredentials {
        HawkCredentials {
            id: "icms".to_string(),
            key: "shared-test-secret".to_string(),
        }
    }

    fn payload() -> LicenceDataPayload {
        LicenceDataPayload {
            licence: LicenceData {
                licence_type: LicenceDataType::Create,
                action: "insert".to_string(),
                id: Uuid::new_v4(),
                reference: "IMA/2026/00001".to_string(),
                case_reference: "IMA/2026/00001".to_string(),
                licence_reference: "GBSIL0000001C".to_string(),
                start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                end_date: NaiveDate::from_ymd_opt(2026, 6, 30).unwrap(),
                organisation: OrganisationData {
                    eori_number: "GB123456789000".to_string(),
                    name: "Dovetail Imports".to_string(),
                    address: None,
                },
                restrictions: None,
            },
        }
    }

    fn client(url: &str) -> ChiefClient {
        ChiefClient::new(url, "/mail/update-licence/", credentials(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_signed_request_is_sent_to_update_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/mail/update-licence/")
            .match_header("hawk-authentication", Matcher::Regex(r#"^Hawk id="icms", ts="\d+""#.to_string()))
            .match_header("content-type", JSON)
            .match_body(Matcher::PartialJsonString(
                r#"{"licence": {"type": "CREATE", "action": "insert", "licence_reference": "GBSIL0000001C"}}"#
                    .to_string(),
            ))
            .with_status(200)
            .with_header("content-type", JSON)
            .with_body("{}")
            .create_async()
            .await;

        // The mock cannot sign its reply, so the send fails response verification.
        let result = client(&server.url()).send_licence_data(&payload()).await;
        assert!(matches!(result, Err(ChiefClientError::Authentication(_))));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/mail/update-licence/")
            .with_status(400)
            .with_body(r#"{"errors": ["bad licence"]}"#)
            .create_async()
            .await;

        match client(&server.url()).send_licence_data(&payload()).await {
            Err(ChiefClientError::Rejected { status, body }) => {
                assert_eq!(status, 400);
                assert!(body.contains("bad licence"));
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let result = client("http://127.0.0.1:1").send_licence_data(&payload()).await;
        assert!(matches!(result, Err(ChiefClientError::Transport(_))));
    }

    #[tokio::test]
    async fn test_disabled_gateway_always_fails() {
        let result = DisabledChiefGateway.send_licence_data(&payload()).await;
        assert!(matches!(result, Err(ChiefClientError::Transport(_))));
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let client = client("https://icms-hmrc.example.com");
        assert_eq!(
            client.endpoint().as_str(),
            "https://icms-hmrc.example.com/mail/update-licence/"
        );
        assert_eq!(client.resource(), "/mail/update-licence/");
    }
}
