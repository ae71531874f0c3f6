// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! CHIEF Callback API
//!
//! Endpoints called by ICMS-HMRC. Every request must carry a valid Hawk
//! header; successful responses are signed with `Server-Authorization`.
//!
//! | Route | Body |
//! |-------|------|
//! | `POST /chief/license-data-callback` | `LicenceReplyData` |
//! | `POST /chief/usage-data-callback` | `UsageData` |
//! | `POST /chief/check-icms-connection` | `{"foo": "bar"}` |
//!
//! Failed authentication or an unreadable body is answered with `400 {}`,
//! a callback that cannot be applied with `422 {}`. Neither is signed.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, uri::Authority, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::domain::chief::{LicenceReplyData, UsageData};
use crate::infrastructure::chief_client::{HAWK_REQUEST_HEADER, HAWK_RESPONSE_HEADER};
use crate::infrastructure::hawk::{Artifacts, HawkRequest};
use crate::presentation::AppState;

type Shared = Arc<AppState>;

const JSON: &str = "application/json";
const SERVER_AUTHORIZATION: &str = "server-authorization";

pub fn routes() -> Router<Shared> {
    Router::new()
        .route("/chief/license-data-callback", post(licence_data_callback_handler))
        .route("/chief/usage-data-callback", post(usage_data_callback_handler))
        .route("/chief/check-icms-connection", post(check_connection_handler))
}

/// Pieces of the inbound request the Hawk MAC covers.
struct Inbound {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
}

impl Inbound {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Host and port as the sender saw them, from `Host` and the usual
    /// forwarding headers.
    fn host_and_port(&self) -> (String, u16) {
        let authority = self
            .uri
            .authority()
            .cloned()
            .or_else(|| self.header(header::HOST.as_str()).and_then(|h| h.parse::<Authority>().ok()));
        let host = authority.as_ref().map(|a| a.host().to_string()).unwrap_or_default();

        let port = authority
            .as_ref()
            .and_then(Authority::port_u16)
            .or_else(|| self.header("x-forwarded-port").and_then(|p| p.parse().ok()))
            .unwrap_or_else(|| match self.header("x-forwarded-proto") {
                Some(proto) if proto.eq_ignore_ascii_case("https") => 443,
                _ => 80,
            });
        (host, port)
    }

    fn authenticate(&self, state: &AppState) -> Result<Artifacts, Response> {
        let authorization = self
            .header(HAWK_REQUEST_HEADER)
            .or_else(|| self.header(header::AUTHORIZATION.as_str()));
        let (host, port) = self.host_and_port();
        let resource = self
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        state
            .hawk
            .authenticate(
                authorization,
                &HawkRequest {
                    method: self.method.as_str(),
                    resource,
                    host: &host,
                    port,
                    content_type: self.header(header::CONTENT_TYPE.as_str()).unwrap_or_default(),
                    body: &self.body,
                },
            )
            .map_err(|_| empty(StatusCode::BAD_REQUEST))
    }

    fn parse<T: DeserializeOwned>(&self) -> Result<T, Response> {
        serde_json::from_slice(&self.body).map_err(|e| {
            warn!(error = %e, path = %self.uri.path(), "Malformed CHIEF callback body");
            metrics::counter!("icms_chief_callbacks_total", "outcome" => "malformed").increment(1);
            empty(StatusCode::BAD_REQUEST)
        })
    }
}

fn empty(status: StatusCode) -> Response {
    (status, Json(json!({}))).into_response()
}

/// Serialises `body` and signs it against the request's Hawk artifacts.
fn signed(state: &AppState, artifacts: &Artifacts, status: StatusCode, body: Value) -> Response {
    let content = body.to_string().into_bytes();
    let signature = state
        .hawk
        .respond(artifacts, JSON, &content)
        .ok()
        .and_then(|header| HeaderValue::from_str(&header).ok());
    let Some(signature) = signature else {
        error!("Failed to sign CHIEF callback response");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    (
        status,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(JSON)),
            (header::HeaderName::from_static(SERVER_AUTHORIZATION), signature),
        ],
        content,
    )
        .into_response()
}

fn unprocessable(err: impl std::fmt::Display, callback: &str) -> Response {
    error!(error = %err, callback = callback, "CHIEF callback could not be applied");
    metrics::counter!("icms_chief_callbacks_total", "outcome" => "failed").increment(1);
    empty(StatusCode::UNPROCESSABLE_ENTITY)
}

async fn licence_data_callback_handler(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let inbound = Inbound {
        method,
        uri,
        headers,
        body,
    };
    let artifacts = match inbound.authenticate(&state) {
        Ok(artifacts) => artifacts,
        Err(response) => return response,
    };
    let reply: LicenceReplyData = match inbound.parse() {
        Ok(reply) => reply,
        Err(response) => return response,
    };

    let (accepted, rejected) = (reply.accepted.len(), reply.rejected.len());
    if let Err(e) = state.services.chief.licence_reply(reply).await {
        return unprocessable(e, "licence-data");
    }
    info!(accepted, rejected, "CHIEF licence reply applied");
    signed(&state, &artifacts, StatusCode::OK, json!({}))
}

async fn usage_data_callback_handler(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let inbound = Inbound {
        method,
        uri,
        headers,
        body,
    };
    let artifacts = match inbound.authenticate(&state) {
        Ok(artifacts) => artifacts,
        Err(response) => return response,
    };
    let usage: UsageData = match inbound.parse() {
        Ok(usage) => usage,
        Err(response) => return response,
    };

    match state.services.chief.usage_update(usage).await {
        Ok(updated) => {
            info!(updated, "CHIEF usage data applied");
            signed(&state, &artifacts, StatusCode::OK, json!({}))
        }
        Err(e) => unprocessable(e, "usage-data"),
    }
}

async fn check_connection_handler(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let inbound = Inbound {
        method,
        uri,
        headers,
        body,
    };
    let artifacts = match inbound.authenticate(&state) {
        Ok(artifacts) => artifacts,
        Err(response) => return response,
    };
    let data: Value = match serde_json::from_slice(&inbound.body) {
        Ok(data) => data,
        Err(e) => return unprocessable(e, "check-icms-connection"),
    };

    if data != json!({ "foo": "bar" }) {
        return signed(
            &state,
            &artifacts,
            StatusCode::BAD_REQUEST,
            json!({ "errors": format!("Invalid request data: {data}") }),
        );
    }
    signed(&state, &artifacts, StatusCode::OK, json!({ "bar": "foo" }))
}
