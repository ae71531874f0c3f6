// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Caseworker and applicant JSON API.
//!
//! The acting user is named by the `X-ICMS-User` header (a user id). Every
//! handler loads that user, calls one service operation and returns the
//! updated process.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error};
use uuid::Uuid;

use crate::application::chief::{ChiefLicenceSummary, ChiefProgress};
use crate::application::variations::VariationDetails;
use crate::domain::access::{AccessRequest, AccessRequestType, AccessResponse};
use crate::domain::case::{CaseError, Decision};
use crate::domain::process::{Process, ProcessId, ProcessType, Task};
use crate::domain::user::{OrganisationId, User, UserId};
use crate::domain::workbasket::WorkbasketRow;
use crate::presentation::AppState;

pub const USER_HEADER: &str = "x-icms-user";

type Shared = Arc<AppState>;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    Unauthenticated(String),
    Case(CaseError),
}

impl From<CaseError> for ApiError {
    fn from(err: CaseError) -> Self {
        ApiError::Case(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, json!({ "error": msg })),
            ApiError::Case(err) => {
                let status = match err {
                    CaseError::NotFound(_) => StatusCode::NOT_FOUND,
                    CaseError::PermissionDenied(_) => StatusCode::FORBIDDEN,
                    CaseError::Validation(_) => StatusCode::BAD_REQUEST,
                    CaseError::Conflict(_) => StatusCode::CONFLICT,
                    CaseError::Integration(_) => StatusCode::BAD_GATEWAY,
                    CaseError::Process(_) | CaseError::Repository(_) | CaseError::Template(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                let body = match err {
                    CaseError::Validation(errors) => json!({
                        "error": "Validation failed",
                        "errors": errors.errors(),
                    }),
                    other => json!({ "error": other.to_string() }),
                };
                (status, body)
            }
        };

        if status.is_server_error() {
            error!(status = status.as_u16(), error = ?self, "Request failed");
        } else {
            debug!(status = status.as_u16(), error = ?self, "Request rejected");
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ============================================================================
// Acting user
// ============================================================================

/// The active user named by the `X-ICMS-User` header.
pub struct CurrentUser(pub User);

impl FromRequestParts<Shared> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Shared) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthenticated("Missing X-ICMS-User header".to_string()))?;
        let id = Uuid::parse_str(raw.trim())
            .map_err(|_| ApiError::Unauthenticated(format!("Invalid user id '{raw}'")))?;

        let user = state
            .services
            .ctx
            .users
            .find_by_id(UserId(id))
            .await
            .map_err(CaseError::from)?
            .filter(|user| user.is_active)
            .ok_or_else(|| ApiError::Unauthenticated(format!("Unknown user {id}")))?;
        Ok(CurrentUser(user))
    }
}

// ============================================================================
// Routes
// ============================================================================

pub fn routes() -> Router<Shared> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/workbasket", get(workbasket_handler))
        .route("/api/cases", post(create_application_handler))
        .route("/api/cases/{id}", get(get_case_handler))
        .route("/api/cases/{id}/tasks", get(tasks_handler))
        .route("/api/cases/{id}/export-countries", post(export_countries_handler))
        .route("/api/cases/{id}/cancel", post(cancel_handler))
        .route("/api/cases/{id}/submit", post(submit_handler))
        .route("/api/cases/{id}/acknowledge", post(acknowledge_handler))
        .route("/api/cases/{id}/take-ownership", post(take_ownership_handler))
        .route("/api/cases/{id}/release-ownership", post(release_ownership_handler))
        .route("/api/cases/{id}/decision", post(decision_handler))
        .route("/api/cases/{id}/variation-decision", post(variation_decision_handler))
        .route("/api/cases/{id}/licence-dates", post(licence_dates_handler))
        .route("/api/cases/{id}/stop", post(stop_handler))
        .route("/api/cases/{id}/authorisation/start", post(start_authorisation_handler))
        .route("/api/cases/{id}/authorisation/cancel", post(cancel_authorisation_handler))
        .route("/api/cases/{id}/authorisation/authorise-documents", post(authorise_documents_handler))
        .route("/api/cases/{id}/documents/retry", post(retry_documents_handler))
        .route("/api/cases/{id}/revoke", post(revoke_handler))
        .route("/api/cases/{id}/update-requests", post(open_update_request_handler))
        .route("/api/cases/{id}/update-requests/{request_id}/close", post(close_update_request_handler))
        .route("/api/cases/{id}/update-requests/{request_id}/start", post(start_update_request_handler))
        .route("/api/cases/{id}/update-requests/{request_id}/respond", post(respond_update_request_handler))
        .route("/api/cases/{id}/variations", post(request_variation_handler))
        .route("/api/cases/{id}/variations/cancel", post(cancel_variation_handler))
        .route("/api/cases/{id}/variations/request-update", post(variation_request_update_handler))
        .route("/api/cases/{id}/variations/respond", post(variation_respond_handler))
        .route("/api/cases/{id}/withdrawals", post(request_withdrawal_handler))
        .route("/api/cases/{id}/withdrawals/respond", post(respond_withdrawal_handler))
        .route("/api/cases/{id}/withdrawals/{withdrawal_id}/archive", post(archive_withdrawal_handler))
        .route("/api/cases/{id}/chief/resend", post(chief_resend_handler))
        .route("/api/cases/{id}/chief/revert", post(chief_revert_handler))
        .route("/api/cases/{id}/chief/progress", get(chief_progress_handler))
        .route("/api/cases/{id}/chief/bypass", post(chief_bypass_handler))
        .route("/api/access-requests", post(submit_access_request_handler))
        .route("/api/access-requests/{id}/link", post(link_access_request_handler))
        .route("/api/access-requests/{id}/close", post(close_access_request_handler))
        .route("/api/chief/pending", get(chief_pending_handler))
        .route("/api/chief/failed", get(chief_failed_handler))
        .route("/api/chief/requests/{icms_hmrc_id}", get(chief_request_data_handler))
}

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "icms",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateApplicationRequest {
    pub process_type: ProcessType,
    pub organisation: OrganisationId,
    pub agent: Option<OrganisationId>,
}

#[derive(Debug, Deserialize)]
pub struct ExportCountriesRequest {
    pub countries: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub decision: Decision,
    pub refuse_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LicenceDatesRequest {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct StopRequest {
    #[serde(default)]
    pub send_email: bool,
}

#[derive(Debug, Deserialize)]
pub struct OpenUpdateRequest {
    pub subject: String,
    pub detail: String,
}

#[derive(Debug, Deserialize)]
pub struct ResponseText {
    pub response: String,
}

#[derive(Debug, Deserialize)]
pub struct ReasonRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawalResponseRequest {
    pub accept: bool,
    pub response: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BypassRequest {
    pub success: bool,
}

#[derive(Debug, Deserialize)]
pub struct AccessRequestBody {
    pub request_type: AccessRequestType,
    pub organisation_name: String,
    pub organisation_address: String,
    pub organisation_registered_number: Option<String>,
    pub eori_number: Option<String>,
    pub agent_name: Option<String>,
    pub agent_address: Option<String>,
    pub request_reason: Option<String>,
}

impl From<AccessRequestBody> for AccessRequest {
    fn from(body: AccessRequestBody) -> Self {
        let mut request = AccessRequest::new(body.request_type, body.organisation_name, body.organisation_address);
        request.organisation_registered_number = body.organisation_registered_number;
        request.eori_number = body.eori_number;
        request.agent_name = body.agent_name;
        request.agent_address = body.agent_address;
        request.request_reason = body.request_reason;
        request
    }
}

#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    pub organisation: OrganisationId,
}

#[derive(Debug, Deserialize)]
pub struct CloseAccessRequest {
    pub response: AccessResponse,
    pub reason: Option<String>,
}

fn created(process: Process, id: Uuid) -> Json<Value> {
    Json(json!({ "id": id, "process": process }))
}

// ============================================================================
// Case progress
// ============================================================================

async fn workbasket_handler(State(state): State<Shared>, CurrentUser(user): CurrentUser) -> ApiResult<Vec<WorkbasketRow>> {
    Ok(Json(state.services.cases.workbasket(&user).await?))
}

async fn create_application_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<CreateApplicationRequest>,
) -> ApiResult<Process> {
    let process = state
        .services
        .cases
        .create_application(&user, body.process_type, body.organisation, body.agent)
        .await?;
    Ok(Json(process))
}

async fn get_case_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Process> {
    Ok(Json(state.services.cases.get_case(ProcessId(id), &user).await?))
}

async fn tasks_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<Task>> {
    let process = state.services.cases.get_case(ProcessId(id), &user).await?;
    Ok(Json(process.tasks().to_vec()))
}

async fn export_countries_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<ExportCountriesRequest>,
) -> ApiResult<Process> {
    let process = state
        .services
        .cases
        .set_export_countries(ProcessId(id), &user, body.countries)
        .await?;
    Ok(Json(process))
}

async fn cancel_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Process> {
    Ok(Json(state.services.cases.cancel(ProcessId(id), &user).await?))
}

async fn submit_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Process> {
    Ok(Json(state.services.cases.submit(ProcessId(id), &user).await?))
}

async fn acknowledge_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Process> {
    Ok(Json(state.services.cases.ack_notification(ProcessId(id), &user).await?))
}

async fn take_ownership_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Process> {
    Ok(Json(state.services.cases.take_ownership(ProcessId(id), &user).await?))
}

async fn release_ownership_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Process> {
    Ok(Json(state.services.cases.release_ownership(ProcessId(id), &user).await?))
}

async fn decision_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<DecisionRequest>,
) -> ApiResult<Process> {
    let process = state
        .services
        .cases
        .set_decision(ProcessId(id), &user, body.decision, body.refuse_reason)
        .await?;
    Ok(Json(process))
}

async fn variation_decision_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<DecisionRequest>,
) -> ApiResult<Process> {
    let process = state
        .services
        .cases
        .set_variation_decision(ProcessId(id), &user, body.decision, body.refuse_reason)
        .await?;
    Ok(Json(process))
}

async fn licence_dates_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<LicenceDatesRequest>,
) -> ApiResult<Process> {
    let process = state
        .services
        .cases
        .set_licence_dates(ProcessId(id), &user, body.start, body.end)
        .await?;
    Ok(Json(process))
}

async fn stop_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<StopRequest>,
) -> ApiResult<Process> {
    Ok(Json(state.services.cases.stop_case(ProcessId(id), &user, body.send_email).await?))
}

async fn start_authorisation_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Process> {
    Ok(Json(state.services.cases.start_authorisation(ProcessId(id), &user).await?))
}

async fn cancel_authorisation_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Process> {
    Ok(Json(state.services.cases.cancel_authorisation(ProcessId(id), &user).await?))
}

async fn authorise_documents_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Process> {
    Ok(Json(state.services.cases.authorise_documents(ProcessId(id), &user).await?))
}

async fn retry_documents_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Process> {
    Ok(Json(state.services.documents.retry_document_pack(ProcessId(id), &user).await?))
}

async fn revoke_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Process> {
    Ok(Json(state.services.cases.revoke_licence(ProcessId(id), &user).await?))
}

// ============================================================================
// Update requests, variations, withdrawals
// ============================================================================

async fn open_update_request_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<OpenUpdateRequest>,
) -> Result<Json<Value>, ApiError> {
    let (process, request_id) = state
        .services
        .update_requests
        .manage_update_requests(ProcessId(id), &user, body.subject, body.detail)
        .await?;
    Ok(created(process, request_id))
}

async fn close_update_request_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path((id, request_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Process> {
    let process = state
        .services
        .update_requests
        .close_update_request(ProcessId(id), &user, request_id)
        .await?;
    Ok(Json(process))
}

async fn start_update_request_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path((id, request_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Process> {
    let process = state
        .services
        .update_requests
        .start_update_request(ProcessId(id), &user, request_id)
        .await?;
    Ok(Json(process))
}

async fn respond_update_request_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path((id, request_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<ResponseText>,
) -> ApiResult<Process> {
    let process = state
        .services
        .update_requests
        .respond_update_request(ProcessId(id), &user, request_id, body.response)
        .await?;
    Ok(Json(process))
}

async fn request_variation_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(details): Json<VariationDetails>,
) -> Result<Json<Value>, ApiError> {
    let (process, variation_id) = state
        .services
        .variations
        .request_variation(ProcessId(id), &user, details)
        .await?;
    Ok(created(process, variation_id))
}

async fn cancel_variation_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<ReasonRequest>,
) -> ApiResult<Process> {
    let process = state
        .services
        .variations
        .cancel_variation_request(ProcessId(id), &user, body.reason)
        .await?;
    Ok(Json(process))
}

async fn variation_request_update_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<ReasonRequest>,
) -> ApiResult<Process> {
    let process = state
        .services
        .variations
        .variation_request_request_update(ProcessId(id), &user, body.reason)
        .await?;
    Ok(Json(process))
}

async fn variation_respond_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(details): Json<VariationDetails>,
) -> ApiResult<Process> {
    let process = state
        .services
        .variations
        .variation_request_respond(ProcessId(id), &user, details)
        .await?;
    Ok(Json(process))
}

async fn request_withdrawal_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<ReasonRequest>,
) -> Result<Json<Value>, ApiError> {
    let (process, withdrawal_id) = state
        .services
        .withdrawals
        .request_withdrawal(ProcessId(id), &user, body.reason)
        .await?;
    Ok(created(process, withdrawal_id))
}

async fn archive_withdrawal_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path((id, withdrawal_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Process> {
    let process = state
        .services
        .withdrawals
        .archive_withdrawal(ProcessId(id), &user, withdrawal_id)
        .await?;
    Ok(Json(process))
}

async fn respond_withdrawal_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<WithdrawalResponseRequest>,
) -> ApiResult<Process> {
    let process = state
        .services
        .withdrawals
        .respond_withdrawal(ProcessId(id), &user, body.accept, body.response)
        .await?;
    Ok(Json(process))
}

// ============================================================================
// Access requests
// ============================================================================

async fn submit_access_request_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<AccessRequestBody>,
) -> ApiResult<Process> {
    let process = state
        .services
        .access_requests
        .submit_access_request(&user, body.into())
        .await?;
    Ok(Json(process))
}

async fn link_access_request_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<LinkRequest>,
) -> ApiResult<Process> {
    let process = state
        .services
        .access_requests
        .link_access_request(ProcessId(id), &user, body.organisation)
        .await?;
    Ok(Json(process))
}

async fn close_access_request_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<CloseAccessRequest>,
) -> ApiResult<Process> {
    let process = state
        .services
        .access_requests
        .close_access_request(ProcessId(id), &user, body.response, body.reason)
        .await?;
    Ok(Json(process))
}

// ============================================================================
// CHIEF (caseworker side)
// ============================================================================

async fn chief_resend_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Process> {
    Ok(Json(state.services.chief.resend_licence(ProcessId(id), &user).await?))
}

async fn chief_revert_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Process> {
    Ok(Json(state.services.chief.revert_to_processing(ProcessId(id), &user).await?))
}

async fn chief_progress_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<ChiefProgress> {
    Ok(Json(state.services.chief.check_progress(ProcessId(id), &user).await?))
}

async fn chief_bypass_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<BypassRequest>,
) -> ApiResult<Process> {
    Ok(Json(state.services.chief.bypass(ProcessId(id), &user, body.success).await?))
}

async fn chief_pending_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Vec<ChiefLicenceSummary>> {
    Ok(Json(state.services.chief.pending_licences(&user).await?))
}

async fn chief_failed_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Vec<ChiefLicenceSummary>> {
    Ok(Json(state.services.chief.failed_licences(&user).await?))
}

async fn chief_request_data_handler(
    State(state): State<Shared>,
    CurrentUser(user): CurrentUser,
    Path(icms_hmrc_id): Path<Uuid>,
) -> ApiResult<Value> {
    Ok(Json(state.services.chief.request_data(icms_hmrc_id, &user).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::application::testing::{Harness, RecordingGateway, StubGenerator};
    use crate::application::IcmsServices;
    use crate::domain::case::ApplicationErrors;
    use crate::infrastructure::hawk::{HawkAuthenticator, HawkCredentials};
    use crate::presentation::app;

    fn router(harness: &Harness) -> Router {
        let services = IcmsServices::new(
            harness.ctx.clone(),
            Arc::new(StubGenerator),
            Arc::new(RecordingGateway::default()),
        );
        let hawk = HawkAuthenticator::new(
            HawkCredentials {
                id: "icms".to_string(),
                key: "shared-test-secret".to_string(),
            },
            60,
        );
        app(AppState { services, hawk })
    }

    fn request(method: &str, uri: &str, user: Option<&User>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_HEADER, user.id.0.to_string());
        }
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let harness = Harness::new().await;
        let (status, body) = send(&router(&harness), request("GET", "/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_missing_or_unknown_user_is_unauthenticated() {
        let harness = Harness::new().await;
        let router = router(&harness);

        let (status, _) = send(&router, request("GET", "/api/workbasket", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let stranger = User::new("stranger@example.com", "Str", "Anger");
        let (status, _) = send(&router, request("GET", "/api/workbasket", Some(&stranger), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_applicant_creates_and_submits_application() {
        let harness = Harness::new().await;
        let router = router(&harness);

        let (status, created) = send(
            &router,
            request(
                "POST",
                "/api/cases",
                Some(&harness.applicant),
                Some(json!({
                    "process_type": "SILApplication",
                    "organisation": harness.importer.id,
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created["status"], "IN_PROGRESS");
        let id = created["id"].as_str().unwrap().to_string();

        let (status, submitted) = send(
            &router,
            request("POST", &format!("/api/cases/{id}/submit"), Some(&harness.applicant), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(submitted["status"], "SUBMITTED");
        assert!(submitted["reference"].as_str().unwrap().starts_with("IMA/"));

        let (status, rows) = send(&router, request("GET", "/api/workbasket", Some(&harness.admin), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rows.as_array().unwrap().len(), 1);
        assert_eq!(rows[0]["process_id"], id.as_str());

        let (status, tasks) = send(
            &router,
            request("GET", &format!("/api/cases/{id}/tasks"), Some(&harness.admin), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(tasks.as_array().unwrap().len() >= 2);
    }

    #[tokio::test]
    async fn test_applicant_cannot_take_ownership() {
        let harness = Harness::new().await;
        let id = harness.submitted(ProcessType::SpecificIndividualLicence).await;

        let (status, body) = send(
            &router(&harness),
            request(
                "POST",
                &format!("/api/cases/{id}/take-ownership"),
                Some(&harness.applicant),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body["error"].as_str().unwrap().contains("Permission denied"));
    }

    #[tokio::test]
    async fn test_unknown_case_is_not_found() {
        let harness = Harness::new().await;
        let (status, _) = send(
            &router(&harness),
            request(
                "GET",
                &format!("/api/cases/{}", Uuid::new_v4()),
                Some(&harness.admin),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_caseworker_takes_ownership_and_decides() {
        let harness = Harness::new().await;
        let id = harness.submitted(ProcessType::SpecificIndividualLicence).await;
        let router = router(&harness);

        let (status, owned) = send(
            &router,
            request("POST", &format!("/api/cases/{id}/take-ownership"), Some(&harness.admin), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(owned["status"], "PROCESSING");
        assert_eq!(owned["case_owner"], harness.admin.id.0.to_string());

        let (status, _) = send(
            &router,
            request(
                "POST",
                &format!("/api/cases/{id}/decision"),
                Some(&harness.admin),
                Some(json!({ "decision": "APPROVE" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn test_validation_errors_are_listed() {
        let mut errors = ApplicationErrors::new();
        errors.add("Application details", "contact", "You must enter this item");
        let response = ApiError::from(CaseError::Validation(errors)).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_status_mapping() {
        let status = |err: CaseError| ApiError::from(err).into_response().status();
        assert_eq!(status(CaseError::Conflict("busy".into())), StatusCode::CONFLICT);
        assert_eq!(status(CaseError::Integration("down".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status(CaseError::Process(crate::domain::process::ProcessError::Task(
                "Expected one active task".into()
            ))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
