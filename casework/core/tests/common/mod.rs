// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared setup for the integration tests: in-memory repositories, a JSON
//! document store in a temp dir, a recording CHIEF gateway and the full
//! router.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use icms_core::application::chief::{ChiefClientError, ChiefGateway};
use icms_core::application::context::{CaseContext, CaseSettings};
use icms_core::application::jobs::{JobQueue, JobReceiver, JobRunner, RetryPolicy};
use icms_core::application::IcmsServices;
use icms_core::domain::chief::LicenceDataPayload;
use icms_core::domain::user::{OrgRole, Organisation, OrganisationKind, SystemPermission, User};
use icms_core::infrastructure::event_bus::EventBus;
use icms_core::infrastructure::hawk::{self, Artifacts, HawkAuthenticator, HawkCredentials, HawkRequest};
use icms_core::infrastructure::repositories::{
    InMemoryProcessRepository, InMemoryReferenceSequence, InMemoryUserRepository,
};
use icms_core::infrastructure::{InMemoryMailer, JsonDocumentGenerator, LocalDocumentStore};
use icms_core::presentation::{app, AppState};

pub const HOST: &str = "icms.example.com";
pub const JSON: &str = "application/json";

pub fn hawk_credentials() -> HawkCredentials {
    HawkCredentials {
        id: "icms-hmrc".to_string(),
        key: "integration-test-secret".to_string(),
    }
}

#[derive(Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<LicenceDataPayload>>,
}

impl RecordingGateway {
    pub fn sent(&self) -> Vec<LicenceDataPayload> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChiefGateway for RecordingGateway {
    async fn send_licence_data(&self, payload: &LicenceDataPayload) -> Result<(), ChiefClientError> {
        self.sent.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

pub struct TestApp {
    pub services: IcmsServices,
    pub router: Router,
    pub mailer: Arc<InMemoryMailer>,
    pub gateway: Arc<RecordingGateway>,
    pub admin: User,
    pub applicant: User,
    pub importer: Organisation,
    pub exporter: Organisation,
    pub documents: TempDir,
    runner: JobRunner,
    receiver: JobReceiver,
}

impl TestApp {
    pub async fn new() -> Self {
        let users = Arc::new(InMemoryUserRepository::new());
        let (jobs, receiver) = JobQueue::new();
        let ctx = CaseContext {
            processes: Arc::new(InMemoryProcessRepository::new()),
            users: users.clone(),
            sequences: Arc::new(InMemoryReferenceSequence::new()),
            jobs,
            event_bus: EventBus::default(),
            settings: CaseSettings {
                allow_bypass_chief: false,
                send_licence_to_chief: true,
            },
        };

        let documents = tempfile::tempdir().unwrap();
        let generator = JsonDocumentGenerator::new(LocalDocumentStore::new(documents.path()).unwrap());
        let gateway = Arc::new(RecordingGateway::default());
        let services = IcmsServices::new(ctx, Arc::new(generator), gateway.clone());

        let mailer = Arc::new(InMemoryMailer::new());
        let runner = JobRunner::new(
            services.job_handler(mailer.clone()),
            RetryPolicy {
                max_attempts: 1,
                delay: Duration::ZERO,
            },
        );

        let mut importer = Organisation::new(OrganisationKind::Importer, "Dovetail Imports");
        importer.eori_number = Some("GB123456789000".to_string());
        let exporter = Organisation::new(OrganisationKind::Exporter, "Northern Exports");
        services.ctx.users.save_organisation(&importer).await.unwrap();
        services.ctx.users.save_organisation(&exporter).await.unwrap();

        let mut admin = User::new("caseworker@example.com", "Case", "Worker");
        admin.grant(SystemPermission::IlbAdmin);
        services.ctx.users.save(&admin).await.unwrap();

        let mut applicant = User::new("applicant@example.com", "App", "Licant");
        applicant.grant(SystemPermission::ImporterAccess);
        applicant.grant(SystemPermission::ExporterAccess);
        applicant.add_membership(importer.id, OrgRole::Contact);
        applicant.add_membership(exporter.id, OrgRole::Contact);
        services.ctx.users.save(&applicant).await.unwrap();

        let router = app(AppState {
            services: services.clone(),
            hawk: HawkAuthenticator::new(hawk_credentials(), hawk::DEFAULT_TIMESTAMP_SKEW_SECONDS),
        });

        Self {
            services,
            router,
            mailer,
            gateway,
            admin,
            applicant,
            importer,
            exporter,
            documents,
            runner,
            receiver,
        }
    }

    /// Run every queued job, including the jobs they enqueue.
    pub async fn drain_jobs(&mut self) -> usize {
        self.runner.drain(&mut self.receiver).await
    }

    pub async fn call(&self, method: &str, uri: &str, user: &User, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-icms-user", user.id.0.to_string());
        let request = match body {
            Some(body) => builder
                .header("content-type", JSON)
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    /// POST `body` to a CHIEF callback with a valid Hawk header.
    pub async fn chief_callback(&self, path: &str, body: &Value) -> (StatusCode, Value, Option<String>, Artifacts) {
        let content = body.to_string();
        let (authorization, artifacts) = hawk::sign_request(
            &hawk_credentials(),
            &HawkRequest {
                method: "POST",
                resource: path,
                host: HOST,
                port: 80,
                content_type: JSON,
                body: content.as_bytes(),
            },
        )
        .unwrap();
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("host", HOST)
            .header("content-type", JSON)
            .header("hawk-authentication", authorization)
            .body(Body::from(content))
            .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let server_authorization = response
            .headers()
            .get("server-authorization")
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value, server_authorization, artifacts)
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }
}
