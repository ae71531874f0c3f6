// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod access_requests;
pub mod case_progress;
pub mod chief;
pub mod context;
pub mod document_signing;
pub mod jobs;
pub mod notifications;
pub mod update_requests;
pub mod variations;
pub mod withdrawals;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::domain::document_pack::DocumentGenerator;
use access_requests::AccessRequestService;
use case_progress::CaseProgressService;
use chief::{ChiefGateway, ChiefService};
use context::CaseContext;
use document_signing::DocumentSigningService;
use jobs::{Job, JobError, JobHandler};
use notifications::Mailer;
use update_requests::UpdateRequestService;
use variations::VariationService;
use withdrawals::WithdrawalService;

/// Every case service, sharing one [`CaseContext`].
#[derive(Clone)]
pub struct IcmsServices {
    pub ctx: CaseContext,
    pub cases: Arc<CaseProgressService>,
    pub update_requests: Arc<UpdateRequestService>,
    pub variations: Arc<VariationService>,
    pub withdrawals: Arc<WithdrawalService>,
    pub access_requests: Arc<AccessRequestService>,
    pub documents: Arc<DocumentSigningService>,
    pub chief: Arc<ChiefService>,
}

impl IcmsServices {
    pub fn new(ctx: CaseContext, generator: Arc<dyn DocumentGenerator>, gateway: Arc<dyn ChiefGateway>) -> Self {
        Self {
            cases: Arc::new(CaseProgressService::new(ctx.clone())),
            update_requests: Arc::new(UpdateRequestService::new(ctx.clone())),
            variations: Arc::new(VariationService::new(ctx.clone())),
            withdrawals: Arc::new(WithdrawalService::new(ctx.clone())),
            access_requests: Arc::new(AccessRequestService::new(ctx.clone())),
            documents: Arc::new(DocumentSigningService::new(ctx.clone(), generator)),
            chief: Arc::new(ChiefService::new(ctx.clone(), gateway)),
            ctx,
        }
    }

    pub fn job_handler(&self, mailer: Arc<dyn Mailer>) -> Arc<dyn JobHandler> {
        Arc::new(CaseJobHandler {
            mailer,
            documents: self.documents.clone(),
            chief: self.chief.clone(),
        })
    }
}

/// Runs queued jobs against the case services.
pub struct CaseJobHandler {
    mailer: Arc<dyn Mailer>,
    documents: Arc<DocumentSigningService>,
    chief: Arc<ChiefService>,
}

#[async_trait]
impl JobHandler for CaseJobHandler {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        match job {
            Job::SendEmail(message) => {
                let result = self.mailer.send(message).await;
                let outcome = if result.is_ok() { "sent" } else { "failed" };
                metrics::counter!("icms_emails_total", "outcome" => outcome).increment(1);
                result?;
                info!(template = %message.template, recipients = message.to.len(), "Email sent");
            }
            Job::CreateDocumentPack {
                process_id,
                requested_by,
            } => {
                self.documents.create_document_pack(*process_id, *requested_by).await?;
            }
            Job::SendLicenceToChief { process_id, revoke } => {
                self.chief.send_licence(*process_id, *revoke).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for the service tests.

    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{Days, Utc};

    use super::*;
    use crate::application::context::CaseSettings;
    use crate::application::jobs::{JobQueue, JobReceiver};
    use crate::domain::case::Decision;
    use crate::domain::chief::LicenceDataPayload;
    use crate::domain::document_pack::{CaseDocumentReference, DocumentError, DocumentPack, StoredDocument};
    use crate::domain::process::{Process, ProcessId, ProcessType};
    use crate::domain::repository::UserRepository;
    use crate::domain::user::{OrgRole, Organisation, OrganisationKind, SystemPermission, User};
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::repositories::{
        InMemoryProcessRepository, InMemoryReferenceSequence, InMemoryUserRepository,
    };
    use chief::ChiefClientError;

    pub(crate) struct Harness {
        pub ctx: CaseContext,
        pub receiver: JobReceiver,
        pub admin: User,
        pub applicant: User,
        pub importer: Organisation,
        pub exporter: Organisation,
    }

    impl Harness {
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
                    allow_bypass_chief: true,
                    send_licence_to_chief: true,
                },
            };

            let mut importer = Organisation::new(OrganisationKind::Importer, "Dovetail Imports");
            importer.eori_number = Some("GB123456789000".to_string());
            let exporter = Organisation::new(OrganisationKind::Exporter, "Northern Exports");
            users.save_organisation(&importer).await.unwrap();
            users.save_organisation(&exporter).await.unwrap();

            let mut admin = User::new("caseworker@example.com", "Case", "Worker");
            admin.grant(SystemPermission::IlbAdmin);
            users.save(&admin).await.unwrap();

            let mut applicant = User::new("applicant@example.com", "App", "Licant");
            applicant.grant(SystemPermission::ImporterAccess);
            applicant.grant(SystemPermission::ExporterAccess);
            applicant.add_membership(importer.id, OrgRole::Contact);
            applicant.add_membership(exporter.id, OrgRole::Contact);
            users.save(&applicant).await.unwrap();

            Self {
                ctx,
                receiver,
                admin,
                applicant,
                importer,
                exporter,
            }
        }

        /// Jobs queued since the last call.
        pub fn queued(&mut self) -> Vec<Job> {
            let mut jobs = Vec::new();
            while let Ok(job) = self.receiver.try_recv() {
                jobs.push(job);
            }
            jobs
        }

        pub async fn new_user(&self, email: &str) -> User {
            let user = User::new(email, "New", "User");
            self.ctx.users.save(&user).await.unwrap();
            user
        }

        pub async fn another_admin(&self) -> User {
            let mut user = User::new("second.caseworker@example.com", "Second", "Worker");
            user.grant(SystemPermission::IlbAdmin);
            self.ctx.users.save(&user).await.unwrap();
            user
        }

        pub async fn submitted(&self, process_type: ProcessType) -> ProcessId {
            let cases = CaseProgressService::new(self.ctx.clone());
            let organisation = match process_type.specific_kind().unwrap() {
                crate::domain::process::ProcessKind::ExportApplication => self.exporter.id,
                _ => self.importer.id,
            };
            let process = cases
                .create_application(&self.applicant, process_type, organisation, None)
                .await
                .unwrap();
            cases.submit(process.id, &self.applicant).await.unwrap();
            process.id
        }

        /// Approved import on the AUTHORISE task with DOCUMENT_SIGNING next.
        pub async fn authorised(&self, process_type: ProcessType) -> ProcessId {
            let cases = CaseProgressService::new(self.ctx.clone());
            let id = self.submitted(process_type).await;
            cases.take_ownership(id, &self.admin).await.unwrap();
            cases
                .set_decision(id, &self.admin, Decision::Approve, None)
                .await
                .unwrap();
            let today = Utc::now().date_naive();
            cases
                .set_licence_dates(id, &self.admin, today, today + Days::new(180))
                .await
                .unwrap();
            cases.start_authorisation(id, &self.admin).await.unwrap();
            cases.authorise_documents(id, &self.admin).await.unwrap();
            id
        }

        pub async fn at_chief_wait(&mut self, process_type: ProcessType) -> ProcessId {
            let id = self.authorised(process_type).await;
            DocumentSigningService::new(self.ctx.clone(), Arc::new(StubGenerator))
                .create_document_pack(id, self.admin.id)
                .await
                .unwrap();
            self.queued();
            id
        }

        /// Paper licence issued and awaiting acknowledgement.
        pub async fn completed(&self, process_type: ProcessType) -> ProcessId {
            let id = self.authorised(process_type).await;
            DocumentSigningService::new(self.ctx.clone(), Arc::new(StubGenerator))
                .create_document_pack(id, self.admin.id)
                .await
                .unwrap();
            id
        }
    }

    pub(crate) struct StubGenerator;

    #[async_trait]
    impl DocumentGenerator for StubGenerator {
        async fn generate(
            &self,
            process: &Process,
            _pack: &DocumentPack,
            reference: &CaseDocumentReference,
        ) -> Result<StoredDocument, DocumentError> {
            Ok(StoredDocument {
                key: format!("{}/{}.json", process.id, reference.id),
                filename: format!("{}.json", reference.id),
                content_type: "application/json".to_string(),
                file_size: 2,
                created: Utc::now(),
            })
        }
    }

    pub(crate) struct FailingGenerator;

    #[async_trait]
    impl DocumentGenerator for FailingGenerator {
        async fn generate(
            &self,
            _process: &Process,
            _pack: &DocumentPack,
            _reference: &CaseDocumentReference,
        ) -> Result<StoredDocument, DocumentError> {
            Err(DocumentError::Storage("disk full".to_string()))
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingGateway {
        sent: Mutex<Vec<LicenceDataPayload>>,
        fail: bool,
    }

    impl RecordingGateway {
        pub fn failing() -> Self {
            Self {
                sent: Mutex::default(),
                fail: true,
            }
        }

        pub fn last(&self) -> Option<LicenceDataPayload> {
            self.sent.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl ChiefGateway for RecordingGateway {
        async fn send_licence_data(&self, payload: &LicenceDataPayload) -> Result<(), ChiefClientError> {
            self.sent.lock().unwrap().push(payload.clone());
            if self.fail {
                Err(ChiefClientError::Transport("connection refused".to_string()))
            } else {
                Ok(())
            }
        }
    }
}
