// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Background document pack generation.
//!
//! Runs from [`Job::CreateDocumentPack`] once the caseworker has authorised
//! the documents. Rendering happens outside the process lock; the results are
//! attached to the draft pack in a second, short update.

use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::application::case_progress::{complete_application, notify_completed};
use crate::application::context::{require_ilb_admin, CaseContext};
use crate::application::jobs::Job;
use crate::domain::case::CaseError;
use crate::domain::document_pack::{DocumentGenerator, StoredDocument};
use crate::domain::process::{Process, ProcessId, TaskType};
use crate::domain::user::{User, UserId};

pub struct DocumentSigningService {
    ctx: CaseContext,
    generator: Arc<dyn DocumentGenerator>,
}

impl DocumentSigningService {
    pub fn new(ctx: CaseContext, generator: Arc<dyn DocumentGenerator>) -> Self {
        Self { ctx, generator }
    }

    /// Render every document of the draft pack, then move on to CHIEF or
    /// complete the case. A rendering failure parks the case on DOCUMENT_ERROR.
    pub async fn create_document_pack(&self, id: ProcessId, requested_by: UserId) -> Result<Process, CaseError> {
        let process = self.ctx.load(id).await?;
        process.current_task(TaskType::DocumentSigning)?;

        let app = process.application()?;
        let pack = app
            .draft_pack()
            .ok_or_else(|| CaseError::Conflict("The case has no draft licence".to_string()))?;

        let mut rendered: Vec<(Uuid, StoredDocument)> = Vec::with_capacity(pack.document_references.len());
        for reference in &pack.document_references {
            match self.generator.generate(&process, pack, reference).await {
                Ok(document) => rendered.push((reference.id, document)),
                Err(e) => {
                    error!(
                        process_id = %id,
                        document_type = ?reference.document_type,
                        error = %e,
                        "Document generation failed"
                    );
                    return self
                        .ctx
                        .update(id, |p| {
                            let task = p.current_task(TaskType::DocumentSigning)?.id;
                            p.advance(task, TaskType::DocumentError, None)?;
                            Ok(())
                        })
                        .await;
                }
            }
        }

        let sends_to_chief = app.sends_to_chief();
        let process = self
            .ctx
            .update(id, move |p| {
                let task = p.current_task(TaskType::DocumentSigning)?.id;
                let draft = p
                    .application_mut()?
                    .draft_pack_mut()
                    .ok_or_else(|| CaseError::Conflict("The case has no draft licence".to_string()))?;
                for (reference_id, document) in rendered {
                    if let Some(reference) = draft.document_references.iter_mut().find(|r| r.id == reference_id) {
                        reference.document = Some(document);
                    }
                }

                p.end_task(task, None)?;
                if sends_to_chief {
                    p.start_task(TaskType::ChiefWait, Some(task), None)?;
                } else {
                    complete_application(p, task, Some(requested_by))?;
                }
                Ok(())
            })
            .await?;

        if sends_to_chief {
            if self.ctx.settings.send_licence_to_chief {
                info!(process_id = %id, "Documents generated, sending licence to CHIEF");
                self.ctx.jobs.enqueue(Job::SendLicenceToChief {
                    process_id: id,
                    revoke: false,
                });
            } else {
                warn!(process_id = %id, "CHIEF sending is disabled; licence is waiting for a CHIEF reply");
            }
        } else {
            info!(process_id = %id, "Documents generated");
            notify_completed(&self.ctx.notifier(), &process).await;
        }

        Ok(process)
    }

    /// Try the documents again after a rendering failure.
    pub async fn retry_document_pack(&self, id: ProcessId, user: &User) -> Result<Process, CaseError> {
        require_ilb_admin(user)?;

        let process = self
            .ctx
            .update(id, |p| {
                let task = p.current_task(TaskType::DocumentError)?.id;
                p.advance(task, TaskType::DocumentSigning, Some(user.id))?;
                Ok(())
            })
            .await?;

        self.ctx.jobs.enqueue(Job::CreateDocumentPack {
            process_id: id,
            requested_by: user.id,
        });
        Ok(process)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::{FailingGenerator, Harness, StubGenerator};
    use crate::domain::process::{CaseStatus, ProcessType};

    #[tokio::test]
    async fn test_paper_licence_completes_without_chief() {
        let mut h = Harness::new().await;
        let id = h.authorised(ProcessType::Textiles).await;
        h.queued();

        let service = DocumentSigningService::new(h.ctx.clone(), Arc::new(StubGenerator));
        let process = service.create_document_pack(id, h.admin.id).await.unwrap();

        assert_eq!(process.status, CaseStatus::Completed);
        assert!(process.has_active_task(TaskType::Ack));
        let pack = process.application().unwrap().active_pack().unwrap();
        assert!(pack.document_references.iter().all(|r| r.document.is_some()));
        assert!(pack.case_completion_datetime.is_some());

        assert!(matches!(h.queued().as_slice(), [Job::SendEmail(_)]));
    }

    #[tokio::test]
    async fn test_electronic_licence_waits_for_chief() {
        let mut h = Harness::new().await;
        let id = h.authorised(ProcessType::SpecificIndividualLicence).await;
        h.queued();

        let service = DocumentSigningService::new(h.ctx.clone(), Arc::new(StubGenerator));
        let process = service.create_document_pack(id, h.admin.id).await.unwrap();

        assert_eq!(process.status, CaseStatus::Processing);
        assert_eq!(process.active_task_types(), vec![TaskType::ChiefWait]);
        assert!(matches!(
            h.queued().as_slice(),
            [Job::SendLicenceToChief { revoke: false, .. }]
        ));
    }

    #[tokio::test]
    async fn test_generation_failure_parks_case() {
        let mut h = Harness::new().await;
        let id = h.authorised(ProcessType::Textiles).await;
        h.queued();

        let failing = DocumentSigningService::new(h.ctx.clone(), Arc::new(FailingGenerator));
        let process = failing.create_document_pack(id, h.admin.id).await.unwrap();
        assert_eq!(process.active_task_types(), vec![TaskType::DocumentError]);

        let service = DocumentSigningService::new(h.ctx.clone(), Arc::new(StubGenerator));
        let process = service.retry_document_pack(id, &h.admin).await.unwrap();
        assert_eq!(process.active_task_types(), vec![TaskType::DocumentSigning]);
        assert!(matches!(h.queued().as_slice(), [Job::CreateDocumentPack { .. }]));
    }

    #[tokio::test]
    async fn test_stale_job_is_rejected() {
        let h = Harness::new().await;
        let id = h.submitted(ProcessType::Textiles).await;

        let service = DocumentSigningService::new(h.ctx.clone(), Arc::new(StubGenerator));
        assert!(matches!(
            service.create_document_pack(id, h.admin.id).await,
            Err(CaseError::Process(_))
        ));
    }
}
