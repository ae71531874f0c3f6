// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Update requests: the caseworker hands the application back to the
//! applicant (PROCESS → PREPARE) with a request for changes.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::application::context::{require_applicant, require_case_owner, CaseContext};
use crate::application::notifications::Placeholders;
use crate::domain::case::{ApplicationKind, CaseError};
use crate::domain::process::{Process, ProcessId, TaskType};
use crate::domain::requests::{UpdateRequest, UpdateRequestStatus};
use crate::domain::template::EmailTemplateCode;
use crate::domain::user::User;

pub struct UpdateRequestService {
    ctx: CaseContext,
}

impl UpdateRequestService {
    pub fn new(ctx: CaseContext) -> Self {
        Self { ctx }
    }

    /// Open an update request and return the case to the applicant.
    pub async fn manage_update_requests(
        &self,
        id: ProcessId,
        user: &User,
        subject: String,
        detail: String,
    ) -> Result<(Process, Uuid), CaseError> {
        let request = UpdateRequest::open(subject, detail.clone(), user.id);
        let request_id = request.id;

        let process = self
            .ctx
            .update(id, move |p| {
                require_case_owner(p, user)?;
                let task = p.current_task(TaskType::Process)?.id;
                let app = p.application_mut()?;
                if app.has_unclosed_update_request() {
                    return Err(CaseError::Conflict(
                        "Close the current update request before opening another".to_string(),
                    ));
                }
                app.update_requests.push(request);
                p.advance(task, TaskType::Prepare, None)?;
                Ok(())
            })
            .await?;

        info!(process_id = %id, %request_id, "Update request opened");

        let template = match process.application()?.kind {
            ApplicationKind::Import(_) => EmailTemplateCode::ImaAppUpdate,
            ApplicationKind::Export(_) => EmailTemplateCode::CaApplicationUpdateEmail,
        };
        self.ctx
            .notifier()
            .send_to_contacts(
                &process,
                template,
                Placeholders::from([("REQUEST_DETAIL", detail), ("CASE_OFFICER_NAME", user.full_name())]),
            )
            .await;

        Ok((process, request_id))
    }

    pub async fn close_update_request(
        &self,
        id: ProcessId,
        user: &User,
        request_id: Uuid,
    ) -> Result<Process, CaseError> {
        self.ctx
            .update(id, |p| {
                require_case_owner(p, user)?;
                p.current_task(TaskType::Process)?;
                let request = p
                    .application_mut()?
                    .update_request_mut(request_id)
                    .ok_or_else(|| CaseError::NotFound(format!("Update request {request_id}")))?;
                request.status = UpdateRequestStatus::Closed;
                request.closed_by = Some(user.id);
                request.closed_datetime = Some(Utc::now());
                Ok(())
            })
            .await
    }

    pub async fn start_update_request(
        &self,
        id: ProcessId,
        user: &User,
        request_id: Uuid,
    ) -> Result<Process, CaseError> {
        self.ctx
            .update(id, |p| {
                require_applicant(p, user)?;
                p.current_task(TaskType::Prepare)?;
                let request = p
                    .application_mut()?
                    .update_request_mut(request_id)
                    .ok_or_else(|| CaseError::NotFound(format!("Update request {request_id}")))?;
                if request.status != UpdateRequestStatus::Open {
                    return Err(CaseError::Conflict("The update request is not open".to_string()));
                }
                request.status = UpdateRequestStatus::UpdateInProgress;
                Ok(())
            })
            .await
    }

    pub async fn respond_update_request(
        &self,
        id: ProcessId,
        user: &User,
        request_id: Uuid,
        response: String,
    ) -> Result<Process, CaseError> {
        self.ctx
            .update(id, move |p| {
                require_applicant(p, user)?;
                p.current_task(TaskType::Prepare)?;
                let request = p
                    .application_mut()?
                    .update_request_mut(request_id)
                    .ok_or_else(|| CaseError::NotFound(format!("Update request {request_id}")))?;
                if !matches!(
                    request.status,
                    UpdateRequestStatus::UpdateInProgress | UpdateRequestStatus::Responded
                ) {
                    return Err(CaseError::Conflict("Start the update request before responding".to_string()));
                }
                request.status = UpdateRequestStatus::Responded;
                request.response_detail = Some(response);
                request.response_by = Some(user.id);
                request.response_datetime = Some(Utc::now());
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::case_progress::CaseProgressService;
    use crate::application::jobs::Job;
    use crate::application::testing::Harness;
    use crate::domain::process::{CaseStatus, ProcessType};

    #[tokio::test]
    async fn test_update_request_round_trip() {
        let mut h = Harness::new().await;
        let cases = CaseProgressService::new(h.ctx.clone());
        let service = UpdateRequestService::new(h.ctx.clone());
        let id = h.submitted(ProcessType::Textiles).await;
        cases.take_ownership(id, &h.admin).await.unwrap();

        let (process, request_id) = service
            .manage_update_requests(id, &h.admin, "Goods".into(), "Please correct the commodity code".into())
            .await
            .unwrap();
        assert_eq!(process.active_task_types(), vec![TaskType::Prepare]);
        assert_eq!(process.status, CaseStatus::Processing);
        match h.queued().as_slice() {
            [Job::SendEmail(message)] => {
                assert_eq!(message.template, EmailTemplateCode::ImaAppUpdate);
                assert!(message.body.contains("Please correct the commodity code"));
            }
            other => panic!("unexpected jobs {other:?}"),
        }

        assert!(matches!(
            service.respond_update_request(id, &h.applicant, request_id, "Done".into()).await,
            Err(CaseError::Conflict(_))
        ));
        service.start_update_request(id, &h.applicant, request_id).await.unwrap();
        service
            .respond_update_request(id, &h.applicant, request_id, "Corrected".into())
            .await
            .unwrap();

        let process = cases.submit(id, &h.applicant).await.unwrap();
        assert_eq!(process.status, CaseStatus::Processing);
        assert_eq!(process.active_task_types(), vec![TaskType::Process]);

        let process = service.close_update_request(id, &h.admin, request_id).await.unwrap();
        let request = &process.application().unwrap().update_requests[0];
        assert_eq!(request.status, UpdateRequestStatus::Closed);
        assert_eq!(request.response_detail.as_deref(), Some("Corrected"));
        assert_eq!(request.closed_by, Some(h.admin.id));
    }

    #[tokio::test]
    async fn test_submit_marks_started_request_responded() {
        let h = Harness::new().await;
        let cases = CaseProgressService::new(h.ctx.clone());
        let service = UpdateRequestService::new(h.ctx.clone());
        let id = h.submitted(ProcessType::Textiles).await;
        cases.take_ownership(id, &h.admin).await.unwrap();

        let (_, request_id) = service
            .manage_update_requests(id, &h.admin, "Goods".into(), "Add quantities".into())
            .await
            .unwrap();
        service.start_update_request(id, &h.applicant, request_id).await.unwrap();

        let process = cases.submit(id, &h.applicant).await.unwrap();
        let request = &process.application().unwrap().update_requests[0];
        assert_eq!(request.status, UpdateRequestStatus::Responded);
        assert_eq!(request.response_by, Some(h.applicant.id));
    }

    #[tokio::test]
    async fn test_only_one_unclosed_request() {
        let h = Harness::new().await;
        let cases = CaseProgressService::new(h.ctx.clone());
        let service = UpdateRequestService::new(h.ctx.clone());
        let id = h.submitted(ProcessType::Textiles).await;
        cases.take_ownership(id, &h.admin).await.unwrap();

        let (_, request_id) = service
            .manage_update_requests(id, &h.admin, "Goods".into(), "Add quantities".into())
            .await
            .unwrap();
        service.start_update_request(id, &h.applicant, request_id).await.unwrap();
        cases.submit(id, &h.applicant).await.unwrap();

        assert!(matches!(
            service
                .manage_update_requests(id, &h.admin, "Again".into(), "More changes".into())
                .await,
            Err(CaseError::Conflict(_))
        ));
    }
}
