// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Variation requests reopen a COMPLETED case so the issued licence or
//! certificates can be changed. Only caseworkers raise them, for imports
//! and exports alike.

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::application::context::{require_applicant, require_case_owner, require_ilb_admin, CaseContext};
use crate::domain::case::CaseError;
use crate::domain::process::{CaseStatus, Process, ProcessId, TaskType};
use crate::domain::requests::{VariationRequest, VariationRequestStatus};
use crate::domain::user::User;

/// What the applicant wants changed.
#[derive(Debug, Clone, Deserialize)]
pub struct VariationDetails {
    pub what_varied: String,
    pub why_varied: Option<String>,
    pub when_varied: Option<NaiveDate>,
}

pub struct VariationService {
    ctx: CaseContext,
}

impl VariationService {
    pub fn new(ctx: CaseContext) -> Self {
        Self { ctx }
    }

    pub async fn request_variation(
        &self,
        id: ProcessId,
        user: &User,
        details: VariationDetails,
    ) -> Result<(Process, Uuid), CaseError> {
        let request = VariationRequest::open(details.what_varied, details.why_varied, details.when_varied, user.id);
        let request_id = request.id;

        let process = self
            .ctx
            .update(id, move |p| {
                require_ilb_admin(user)?;
                p.check_expected_status(&[CaseStatus::Completed])?;

                let app = p.application_mut()?;
                if app.open_variation_request().is_some() {
                    return Err(CaseError::Conflict("A variation request is already open".to_string()));
                }
                app.variation_requests.push(request);
                app.variation_no += 1;
                app.variation_decision = None;
                app.variation_refuse_reason = None;

                let ack: Vec<_> = p
                    .active_tasks()
                    .filter(|t| t.task_type == TaskType::Ack)
                    .map(|t| t.id)
                    .collect();
                for task in ack {
                    p.end_task(task, None)?;
                }

                p.case_owner = None;
                p.set_status(CaseStatus::VariationRequested);
                p.start_task(TaskType::Process, None, None)?;
                p.update_order_datetime();
                Ok(())
            })
            .await?;

        info!(process_id = %id, %request_id, "Variation requested");
        Ok((process, request_id))
    }

    pub async fn cancel_variation_request(
        &self,
        id: ProcessId,
        user: &User,
        reason: String,
    ) -> Result<Process, CaseError> {
        let process = self
            .ctx
            .update(id, move |p| {
                require_case_owner(p, user)?;
                let task = p.get_task(&[CaseStatus::VariationRequested], TaskType::Process)?.id;

                let app = p.application_mut()?;
                let request = app
                    .open_variation_request_mut()
                    .ok_or_else(|| CaseError::Conflict("The case has no open variation request".to_string()))?;
                request.reject_cancellation_reason = Some(reason);
                request.close(VariationRequestStatus::Cancelled, Some(user.id));
                // The cancelled variation issued nothing.
                app.variation_no = app.variation_no.saturating_sub(1);
                app.archive_draft_pack();

                let changes: Vec<_> = p
                    .active_tasks()
                    .filter(|t| t.task_type == TaskType::VrRequestChange)
                    .map(|t| t.id)
                    .collect();
                for change in changes {
                    p.end_task(change, None)?;
                }

                p.set_status(CaseStatus::Completed);
                p.end_task(task, Some(user.id))?;
                p.start_task(TaskType::Ack, Some(task), None)?;
                Ok(())
            })
            .await?;

        info!(process_id = %id, "Variation request cancelled");
        Ok(process)
    }

    /// Ask the applicant to change their variation request.
    pub async fn variation_request_request_update(
        &self,
        id: ProcessId,
        user: &User,
        reason: String,
    ) -> Result<Process, CaseError> {
        self.ctx
            .update(id, move |p| {
                require_case_owner(p, user)?;
                let task = p.get_task(&[CaseStatus::VariationRequested], TaskType::Process)?.id;
                let request = p
                    .application_mut()?
                    .open_variation_request_mut()
                    .ok_or_else(|| CaseError::Conflict("The case has no open variation request".to_string()))?;
                request.update_request_reason = Some(reason);
                p.start_task(TaskType::VrRequestChange, Some(task), None)?;
                Ok(())
            })
            .await
    }

    pub async fn variation_request_respond(
        &self,
        id: ProcessId,
        user: &User,
        details: VariationDetails,
    ) -> Result<Process, CaseError> {
        self.ctx
            .update(id, move |p| {
                require_applicant(p, user)?;
                let task = p
                    .get_task(&[CaseStatus::VariationRequested], TaskType::VrRequestChange)?
                    .id;
                let request = p
                    .application_mut()?
                    .open_variation_request_mut()
                    .ok_or_else(|| CaseError::Conflict("The case has no open variation request".to_string()))?;
                request.what_varied = details.what_varied;
                request.why_varied = details.why_varied;
                request.when_varied = details.when_varied;
                request.update_request_reason = None;
                p.end_task(task, Some(user.id))?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::case_progress::CaseProgressService;
    use std::sync::Arc;

    use crate::application::document_signing::DocumentSigningService;
    use crate::application::testing::{Harness, StubGenerator};
    use crate::domain::case::Decision;
    use crate::domain::process::ProcessType;

    fn details(what: &str) -> VariationDetails {
        VariationDetails {
            what_varied: what.to_string(),
            why_varied: Some("Shipment delayed".to_string()),
            when_varied: None,
        }
    }

    #[tokio::test]
    async fn test_import_variation_is_raised_by_caseworker() {
        let h = Harness::new().await;
        let service = VariationService::new(h.ctx.clone());
        let id = h.completed(ProcessType::Textiles).await;

        assert!(matches!(
            service.request_variation(id, &h.applicant, details("Extend")).await,
            Err(CaseError::PermissionDenied(_))
        ));

        let (process, _) = service.request_variation(id, &h.admin, details("Extend")).await.unwrap();
        assert_eq!(process.status, CaseStatus::VariationRequested);
        assert_eq!(process.active_task_types(), vec![TaskType::Process]);
        assert_eq!(process.case_owner, None);
        assert_eq!(process.application().unwrap().variation_no, 1);
    }

    #[tokio::test]
    async fn test_export_variation_is_raised_by_caseworker() {
        let h = Harness::new().await;
        let cases = CaseProgressService::new(h.ctx.clone());
        let service = VariationService::new(h.ctx.clone());

        let id = cases
            .create_application(&h.applicant, ProcessType::CertificateOfFreeSale, h.exporter.id, None)
            .await
            .unwrap()
            .id;
        cases
            .set_export_countries(id, &h.applicant, vec!["Japan".to_string()])
            .await
            .unwrap();
        cases.submit(id, &h.applicant).await.unwrap();
        cases.take_ownership(id, &h.admin).await.unwrap();
        cases.set_decision(id, &h.admin, Decision::Approve, None).await.unwrap();
        cases.start_authorisation(id, &h.admin).await.unwrap();
        cases.authorise_documents(id, &h.admin).await.unwrap();
        let process = DocumentSigningService::new(h.ctx.clone(), Arc::new(StubGenerator))
            .create_document_pack(id, h.admin.id)
            .await
            .unwrap();
        assert_eq!(process.status, CaseStatus::Completed);

        assert!(matches!(
            service.request_variation(id, &h.applicant, details("Add Korea")).await,
            Err(CaseError::PermissionDenied(_))
        ));
        let process = h.ctx.load(id).await.unwrap();
        assert_eq!(process.status, CaseStatus::Completed);
        assert!(process.application().unwrap().variation_requests.is_empty());

        let (process, _) = service.request_variation(id, &h.admin, details("Add Korea")).await.unwrap();
        assert_eq!(process.status, CaseStatus::VariationRequested);
        assert_eq!(process.application().unwrap().variation_no, 1);
    }

    #[tokio::test]
    async fn test_cancel_variation_restores_completed_case() {
        let h = Harness::new().await;
        let cases = CaseProgressService::new(h.ctx.clone());
        let service = VariationService::new(h.ctx.clone());
        let id = h.completed(ProcessType::Textiles).await;
        service.request_variation(id, &h.admin, details("Extend")).await.unwrap();
        cases.take_ownership(id, &h.admin).await.unwrap();

        let process = service
            .cancel_variation_request(id, &h.admin, "Raised in error".into())
            .await
            .unwrap();
        assert_eq!(process.status, CaseStatus::Completed);
        assert_eq!(process.active_task_types(), vec![TaskType::Ack]);

        let app = process.application().unwrap();
        assert_eq!(app.variation_no, 0);
        assert_eq!(app.variation_requests[0].status, VariationRequestStatus::Cancelled);
        assert!(app.draft_pack().is_none());
        assert!(app.active_pack().is_some());
    }

    #[tokio::test]
    async fn test_refused_import_variation_keeps_licence() {
        let h = Harness::new().await;
        let cases = CaseProgressService::new(h.ctx.clone());
        let service = VariationService::new(h.ctx.clone());
        let id = h.completed(ProcessType::Textiles).await;
        service.request_variation(id, &h.admin, details("Extend")).await.unwrap();

        let process = cases.take_ownership(id, &h.admin).await.unwrap();
        let app = process.application().unwrap();
        assert_eq!(
            app.draft_pack().unwrap().licence_end_date,
            app.active_pack().unwrap().licence_end_date
        );

        cases
            .set_variation_decision(id, &h.admin, Decision::Refuse, Some("Not justified".into()))
            .await
            .unwrap();
        let process = cases.start_authorisation(id, &h.admin).await.unwrap();

        assert_eq!(process.status, CaseStatus::Completed);
        assert!(process.active_task_types().is_empty());
        let request = &process.application().unwrap().variation_requests[0];
        assert_eq!(request.status, VariationRequestStatus::Rejected);
        assert_eq!(request.reject_cancellation_reason.as_deref(), Some("Not justified"));
    }

    #[tokio::test]
    async fn test_request_change_round_trip() {
        let h = Harness::new().await;
        let cases = CaseProgressService::new(h.ctx.clone());
        let service = VariationService::new(h.ctx.clone());
        let id = h.completed(ProcessType::Textiles).await;
        service.request_variation(id, &h.admin, details("Extend")).await.unwrap();
        cases.take_ownership(id, &h.admin).await.unwrap();

        let process = service
            .variation_request_request_update(id, &h.admin, "Give the new end date".into())
            .await
            .unwrap();
        assert!(process.has_active_task(TaskType::VrRequestChange));
        assert!(process.has_active_task(TaskType::Process));

        let process = service
            .variation_request_respond(id, &h.applicant, details("Extend to December"))
            .await
            .unwrap();
        assert!(!process.has_active_task(TaskType::VrRequestChange));
        let request = &process.application().unwrap().variation_requests[0];
        assert_eq!(request.what_varied, "Extend to December");
        assert_eq!(request.update_request_reason, None);
    }
}
