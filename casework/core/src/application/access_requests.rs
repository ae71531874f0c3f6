// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Access requests: a user asks to act for an importer or exporter. A
//! caseworker links the request to an organisation and approves or refuses
//! it; approval grants the matching access permission.

use chrono::Utc;
use tracing::{error, info};

use crate::application::context::{require_ilb_admin, CaseContext};
use crate::application::notifications::Placeholders;
use crate::domain::access::{AccessRequest, AccessRequestType, AccessResponse};
use crate::domain::case::{ApplicationErrors, CaseDetail, CaseError};
use crate::domain::process::{CaseStatus, Process, ProcessId, TaskType};
use crate::domain::reference::{case_reference, case_reference_prefix};
use crate::domain::template::EmailTemplateCode;
use crate::domain::user::{OrgRole, OrganisationId, OrganisationKind, User};

pub struct AccessRequestService {
    ctx: CaseContext,
}

impl AccessRequestService {
    pub fn new(ctx: CaseContext) -> Self {
        Self { ctx }
    }

    pub async fn submit_access_request(&self, user: &User, request: AccessRequest) -> Result<Process, CaseError> {
        let process_type = request.request_type.process_type();
        let prefix = case_reference_prefix(process_type, Some(request.request_type))?;
        let (year, sequence) = self.ctx.next_in_year(prefix).await?;
        let organisation_name = request.organisation_name.clone();

        let mut process = Process::new(
            process_type,
            CaseStatus::Submitted,
            user.id,
            CaseDetail::AccessRequest(Box::new(request)),
        );
        process.reference = Some(case_reference(prefix, year, sequence));
        process.submitted_by = Some(user.id);
        process.submit_datetime = Some(Utc::now());
        process.start_task(TaskType::Process, None, Some(user.id))?;

        let process = self.ctx.insert(process).await?;
        let reference = process.reference.clone().unwrap_or_default();
        info!(process_id = %process.id, reference = %reference, "Access request submitted");

        self.ctx
            .notifier()
            .send_to_ilb_admins(
                process.id,
                EmailTemplateCode::AccessRequest,
                Placeholders::from([
                    ("REQUEST_REFERENCE", reference),
                    ("REQUESTER_NAME", user.full_name()),
                    ("ORGANISATION_NAME", organisation_name),
                ]),
            )
            .await;
        Ok(process)
    }

    pub async fn link_access_request(
        &self,
        id: ProcessId,
        user: &User,
        organisation: OrganisationId,
    ) -> Result<Process, CaseError> {
        require_ilb_admin(user)?;
        let org = self
            .ctx
            .users
            .find_organisation(organisation)
            .await?
            .ok_or_else(|| CaseError::NotFound(format!("Organisation {organisation}")))?;

        self.ctx
            .update(id, move |p| {
                p.get_task(&[CaseStatus::Submitted], TaskType::Process)?;
                let request = p.access_request_mut()?;
                let expected = match request.request_type {
                    AccessRequestType::ImporterAccess | AccessRequestType::AgentImporterAccess => {
                        OrganisationKind::Importer
                    }
                    AccessRequestType::ExporterAccess | AccessRequestType::AgentExporterAccess => {
                        OrganisationKind::Exporter
                    }
                };
                if org.kind != expected {
                    let mut errors = ApplicationErrors::new();
                    errors.add("Access Request", "Link", format!("{} is not an {expected:?}", org.name));
                    return Err(CaseError::Validation(errors));
                }
                request.link = Some(org.id);
                Ok(())
            })
            .await
    }

    pub async fn close_access_request(
        &self,
        id: ProcessId,
        user: &User,
        response: AccessResponse,
        reason: Option<String>,
    ) -> Result<Process, CaseError> {
        require_ilb_admin(user)?;

        let process = self
            .ctx
            .update(id, move |p| {
                let task = p.get_task(&[CaseStatus::Submitted], TaskType::Process)?.id;
                let request = p.access_request_mut()?;

                let mut errors = ApplicationErrors::new();
                match response {
                    AccessResponse::Approved if request.link.is_none() => errors.add(
                        "Access Request",
                        "Link",
                        "You must link an organisation before approving the access request",
                    ),
                    AccessResponse::Refused if reason.as_deref().map(str::trim).unwrap_or_default().is_empty() => {
                        errors.add("Access Request", "Response Reason", "You must enter this item")
                    }
                    _ => {}
                }
                errors.into_result()?;

                request.response = Some(response);
                request.response_reason = reason;
                request.closed_by = Some(user.id);
                request.closed_datetime = Some(Utc::now());
                p.set_status(CaseStatus::Closed);
                p.end_task(task, Some(user.id))?;
                p.finish();
                Ok(())
            })
            .await?;

        let request = process.access_request()?.clone();
        info!(process_id = %id, response = ?response, "Access request closed");

        let Some(submitter_id) = process.submitted_by else {
            return Ok(process);
        };
        let mut submitter = self.ctx.load_user(submitter_id).await?;

        if let (AccessResponse::Approved, Some(link)) = (response, request.link) {
            let role = if request.request_type.is_agent() {
                OrgRole::Agent
            } else {
                OrgRole::Contact
            };
            submitter.grant(request.request_type.granted_permission());
            submitter.add_membership(link, role);
            if let Err(e) = self.ctx.users.save(&submitter).await {
                error!(process_id = %id, user_id = %submitter.id, error = %e, "Failed to grant access");
                return Err(e.into());
            }
            info!(user_id = %submitter.id, organisation = %link, ?role, "Access granted");
        }

        let response_text = match response {
            AccessResponse::Approved => "approved",
            AccessResponse::Refused => "refused",
        };
        self.ctx.notifier().send(
            std::slice::from_ref(&submitter),
            EmailTemplateCode::AccessRequestClosed,
            &Placeholders::from([
                ("REQUEST_REFERENCE", process.reference.clone().unwrap_or_default()),
                ("ORGANISATION_NAME", request.organisation_name),
                ("RESPONSE", response_text.to_string()),
                ("RESPONSE_REASON", request.response_reason.unwrap_or_default()),
            ]),
            Some(process.id),
        );
        Ok(process)
    }
}
