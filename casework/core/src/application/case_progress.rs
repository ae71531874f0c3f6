// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Case Progress
//!
//! The main life cycle of an application: prepare, submit, process,
//! authorise, and (through [`super::document_signing`] and [`super::chief`])
//! complete. Every transition re-checks the task log inside the process
//! lock, so two caseworkers racing on the same case cannot both win.
//!
//! Reference numbers are allocated before the update runs. A transition that
//! then fails leaves a gap in the sequence, which is acceptable.

use chrono::{Months, NaiveDate, Utc};
use tracing::{info, warn};

use crate::application::context::{require_applicant, require_case_owner, require_ilb_admin, CaseContext};
use crate::application::jobs::Job;
use crate::application::notifications::{Notifier, Placeholders};
use crate::domain::case::{Application, ApplicationErrors, ApplicationKind, CaseDetail, CaseError, Decision};
use crate::domain::document_pack::{CaseDocumentReference, DocumentType, PackStatus};
use crate::domain::events::CaseEvent;
use crate::domain::process::{CaseStatus, Process, ProcessError, ProcessId, ProcessType, TaskId, TaskType};
use crate::domain::reference::{
    case_reference, case_reference_prefix, certificate_reference, electronic_licence_reference,
    paper_licence_reference, variation_case_reference,
};
use crate::domain::requests::{UpdateRequestStatus, VariationRequestStatus};
use crate::domain::template::EmailTemplateCode;
use crate::domain::user::{OrganisationId, User, UserId};
use crate::domain::workbasket::{workbasket_row, WorkbasketRow};

/// Sequence shared by every electronic licence, whatever the year.
pub const ELECTRONIC_LICENCE_SEQUENCE: &str = "ELECTRONIC_LICENCE";
pub const PAPER_LICENCE_SEQUENCE: &str = "PAPER_LICENCE";

pub struct CaseProgressService {
    ctx: CaseContext,
}

impl CaseProgressService {
    pub fn new(ctx: CaseContext) -> Self {
        Self { ctx }
    }

    fn notifier(&self) -> Notifier {
        self.ctx.notifier()
    }

    pub async fn get_case(&self, id: ProcessId, user: &User) -> Result<Process, CaseError> {
        let process = self.ctx.load(id).await?;
        require_applicant(&process, user)?;
        Ok(process)
    }

    /// Active cases `user` can see, with the actions open to them.
    pub async fn workbasket(&self, user: &User) -> Result<Vec<WorkbasketRow>, CaseError> {
        let allow_bypass = self.ctx.settings.allow_bypass_chief;
        let mut rows = Vec::new();
        for process in self.ctx.processes.list_active().await? {
            if require_applicant(&process, user).is_ok() {
                rows.push(workbasket_row(&process, user, allow_bypass));
            }
        }
        Ok(rows)
    }

    // ------------------------------------------------------------------------
    // Applicant: prepare and submit
    // ------------------------------------------------------------------------

    pub async fn create_application(
        &self,
        user: &User,
        process_type: ProcessType,
        organisation: OrganisationId,
        agent: Option<OrganisationId>,
    ) -> Result<Process, CaseError> {
        for org in std::iter::once(organisation).chain(agent) {
            if self.ctx.users.find_organisation(org).await?.is_none() {
                return Err(CaseError::NotFound(format!("Organisation {org}")));
            }
        }

        let application = Application::for_process_type(process_type, organisation, agent, Some(user.id))?;
        let mut process = Process::new(
            process_type,
            CaseStatus::InProgress,
            user.id,
            CaseDetail::Application(Box::new(application)),
        );
        require_applicant(&process, user)?;
        process.start_task(TaskType::Prepare, None, Some(user.id))?;

        let process = self.ctx.insert(process).await?;
        info!(process_id = %process.id, process_type = %process_type, "Application created");
        Ok(process)
    }

    /// Destinations for an export certificate application still in preparation.
    pub async fn set_export_countries(
        &self,
        id: ProcessId,
        user: &User,
        countries: Vec<String>,
    ) -> Result<Process, CaseError> {
        self.ctx
            .update(id, move |p| {
                require_applicant(p, user)?;
                p.current_task(TaskType::Prepare)?;
                let process_type = p.process_type;
                let detail = p.application_mut()?.export_mut().ok_or(ProcessError::WrongCaseKind {
                    process_type,
                    expected: "export application",
                })?;
                detail.countries = countries;
                Ok(())
            })
            .await
    }

    pub async fn cancel(&self, id: ProcessId, user: &User) -> Result<Process, CaseError> {
        let process = self
            .ctx
            .update(id, |p| {
                require_applicant(p, user)?;
                p.get_task(&[CaseStatus::InProgress], TaskType::Prepare)?;
                p.end_active_tasks(Some(user.id))?;
                p.set_status(CaseStatus::Deleted);
                p.finish();
                Ok(())
            })
            .await?;
        info!(process_id = %id, "Application cancelled");
        Ok(process)
    }

    pub async fn submit(&self, id: ProcessId, user: &User) -> Result<Process, CaseError> {
        let current = self.ctx.load(id).await?;
        require_applicant(&current, user)?;

        let reference = match current.reference {
            Some(_) => None,
            None => {
                let prefix = case_reference_prefix(current.process_type, None)?;
                let (year, sequence) = self.ctx.next_in_year(prefix).await?;
                Some(case_reference(prefix, year, sequence))
            }
        };

        let process = self
            .ctx
            .update(id, move |p| {
                require_applicant(p, user)?;
                let task = p
                    .get_task(
                        &[CaseStatus::InProgress, CaseStatus::Processing, CaseStatus::VariationRequested],
                        TaskType::Prepare,
                    )?
                    .id;

                let unstarted = p
                    .application()?
                    .update_requests
                    .iter()
                    .any(|r| r.is_active && r.status == UpdateRequestStatus::Open);
                if unstarted {
                    let mut errors = ApplicationErrors::new();
                    errors.add(
                        "Application Updates",
                        "Status",
                        "You must start and respond to all open update requests before submitting",
                    );
                    return Err(CaseError::Validation(errors));
                }

                let now = Utc::now();
                for request in p
                    .application_mut()?
                    .update_requests
                    .iter_mut()
                    .filter(|r| r.is_active && r.status == UpdateRequestStatus::UpdateInProgress)
                {
                    request.status = UpdateRequestStatus::Responded;
                    request.response_by.get_or_insert(user.id);
                    request.response_datetime.get_or_insert(now);
                }

                if p.reference.is_none() {
                    p.reference = reference;
                }

                if p.case_owner.is_some() {
                    if p.status != CaseStatus::VariationRequested {
                        p.set_status(CaseStatus::Processing);
                    }
                } else {
                    p.set_status(CaseStatus::Submitted);
                }

                p.submit_datetime = Some(now);
                p.submitted_by = Some(user.id);
                p.update_order_datetime();
                p.advance(task, TaskType::Process, None)?;
                Ok(())
            })
            .await?;

        info!(
            process_id = %id,
            reference = process.reference.as_deref().unwrap_or_default(),
            status = %process.status,
            "Application submitted"
        );
        Ok(process)
    }

    pub async fn ack_notification(&self, id: ProcessId, user: &User) -> Result<Process, CaseError> {
        self.ctx
            .update(id, |p| {
                require_applicant(p, user)?;
                let task = p.get_task(&[CaseStatus::Completed], TaskType::Ack)?.id;
                let app = p.application_mut()?;
                app.acknowledged_by = Some(user.id);
                app.acknowledged_datetime = Some(Utc::now());
                p.end_task(task, Some(user.id))?;
                Ok(())
            })
            .await
    }

    // ------------------------------------------------------------------------
    // Caseworker: ownership and response preparation
    // ------------------------------------------------------------------------

    pub async fn take_ownership(&self, id: ProcessId, user: &User) -> Result<Process, CaseError> {
        require_ilb_admin(user)?;

        let process = self
            .ctx
            .update(id, |p| {
                p.get_task(&[CaseStatus::Submitted, CaseStatus::VariationRequested], TaskType::Process)?;
                if p.status == CaseStatus::Submitted {
                    p.set_status(CaseStatus::Processing);
                }
                p.case_owner = Some(user.id);
                prepare_draft_pack(p.application_mut()?, Utc::now().date_naive());
                Ok(())
            })
            .await?;

        info!(process_id = %id, case_owner = %user.id, "Case ownership taken");
        Ok(process)
    }

    pub async fn release_ownership(&self, id: ProcessId, user: &User) -> Result<Process, CaseError> {
        require_ilb_admin(user)?;

        let process = self
            .ctx
            .update(id, |p| {
                p.current_task(TaskType::Process)?;
                if p.status != CaseStatus::VariationRequested {
                    p.set_status(CaseStatus::Submitted);
                }
                p.case_owner = None;
                Ok(())
            })
            .await?;

        info!(process_id = %id, "Case ownership released");
        Ok(process)
    }

    pub async fn set_decision(
        &self,
        id: ProcessId,
        user: &User,
        decision: Decision,
        refuse_reason: Option<String>,
    ) -> Result<Process, CaseError> {
        self.ctx
            .update(id, move |p| {
                require_case_owner(p, user)?;
                p.current_task(TaskType::Process)?;
                let app = p.application_mut()?;
                app.decision = Some(decision);
                app.refuse_reason = match decision {
                    Decision::Refuse => refuse_reason,
                    Decision::Approve => None,
                };
                Ok(())
            })
            .await
    }

    pub async fn set_variation_decision(
        &self,
        id: ProcessId,
        user: &User,
        decision: Decision,
        refuse_reason: Option<String>,
    ) -> Result<Process, CaseError> {
        self.ctx
            .update(id, move |p| {
                require_case_owner(p, user)?;
                p.get_task(&[CaseStatus::VariationRequested], TaskType::Process)?;
                let app = p.application_mut()?;
                app.variation_decision = Some(decision);
                app.variation_refuse_reason = match decision {
                    Decision::Refuse => refuse_reason,
                    Decision::Approve => None,
                };
                Ok(())
            })
            .await
    }

    pub async fn set_licence_dates(
        &self,
        id: ProcessId,
        user: &User,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Process, CaseError> {
        if end <= start {
            let mut errors = ApplicationErrors::new();
            errors.add("Licence Details", "End Date", "Date must be after the start date");
            return Err(CaseError::Validation(errors));
        }

        self.ctx
            .update(id, move |p| {
                require_case_owner(p, user)?;
                p.current_task(TaskType::Process)?;
                let process_type = p.process_type;
                let app = p.application_mut()?;
                if !app.is_import() {
                    return Err(ProcessError::WrongCaseKind {
                        process_type,
                        expected: "import application",
                    }
                    .into());
                }
                let pack = app
                    .draft_pack_mut()
                    .ok_or_else(|| CaseError::Conflict("The case has no draft licence".to_string()))?;
                pack.licence_start_date = Some(start);
                pack.licence_end_date = Some(end);
                Ok(())
            })
            .await
    }

    pub async fn stop_case(&self, id: ProcessId, user: &User, send_email: bool) -> Result<Process, CaseError> {
        let process = self
            .ctx
            .update(id, |p| {
                require_case_owner(p, user)?;
                let task = p.current_task(TaskType::Process)?.id;
                p.set_status(CaseStatus::Stopped);
                p.end_task(task, None)?;
                Ok(())
            })
            .await?;

        info!(process_id = %id, send_email, "Case stopped");
        if send_email {
            self.notifier()
                .send_to_contacts(&process, EmailTemplateCode::StopCase, Placeholders::new())
                .await;
        }
        Ok(process)
    }

    // ------------------------------------------------------------------------
    // Authorisation
    // ------------------------------------------------------------------------

    pub async fn start_authorisation(&self, id: ProcessId, user: &User) -> Result<Process, CaseError> {
        let current = self.ctx.load(id).await?;
        require_case_owner(&current, user)?;
        current.current_task(TaskType::Process)?;
        authorisation_errors(&current)?.into_result()?;

        let references = if is_approval(&current)? {
            Some(self.allocate_document_references(&current).await?)
        } else {
            None
        };

        let process = self
            .ctx
            .update(id, move |p| {
                require_case_owner(p, user)?;
                let task = p.current_task(TaskType::Process)?.id;
                authorisation_errors(p)?.into_result()?;

                let variation = p.status == CaseStatus::VariationRequested;
                let app = p.application()?;
                let decision = if variation { app.variation_decision } else { app.decision };

                if variation && app.is_import() && decision == Some(Decision::Refuse) {
                    let app = p.application_mut()?;
                    let reason = app.variation_refuse_reason.clone();
                    let request = app
                        .open_variation_request_mut()
                        .ok_or_else(|| CaseError::Conflict("The case has no open variation request".to_string()))?;
                    request.reject_cancellation_reason = reason;
                    request.close(VariationRequestStatus::Rejected, Some(user.id));
                    app.archive_draft_pack();
                    p.set_status(CaseStatus::Completed);
                    p.end_task(task, Some(user.id))?;
                    return Ok(());
                }

                if !variation && decision == Some(Decision::Refuse) {
                    p.application_mut()?.archive_draft_pack();
                    p.set_status(CaseStatus::Completed);
                    p.advance(task, TaskType::Rejected, None)?;
                    return Ok(());
                }

                let references = references.ok_or_else(|| {
                    CaseError::Conflict("Document references were not allocated".to_string())
                })?;
                let base_reference = p.reference.clone().unwrap_or_default();
                if !variation {
                    p.set_status(CaseStatus::Processing);
                }
                let app = p.application_mut()?;
                let variation_no = app.variation_no;
                let (pack, _) = app.get_or_create_draft_pack();
                pack.case_reference = Some(variation_case_reference(&base_reference, variation_no));
                pack.document_references = references;

                p.end_task(task, Some(user.id))?;
                p.start_task(TaskType::Authorise, Some(task), None)?;
                Ok(())
            })
            .await?;

        info!(process_id = %id, status = %process.status, tasks = ?process.active_task_types(), "Authorisation started");

        if process.has_active_task(TaskType::Rejected) {
            let reason = process
                .application()?
                .refuse_reason
                .clone()
                .unwrap_or_default();
            self.notifier()
                .send_to_contacts(
                    &process,
                    EmailTemplateCode::ApplicationRefused,
                    Placeholders::from([("REFUSE_REASON", reason)]),
                )
                .await;
        }
        Ok(process)
    }

    pub async fn cancel_authorisation(&self, id: ProcessId, user: &User) -> Result<Process, CaseError> {
        require_ilb_admin(user)?;

        self.ctx
            .update(id, |p| {
                let task = p.current_task(TaskType::Authorise)?.id;
                if p.status != CaseStatus::VariationRequested {
                    p.set_status(CaseStatus::Processing);
                }
                p.end_task(task, Some(user.id))?;
                p.start_task(TaskType::Process, Some(task), None)?;
                Ok(())
            })
            .await
    }

    /// Sign off the documents and schedule the pack to be generated.
    pub async fn authorise_documents(&self, id: ProcessId, user: &User) -> Result<Process, CaseError> {
        require_ilb_admin(user)?;

        let process = self
            .ctx
            .update(id, |p| {
                let task = p.current_task(TaskType::Authorise)?.id;
                let has_references = p.application()?.draft_pack().is_some_and(|pack| pack.has_references());
                if !has_references {
                    return Err(CaseError::Conflict("The draft licence has no documents to sign".to_string()));
                }
                p.end_task(task, Some(user.id))?;
                p.start_task(TaskType::DocumentSigning, Some(task), None)?;
                Ok(())
            })
            .await?;

        info!(process_id = %id, "Documents authorised, queueing document pack");
        self.ctx.jobs.enqueue(Job::CreateDocumentPack {
            process_id: id,
            requested_by: user.id,
        });
        Ok(process)
    }

    pub async fn revoke_licence(&self, id: ProcessId, user: &User) -> Result<Process, CaseError> {
        require_ilb_admin(user)?;
        let send_to_chief = self.ctx.settings.send_licence_to_chief;

        let process = self
            .ctx
            .update(id, |p| {
                p.check_expected_status(&[CaseStatus::Completed])?;
                let app = p.application_mut()?;
                app.revoke_active_pack()?;
                let wait_for_chief = app.sends_to_chief() && send_to_chief;
                p.end_active_tasks(Some(user.id))?;
                p.set_status(CaseStatus::Revoked);
                if wait_for_chief {
                    p.start_task(TaskType::ChiefRevokeWait, None, None)?;
                }
                Ok(())
            })
            .await?;

        let app = process.application()?;
        if process.has_active_task(TaskType::ChiefRevokeWait) {
            self.ctx.jobs.enqueue(Job::SendLicenceToChief {
                process_id: id,
                revoke: true,
            });
        } else if app.sends_to_chief() {
            warn!(process_id = %id, "CHIEF sending is disabled; revocation not sent to CHIEF");
        }

        let licence_reference = app
            .document_packs
            .iter()
            .rev()
            .find(|pack| pack.status == PackStatus::Revoked)
            .and_then(|pack| pack.licence_reference())
            .unwrap_or_default()
            .to_string();
        info!(process_id = %id, licence_reference = %licence_reference, "Licence revoked");

        self.notifier()
            .send_to_contacts(
                &process,
                EmailTemplateCode::LicenceRevoked,
                Placeholders::from([("LICENCE_REFERENCE", licence_reference)]),
            )
            .await;
        Ok(process)
    }

    /// Numbers for the documents the approved case will issue: a cover
    /// letter and licence for imports, one certificate per country for exports.
    async fn allocate_document_references(
        &self,
        process: &Process,
    ) -> Result<Vec<CaseDocumentReference>, CaseError> {
        let app = process.application()?;

        match &app.kind {
            ApplicationKind::Import(detail) => {
                let import_type = &detail.application_type;
                let mut references = Vec::new();
                if import_type.cover_letter_flag {
                    references.push(CaseDocumentReference::new(DocumentType::CoverLetter, None, None));
                }

                // Variations keep the licence number they vary.
                let existing = app
                    .draft_pack()
                    .and_then(|pack| pack.licence_reference())
                    .or_else(|| app.active_pack().and_then(|pack| pack.licence_reference()))
                    .map(str::to_string);

                let licence_reference = match existing {
                    Some(reference) => reference,
                    None => {
                        let paper_only = app
                            .draft_pack()
                            .and_then(|pack| pack.issue_paper_licence_only)
                            .unwrap_or(!import_type.electronic_licence_flag);
                        match &import_type.chief_licence_prefix {
                            Some(prefix) if !paper_only => {
                                let sequence = self.ctx.sequences.next_value(ELECTRONIC_LICENCE_SEQUENCE, 0).await?;
                                electronic_licence_reference(prefix, sequence)
                            }
                            _ => {
                                let (year, sequence) = self.ctx.next_in_year(PAPER_LICENCE_SEQUENCE).await?;
                                paper_licence_reference(year, &import_type.type_code, sequence)
                            }
                        }
                    }
                };
                references.push(CaseDocumentReference::new(
                    DocumentType::Licence,
                    Some(licence_reference),
                    None,
                ));
                Ok(references)
            }
            ApplicationKind::Export(detail) => {
                let type_code = &detail.application_type.type_code;
                let mut references = Vec::with_capacity(detail.countries.len());
                for country in &detail.countries {
                    let (year, sequence) = self.ctx.next_in_year(type_code).await?;
                    references.push(CaseDocumentReference::new(
                        DocumentType::Certificate,
                        Some(certificate_reference(type_code, year, sequence)),
                        Some(country.clone()),
                    ));
                }
                Ok(references)
            }
        }
    }
}

/// Create the draft pack on first ownership. Imports get default licence
/// dates, or the dates of the licence being varied.
fn prepare_draft_pack(app: &mut Application, today: NaiveDate) {
    let previous = app.active_pack().map(|pack| {
        (
            pack.licence_start_date,
            pack.licence_end_date,
            pack.issue_paper_licence_only,
        )
    });
    let import_type = app.import().map(|detail| detail.application_type.clone());

    let (pack, created) = app.get_or_create_draft_pack();
    if !created {
        return;
    }

    if let Some((start, end, paper_only)) = previous {
        pack.licence_start_date = start;
        pack.licence_end_date = end;
        pack.issue_paper_licence_only = paper_only;
    } else if let Some(import_type) = import_type {
        pack.licence_start_date = Some(today);
        pack.licence_end_date = import_type
            .default_licence_length_months
            .and_then(|months| today.checked_add_months(Months::new(months)));
        pack.issue_paper_licence_only = Some(!import_type.electronic_licence_flag);
    }
}

/// Whether authorising `process` now would issue documents.
fn is_approval(process: &Process) -> Result<bool, CaseError> {
    let app = process.application()?;
    Ok(if process.status == CaseStatus::VariationRequested {
        !app.is_import() || app.variation_decision == Some(Decision::Approve)
    } else {
        app.decision == Some(Decision::Approve)
    })
}

/// Everything that stops the case owner from starting authorisation.
pub fn authorisation_errors(process: &Process) -> Result<ApplicationErrors, CaseError> {
    let app = process.application()?;
    let mut errors = ApplicationErrors::new();
    let blank = |value: &Option<String>| value.as_deref().map(str::trim).unwrap_or_default().is_empty();

    if app.has_unclosed_update_request() {
        errors.add("Application Updates", "Status", "You must close all update requests");
    }

    if process.status == CaseStatus::VariationRequested {
        if app.is_import() {
            match app.variation_decision {
                None => errors.add("Response Preparation", "Variation Decision", "You must enter this item"),
                Some(Decision::Refuse) if blank(&app.variation_refuse_reason) => errors.add(
                    "Response Preparation",
                    "Variation Refuse Reason",
                    "You must enter a reason for refusing the variation",
                ),
                _ => {}
            }
        }
    } else {
        match app.decision {
            None => errors.add("Response Preparation", "Decision", "You must enter this item"),
            Some(Decision::Refuse) if blank(&app.refuse_reason) => errors.add(
                "Response Preparation",
                "Refuse Reason",
                "You must enter a reason for refusing the application",
            ),
            _ => {}
        }
    }

    if is_approval(process)? {
        match &app.kind {
            ApplicationKind::Import(_) => {
                let dates = app
                    .draft_pack()
                    .map(|pack| (pack.licence_start_date, pack.licence_end_date));
                match dates {
                    Some((Some(start), Some(end))) if end > start => {}
                    Some((Some(_), Some(_))) => {
                        errors.add("Licence Details", "End Date", "Date must be after the start date")
                    }
                    _ => errors.add("Licence Details", "Licence Dates", "You must enter the licence dates"),
                }
            }
            ApplicationKind::Export(detail) => {
                if detail.countries.is_empty() {
                    errors.add("Application Details", "Countries", "At least one country must be selected");
                }
            }
        }
    }

    Ok(errors)
}

/// Issue the draft pack and close the case as COMPLETED with an ACK task.
/// The caller has already ended `previous`; it sends the completion email
/// once the update commits.
pub(crate) fn complete_application(
    process: &mut Process,
    previous: TaskId,
    closed_by: Option<UserId>,
) -> Result<(), CaseError> {
    let now = Utc::now();
    let variation = process.status == CaseStatus::VariationRequested;
    let process_id = process.id;

    let app = process.application_mut()?;
    let pack_id = app.issue_draft_pack(now)?;
    if variation {
        let is_import = app.is_import();
        let request = app
            .open_variation_request_mut()
            .ok_or_else(|| CaseError::Conflict("The case has no open variation request".to_string()))?;
        if is_import {
            request.status = VariationRequestStatus::Accepted;
        } else {
            request.close(VariationRequestStatus::Closed, closed_by);
        }
    }

    process.set_status(CaseStatus::Completed);
    process.start_task(TaskType::Ack, Some(previous), None)?;
    process.record_event(CaseEvent::DocumentPackIssued {
        process_id,
        pack_id,
        issued_at: now,
    });
    info!(%process_id, pack_id = ?pack_id, "Application completed");
    Ok(())
}

pub(crate) async fn notify_completed(notifier: &Notifier, process: &Process) {
    notifier
        .send_to_contacts(process, EmailTemplateCode::ApplicationComplete, Placeholders::new())
        .await;
}
