// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # CHIEF Workflow
//!
//! Licences for CHIEF-flagged import types are posted to ICMS-HMRC, which
//! relays them to HMRC's CHIEF system and later calls back with the outcome.
//! While waiting the case holds a CHIEF_WAIT (or CHIEF_REVOKE_WAIT) task; a
//! rejection parks it on CHIEF_ERROR until a caseworker resends or reverts.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::application::case_progress::{complete_application, notify_completed};
use crate::application::context::{require_ilb_admin, CaseContext};
use crate::application::jobs::Job;
use crate::domain::case::{CaseError, ImportDetail};
use crate::domain::chief::{
    ChiefRequest, ChiefRequestStatus, ChiefUsageStatus, LicenceData, LicenceDataPayload, LicenceDataType,
    LicenceReplyData, OrganisationData, ResponseError, UsageData,
};
use crate::domain::document_pack::{DocumentPack, PackStatus};
use crate::domain::events::CaseEvent;
use crate::domain::process::{CaseStatus, Process, ProcessError, ProcessId, TaskType};
use crate::domain::reference::variation_case_reference;
use crate::domain::repository::RepositoryError;
use crate::domain::user::{Organisation, User};

#[derive(Debug, thiserror::Error)]
pub enum ChiefClientError {
    #[error("CHIEF transport failed: {0}")]
    Transport(String),

    #[error("ICMS-HMRC rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("ICMS-HMRC response failed authentication: {0}")]
    Authentication(String),
}

/// Outbound side of the ICMS-HMRC integration.
#[async_trait]
pub trait ChiefGateway: Send + Sync {
    async fn send_licence_data(&self, payload: &LicenceDataPayload) -> Result<(), ChiefClientError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChiefProgress {
    pub msg: String,
    pub reload_workbasket: bool,
}

impl ChiefProgress {
    fn new(msg: &str, reload_workbasket: bool) -> Self {
        Self {
            msg: msg.to_string(),
            reload_workbasket,
        }
    }
}

/// A case on the pending or failed CHIEF dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct ChiefLicenceSummary {
    pub process_id: ProcessId,
    pub reference: Option<String>,
    pub status: CaseStatus,
    pub licence_reference: Option<String>,
    pub latest_request: Option<ChiefRequest>,
}

/// Ids resolved before a reply is applied.
struct ResolvedReply {
    accepted: Vec<(ProcessId, Uuid)>,
    rejected: Vec<(ProcessId, Uuid, Vec<ResponseError>)>,
}

pub struct ChiefService {
    ctx: CaseContext,
    gateway: Arc<dyn ChiefGateway>,
}

impl ChiefService {
    pub fn new(ctx: CaseContext, gateway: Arc<dyn ChiefGateway>) -> Self {
        Self { ctx, gateway }
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    /// Post the licence (or its cancellation) to ICMS-HMRC.
    pub async fn send_licence(&self, id: ProcessId, revoke: bool) -> Result<(), CaseError> {
        let wait = if revoke { TaskType::ChiefRevokeWait } else { TaskType::ChiefWait };
        let process = self.ctx.load(id).await?;
        process.current_task(wait)?;

        let organisation = self
            .ctx
            .users
            .find_organisation(process.application()?.organisation)
            .await?
            .ok_or_else(|| CaseError::NotFound("Importer".to_string()))?;
        let payload = licence_payload(&process, &organisation, revoke)?;
        let icms_hmrc_id = payload.licence.id;
        let request_data = serde_json::to_value(&payload).map_err(RepositoryError::from)?;

        self.ctx
            .update(id, move |p| {
                p.current_task(wait)?;
                import_detail_mut(p)?
                    .chief_requests
                    .push(ChiefRequest::new(icms_hmrc_id, request_data));
                p.record_event(CaseEvent::ChiefRequestSent {
                    process_id: id,
                    icms_hmrc_id,
                    revoke,
                    sent_at: Utc::now(),
                });
                Ok(())
            })
            .await?;

        match self.gateway.send_licence_data(&payload).await {
            Ok(()) => {
                info!(
                    process_id = %id,
                    %icms_hmrc_id,
                    licence_reference = %payload.licence.licence_reference,
                    revoke,
                    "Licence sent to CHIEF"
                );
                Ok(())
            }
            Err(e) => {
                error!(process_id = %id, %icms_hmrc_id, error = %e, "Failed to send licence to CHIEF");
                self.ctx
                    .update(id, move |p| {
                        if let Some(request) = chief_request_mut(p, icms_hmrc_id)? {
                            request.status = ChiefRequestStatus::InternalError;
                        }
                        let task = p.current_task(wait)?.id;
                        p.advance(task, TaskType::ChiefError, None)?;
                        Ok(())
                    })
                    .await?;
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------------
    // Callbacks
    // ------------------------------------------------------------------------

    /// Apply a licence reply. Every id must belong to a CHIEF request that
    /// is still awaiting a reply; the whole reply is committed together or
    /// not at all.
    pub async fn licence_reply(&self, reply: LicenceReplyData) -> Result<(), CaseError> {
        let resolved = self.resolve_reply(reply).await?;
        let ids: Vec<ProcessId> = resolved
            .accepted
            .iter()
            .map(|(process_id, _)| *process_id)
            .chain(resolved.rejected.iter().map(|(process_id, _, _)| *process_id))
            .collect();
        if ids.is_empty() {
            return Ok(());
        }

        let accepted = resolved.accepted;
        let rejected_summary: Vec<(ProcessId, Uuid, usize)> = resolved
            .rejected
            .iter()
            .map(|(process_id, icms_hmrc_id, errors)| (*process_id, *icms_hmrc_id, errors.len()))
            .collect();
        let to_accept = accepted.clone();
        let to_reject = resolved.rejected;

        let processes = self
            .ctx
            .update_many(&ids, move |batch| {
                for (process_id, icms_hmrc_id) in to_accept {
                    apply_accepted(batch_member(batch, process_id)?, icms_hmrc_id)?;
                }
                for (process_id, icms_hmrc_id, errors) in to_reject {
                    apply_rejected(batch_member(batch, process_id)?, icms_hmrc_id, errors)?;
                }
                Ok(())
            })
            .await?;

        for (process_id, icms_hmrc_id) in &accepted {
            metrics::counter!("icms_chief_callbacks_total", "outcome" => "accepted").increment(1);
            info!(%process_id, %icms_hmrc_id, "CHIEF accepted licence");
        }
        for (process_id, icms_hmrc_id, error_count) in &rejected_summary {
            metrics::counter!("icms_chief_callbacks_total", "outcome" => "rejected").increment(1);
            warn!(%process_id, %icms_hmrc_id, errors = error_count, "CHIEF rejected licence");
        }

        let notifier = self.ctx.notifier();
        for process in &processes {
            let was_accepted = accepted.iter().any(|(process_id, _)| *process_id == process.id);
            if was_accepted && process.status == CaseStatus::Completed {
                notify_completed(&notifier, process).await;
            }
        }

        Ok(())
    }

    async fn resolve_reply(&self, reply: LicenceReplyData) -> Result<ResolvedReply, CaseError> {
        let mut resolved = ResolvedReply {
            accepted: Vec::with_capacity(reply.accepted.len()),
            rejected: Vec::with_capacity(reply.rejected.len()),
        };

        for accepted in reply.accepted {
            let process_id = self.process_for_request(accepted.id).await?;
            resolved.accepted.push((process_id, accepted.id));
        }
        for rejected in reply.rejected {
            let process_id = self.process_for_request(rejected.id).await?;
            resolved.rejected.push((process_id, rejected.id, rejected.errors));
        }
        Ok(resolved)
    }

    async fn process_for_request(&self, icms_hmrc_id: Uuid) -> Result<ProcessId, CaseError> {
        self.ctx
            .processes
            .find_by_chief_request(icms_hmrc_id)
            .await?
            .ok_or_else(|| CaseError::NotFound(format!("CHIEF request {icms_hmrc_id}")))
    }

    /// Record CHIEF usage against issued licences. Unknown licence
    /// references are skipped; the known ones are committed together.
    /// Returns the number of licences updated.
    pub async fn usage_update(&self, data: UsageData) -> Result<usize, CaseError> {
        let mut updates: Vec<(ProcessId, String, ChiefUsageStatus)> = Vec::with_capacity(data.usage_data.len());
        for record in data.usage_data {
            match self
                .ctx
                .processes
                .find_by_licence_reference(&record.licence_ref)
                .await?
            {
                Some(process_id) => updates.push((process_id, record.licence_ref, record.licence_status)),
                None => warn!(licence_reference = %record.licence_ref, "Usage data for unknown licence"),
            }
        }

        if !updates.is_empty() {
            let ids: Vec<ProcessId> = updates.iter().map(|(process_id, _, _)| *process_id).collect();
            let statuses: Vec<(ProcessId, ChiefUsageStatus)> =
                updates.iter().map(|(process_id, _, status)| (*process_id, *status)).collect();
            self.ctx
                .update_many(&ids, move |batch| {
                    for (process_id, status) in statuses {
                        import_detail_mut(batch_member(batch, process_id)?)?.chief_usage_status = Some(status);
                    }
                    Ok(())
                })
                .await?;
        }

        for (process_id, licence_reference, status) in &updates {
            info!(%process_id, %licence_reference, ?status, "CHIEF usage recorded");
        }
        metrics::counter!("icms_chief_callbacks_total", "outcome" => "usage").increment(1);
        Ok(updates.len())
    }

    // ------------------------------------------------------------------------
    // Caseworker actions
    // ------------------------------------------------------------------------

    /// Try again after a CHIEF rejection. Revocations are resent as they
    /// are; licences go back through document signing first.
    pub async fn resend_licence(&self, id: ProcessId, user: &User) -> Result<Process, CaseError> {
        require_ilb_admin(user)?;

        let process = self
            .ctx
            .update(id, |p| {
                let task = p
                    .get_task(
                        &[CaseStatus::VariationRequested, CaseStatus::Processing, CaseStatus::Revoked],
                        TaskType::ChiefError,
                    )?
                    .id;
                let next = if p.status == CaseStatus::Revoked {
                    TaskType::ChiefRevokeWait
                } else {
                    TaskType::DocumentSigning
                };
                p.advance(task, next, Some(user.id))?;
                Ok(())
            })
            .await?;

        if process.has_active_task(TaskType::ChiefRevokeWait) {
            info!(process_id = %id, "Resending licence revocation to CHIEF");
            self.ctx.jobs.enqueue(Job::SendLicenceToChief {
                process_id: id,
                revoke: true,
            });
        } else {
            info!(process_id = %id, "Regenerating documents before resending to CHIEF");
            self.ctx.jobs.enqueue(Job::CreateDocumentPack {
                process_id: id,
                requested_by: user.id,
            });
        }
        Ok(process)
    }

    pub async fn revert_to_processing(&self, id: ProcessId, user: &User) -> Result<Process, CaseError> {
        require_ilb_admin(user)?;

        let process = self
            .ctx
            .update(id, |p| {
                let task = p
                    .get_task(
                        &[CaseStatus::VariationRequested, CaseStatus::Processing],
                        TaskType::ChiefError,
                    )?
                    .id;
                p.end_task(task, Some(user.id))?;
                p.start_task(TaskType::Process, Some(task), None)?;
                p.update_order_datetime();
                Ok(())
            })
            .await?;

        info!(process_id = %id, "CHIEF error reverted to processing");
        Ok(process)
    }

    pub async fn check_progress(&self, id: ProcessId, user: &User) -> Result<ChiefProgress, CaseError> {
        require_ilb_admin(user)?;
        let process = self.ctx.load(id).await?;
        process.check_expected_status(&[
            CaseStatus::Processing,
            CaseStatus::VariationRequested,
            CaseStatus::Completed,
            CaseStatus::Revoked,
        ])?;

        const ACCEPTED: &str = "Accepted - An accepted response has been received from CHIEF.";
        const REJECTED: &str = "Rejected - A rejected response has been received from CHIEF.";
        const AWAITING: &str = "Awaiting Response - Licence sent to CHIEF, we are awaiting a response";
        const SIGNING: &str = "Authorised & Processing - Documents are being generated and will be sent once complete.";

        let has = |t: TaskType| process.has_active_task(t);
        let progress = match process.status {
            CaseStatus::Completed => ChiefProgress::new(ACCEPTED, true),
            CaseStatus::Revoked if has(TaskType::ChiefRevokeWait) => ChiefProgress::new(AWAITING, false),
            CaseStatus::Revoked if has(TaskType::ChiefError) => ChiefProgress::new(REJECTED, true),
            CaseStatus::Revoked => ChiefProgress::new(ACCEPTED, true),
            _ if has(TaskType::ChiefError) => ChiefProgress::new(REJECTED, true),
            _ if has(TaskType::ChiefWait) => ChiefProgress::new(AWAITING, false),
            _ if has(TaskType::DocumentSigning) => ChiefProgress::new(SIGNING, false),
            _ => {
                return Err(ProcessError::Task(format!(
                    "Unknown CHIEF state for application {}",
                    process.reference.as_deref().unwrap_or("Not Assigned")
                ))
                .into())
            }
        };
        Ok(progress)
    }

    /// Stand-in for a CHIEF reply in environments without ICMS-HMRC.
    pub async fn bypass(&self, id: ProcessId, user: &User, success: bool) -> Result<Process, CaseError> {
        if !self.ctx.settings.allow_bypass_chief {
            return Err(CaseError::PermissionDenied("Bypassing CHIEF is disabled".to_string()));
        }
        require_ilb_admin(user)?;

        let process = self
            .ctx
            .update(id, |p| {
                let task = p.current_task(TaskType::ChiefWait)?.id;
                p.end_task(task, Some(user.id))?;
                if success {
                    if let Some(request) = import_detail_mut(p)?
                        .chief_requests
                        .iter_mut()
                        .rev()
                        .find(|r| r.status == ChiefRequestStatus::Processing)
                    {
                        request.complete();
                    }
                    complete_application(p, task, Some(user.id))?;
                } else {
                    p.start_task(TaskType::ChiefError, Some(task), None)?;
                }
                Ok(())
            })
            .await?;

        warn!(process_id = %id, success, "CHIEF reply bypassed");
        if process.status == CaseStatus::Completed {
            notify_completed(&self.ctx.notifier(), &process).await;
        }
        Ok(process)
    }

    pub async fn pending_licences(&self, user: &User) -> Result<Vec<ChiefLicenceSummary>, CaseError> {
        require_ilb_admin(user)?;
        let processes = self
            .ctx
            .processes
            .find_with_active_task(&[TaskType::ChiefWait, TaskType::ChiefRevokeWait])
            .await?;
        Ok(processes.iter().map(summary).collect())
    }

    pub async fn failed_licences(&self, user: &User) -> Result<Vec<ChiefLicenceSummary>, CaseError> {
        require_ilb_admin(user)?;
        let processes = self.ctx.processes.find_with_active_task(&[TaskType::ChiefError]).await?;
        Ok(processes.iter().map(summary).collect())
    }

    /// Body of a request as it was sent to ICMS-HMRC.
    pub async fn request_data(&self, icms_hmrc_id: Uuid, user: &User) -> Result<serde_json::Value, CaseError> {
        require_ilb_admin(user)?;
        let process_id = self.process_for_request(icms_hmrc_id).await?;
        let process = self.ctx.load(process_id).await?;
        process
            .application()?
            .import()
            .and_then(|detail| detail.chief_requests.iter().find(|r| r.icms_hmrc_id == icms_hmrc_id))
            .map(|request| request.request_data.clone())
            .ok_or_else(|| CaseError::NotFound(format!("CHIEF request {icms_hmrc_id}")))
    }
}

fn import_detail_mut(process: &mut Process) -> Result<&mut ImportDetail, CaseError> {
    let process_type = process.process_type;
    process.application_mut()?.import_mut().ok_or_else(|| {
        ProcessError::WrongCaseKind {
            process_type,
            expected: "import application",
        }
        .into()
    })
}

fn batch_member(batch: &mut [Process], id: ProcessId) -> Result<&mut Process, CaseError> {
    batch
        .iter_mut()
        .find(|p| p.id == id)
        .ok_or_else(|| CaseError::NotFound(format!("Process {id}")))
}

/// The request `icms_hmrc_id` names, provided it is still awaiting a reply.
fn awaiting_request(process: &mut Process, icms_hmrc_id: Uuid) -> Result<&mut ChiefRequest, CaseError> {
    let request = chief_request_mut(process, icms_hmrc_id)?
        .ok_or_else(|| CaseError::NotFound(format!("CHIEF request {icms_hmrc_id}")))?;
    if request.status != ChiefRequestStatus::Processing {
        return Err(CaseError::Conflict(format!(
            "CHIEF request {icms_hmrc_id} is not awaiting a reply"
        )));
    }
    Ok(request)
}

fn apply_accepted(p: &mut Process, icms_hmrc_id: Uuid) -> Result<(), CaseError> {
    awaiting_request(p, icms_hmrc_id)?.complete();
    record_response(p, icms_hmrc_id, true);

    if p.status == CaseStatus::Revoked {
        let task = p.current_task(TaskType::ChiefRevokeWait)?.id;
        p.end_task(task, None)?;
    } else {
        let task = p.current_task(TaskType::ChiefWait)?.id;
        p.end_task(task, None)?;
        complete_application(p, task, None)?;
    }
    Ok(())
}

fn apply_rejected(p: &mut Process, icms_hmrc_id: Uuid, errors: Vec<ResponseError>) -> Result<(), CaseError> {
    awaiting_request(p, icms_hmrc_id)?.fail(errors);
    record_response(p, icms_hmrc_id, false);

    let wait = if p.status == CaseStatus::Revoked {
        TaskType::ChiefRevokeWait
    } else {
        TaskType::ChiefWait
    };
    let task = p.current_task(wait)?.id;
    p.advance(task, TaskType::ChiefError, None)?;
    Ok(())
}

fn chief_request_mut(process: &mut Process, icms_hmrc_id: Uuid) -> Result<Option<&mut ChiefRequest>, CaseError> {
    Ok(import_detail_mut(process)?
        .chief_requests
        .iter_mut()
        .find(|r| r.icms_hmrc_id == icms_hmrc_id))
}

fn record_response(process: &mut Process, icms_hmrc_id: Uuid, accepted: bool) {
    let process_id = process.id;
    process.record_event(CaseEvent::ChiefResponseReceived {
        process_id,
        icms_hmrc_id,
        accepted,
        received_at: Utc::now(),
    });
}

/// The pack a CHIEF message describes: the revoked licence for a
/// cancellation, otherwise the draft awaiting issue.
fn chief_pack(process: &Process, revoke: bool) -> Result<&DocumentPack, CaseError> {
    let app = process.application()?;
    let pack = if revoke {
        app.document_packs.iter().rev().find(|p| p.status == PackStatus::Revoked)
    } else {
        app.draft_pack()
    };
    pack.ok_or_else(|| CaseError::Conflict("The case has no licence to send to CHIEF".to_string()))
}

pub fn licence_payload(
    process: &Process,
    organisation: &Organisation,
    revoke: bool,
) -> Result<LicenceDataPayload, CaseError> {
    let app = process.application()?;
    let pack = chief_pack(process, revoke)?;
    let missing = |what: &str| CaseError::Conflict(format!("The licence has no {what}"));

    let (licence_type, action) = if revoke {
        (LicenceDataType::Cancel, "cancel")
    } else if app.variation_no > 0 {
        (LicenceDataType::Replace, "replace")
    } else {
        (LicenceDataType::Create, "insert")
    };

    let reference = process.reference.clone().ok_or_else(|| missing("case reference"))?;
    let case_reference = pack
        .case_reference
        .clone()
        .unwrap_or_else(|| variation_case_reference(&reference, app.variation_no));

    Ok(LicenceDataPayload {
        licence: LicenceData {
            licence_type,
            action: action.to_string(),
            id: Uuid::new_v4(),
            reference,
            case_reference,
            licence_reference: pack
                .licence_reference()
                .ok_or_else(|| missing("licence reference"))?
                .to_string(),
            start_date: pack.licence_start_date.ok_or_else(|| missing("start date"))?,
            end_date: pack.licence_end_date.ok_or_else(|| missing("end date"))?,
            organisation: OrganisationData {
                eori_number: organisation.eori_number.clone().unwrap_or_default(),
                name: organisation.name.clone(),
                address: organisation.address.clone(),
            },
            restrictions: None,
        },
    })
}

fn summary(process: &Process) -> ChiefLicenceSummary {
    let app = process.application().ok();
    ChiefLicenceSummary {
        process_id: process.id,
        reference: process.reference.clone(),
        status: process.status,
        licence_reference: app
            .and_then(|a| {
                a.draft_pack()
                    .or_else(|| a.document_packs.iter().rev().find(|p| p.status != PackStatus::Archived))
            })
            .and_then(|pack| pack.licence_reference())
            .map(str::to_string),
        latest_request: app
            .and_then(|a| a.import())
            .and_then(|detail| detail.chief_requests.last().cloned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::case_progress::CaseProgressService;
    use crate::application::testing::{Harness, RecordingGateway};
    use crate::domain::chief::{AcceptedLicence, ChiefUsageStatus, RejectedLicence, UsageRecord};
    use crate::domain::process::ProcessType;

    async fn awaiting_chief(h: &mut Harness, gateway: Arc<RecordingGateway>) -> (ChiefService, ProcessId, Uuid) {
        let id = h.at_chief_wait(ProcessType::SpecificIndividualLicence).await;
        let service = ChiefService::new(h.ctx.clone(), gateway.clone());
        service.send_licence(id, false).await.unwrap();
        let sent = gateway.last().unwrap();
        (service, id, sent.licence.id)
    }

    /// A CHIEF licence that has been accepted, revoked and sent for
    /// cancellation. Returns the cancellation request id.
    async fn awaiting_revocation(h: &mut Harness, gateway: Arc<RecordingGateway>) -> (ChiefService, ProcessId, Uuid) {
        let (service, id, icms_hmrc_id) = awaiting_chief(h, gateway.clone()).await;
        service
            .licence_reply(LicenceReplyData {
                accepted: vec![AcceptedLicence { id: icms_hmrc_id }],
                rejected: vec![],
            })
            .await
            .unwrap();
        h.queued();

        let process = CaseProgressService::new(h.ctx.clone())
            .revoke_licence(id, &h.admin)
            .await
            .unwrap();
        assert_eq!(process.status, CaseStatus::Revoked);
        assert_eq!(process.active_task_types(), vec![TaskType::ChiefRevokeWait]);
        assert!(h
            .queued()
            .iter()
            .any(|job| matches!(job, Job::SendLicenceToChief { process_id, revoke: true } if *process_id == id)));

        service.send_licence(id, true).await.unwrap();
        let cancel = gateway.last().unwrap();
        (service, id, cancel.licence.id)
    }

    #[tokio::test]
    async fn test_send_records_request() {
        let mut h = Harness::new().await;
        let gateway = Arc::new(RecordingGateway::default());
        let (_, id, icms_hmrc_id) = awaiting_chief(&mut h, gateway.clone()).await;

        let payload = gateway.last().unwrap();
        assert_eq!(payload.licence.licence_type, LicenceDataType::Create);
        assert_eq!(payload.licence.licence_reference, "GBSIL0000001C");

        let process = h.ctx.load(id).await.unwrap();
        let requests = &process.application().unwrap().import().unwrap().chief_requests;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].icms_hmrc_id, icms_hmrc_id);
        assert_eq!(requests[0].status, ChiefRequestStatus::Processing);
    }

    #[tokio::test]
    async fn test_send_failure_moves_to_chief_error() {
        let mut h = Harness::new().await;
        let id = h.at_chief_wait(ProcessType::SpecificIndividualLicence).await;
        let service = ChiefService::new(h.ctx.clone(), Arc::new(RecordingGateway::failing()));

        service.send_licence(id, false).await.unwrap();

        let process = h.ctx.load(id).await.unwrap();
        assert_eq!(process.active_task_types(), vec![TaskType::ChiefError]);
        let request = &process.application().unwrap().import().unwrap().chief_requests[0];
        assert_eq!(request.status, ChiefRequestStatus::InternalError);
    }

    #[tokio::test]
    async fn test_accepted_reply_completes_application() {
        let mut h = Harness::new().await;
        let gateway = Arc::new(RecordingGateway::default());
        let (service, id, icms_hmrc_id) = awaiting_chief(&mut h, gateway).await;
        h.queued();

        service
            .licence_reply(LicenceReplyData {
                accepted: vec![AcceptedLicence { id: icms_hmrc_id }],
                rejected: vec![],
            })
            .await
            .unwrap();

        let process = h.ctx.load(id).await.unwrap();
        assert_eq!(process.status, CaseStatus::Completed);
        assert_eq!(process.active_task_types(), vec![TaskType::Ack]);
        let app = process.application().unwrap();
        assert_eq!(app.import().unwrap().chief_requests[0].status, ChiefRequestStatus::Success);
        assert_eq!(app.active_pack().unwrap().licence_reference(), Some("GBSIL0000001C"));
        assert!(matches!(h.queued().as_slice(), [Job::SendEmail(_)]));

        let progress = service.check_progress(id, &h.admin).await.unwrap();
        assert!(progress.msg.starts_with("Accepted"));
        assert!(progress.reload_workbasket);
    }

    #[tokio::test]
    async fn test_unknown_id_fails_whole_reply() {
        let mut h = Harness::new().await;
        let gateway = Arc::new(RecordingGateway::default());
        let (service, id, icms_hmrc_id) = awaiting_chief(&mut h, gateway).await;

        let result = service
            .licence_reply(LicenceReplyData {
                accepted: vec![AcceptedLicence { id: icms_hmrc_id }, AcceptedLicence { id: Uuid::new_v4() }],
                rejected: vec![],
            })
            .await;
        assert!(matches!(result, Err(CaseError::NotFound(_))));

        let process = h.ctx.load(id).await.unwrap();
        assert_eq!(process.active_task_types(), vec![TaskType::ChiefWait]);
    }

    #[tokio::test]
    async fn test_rejection_then_revert() {
        let mut h = Harness::new().await;
        let gateway = Arc::new(RecordingGateway::default());
        let (service, id, icms_hmrc_id) = awaiting_chief(&mut h, gateway).await;

        service
            .licence_reply(LicenceReplyData {
                accepted: vec![],
                rejected: vec![RejectedLicence {
                    id: icms_hmrc_id,
                    errors: vec![ResponseError {
                        error_code: "1234".into(),
                        error_msg: "Invalid licence dates".into(),
                    }],
                }],
            })
            .await
            .unwrap();

        let progress = service.check_progress(id, &h.admin).await.unwrap();
        assert!(progress.msg.starts_with("Rejected"));
        assert_eq!(service.failed_licences(&h.admin).await.unwrap().len(), 1);
        assert!(service.pending_licences(&h.admin).await.unwrap().is_empty());

        let process = service.revert_to_processing(id, &h.admin).await.unwrap();
        assert_eq!(process.active_task_types(), vec![TaskType::Process]);
        let request = &process.application().unwrap().import().unwrap().chief_requests[0];
        assert_eq!(request.status, ChiefRequestStatus::Error);
        assert_eq!(request.response_errors[0].error_code, "1234");
    }

    #[tokio::test]
    async fn test_resend_goes_back_through_document_signing() {
        let mut h = Harness::new().await;
        let id = h.at_chief_wait(ProcessType::SpecificIndividualLicence).await;
        let service = ChiefService::new(h.ctx.clone(), Arc::new(RecordingGateway::failing()));
        service.send_licence(id, false).await.unwrap();
        h.queued();

        let process = service.resend_licence(id, &h.admin).await.unwrap();
        assert_eq!(process.active_task_types(), vec![TaskType::DocumentSigning]);
        assert!(matches!(h.queued().as_slice(), [Job::CreateDocumentPack { .. }]));
    }

    #[tokio::test]
    async fn test_bypass_requires_feature_switch() {
        let mut h = Harness::new().await;
        let id = h.at_chief_wait(ProcessType::SpecificIndividualLicence).await;

        let mut ctx = h.ctx.clone();
        ctx.settings.allow_bypass_chief = false;
        let disabled = ChiefService::new(ctx, Arc::new(RecordingGateway::default()));
        assert!(matches!(
            disabled.bypass(id, &h.admin, true).await,
            Err(CaseError::PermissionDenied(_))
        ));

        let service = ChiefService::new(h.ctx.clone(), Arc::new(RecordingGateway::default()));
        let process = service.bypass(id, &h.admin, true).await.unwrap();
        assert_eq!(process.status, CaseStatus::Completed);
        assert!(process.application().unwrap().active_pack().is_some());
    }

    #[tokio::test]
    async fn test_usage_update_skips_unknown_licences() {
        let mut h = Harness::new().await;
        let id = h.at_chief_wait(ProcessType::SpecificIndividualLicence).await;
        let service = ChiefService::new(h.ctx.clone(), Arc::new(RecordingGateway::default()));
        service.bypass(id, &h.admin, true).await.unwrap();

        let updated = service
            .usage_update(UsageData {
                usage_data: vec![
                    UsageRecord {
                        licence_ref: "GBSIL0000001C".into(),
                        licence_status: ChiefUsageStatus::Exhausted,
                    },
                    UsageRecord {
                        licence_ref: "GBSIL9999999X".into(),
                        licence_status: ChiefUsageStatus::Expired,
                    },
                ],
            })
            .await
            .unwrap();
        assert_eq!(updated, 1);

        let process = h.ctx.load(id).await.unwrap();
        assert_eq!(
            process.application().unwrap().import().unwrap().chief_usage_status,
            Some(ChiefUsageStatus::Exhausted)
        );
    }

    #[tokio::test]
    async fn test_reply_is_all_or_nothing() {
        let mut h = Harness::new().await;
        let gateway = Arc::new(RecordingGateway::default());
        let (service, waiting, waiting_request) = awaiting_chief(&mut h, gateway).await;

        let failed = h.at_chief_wait(ProcessType::SpecificIndividualLicence).await;
        ChiefService::new(h.ctx.clone(), Arc::new(RecordingGateway::failing()))
            .send_licence(failed, false)
            .await
            .unwrap();
        let process = h.ctx.load(failed).await.unwrap();
        let failed_request = process.application().unwrap().import().unwrap().chief_requests[0].icms_hmrc_id;
        h.queued();

        let result = service
            .licence_reply(LicenceReplyData {
                accepted: vec![
                    AcceptedLicence { id: waiting_request },
                    AcceptedLicence { id: failed_request },
                ],
                rejected: vec![],
            })
            .await;
        assert!(matches!(result, Err(CaseError::Conflict(_))), "{result:?}");

        let process = h.ctx.load(waiting).await.unwrap();
        assert_eq!(process.status, CaseStatus::Processing);
        assert_eq!(process.active_task_types(), vec![TaskType::ChiefWait]);
        let app = process.application().unwrap();
        assert_eq!(app.import().unwrap().chief_requests[0].status, ChiefRequestStatus::Processing);
        assert!(app.active_pack().is_none());

        let process = h.ctx.load(failed).await.unwrap();
        assert_eq!(process.active_task_types(), vec![TaskType::ChiefError]);
        assert!(h.queued().is_empty());

        service
            .licence_reply(LicenceReplyData {
                accepted: vec![AcceptedLicence { id: waiting_request }],
                rejected: vec![],
            })
            .await
            .unwrap();
        let process = h.ctx.load(waiting).await.unwrap();
        assert_eq!(process.status, CaseStatus::Completed);
    }

    #[tokio::test]
    async fn test_repeated_reply_is_rejected() {
        let mut h = Harness::new().await;
        let gateway = Arc::new(RecordingGateway::default());
        let (service, id, icms_hmrc_id) = awaiting_chief(&mut h, gateway).await;
        let reply = || LicenceReplyData {
            accepted: vec![AcceptedLicence { id: icms_hmrc_id }],
            rejected: vec![],
        };

        service.licence_reply(reply()).await.unwrap();
        assert!(matches!(service.licence_reply(reply()).await, Err(CaseError::Conflict(_))));

        let process = h.ctx.load(id).await.unwrap();
        assert_eq!(process.active_task_types(), vec![TaskType::Ack]);
    }

    #[tokio::test]
    async fn test_revocation_sends_cancel() {
        let mut h = Harness::new().await;
        let gateway = Arc::new(RecordingGateway::default());
        let (_, id, cancel_request) = awaiting_revocation(&mut h, gateway.clone()).await;

        let payload = gateway.last().unwrap();
        assert_eq!(payload.licence.licence_type, LicenceDataType::Cancel);
        assert_eq!(payload.licence.action, "cancel");
        assert_eq!(payload.licence.licence_reference, "GBSIL0000001C");

        let process = h.ctx.load(id).await.unwrap();
        let app = process.application().unwrap();
        assert!(app.active_pack().is_none());
        assert!(app.document_packs.iter().any(|pack| pack.status == PackStatus::Revoked));
        let requests = &app.import().unwrap().chief_requests;
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].icms_hmrc_id, cancel_request);
        assert_eq!(requests[1].status, ChiefRequestStatus::Processing);
    }

    #[tokio::test]
    async fn test_accepted_revocation_closes_case() {
        let mut h = Harness::new().await;
        let gateway = Arc::new(RecordingGateway::default());
        let (service, id, cancel_request) = awaiting_revocation(&mut h, gateway).await;

        service
            .licence_reply(LicenceReplyData {
                accepted: vec![AcceptedLicence { id: cancel_request }],
                rejected: vec![],
            })
            .await
            .unwrap();

        let process = h.ctx.load(id).await.unwrap();
        assert_eq!(process.status, CaseStatus::Revoked);
        assert!(process.active_task_types().is_empty());
        assert_eq!(
            process.application().unwrap().import().unwrap().chief_requests[1].status,
            ChiefRequestStatus::Success
        );
        assert!(h.queued().iter().all(|job| !matches!(job, Job::SendEmail(_))));
    }

    #[tokio::test]
    async fn test_rejected_revocation_is_resent() {
        let mut h = Harness::new().await;
        let gateway = Arc::new(RecordingGateway::default());
        let (service, id, cancel_request) = awaiting_revocation(&mut h, gateway).await;

        service
            .licence_reply(LicenceReplyData {
                accepted: vec![],
                rejected: vec![RejectedLicence {
                    id: cancel_request,
                    errors: vec![ResponseError {
                        error_code: "5678".into(),
                        error_msg: "Licence already cancelled".into(),
                    }],
                }],
            })
            .await
            .unwrap();

        let process = h.ctx.load(id).await.unwrap();
        assert_eq!(process.status, CaseStatus::Revoked);
        assert_eq!(process.active_task_types(), vec![TaskType::ChiefError]);
        assert_eq!(
            process.application().unwrap().import().unwrap().chief_requests[1].status,
            ChiefRequestStatus::Error
        );
        assert!(matches!(
            service.revert_to_processing(id, &h.admin).await,
            Err(CaseError::Process(_))
        ));
        h.queued();

        let process = service.resend_licence(id, &h.admin).await.unwrap();
        assert_eq!(process.status, CaseStatus::Revoked);
        assert_eq!(process.active_task_types(), vec![TaskType::ChiefRevokeWait]);
        assert!(matches!(
            h.queued().as_slice(),
            [Job::SendLicenceToChief { revoke: true, .. }]
        ));
    }
}
