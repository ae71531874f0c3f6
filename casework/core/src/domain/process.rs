// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Process Aggregate
//!
//! A `Process` is one workflow instance: an import application, an export
//! (certificate) application or an access request. Its progress is recorded in
//! an append-only task log. Each `Task` marks one workflow stage and links to
//! the task it superseded through `previous`, forming a chain that doubles as
//! the case audit trail.
//!
//! Transitions are task-gated: a caller first asks for the single active task
//! of the expected type while the process is in one of the expected statuses
//! (`get_task`), then ends it and starts the next one (`advance`).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::access::AccessRequest;
use crate::domain::case::{Application, CaseDetail};
use crate::domain::events::CaseEvent;
use crate::domain::user::UserId;

// ============================================================================
// Identifiers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessId(pub Uuid);

impl ProcessId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Process types
// ============================================================================

/// Discriminator for the concrete case behind a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessType {
    #[serde(rename = "DerogationsApplication")]
    Derogations,
    #[serde(rename = "DFLApplication")]
    DeactivatedFirearms,
    #[serde(rename = "OpenIndividualLicenceApplication")]
    OpenIndividualLicence,
    #[serde(rename = "SILApplication")]
    SpecificIndividualLicence,
    #[serde(rename = "ISQuotaApplication")]
    IronSteelQuota,
    #[serde(rename = "OutwardProcessingTradeApplication")]
    OutwardProcessingTrade,
    #[serde(rename = "SanctionsAndAdhocApplication")]
    SanctionsAndAdhoc,
    #[serde(rename = "PriorSurveillanceApplication")]
    PriorSurveillance,
    #[serde(rename = "TextilesApplication")]
    Textiles,
    #[serde(rename = "WoodQuotaApplication")]
    WoodQuota,
    #[serde(rename = "CertificateOfManufactureApplication")]
    CertificateOfManufacture,
    #[serde(rename = "CertificateOfFreeSaleApplication")]
    CertificateOfFreeSale,
    #[serde(rename = "CertificateofGoodManufacturingPractice")]
    CertificateOfGoodManufacturingPractice,
    #[serde(rename = "FurtherInformationRequest")]
    FurtherInformationRequest,
    #[serde(rename = "ImporterAccessRequest")]
    ImporterAccessRequest,
    #[serde(rename = "ExporterAccessRequest")]
    ExporterAccessRequest,
    #[serde(rename = "ExporterApprovalRequest")]
    ExporterApprovalRequest,
    #[serde(rename = "ImporterApprovalRequest")]
    ImporterApprovalRequest,
}

/// The family of case a process type belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    ImportApplication,
    ExportApplication,
    AccessRequest,
}

impl ProcessType {
    pub const ALL: [ProcessType; 18] = [
        ProcessType::Derogations,
        ProcessType::DeactivatedFirearms,
        ProcessType::OpenIndividualLicence,
        ProcessType::SpecificIndividualLicence,
        ProcessType::IronSteelQuota,
        ProcessType::OutwardProcessingTrade,
        ProcessType::SanctionsAndAdhoc,
        ProcessType::PriorSurveillance,
        ProcessType::Textiles,
        ProcessType::WoodQuota,
        ProcessType::CertificateOfManufacture,
        ProcessType::CertificateOfFreeSale,
        ProcessType::CertificateOfGoodManufacturingPractice,
        ProcessType::FurtherInformationRequest,
        ProcessType::ImporterAccessRequest,
        ProcessType::ExporterAccessRequest,
        ProcessType::ExporterApprovalRequest,
        ProcessType::ImporterApprovalRequest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessType::Derogations => "DerogationsApplication",
            ProcessType::DeactivatedFirearms => "DFLApplication",
            ProcessType::OpenIndividualLicence => "OpenIndividualLicenceApplication",
            ProcessType::SpecificIndividualLicence => "SILApplication",
            ProcessType::IronSteelQuota => "ISQuotaApplication",
            ProcessType::OutwardProcessingTrade => "OutwardProcessingTradeApplication",
            ProcessType::SanctionsAndAdhoc => "SanctionsAndAdhocApplication",
            ProcessType::PriorSurveillance => "PriorSurveillanceApplication",
            ProcessType::Textiles => "TextilesApplication",
            ProcessType::WoodQuota => "WoodQuotaApplication",
            ProcessType::CertificateOfManufacture => "CertificateOfManufactureApplication",
            ProcessType::CertificateOfFreeSale => "CertificateOfFreeSaleApplication",
            ProcessType::CertificateOfGoodManufacturingPractice => {
                "CertificateofGoodManufacturingPractice"
            }
            ProcessType::FurtherInformationRequest => "FurtherInformationRequest",
            ProcessType::ImporterAccessRequest => "ImporterAccessRequest",
            ProcessType::ExporterAccessRequest => "ExporterAccessRequest",
            ProcessType::ExporterApprovalRequest => "ExporterApprovalRequest",
            ProcessType::ImporterApprovalRequest => "ImporterApprovalRequest",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == value)
    }

    /// Human readable name shown in workbaskets and emails.
    pub fn label(&self) -> &'static str {
        match self {
            ProcessType::Derogations => "Derogation from Sanctions Import Ban",
            ProcessType::DeactivatedFirearms => "Firearms and Ammunition (Deactivated Firearms Licence)",
            ProcessType::OpenIndividualLicence => "Firearms and Ammunition (Open Individual Import Licence)",
            ProcessType::SpecificIndividualLicence => {
                "Firearms and Ammunition (Specific Individual Import Licence)"
            }
            ProcessType::IronSteelQuota => "Iron and Steel (Quota)",
            ProcessType::OutwardProcessingTrade => "Outward Processing Trade",
            ProcessType::SanctionsAndAdhoc => "Sanctions and Adhoc Licence Application",
            ProcessType::PriorSurveillance => "Prior Surveillance",
            ProcessType::Textiles => "Textiles (Quota)",
            ProcessType::WoodQuota => "Wood (Quota)",
            ProcessType::CertificateOfManufacture => "Certificate of Manufacture",
            ProcessType::CertificateOfFreeSale => "Certificate of Free Sale",
            ProcessType::CertificateOfGoodManufacturingPractice => {
                "Certificate of Good Manufacturing Practice"
            }
            ProcessType::FurtherInformationRequest => "Further Information Request",
            ProcessType::ImporterAccessRequest => "Importer Access Request",
            ProcessType::ExporterAccessRequest => "Exporter Access Request",
            ProcessType::ExporterApprovalRequest => "Exporter Approval Request",
            ProcessType::ImporterApprovalRequest => "Importer Approval Request",
        }
    }

    /// Resolve the concrete case family ("downcast").
    ///
    /// Further information requests and approval requests hang off other
    /// processes and cannot be resolved on their own.
    pub fn specific_kind(&self) -> Result<ProcessKind, ProcessError> {
        match self {
            ProcessType::Derogations
            | ProcessType::DeactivatedFirearms
            | ProcessType::OpenIndividualLicence
            | ProcessType::SpecificIndividualLicence
            | ProcessType::IronSteelQuota
            | ProcessType::OutwardProcessingTrade
            | ProcessType::SanctionsAndAdhoc
            | ProcessType::PriorSurveillance
            | ProcessType::Textiles
            | ProcessType::WoodQuota => Ok(ProcessKind::ImportApplication),
            ProcessType::CertificateOfManufacture
            | ProcessType::CertificateOfFreeSale
            | ProcessType::CertificateOfGoodManufacturingPractice => {
                Ok(ProcessKind::ExportApplication)
            }
            ProcessType::ImporterAccessRequest | ProcessType::ExporterAccessRequest => {
                Ok(ProcessKind::AccessRequest)
            }
            ProcessType::FurtherInformationRequest
            | ProcessType::ExporterApprovalRequest
            | ProcessType::ImporterApprovalRequest => Err(ProcessError::UnsupportedProcessType(*self)),
        }
    }
}

impl fmt::Display for ProcessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Status and task types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStatus {
    InProgress,
    Submitted,
    Processing,
    Completed,
    Withdrawn,
    Stopped,
    Revoked,
    VariationRequested,
    Deleted,
    // Access request only
    Closed,
    FirRequested,
}

impl CaseStatus {
    pub const ALL: [CaseStatus; 11] = [
        CaseStatus::InProgress,
        CaseStatus::Submitted,
        CaseStatus::Processing,
        CaseStatus::Completed,
        CaseStatus::Withdrawn,
        CaseStatus::Stopped,
        CaseStatus::Revoked,
        CaseStatus::VariationRequested,
        CaseStatus::Deleted,
        CaseStatus::Closed,
        CaseStatus::FirRequested,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::InProgress => "IN_PROGRESS",
            CaseStatus::Submitted => "SUBMITTED",
            CaseStatus::Processing => "PROCESSING",
            CaseStatus::Completed => "COMPLETED",
            CaseStatus::Withdrawn => "WITHDRAWN",
            CaseStatus::Stopped => "STOPPED",
            CaseStatus::Revoked => "REVOKED",
            CaseStatus::VariationRequested => "VARIATION_REQUESTED",
            CaseStatus::Deleted => "DELETED",
            CaseStatus::Closed => "CLOSED",
            CaseStatus::FirRequested => "FIR_REQUESTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.as_str() == value)
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Prepare,
    Process,
    VrRequestChange,
    Authorise,
    DocumentError,
    DocumentSigning,
    ChiefWait,
    ChiefRevokeWait,
    ChiefError,
    Ack,
    Rejected,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Prepare => "prepare",
            TaskType::Process => "process",
            TaskType::VrRequestChange => "vr_request_change",
            TaskType::Authorise => "authorise",
            TaskType::DocumentError => "document_error",
            TaskType::DocumentSigning => "document_signing",
            TaskType::ChiefWait => "chief_wait",
            TaskType::ChiefRevokeWait => "chief_revoke_wait",
            TaskType::ChiefError => "chief_error",
            TaskType::Ack => "ack",
            TaskType::Rejected => "rejected",
        }
    }

    /// Statuses in which a task of this type may be the current task.
    pub fn expected_statuses(&self, kind: ProcessKind) -> &'static [CaseStatus] {
        use CaseStatus::*;

        if kind == ProcessKind::AccessRequest {
            return match self {
                TaskType::Process => &[Submitted],
                _ => &[],
            };
        }

        match self {
            TaskType::Prepare => &[InProgress, Processing, VariationRequested],
            TaskType::Process => &[Submitted, Processing, VariationRequested],
            TaskType::VrRequestChange => &[VariationRequested],
            TaskType::Authorise
            | TaskType::DocumentSigning
            | TaskType::DocumentError
            | TaskType::ChiefWait => &[Processing, VariationRequested],
            // A rejected revocation leaves the case REVOKED with a CHIEF error.
            TaskType::ChiefError => &[Processing, VariationRequested, Revoked],
            TaskType::ChiefRevokeWait => &[Revoked],
            TaskType::Ack | TaskType::Rejected => &[Completed],
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in a process's task log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: TaskType,
    pub is_active: bool,
    pub created: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
    pub previous: Option<TaskId>,
    pub owner: Option<UserId>,
}

// ============================================================================
// Process aggregate
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Process {
    pub id: ProcessId,
    pub process_type: ProcessType,
    pub status: CaseStatus,
    pub is_active: bool,
    pub created: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
    /// Ordering key for workbaskets; bumped whenever the case needs attention again.
    pub order_datetime: DateTime<Utc>,
    pub reference: Option<String>,
    pub created_by: UserId,
    pub submitted_by: Option<UserId>,
    pub submit_datetime: Option<DateTime<Utc>>,
    pub case_owner: Option<UserId>,
    pub detail: CaseDetail,
    tasks: Vec<Task>,
    #[serde(skip)]
    events: Vec<CaseEvent>,
}

impl Process {
    pub fn new(
        process_type: ProcessType,
        status: CaseStatus,
        created_by: UserId,
        detail: CaseDetail,
    ) -> Self {
        let now = Utc::now();
        let id = ProcessId::new();
        Self {
            id,
            process_type,
            status,
            is_active: true,
            created: now,
            finished: None,
            order_datetime: now,
            reference: None,
            created_by,
            submitted_by: None,
            submit_datetime: None,
            case_owner: None,
            detail,
            tasks: Vec::new(),
            events: vec![CaseEvent::ProcessCreated {
                process_id: id,
                process_type,
                created_at: now,
            }],
        }
    }

    pub fn kind(&self) -> Result<ProcessKind, ProcessError> {
        self.process_type.specific_kind()
    }

    // ------------------------------------------------------------------------
    // Task log queries
    // ------------------------------------------------------------------------

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn active_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|t| t.is_active)
    }

    pub fn active_task_types(&self) -> Vec<TaskType> {
        self.active_tasks().map(|t| t.task_type).collect()
    }

    pub fn has_active_task(&self, task_type: TaskType) -> bool {
        self.active_tasks().any(|t| t.task_type == task_type)
    }

    /// Tasks started as a continuation of `id`.
    pub fn next_tasks(&self, id: TaskId) -> Vec<&Task> {
        self.tasks.iter().filter(|t| t.previous == Some(id)).collect()
    }

    /// The chain from `id` back to the task that started it, newest first.
    pub fn task_chain(&self, id: TaskId) -> Vec<&Task> {
        let mut chain = Vec::new();
        let mut cursor = self.task(id);
        while let Some(task) = cursor {
            // Guards against a malformed log pointing back at itself.
            if chain.iter().any(|t: &&Task| t.id == task.id) {
                break;
            }
            chain.push(task);
            cursor = task.previous.and_then(|prev| self.task(prev));
        }
        chain
    }

    pub fn check_expected_status(&self, expected: &[CaseStatus]) -> Result<(), ProcessError> {
        if !self.is_active {
            return Err(ProcessError::ProcessInactive(self.id));
        }

        if !expected.contains(&self.status) {
            return Err(ProcessError::ProcessState {
                status: self.status,
                expected: expected
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }

        Ok(())
    }

    /// The single active task of `task_type`, regardless of status.
    pub fn check_expected_task(&self, task_type: TaskType) -> Result<&Task, ProcessError> {
        let mut matching = self.active_tasks().filter(|t| t.task_type == task_type);
        match (matching.next(), matching.count()) {
            (Some(task), 0) => Ok(task),
            (None, _) => Err(ProcessError::Task(format!(
                "Expected one active task, got 0 ({task_type})"
            ))),
            (Some(_), extra) => Err(ProcessError::Task(format!(
                "Expected one active task, got {} ({task_type})",
                extra + 1
            ))),
        }
    }

    /// The single active task of `task_type` while the process is active and
    /// in one of `expected` statuses.
    pub fn get_task(&self, expected: &[CaseStatus], task_type: TaskType) -> Result<&Task, ProcessError> {
        self.check_expected_status(expected)?;
        self.check_expected_task(task_type)
    }

    /// `get_task` using the statuses in which `task_type` is normally current.
    pub fn current_task(&self, task_type: TaskType) -> Result<&Task, ProcessError> {
        let kind = self.kind()?;
        self.get_task(task_type.expected_statuses(kind), task_type)
    }

    // ------------------------------------------------------------------------
    // Task log mutation
    // ------------------------------------------------------------------------

    pub fn start_task(
        &mut self,
        task_type: TaskType,
        previous: Option<TaskId>,
        owner: Option<UserId>,
    ) -> Result<TaskId, ProcessError> {
        if self.has_active_task(task_type) {
            return Err(ProcessError::Task(format!(
                "Cannot start {task_type}: an active {task_type} task already exists"
            )));
        }

        let now = Utc::now();
        let task = Task {
            id: TaskId::new(),
            task_type,
            is_active: true,
            created: now,
            finished: None,
            previous,
            owner,
        };
        let id = task.id;
        self.tasks.push(task);
        self.events.push(CaseEvent::TaskStarted {
            process_id: self.id,
            task_id: id,
            task_type,
            previous,
            started_at: now,
        });
        metrics::counter!("icms_task_transitions_total", "task_type" => task_type.as_str(), "event" => "started")
            .increment(1);

        Ok(id)
    }

    pub fn end_task(&mut self, id: TaskId, owner: Option<UserId>) -> Result<(), ProcessError> {
        let now = Utc::now();
        let process_id = self.id;
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| ProcessError::Task(format!("Task {id} does not belong to process {process_id}")))?;

        if !task.is_active {
            return Err(ProcessError::Task(format!("Task {id} has already finished")));
        }

        task.is_active = false;
        task.finished = Some(now);
        if owner.is_some() {
            task.owner = owner;
        }
        let task_type = task.task_type;

        self.events.push(CaseEvent::TaskEnded {
            process_id,
            task_id: id,
            task_type,
            finished_at: now,
        });
        metrics::counter!("icms_task_transitions_total", "task_type" => task_type.as_str(), "event" => "ended")
            .increment(1);

        Ok(())
    }

    /// End `from` and start `to` linked to it.
    pub fn advance(&mut self, from: TaskId, to: TaskType, owner: Option<UserId>) -> Result<TaskId, ProcessError> {
        self.end_task(from, owner)?;
        self.start_task(to, Some(from), owner)
    }

    pub fn end_active_tasks(&mut self, owner: Option<UserId>) -> Result<(), ProcessError> {
        let active: Vec<TaskId> = self.active_tasks().map(|t| t.id).collect();
        for id in active {
            self.end_task(id, owner)?;
        }
        Ok(())
    }

    pub fn set_status(&mut self, status: CaseStatus) {
        if self.status == status {
            return;
        }
        let from = self.status;
        self.status = status;
        self.events.push(CaseEvent::StatusChanged {
            process_id: self.id,
            from,
            to: status,
            changed_at: Utc::now(),
        });
    }

    pub fn update_order_datetime(&mut self) {
        self.order_datetime = Utc::now();
    }

    pub fn finish(&mut self) {
        self.is_active = false;
        self.finished = Some(Utc::now());
    }

    pub fn record_event(&mut self, event: CaseEvent) {
        self.events.push(event);
    }

    /// Drain events recorded since the last call.
    pub fn take_events(&mut self) -> Vec<CaseEvent> {
        std::mem::take(&mut self.events)
    }

    // ------------------------------------------------------------------------
    // Case detail access
    // ------------------------------------------------------------------------

    pub fn application(&self) -> Result<&Application, ProcessError> {
        match &self.detail {
            CaseDetail::Application(app) => Ok(app),
            CaseDetail::AccessRequest(_) => Err(self.wrong_kind("application")),
        }
    }

    pub fn application_mut(&mut self) -> Result<&mut Application, ProcessError> {
        let err = self.wrong_kind("application");
        match &mut self.detail {
            CaseDetail::Application(app) => Ok(app),
            CaseDetail::AccessRequest(_) => Err(err),
        }
    }

    pub fn access_request(&self) -> Result<&AccessRequest, ProcessError> {
        match &self.detail {
            CaseDetail::AccessRequest(req) => Ok(req),
            CaseDetail::Application(_) => Err(self.wrong_kind("access request")),
        }
    }

    pub fn access_request_mut(&mut self) -> Result<&mut AccessRequest, ProcessError> {
        let err = self.wrong_kind("access request");
        match &mut self.detail {
            CaseDetail::AccessRequest(req) => Ok(req),
            CaseDetail::Application(_) => Err(err),
        }
    }

    fn wrong_kind(&self, expected: &'static str) -> ProcessError {
        ProcessError::WrongCaseKind {
            process_type: self.process_type,
            expected,
        }
    }
}

// ============================================================================
// Domain Errors
// ============================================================================

/// Workflow integrity errors. Raised when a transition is attempted that the
/// task log does not currently permit.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProcessError {
    #[error("Process {0} is inactive")]
    ProcessInactive(ProcessId),

    #[error("Process is in the wrong state: {status} (expected one of: {expected})")]
    ProcessState { status: CaseStatus, expected: String },

    #[error("{0}")]
    Task(String),

    #[error("Unsupported process type: {0}")]
    UnsupportedProcessType(ProcessType),

    #[error("{process_type} is not an {expected}")]
    WrongCaseKind {
        process_type: ProcessType,
        expected: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::case::tests::import_detail;

    fn process(status: CaseStatus) -> Process {
        Process::new(
            ProcessType::SpecificIndividualLicence,
            status,
            UserId::new(),
            import_detail(ProcessType::SpecificIndividualLicence),
        )
    }

    #[test]
    fn test_process_type_wire_strings_round_trip() {
        for process_type in ProcessType::ALL {
            assert_eq!(ProcessType::parse(process_type.as_str()), Some(process_type));
            let json = serde_json::to_string(&process_type).unwrap();
            assert_eq!(json, format!("\"{}\"", process_type.as_str()));
        }
    }

    #[test]
    fn test_specific_kind_rejects_fir_and_approval_requests() {
        assert_eq!(
            ProcessType::SpecificIndividualLicence.specific_kind().unwrap(),
            ProcessKind::ImportApplication
        );
        assert_eq!(
            ProcessType::CertificateOfFreeSale.specific_kind().unwrap(),
            ProcessKind::ExportApplication
        );
        assert_eq!(
            ProcessType::ExporterAccessRequest.specific_kind().unwrap(),
            ProcessKind::AccessRequest
        );
        for unsupported in [
            ProcessType::FurtherInformationRequest,
            ProcessType::ImporterApprovalRequest,
            ProcessType::ExporterApprovalRequest,
        ] {
            assert_eq!(
                unsupported.specific_kind(),
                Err(ProcessError::UnsupportedProcessType(unsupported))
            );
        }
    }

    #[test]
    fn test_get_task_requires_active_process() {
        let mut p = process(CaseStatus::InProgress);
        p.start_task(TaskType::Prepare, None, None).unwrap();
        p.finish();

        let err = p.get_task(&[CaseStatus::InProgress], TaskType::Prepare).unwrap_err();
        assert!(matches!(err, ProcessError::ProcessInactive(_)));
    }

    #[test]
    fn test_get_task_checks_status() {
        let mut p = process(CaseStatus::InProgress);
        p.start_task(TaskType::Prepare, None, None).unwrap();

        let err = p.get_task(&[CaseStatus::Submitted], TaskType::Prepare).unwrap_err();
        assert!(matches!(err, ProcessError::ProcessState { status: CaseStatus::InProgress, .. }));
    }

    #[test]
    fn test_get_task_requires_exactly_one_active_task() {
        let p = process(CaseStatus::InProgress);
        let err = p.get_task(&[CaseStatus::InProgress], TaskType::Prepare).unwrap_err();
        assert_eq!(err.to_string(), "Expected one active task, got 0 (prepare)");
    }

    #[test]
    fn test_start_task_refuses_duplicate_active_type() {
        let mut p = process(CaseStatus::InProgress);
        p.start_task(TaskType::Prepare, None, None).unwrap();
        assert!(matches!(
            p.start_task(TaskType::Prepare, None, None),
            Err(ProcessError::Task(_))
        ));
    }

    #[test]
    fn test_advance_links_tasks_and_keeps_log() {
        let mut p = process(CaseStatus::InProgress);
        let user = UserId::new();
        let prepare = p.start_task(TaskType::Prepare, None, None).unwrap();
        let process_task = p.advance(prepare, TaskType::Process, Some(user)).unwrap();

        assert_eq!(p.tasks().len(), 2);
        let ended = p.task(prepare).unwrap();
        assert!(!ended.is_active);
        assert!(ended.finished.is_some());
        assert_eq!(ended.owner, Some(user));

        assert_eq!(p.active_task_types(), vec![TaskType::Process]);
        assert_eq!(p.next_tasks(prepare)[0].id, process_task);

        let chain: Vec<TaskType> = p.task_chain(process_task).iter().map(|t| t.task_type).collect();
        assert_eq!(chain, vec![TaskType::Process, TaskType::Prepare]);
    }

    #[test]
    fn test_end_task_twice_fails() {
        let mut p = process(CaseStatus::InProgress);
        let id = p.start_task(TaskType::Prepare, None, None).unwrap();
        p.end_task(id, None).unwrap();
        assert!(p.end_task(id, None).is_err());
    }

    #[test]
    fn test_current_task_uses_status_table() {
        let mut p = process(CaseStatus::Completed);
        p.start_task(TaskType::Ack, None, None).unwrap();
        assert!(p.current_task(TaskType::Ack).is_ok());

        p.set_status(CaseStatus::Processing);
        assert!(p.current_task(TaskType::Ack).is_err());
    }

    #[test]
    fn test_events_are_recorded_and_drained() {
        let mut p = process(CaseStatus::InProgress);
        p.start_task(TaskType::Prepare, None, None).unwrap();
        p.set_status(CaseStatus::Submitted);
        p.set_status(CaseStatus::Submitted);

        let events = p.take_events();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], CaseEvent::ProcessCreated { .. }));
        assert!(matches!(events[2], CaseEvent::StatusChanged { to: CaseStatus::Submitted, .. }));
        assert!(p.take_events().is_empty());
    }

    #[test]
    fn test_access_request_accessors_reject_applications() {
        let p = process(CaseStatus::InProgress);
        assert!(p.application().is_ok());
        assert!(matches!(p.access_request(), Err(ProcessError::WrongCaseKind { .. })));
    }
}
