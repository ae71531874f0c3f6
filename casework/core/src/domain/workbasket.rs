// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workbasket rows and the actions offered on each case, derived from the
//! case status and its active tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::process::{CaseStatus, Process, ProcessId, ProcessKind, ProcessType, TaskType};
use crate::domain::user::{User, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkbasketAction {
    // Caseworker
    TakeOwnership,
    Manage,
    ManageAccessRequest,
    AuthoriseDocuments,
    CancelAuthorisation,
    BypassChiefSuccess,
    BypassChiefFailure,
    MonitorProgress,
    ShowLicenceDetails,
    ViewCase,
    // Applicant
    Resume,
    Cancel,
    RespondToUpdateRequest,
    RequestWithdrawal,
    AcknowledgeNotification,
    RespondToVariationChange,
    View,
}

impl WorkbasketAction {
    pub fn label(&self) -> &'static str {
        match self {
            WorkbasketAction::TakeOwnership => "Take Ownership",
            WorkbasketAction::Manage => "Manage",
            WorkbasketAction::ManageAccessRequest => "Manage Access Request",
            WorkbasketAction::AuthoriseDocuments => "Authorise Documents",
            WorkbasketAction::CancelAuthorisation => "Cancel Authorisation",
            WorkbasketAction::BypassChiefSuccess => "(TEST) Bypass CHIEF induce success",
            WorkbasketAction::BypassChiefFailure => "(TEST) Bypass CHIEF induce failure",
            WorkbasketAction::MonitorProgress => "Monitor Progress",
            WorkbasketAction::ShowLicenceDetails => "Show Licence Details",
            WorkbasketAction::ViewCase => "View Case",
            WorkbasketAction::Resume => "Resume",
            WorkbasketAction::Cancel => "Cancel",
            WorkbasketAction::RespondToUpdateRequest => "Respond to Update Request",
            WorkbasketAction::RequestWithdrawal => "Request Withdrawal",
            WorkbasketAction::AcknowledgeNotification => "Acknowledge Notification",
            WorkbasketAction::RespondToVariationChange => "Respond to Variation Change",
            WorkbasketAction::View => "View",
        }
    }

    /// Actions that change state rather than open a page.
    pub fn is_post(&self) -> bool {
        matches!(
            self,
            WorkbasketAction::TakeOwnership
                | WorkbasketAction::Cancel
                | WorkbasketAction::CancelAuthorisation
                | WorkbasketAction::BypassChiefSuccess
                | WorkbasketAction::BypassChiefFailure
                | WorkbasketAction::AcknowledgeNotification
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkbasketRow {
    pub process_id: ProcessId,
    pub reference: Option<String>,
    pub process_type: ProcessType,
    pub label: String,
    pub status: CaseStatus,
    pub case_owner: Option<UserId>,
    pub order_datetime: DateTime<Utc>,
    pub active_tasks: Vec<TaskType>,
    pub actions: Vec<WorkbasketAction>,
}

pub fn ilb_admin_actions(process: &Process, user: &User, allow_bypass_chief: bool) -> Vec<WorkbasketAction> {
    use WorkbasketAction::*;

    let mut actions = Vec::new();
    if !process.is_active {
        actions.push(ViewCase);
        return actions;
    }

    let active = process.active_task_types();
    let has = |t: TaskType| active.contains(&t);
    let status = process.status;

    if process.kind().ok() == Some(ProcessKind::AccessRequest) {
        if status == CaseStatus::Submitted && has(TaskType::Process) {
            actions.push(ManageAccessRequest);
        }
        actions.push(ViewCase);
        return actions;
    }

    let in_progress = matches!(status, CaseStatus::Processing | CaseStatus::VariationRequested);

    if matches!(status, CaseStatus::Submitted | CaseStatus::VariationRequested)
        && has(TaskType::Process)
        && process.case_owner.is_none()
    {
        actions.push(TakeOwnership);
    }

    if in_progress && has(TaskType::Process) && process.case_owner == Some(user.id) {
        actions.push(Manage);
    }

    if in_progress && has(TaskType::Authorise) {
        actions.push(AuthoriseDocuments);
        actions.push(CancelAuthorisation);
    }

    if in_progress && has(TaskType::ChiefWait) && allow_bypass_chief {
        actions.push(BypassChiefSuccess);
        actions.push(BypassChiefFailure);
    }

    if (in_progress && (has(TaskType::ChiefWait) || has(TaskType::DocumentSigning)))
        || (status == CaseStatus::Revoked && has(TaskType::ChiefRevokeWait))
    {
        actions.push(MonitorProgress);
    }

    if has(TaskType::ChiefError) {
        actions.push(ShowLicenceDetails);
    }

    actions.push(ViewCase);
    actions
}

pub fn applicant_actions(process: &Process) -> Vec<WorkbasketAction> {
    use WorkbasketAction::*;

    let mut actions = Vec::new();
    let application = match process.application() {
        Ok(app) if process.is_active => app,
        _ => return vec![View],
    };

    let active = process.active_task_types();
    let has = |t: TaskType| active.contains(&t);
    let status = process.status;

    if status == CaseStatus::InProgress && has(TaskType::Prepare) {
        actions.push(Resume);
        actions.push(Cancel);
    }

    if has(TaskType::Prepare) && application.has_open_update_request() {
        actions.push(RespondToUpdateRequest);
    }

    if matches!(
        status,
        CaseStatus::Submitted | CaseStatus::Processing | CaseStatus::VariationRequested
    ) && application.open_withdrawal().is_none()
    {
        actions.push(RequestWithdrawal);
    }

    if status == CaseStatus::Completed && has(TaskType::Ack) {
        actions.push(AcknowledgeNotification);
    }

    if has(TaskType::VrRequestChange) {
        actions.push(RespondToVariationChange);
    }

    actions.push(View);
    actions
}

pub fn workbasket_row(process: &Process, user: &User, allow_bypass_chief: bool) -> WorkbasketRow {
    let actions = if user.is_ilb_admin() {
        ilb_admin_actions(process, user, allow_bypass_chief)
    } else {
        applicant_actions(process)
    };

    WorkbasketRow {
        process_id: process.id,
        reference: process.reference.clone(),
        process_type: process.process_type,
        label: process.process_type.label().to_string(),
        status: process.status,
        case_owner: process.case_owner,
        order_datetime: process.order_datetime,
        active_tasks: process.active_task_types(),
        actions,
    }
}
