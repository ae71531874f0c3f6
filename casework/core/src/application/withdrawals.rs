// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Withdrawal requests: the applicant asks to withdraw a submitted case and
//! a caseworker accepts or rejects.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::application::context::{require_applicant, require_ilb_admin, CaseContext};
use crate::application::notifications::Placeholders;
use crate::domain::case::CaseError;
use crate::domain::process::{CaseStatus, Process, ProcessId, TaskType};
use crate::domain::requests::{VariationRequestStatus, WithdrawApplication, WithdrawalStatus};
use crate::domain::template::EmailTemplateCode;
use crate::domain::user::User;

const WITHDRAWABLE: &[CaseStatus] = &[
    CaseStatus::Submitted,
    CaseStatus::Processing,
    CaseStatus::VariationRequested,
];

pub struct WithdrawalService {
    ctx: CaseContext,
}

impl WithdrawalService {
    pub fn new(ctx: CaseContext) -> Self {
        Self { ctx }
    }

    pub async fn request_withdrawal(
        &self,
        id: ProcessId,
        user: &User,
        reason: String,
    ) -> Result<(Process, Uuid), CaseError> {
        let withdrawal = WithdrawApplication::open(reason, user.id);
        let withdrawal_id = withdrawal.id;

        let process = self
            .ctx
            .update(id, move |p| {
                require_applicant(p, user)?;
                p.check_expected_status(WITHDRAWABLE)?;
                let app = p.application_mut()?;
                if app.open_withdrawal().is_some() {
                    return Err(CaseError::Conflict("A withdrawal request is already open".to_string()));
                }
                app.withdrawals.push(withdrawal);
                Ok(())
            })
            .await?;

        info!(process_id = %id, %withdrawal_id, "Withdrawal requested");
        Ok((process, withdrawal_id))
    }

    /// The applicant takes back their own withdrawal request.
    pub async fn archive_withdrawal(
        &self,
        id: ProcessId,
        user: &User,
        withdrawal_id: Uuid,
    ) -> Result<Process, CaseError> {
        self.ctx
            .update(id, |p| {
                require_applicant(p, user)?;
                p.check_expected_status(WITHDRAWABLE)?;
                let withdrawal = p
                    .application_mut()?
                    .withdrawal_mut(withdrawal_id)
                    .ok_or_else(|| CaseError::NotFound(format!("Withdrawal {withdrawal_id}")))?;
                if !withdrawal.is_active || withdrawal.status != WithdrawalStatus::Open {
                    return Err(CaseError::Conflict("The withdrawal request is not open".to_string()));
                }
                withdrawal.is_active = false;
                withdrawal.status = WithdrawalStatus::Deleted;
                withdrawal.updated = Utc::now();
                Ok(())
            })
            .await
    }

    /// Accept or reject the open withdrawal. Only the case owner may respond
    /// once the case has one.
    pub async fn respond_withdrawal(
        &self,
        id: ProcessId,
        user: &User,
        accept: bool,
        response: Option<String>,
    ) -> Result<Process, CaseError> {
        require_ilb_admin(user)?;

        let process = self
            .ctx
            .update(id, move |p| {
                if p.case_owner.is_some_and(|owner| owner != user.id) {
                    return Err(CaseError::PermissionDenied(format!(
                        "{} is not the case owner",
                        user.email
                    )));
                }
                let task = p.current_task(TaskType::Process)?.id;
                let variation = p.status == CaseStatus::VariationRequested;

                let app = p.application_mut()?;
                let withdrawal = app
                    .open_withdrawal_mut()
                    .ok_or_else(|| CaseError::Conflict("The case has no open withdrawal request".to_string()))?;
                withdrawal.response = response;
                withdrawal.response_by = Some(user.id);
                withdrawal.updated = Utc::now();

                if !accept {
                    withdrawal.status = WithdrawalStatus::Rejected;
                    p.end_task(task, None)?;
                    p.start_task(TaskType::Process, Some(task), None)?;
                    return Ok(());
                }

                withdrawal.status = WithdrawalStatus::Accepted;
                if variation {
                    let reason = app.variation_refuse_reason.clone();
                    if let Some(request) = app.open_variation_request_mut() {
                        request.reject_cancellation_reason = reason;
                        request.close(VariationRequestStatus::Withdrawn, Some(user.id));
                    }
                    app.archive_draft_pack();
                    p.set_status(CaseStatus::Completed);
                } else {
                    app.archive_draft_pack();
                    p.set_status(CaseStatus::Withdrawn);
                    p.finish();
                }
                p.end_task(task, Some(user.id))?;
                Ok(())
            })
            .await?;

        info!(process_id = %id, accept, status = %process.status, "Withdrawal request answered");
        if accept {
            self.ctx
                .notifier()
                .send_to_contacts(&process, EmailTemplateCode::WithdrawalAccepted, Placeholders::new())
                .await;
        }
        Ok(process)
    }
}
