// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Requests raised against an application while it is being processed or
//! after it has completed: update requests (caseworker asks the applicant to
//! amend), variation requests (change an issued licence or certificate) and
//! withdrawals (applicant asks to withdraw).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::user::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateRequestStatus {
    Draft,
    Open,
    Closed,
    UpdateInProgress,
    Responded,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub id: Uuid,
    pub status: UpdateRequestStatus,
    pub request_subject: String,
    pub request_detail: String,
    pub response_detail: Option<String>,
    pub requested_by: UserId,
    pub requested_datetime: DateTime<Utc>,
    pub response_by: Option<UserId>,
    pub response_datetime: Option<DateTime<Utc>>,
    pub closed_by: Option<UserId>,
    pub closed_datetime: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl UpdateRequest {
    pub fn open(subject: impl Into<String>, detail: impl Into<String>, requested_by: UserId) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: UpdateRequestStatus::Open,
            request_subject: subject.into(),
            request_detail: detail.into(),
            response_detail: None,
            requested_by,
            requested_datetime: Utc::now(),
            response_by: None,
            response_datetime: None,
            closed_by: None,
            closed_datetime: None,
            is_active: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariationRequestStatus {
    Draft,
    Open,
    Cancelled,
    Accepted,
    Rejected,
    Withdrawn,
    Deleted,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationRequest {
    pub id: Uuid,
    pub status: VariationRequestStatus,
    pub extension_flag: bool,
    pub requested_by: UserId,
    pub requested_datetime: DateTime<Utc>,
    pub what_varied: String,
    pub why_varied: Option<String>,
    pub when_varied: Option<NaiveDate>,
    pub reject_cancellation_reason: Option<String>,
    /// Set while the caseworker waits for the applicant to amend the request.
    pub update_request_reason: Option<String>,
    pub closed_by: Option<UserId>,
    pub closed_datetime: Option<DateTime<Utc>>,
}

impl VariationRequest {
    pub fn open(
        what_varied: impl Into<String>,
        why_varied: Option<String>,
        when_varied: Option<NaiveDate>,
        requested_by: UserId,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: VariationRequestStatus::Open,
            extension_flag: false,
            requested_by,
            requested_datetime: Utc::now(),
            what_varied: what_varied.into(),
            why_varied,
            when_varied,
            reject_cancellation_reason: None,
            update_request_reason: None,
            closed_by: None,
            closed_datetime: None,
        }
    }

    pub fn close(&mut self, status: VariationRequestStatus, closed_by: Option<UserId>) {
        self.status = status;
        self.closed_by = closed_by;
        self.closed_datetime = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WithdrawalStatus {
    Open,
    Rejected,
    Accepted,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawApplication {
    pub id: Uuid,
    pub status: WithdrawalStatus,
    pub reason: String,
    pub request_by: UserId,
    pub created: DateTime<Utc>,
    pub response: Option<String>,
    pub response_by: Option<UserId>,
    pub updated: DateTime<Utc>,
    pub is_active: bool,
}

impl WithdrawApplication {
    pub fn open(reason: impl Into<String>, request_by: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: WithdrawalStatus::Open,
            reason: reason.into(),
            request_by,
            created: now,
            response: None,
            response_by: None,
            updated: now,
            is_active: true,
        }
    }
}
