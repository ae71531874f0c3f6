// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! CHIEF integration data: the record of each licence sent to ICMS-HMRC and
//! the JSON bodies exchanged with it.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChiefRequestStatus {
    #[serde(rename = "P")]
    Processing,
    #[serde(rename = "S")]
    Success,
    #[serde(rename = "E")]
    Error,
    #[serde(rename = "I")]
    InternalError,
}

/// Usage state of an issued licence as reported by CHIEF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChiefUsageStatus {
    #[serde(rename = "C")]
    Cancelled,
    #[serde(rename = "E")]
    Exhausted,
    #[serde(rename = "D")]
    Expired,
    #[serde(rename = "S")]
    Surrendered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseError {
    pub error_code: String,
    pub error_msg: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChiefRequest {
    pub id: Uuid,
    /// Identifier ICMS-HMRC echoes back in its replies.
    pub icms_hmrc_id: Uuid,
    pub request_data: serde_json::Value,
    pub request_sent_datetime: DateTime<Utc>,
    pub response_received_datetime: Option<DateTime<Utc>>,
    pub status: ChiefRequestStatus,
    #[serde(default)]
    pub response_errors: Vec<ResponseError>,
}

impl ChiefRequest {
    pub fn new(icms_hmrc_id: Uuid, request_data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            icms_hmrc_id,
            request_data,
            request_sent_datetime: Utc::now(),
            response_received_datetime: None,
            status: ChiefRequestStatus::Processing,
            response_errors: Vec::new(),
        }
    }

    pub fn complete(&mut self) {
        self.status = ChiefRequestStatus::Success;
        self.response_received_datetime = Some(Utc::now());
    }

    pub fn fail(&mut self, errors: Vec<ResponseError>) {
        self.status = ChiefRequestStatus::Error;
        self.response_errors = errors;
        self.response_received_datetime = Some(Utc::now());
    }
}

// ============================================================================
// Callback bodies (ICMS-HMRC -> ICMS)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedLicence {
    pub id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedLicence {
    pub id: Uuid,
    #[serde(default)]
    pub errors: Vec<ResponseError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenceReplyData {
    #[serde(default)]
    pub accepted: Vec<AcceptedLicence>,
    #[serde(default)]
    pub rejected: Vec<RejectedLicence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub licence_ref: String,
    pub licence_status: ChiefUsageStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageData {
    pub usage_data: Vec<UsageRecord>,
}

// ============================================================================
// Licence data (ICMS -> ICMS-HMRC)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LicenceDataType {
    Create,
    Replace,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganisationData {
    pub eori_number: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenceData {
    #[serde(rename = "type")]
    pub licence_type: LicenceDataType,
    pub action: String,
    pub id: Uuid,
    pub reference: String,
    pub case_reference: String,
    pub licence_reference: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub organisation: OrganisationData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restrictions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenceDataPayload {
    pub licence: LicenceData,
}
