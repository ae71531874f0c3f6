// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Access requests: a user asking to act for an importer or exporter, either
//! directly or as an agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::process::ProcessType;
use crate::domain::user::{OrganisationId, SystemPermission, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessRequestType {
    ImporterAccess,
    AgentImporterAccess,
    ExporterAccess,
    AgentExporterAccess,
}

impl AccessRequestType {
    pub fn process_type(&self) -> ProcessType {
        match self {
            AccessRequestType::ImporterAccess | AccessRequestType::AgentImporterAccess => {
                ProcessType::ImporterAccessRequest
            }
            AccessRequestType::ExporterAccess | AccessRequestType::AgentExporterAccess => {
                ProcessType::ExporterAccessRequest
            }
        }
    }

    pub fn is_agent(&self) -> bool {
        matches!(
            self,
            AccessRequestType::AgentImporterAccess | AccessRequestType::AgentExporterAccess
        )
    }

    /// Permission granted to the requester when the request is approved.
    pub fn granted_permission(&self) -> SystemPermission {
        match self.process_type() {
            ProcessType::ExporterAccessRequest => SystemPermission::ExporterAccess,
            _ => SystemPermission::ImporterAccess,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessResponse {
    Approved,
    Refused,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub request_type: AccessRequestType,
    pub organisation_name: String,
    pub organisation_address: String,
    pub organisation_registered_number: Option<String>,
    pub eori_number: Option<String>,
    pub agent_name: Option<String>,
    pub agent_address: Option<String>,
    pub request_reason: Option<String>,
    /// Organisation the request was matched to by a caseworker.
    pub link: Option<OrganisationId>,
    pub response: Option<AccessResponse>,
    pub response_reason: Option<String>,
    pub closed_datetime: Option<DateTime<Utc>>,
    pub closed_by: Option<UserId>,
}

impl AccessRequest {
    pub fn new(
        request_type: AccessRequestType,
        organisation_name: impl Into<String>,
        organisation_address: impl Into<String>,
    ) -> Self {
        Self {
            request_type,
            organisation_name: organisation_name.into(),
            organisation_address: organisation_address.into(),
            organisation_registered_number: None,
            eori_number: None,
            agent_name: None,
            agent_address: None,
            request_reason: None,
            link: None,
            response: None,
            response_reason: None,
            closed_datetime: None,
            closed_by: None,
        }
    }
}
