// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Case Detail
//!
//! The concrete case carried by a `Process`: an import or export application,
//! or an access request. Import and export applications share the response
//! preparation fields, the document packs and the request sub-records
//! (update requests, variation requests, withdrawals); the kind-specific data
//! sits in `ApplicationKind`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::access::AccessRequest;
use crate::domain::chief::{ChiefRequest, ChiefUsageStatus};
use crate::domain::document_pack::DocumentPack;
use crate::domain::process::{ProcessError, ProcessKind, ProcessType};
use crate::domain::repository::RepositoryError;
use crate::domain::requests::{
    UpdateRequest, UpdateRequestStatus, VariationRequest, VariationRequestStatus, WithdrawApplication,
    WithdrawalStatus,
};
use crate::domain::template::TemplateError;
use crate::domain::user::{OrganisationId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "case", rename_all = "snake_case")]
pub enum CaseDetail {
    Application(Box<Application>),
    AccessRequest(Box<AccessRequest>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approve,
    Refuse,
}

// ============================================================================
// Application types
// ============================================================================

/// Licence issuing rules for an import application type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportApplicationType {
    pub type_code: String,
    pub sub_type: Option<String>,
    /// Licences of this type are sent to CHIEF once issued.
    pub chief_flag: bool,
    pub chief_licence_prefix: Option<String>,
    pub electronic_licence_flag: bool,
    pub paper_licence_flag: bool,
    pub cover_letter_flag: bool,
    pub default_licence_length_months: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportApplicationType {
    pub type_code: String,
}

fn import_type(
    type_code: &str,
    sub_type: Option<&str>,
    chief_prefix: Option<&str>,
    cover_letter: bool,
    default_months: Option<u32>,
) -> ImportApplicationType {
    let electronic = chief_prefix.is_some();
    ImportApplicationType {
        type_code: type_code.to_string(),
        sub_type: sub_type.map(str::to_string),
        chief_flag: electronic,
        chief_licence_prefix: chief_prefix.map(str::to_string),
        electronic_licence_flag: electronic,
        paper_licence_flag: !electronic,
        cover_letter_flag: cover_letter,
        default_licence_length_months: default_months,
    }
}

/// Built-in import application type for a process type.
pub fn import_application_type(process_type: ProcessType) -> Option<ImportApplicationType> {
    let t = match process_type {
        ProcessType::DeactivatedFirearms => import_type("FA", Some("DEACTIVATED"), Some("DEA"), true, None),
        ProcessType::OpenIndividualLicence => import_type("FA", Some("OIL"), Some("OIL"), true, Some(36)),
        ProcessType::SpecificIndividualLicence => import_type("FA", Some("SIL"), Some("SIL"), true, Some(6)),
        ProcessType::SanctionsAndAdhoc => import_type("ADHOC", None, Some("SAN"), false, Some(6)),
        ProcessType::Derogations => import_type("SPS", None, None, false, Some(6)),
        ProcessType::IronSteelQuota => import_type("IS", Some("QUOTA"), None, false, None),
        ProcessType::OutwardProcessingTrade => import_type("OPT", Some("QUOTA"), None, false, None),
        ProcessType::PriorSurveillance => import_type("SPS", Some("SURVEILLANCE"), None, false, None),
        ProcessType::Textiles => import_type("TEX", Some("QUOTA"), None, false, None),
        ProcessType::WoodQuota => import_type("WD", Some("QUOTA"), None, false, None),
        _ => return None,
    };
    Some(t)
}

/// Built-in export application type for a process type.
pub fn export_application_type(process_type: ProcessType) -> Option<ExportApplicationType> {
    let code = match process_type {
        ProcessType::CertificateOfManufacture => "COM",
        ProcessType::CertificateOfFreeSale => "CFS",
        ProcessType::CertificateOfGoodManufacturingPractice => "GMP",
        _ => return None,
    };
    Some(ExportApplicationType {
        type_code: code.to_string(),
    })
}

// ============================================================================
// Application
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportDetail {
    pub application_type: ImportApplicationType,
    pub chief_usage_status: Option<ChiefUsageStatus>,
    #[serde(default)]
    pub chief_requests: Vec<ChiefRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDetail {
    pub application_type: ExportApplicationType,
    #[serde(default)]
    pub countries: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApplicationKind {
    Import(ImportDetail),
    Export(ExportDetail),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    /// Importer or exporter the application is made for.
    pub organisation: OrganisationId,
    pub agent: Option<OrganisationId>,
    pub contact: Option<UserId>,
    pub decision: Option<Decision>,
    pub refuse_reason: Option<String>,
    pub variation_decision: Option<Decision>,
    pub variation_refuse_reason: Option<String>,
    pub variation_no: u32,
    pub acknowledged_by: Option<UserId>,
    pub acknowledged_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub document_packs: Vec<DocumentPack>,
    #[serde(default)]
    pub update_requests: Vec<UpdateRequest>,
    #[serde(default)]
    pub variation_requests: Vec<VariationRequest>,
    #[serde(default)]
    pub withdrawals: Vec<WithdrawApplication>,
    pub kind: ApplicationKind,
}

impl Application {
    /// A fresh application for `process_type`. Fails when the type is not an
    /// import or export application.
    pub fn for_process_type(
        process_type: ProcessType,
        organisation: OrganisationId,
        agent: Option<OrganisationId>,
        contact: Option<UserId>,
    ) -> Result<Self, ProcessError> {
        let kind = match process_type.specific_kind()? {
            ProcessKind::ImportApplication => import_application_type(process_type).map(|application_type| {
                ApplicationKind::Import(ImportDetail {
                    application_type,
                    chief_usage_status: None,
                    chief_requests: Vec::new(),
                })
            }),
            ProcessKind::ExportApplication => export_application_type(process_type).map(|application_type| {
                ApplicationKind::Export(ExportDetail {
                    application_type,
                    countries: Vec::new(),
                })
            }),
            ProcessKind::AccessRequest => None,
        }
        .ok_or(ProcessError::WrongCaseKind {
            process_type,
            expected: "application",
        })?;

        Ok(Self {
            organisation,
            agent,
            contact,
            decision: None,
            refuse_reason: None,
            variation_decision: None,
            variation_refuse_reason: None,
            variation_no: 0,
            acknowledged_by: None,
            acknowledged_datetime: None,
            document_packs: Vec::new(),
            update_requests: Vec::new(),
            variation_requests: Vec::new(),
            withdrawals: Vec::new(),
            kind,
        })
    }

    pub fn is_import(&self) -> bool {
        matches!(self.kind, ApplicationKind::Import(_))
    }

    pub fn import(&self) -> Option<&ImportDetail> {
        match &self.kind {
            ApplicationKind::Import(detail) => Some(detail),
            ApplicationKind::Export(_) => None,
        }
    }

    pub fn import_mut(&mut self) -> Option<&mut ImportDetail> {
        match &mut self.kind {
            ApplicationKind::Import(detail) => Some(detail),
            ApplicationKind::Export(_) => None,
        }
    }

    pub fn export(&self) -> Option<&ExportDetail> {
        match &self.kind {
            ApplicationKind::Export(detail) => Some(detail),
            ApplicationKind::Import(_) => None,
        }
    }

    pub fn export_mut(&mut self) -> Option<&mut ExportDetail> {
        match &mut self.kind {
            ApplicationKind::Export(detail) => Some(detail),
            ApplicationKind::Import(_) => None,
        }
    }

    /// Imports whose licences are sent to CHIEF.
    pub fn sends_to_chief(&self) -> bool {
        self.import()
            .map(|detail| detail.application_type.chief_flag)
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------------
    // Update requests
    // ------------------------------------------------------------------------

    /// An update request the applicant still has to answer.
    pub fn has_open_update_request(&self) -> bool {
        self.update_requests.iter().any(|r| {
            r.is_active
                && matches!(
                    r.status,
                    UpdateRequestStatus::Open | UpdateRequestStatus::UpdateInProgress
                )
        })
    }

    /// Open, in progress or responded requests that the caseworker has not closed.
    pub fn has_unclosed_update_request(&self) -> bool {
        self.update_requests.iter().any(|r| {
            r.is_active
                && matches!(
                    r.status,
                    UpdateRequestStatus::Open
                        | UpdateRequestStatus::UpdateInProgress
                        | UpdateRequestStatus::Responded
                )
        })
    }

    pub fn update_request_mut(&mut self, id: uuid::Uuid) -> Option<&mut UpdateRequest> {
        self.update_requests.iter_mut().find(|r| r.id == id)
    }

    // ------------------------------------------------------------------------
    // Variation requests
    // ------------------------------------------------------------------------

    /// The variation request currently being processed.
    pub fn open_variation_request(&self) -> Option<&VariationRequest> {
        self.variation_requests
            .iter()
            .rev()
            .find(|vr| vr.status == VariationRequestStatus::Open)
    }

    pub fn open_variation_request_mut(&mut self) -> Option<&mut VariationRequest> {
        self.variation_requests
            .iter_mut()
            .rev()
            .find(|vr| vr.status == VariationRequestStatus::Open)
    }

    pub fn variation_request_mut(&mut self, id: uuid::Uuid) -> Option<&mut VariationRequest> {
        self.variation_requests.iter_mut().find(|vr| vr.id == id)
    }

    // ------------------------------------------------------------------------
    // Withdrawals
    // ------------------------------------------------------------------------

    pub fn open_withdrawal(&self) -> Option<&WithdrawApplication> {
        self.withdrawals
            .iter()
            .find(|w| w.is_active && w.status == WithdrawalStatus::Open)
    }

    pub fn open_withdrawal_mut(&mut self) -> Option<&mut WithdrawApplication> {
        self.withdrawals
            .iter_mut()
            .find(|w| w.is_active && w.status == WithdrawalStatus::Open)
    }

    pub fn withdrawal_mut(&mut self, id: uuid::Uuid) -> Option<&mut WithdrawApplication> {
        self.withdrawals.iter_mut().find(|w| w.id == id)
    }
}

// ============================================================================
// Validation errors
// ============================================================================

/// A user-facing validation failure, grouped by the page it is reported on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub page: String,
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationErrors {
    errors: Vec<FieldError>,
}

impl ApplicationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, page: &str, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError {
            page: page.to_string(),
            field: field.to_string(),
            message: message.into(),
        });
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    pub fn for_page(&self, page: &str) -> Vec<&FieldError> {
        self.errors.iter().filter(|e| e.page == page).collect()
    }

    /// `Ok` when nothing was recorded.
    pub fn into_result(self) -> Result<(), CaseError> {
        if self.has_errors() {
            Err(CaseError::Validation(self))
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for ApplicationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("{}: {} ({})", e.page, e.message, e.field))
            .collect();
        f.write_str(&parts.join("; "))
    }
}

// ============================================================================
// Service boundary errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CaseError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Validation failed: {0}")]
    Validation(ApplicationErrors),

    #[error("{0}")]
    Conflict(String),

    #[error("External service failure: {0}")]
    Integration(String),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Template(#[from] TemplateError),
}
