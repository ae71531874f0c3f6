// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Document Packs
//!
//! The set of licence, certificate and cover letter documents attached to an
//! application at a point in time.
//!
//! A pack starts as `Draft` when a caseworker takes ownership, gains its
//! document references during authorisation, and becomes `Active` when the
//! case completes. Issuing a new pack (after a variation) archives the previous
//! active one. Revoking a licence marks the active pack `Revoked`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::case::Application;
use crate::domain::process::{Process, ProcessError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentPackId(pub Uuid);

impl DocumentPackId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocumentPackId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PackStatus {
    Draft,
    Active,
    Archived,
    Revoked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentType {
    Licence,
    CoverLetter,
    Certificate,
}

/// A rendered document held in the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub key: String,
    pub filename: String,
    pub content_type: String,
    pub file_size: u64,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseDocumentReference {
    pub id: Uuid,
    pub document_type: DocumentType,
    /// Licence or certificate number; cover letters carry none.
    pub reference: Option<String>,
    /// Export certificates are issued per destination country.
    pub country: Option<String>,
    pub document: Option<StoredDocument>,
}

impl CaseDocumentReference {
    pub fn new(document_type: DocumentType, reference: Option<String>, country: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_type,
            reference,
            country,
            document: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentPack {
    pub id: DocumentPackId,
    pub status: PackStatus,
    /// Case reference printed on the documents (carries the variation suffix).
    pub case_reference: Option<String>,
    pub licence_start_date: Option<NaiveDate>,
    pub licence_end_date: Option<NaiveDate>,
    pub issue_paper_licence_only: Option<bool>,
    pub created: DateTime<Utc>,
    pub case_completion_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub document_references: Vec<CaseDocumentReference>,
}

impl DocumentPack {
    pub fn draft() -> Self {
        Self {
            id: DocumentPackId::new(),
            status: PackStatus::Draft,
            case_reference: None,
            licence_start_date: None,
            licence_end_date: None,
            issue_paper_licence_only: None,
            created: Utc::now(),
            case_completion_datetime: None,
            document_references: Vec::new(),
        }
    }

    pub fn licence_reference(&self) -> Option<&str> {
        self.document_references
            .iter()
            .find(|r| r.document_type == DocumentType::Licence)
            .and_then(|r| r.reference.as_deref())
    }

    pub fn has_references(&self) -> bool {
        !self.document_references.is_empty()
    }
}

// ============================================================================
// Pack lifecycle on the application
// ============================================================================

impl Application {
    pub fn draft_pack(&self) -> Option<&DocumentPack> {
        self.document_packs.iter().find(|p| p.status == PackStatus::Draft)
    }

    pub fn draft_pack_mut(&mut self) -> Option<&mut DocumentPack> {
        self.document_packs.iter_mut().find(|p| p.status == PackStatus::Draft)
    }

    pub fn active_pack(&self) -> Option<&DocumentPack> {
        self.document_packs.iter().find(|p| p.status == PackStatus::Active)
    }

    /// Returns the draft pack and whether it was created by this call.
    pub fn get_or_create_draft_pack(&mut self) -> (&mut DocumentPack, bool) {
        let created = self.draft_pack().is_none();
        if created {
            self.document_packs.push(DocumentPack::draft());
        }
        let index = self
            .document_packs
            .iter()
            .position(|p| p.status == PackStatus::Draft)
            .unwrap_or(self.document_packs.len() - 1);
        (&mut self.document_packs[index], created)
    }

    pub fn archive_draft_pack(&mut self) {
        if let Some(pack) = self.draft_pack_mut() {
            pack.status = PackStatus::Archived;
        }
    }

    /// Promote the draft pack to active, archiving the previously active pack.
    pub fn issue_draft_pack(&mut self, completed_at: DateTime<Utc>) -> Result<DocumentPackId, ProcessError> {
        if self.draft_pack().is_none() {
            return Err(ProcessError::Task("No draft document pack to issue".to_string()));
        }

        for pack in self.document_packs.iter_mut() {
            match pack.status {
                PackStatus::Active => pack.status = PackStatus::Archived,
                PackStatus::Draft => {
                    pack.status = PackStatus::Active;
                    pack.case_completion_datetime = Some(completed_at);
                }
                _ => {}
            }
        }

        self.active_pack()
            .map(|p| p.id)
            .ok_or_else(|| ProcessError::Task("Issued pack not found".to_string()))
    }

    pub fn revoke_active_pack(&mut self) -> Result<DocumentPackId, ProcessError> {
        let pack = self
            .document_packs
            .iter_mut()
            .find(|p| p.status == PackStatus::Active)
            .ok_or_else(|| ProcessError::Task("No active document pack to revoke".to_string()))?;
        pack.status = PackStatus::Revoked;
        Ok(pack.id)
    }
}

// ============================================================================
// Document generation
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Document rendering failed: {0}")]
    Render(String),

    #[error("Document storage failed: {0}")]
    Storage(String),
}

/// Renders one document of a pack and stores it.
#[async_trait]
pub trait DocumentGenerator: Send + Sync {
    async fn generate(
        &self,
        process: &Process,
        pack: &DocumentPack,
        reference: &CaseDocumentReference,
    ) -> Result<StoredDocument, DocumentError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::process::ProcessType;
    use crate::domain::user::OrganisationId;

    fn application() -> Application {
        Application::for_process_type(ProcessType::SpecificIndividualLicence, OrganisationId::new(), None, None)
            .unwrap()
    }

    #[test]
    fn test_get_or_create_draft_pack_is_idempotent() {
        let mut app = application();
        let (pack, created) = app.get_or_create_draft_pack();
        assert!(created);
        let id = pack.id;

        let (pack, created) = app.get_or_create_draft_pack();
        assert!(!created);
        assert_eq!(pack.id, id);
        assert_eq!(app.document_packs.len(), 1);
    }

    #[test]
    fn test_issue_archives_previous_active_pack() {
        let mut app = application();
        app.get_or_create_draft_pack();
        let first = app.issue_draft_pack(Utc::now()).unwrap();

        app.get_or_create_draft_pack();
        let second = app.issue_draft_pack(Utc::now()).unwrap();

        assert_ne!(first, second);
        let statuses: Vec<PackStatus> = app.document_packs.iter().map(|p| p.status).collect();
        assert_eq!(statuses, vec![PackStatus::Archived, PackStatus::Active]);
        assert!(app.active_pack().unwrap().case_completion_datetime.is_some());
    }

    #[test]
    fn test_issue_without_draft_fails() {
        let mut app = application();
        assert!(app.issue_draft_pack(Utc::now()).is_err());
    }

    #[test]
    fn test_revoke_marks_active_pack() {
        let mut app = application();
        assert!(app.revoke_active_pack().is_err());

        app.get_or_create_draft_pack();
        app.issue_draft_pack(Utc::now()).unwrap();
        app.revoke_active_pack().unwrap();
        assert!(app.active_pack().is_none());
        assert_eq!(app.document_packs[0].status, PackStatus::Revoked);
    }

    #[test]
    fn test_licence_reference_lookup() {
        let mut pack = DocumentPack::draft();
        pack.document_references
            .push(CaseDocumentReference::new(DocumentType::CoverLetter, None, None));
        assert_eq!(pack.licence_reference(), None);

        pack.document_references.push(CaseDocumentReference::new(
            DocumentType::Licence,
            Some("GBSIL0000001B".to_string()),
            None,
        ));
        assert_eq!(pack.licence_reference(), Some("GBSIL0000001B"));
    }
}
