// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Local Filesystem Document Store
//!
//! Filesystem-backed storage for generated licence, certificate and cover
//! letter documents, plus a generator that renders each document as a JSON
//! record of what it certifies.
//!
//! **Limitations:**
//! - Documents are only readable on the node that generated them
//! - No retention policy; files stay until removed by hand
//!
//! Keys are `{process_id}/{document_reference_id}.json` relative to the
//! configured storage path.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::debug;

use crate::domain::document_pack::{
    CaseDocumentReference, DocumentError, DocumentGenerator, DocumentPack, DocumentType, StoredDocument,
};
use crate::domain::process::Process;

pub struct LocalDocumentStore {
    base_path: PathBuf,
}

impl LocalDocumentStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, DocumentError> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path).map_err(|e| {
            DocumentError::Storage(format!(
                "Failed to create document directory {}: {}",
                base_path.display(),
                e
            ))
        })?;
        Ok(Self { base_path })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, DocumentError> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !safe {
            return Err(DocumentError::Storage(format!("Invalid document key '{key}'")));
        }
        Ok(self.base_path.join(relative))
    }

    pub async fn put(&self, key: &str, content: &[u8]) -> Result<(), DocumentError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DocumentError::Storage(format!("Failed to create {}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| DocumentError::Storage(format!("Failed to write {}: {}", path.display(), e)))
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, DocumentError> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| DocumentError::Storage(format!("Failed to read {}: {}", path.display(), e)))
    }
}

/// Renders each document as JSON and stores it in a [`LocalDocumentStore`].
pub struct JsonDocumentGenerator {
    store: LocalDocumentStore,
}

impl JsonDocumentGenerator {
    pub fn new(store: LocalDocumentStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &LocalDocumentStore {
        &self.store
    }
}

fn render(process: &Process, pack: &DocumentPack, reference: &CaseDocumentReference) -> Result<Vec<u8>, DocumentError> {
    let app = process
        .application()
        .map_err(|e| DocumentError::Render(e.to_string()))?;

    let (title, needs_reference) = match reference.document_type {
        DocumentType::Licence => ("Licence", true),
        DocumentType::Certificate => ("Certificate", true),
        DocumentType::CoverLetter => ("Cover Letter", false),
    };
    if needs_reference && reference.reference.is_none() {
        return Err(DocumentError::Render(format!("{title} has no reference")));
    }

    let document = json!({
        "title": title,
        "process_type": process.process_type.as_str(),
        "case_reference": pack.case_reference.as_deref().or(process.reference.as_deref()),
        "document_reference": reference.reference,
        "country": reference.country,
        "organisation_id": app.organisation.0,
        "licence_start_date": pack.licence_start_date,
        "licence_end_date": pack.licence_end_date,
        "paper_licence_only": pack.issue_paper_licence_only,
        "variation_no": app.variation_no,
        "generated_at": Utc::now(),
    });
    serde_json::to_vec_pretty(&document).map_err(|e| DocumentError::Render(e.to_string()))
}

#[async_trait]
impl DocumentGenerator for JsonDocumentGenerator {
    async fn generate(
        &self,
        process: &Process,
        pack: &DocumentPack,
        reference: &CaseDocumentReference,
    ) -> Result<StoredDocument, DocumentError> {
        let content = render(process, pack, reference)?;
        let key = format!("{}/{}.json", process.id, reference.id);
        self.store.put(&key, &content).await?;
        debug!(process_id = %process.id, key = %key, "Document stored");

        Ok(StoredDocument {
            filename: format!(
                "{}.json",
                reference.reference.as_deref().unwrap_or("cover-letter").replace('/', "-")
            ),
            key,
            content_type: "application/json".to_string(),
            file_size: content.len() as u64,
            created: Utc::now(),
        })
    }
}
