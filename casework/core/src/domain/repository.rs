// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for each aggregate root: one repository per
//! aggregate, interface defined in the domain layer, implemented in
//! `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `ProcessRepository` | `Process` | `InMemoryProcessRepository`, `PostgresProcessRepository` |
//! | `UserRepository` | `User`, `Organisation` | `InMemoryUserRepository`, `PostgresUserRepository` |
//! | `ReferenceSequence` | reference counters | `InMemoryReferenceSequence`, `PostgresReferenceSequence` |
//!
//! ## Locking for update
//!
//! Every state transition goes through `ProcessRepository::update`, which runs
//! the mutation while holding an exclusive lock on the process (a row lock in
//! PostgreSQL, the map write lock in memory). Concurrent caseworker actions on
//! the same case are therefore serialised, and a failed mutation leaves the
//! stored process untouched.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::case::CaseError;
use crate::domain::process::{Process, ProcessId, TaskType};
use crate::domain::user::{Organisation, OrganisationId, User, UserId};

/// Storage backend selection
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
    pub max_connections: u32,
}

/// A state transition applied under the process lock.
pub type ProcessMutation<'a> = Box<dyn FnOnce(&mut Process) -> Result<(), CaseError> + Send + 'a>;

/// A transition spanning several processes, applied under all of their locks.
pub type BatchMutation<'a> = Box<dyn FnOnce(&mut [Process]) -> Result<(), CaseError> + Send + 'a>;

/// Repository interface for Process aggregates
#[async_trait]
pub trait ProcessRepository: Send + Sync {
    /// Store a new process
    async fn insert(&self, process: &Process) -> Result<(), RepositoryError>;

    /// Find process by ID
    async fn find_by_id(&self, id: ProcessId) -> Result<Option<Process>, RepositoryError>;

    /// Apply `mutation` under an exclusive lock and persist the result.
    ///
    /// Returns the updated process with its recorded events still attached.
    async fn update<'a>(&'a self, id: ProcessId, mutation: ProcessMutation<'a>) -> Result<Process, CaseError>;

    /// Lock every process in `ids`, apply `mutation` to all of them and
    /// persist them together. Duplicate ids are collapsed; the slice handed
    /// to the mutation is in `ids` order. An error from the mutation leaves
    /// every process untouched.
    async fn update_many<'a>(&'a self, ids: &[ProcessId], mutation: BatchMutation<'a>) -> Result<Vec<Process>, CaseError>;

    /// Process owning the CHIEF request ICMS-HMRC knows as `icms_hmrc_id`
    async fn find_by_chief_request(&self, icms_hmrc_id: Uuid) -> Result<Option<ProcessId>, RepositoryError>;

    /// Process whose ACTIVE document pack carries `licence_reference`
    async fn find_by_licence_reference(&self, licence_reference: &str) -> Result<Option<ProcessId>, RepositoryError>;

    /// Processes with an active task of any of `task_types`, oldest order first
    async fn find_with_active_task(&self, task_types: &[TaskType]) -> Result<Vec<Process>, RepositoryError>;

    /// All active processes, oldest order first
    async fn list_active(&self) -> Result<Vec<Process>, RepositoryError>;
}

/// Repository interface for users and the organisations they belong to
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Save user (create or update)
    async fn save(&self, user: &User) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;

    /// Active contacts of `organisation`
    async fn find_org_contacts(&self, organisation: OrganisationId) -> Result<Vec<User>, RepositoryError>;

    /// Active caseworkers
    async fn find_ilb_admins(&self) -> Result<Vec<User>, RepositoryError>;

    async fn save_organisation(&self, organisation: &Organisation) -> Result<(), RepositoryError>;

    async fn find_organisation(&self, id: OrganisationId) -> Result<Option<Organisation>, RepositoryError>;
}

/// Atomic counters behind case, licence and certificate references
#[async_trait]
pub trait ReferenceSequence: Send + Sync {
    /// Next value for (`prefix`, `year`), starting at 1
    async fn next_value(&self, prefix: &str, year: i32) -> Result<u64, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
