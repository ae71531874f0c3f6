// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository contracts defined in
//! `crate::domain::repository`.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve processes, users and reference counters
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! ## PostgreSQL Repositories
//!
//! - **PostgresProcessRepository** - Process documents with row-locked updates
//! - **PostgresUserRepository** - Users, organisations and memberships
//! - **PostgresReferenceSequence** - Upsert-and-increment reference counters
//!
//! ## In-Memory Repositories
//!
//! Lightweight implementations for tests and local development:
//! - **InMemoryProcessRepository** - HashMap-backed, updates serialised by the map lock
//! - **InMemoryUserRepository** - HashMap-backed users and organisations
//! - **InMemoryReferenceSequence** - Counters held in a HashMap
//!
//! # Usage
//!
//! ```no_run
//! use icms_core::infrastructure::db::Database;
//! use icms_core::infrastructure::repositories::PostgresProcessRepository;
//! # use icms_core::domain::repository::ProcessRepository;
//! # use icms_core::domain::process::ProcessId;
//! # async fn example(database_url: String, process_id: ProcessId) -> anyhow::Result<()> {
//!
//! let db = Database::new(&database_url, 10).await?;
//! let repo = PostgresProcessRepository::new(db.get_pool().clone());
//!
//! // Repository implements ProcessRepository trait
//! let process = repo.find_by_id(process_id).await?;
//! # Ok(())
//! # }
//! ```

pub mod postgres_process;
pub mod postgres_sequence;
pub mod postgres_user;

pub use postgres_process::PostgresProcessRepository;
pub use postgres_sequence::PostgresReferenceSequence;
pub use postgres_user::PostgresUserRepository;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::domain::case::CaseError;
use crate::domain::process::{Process, ProcessId, TaskType};
use crate::domain::repository::{
    BatchMutation, ProcessMutation, ProcessRepository, ReferenceSequence, RepositoryError, UserRepository,
};
use crate::domain::user::{Organisation, OrganisationId, User, UserId};

/// Copy of `process` as it is stored: recorded events belong to the caller.
fn stored_copy(process: &Process) -> Process {
    let mut stored = process.clone();
    stored.take_events();
    stored
}

fn oldest_first(mut processes: Vec<Process>) -> Vec<Process> {
    processes.sort_by_key(|p| p.order_datetime);
    processes
}

// ============================================================================
// Processes
// ============================================================================

#[derive(Clone, Default)]
pub struct InMemoryProcessRepository {
    processes: Arc<RwLock<HashMap<ProcessId, Process>>>,
}

impl InMemoryProcessRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessRepository for InMemoryProcessRepository {
    async fn insert(&self, process: &Process) -> Result<(), RepositoryError> {
        let mut processes = self.processes.write();
        if processes.contains_key(&process.id) {
            return Err(RepositoryError::Database(format!("Process {} already exists", process.id)));
        }
        processes.insert(process.id, stored_copy(process));
        Ok(())
    }

    async fn find_by_id(&self, id: ProcessId) -> Result<Option<Process>, RepositoryError> {
        Ok(self.processes.read().get(&id).cloned())
    }

    async fn update<'a>(&'a self, id: ProcessId, mutation: ProcessMutation<'a>) -> Result<Process, CaseError> {
        // The write guard is the process lock; the mutation never awaits.
        let mut processes = self.processes.write();
        let mut process = processes
            .get(&id)
            .cloned()
            .ok_or_else(|| CaseError::NotFound(format!("Process {id}")))?;

        mutation(&mut process)?;

        processes.insert(id, stored_copy(&process));
        Ok(process)
    }

    async fn update_many<'a>(&'a self, ids: &[ProcessId], mutation: BatchMutation<'a>) -> Result<Vec<Process>, CaseError> {
        let mut processes = self.processes.write();
        let mut batch: Vec<Process> = Vec::with_capacity(ids.len());
        for id in ids {
            if batch.iter().any(|p| p.id == *id) {
                continue;
            }
            let process = processes
                .get(id)
                .cloned()
                .ok_or_else(|| CaseError::NotFound(format!("Process {id}")))?;
            batch.push(process);
        }

        mutation(&mut batch)?;

        for process in &batch {
            processes.insert(process.id, stored_copy(process));
        }
        Ok(batch)
    }

    async fn find_by_chief_request(&self, icms_hmrc_id: Uuid) -> Result<Option<ProcessId>, RepositoryError> {
        let processes = self.processes.read();
        Ok(processes
            .values()
            .find(|p| {
                p.application()
                    .ok()
                    .and_then(|app| app.import())
                    .is_some_and(|import| import.chief_requests.iter().any(|r| r.icms_hmrc_id == icms_hmrc_id))
            })
            .map(|p| p.id))
    }

    async fn find_by_licence_reference(&self, licence_reference: &str) -> Result<Option<ProcessId>, RepositoryError> {
        let processes = self.processes.read();
        Ok(processes
            .values()
            .find(|p| {
                p.application()
                    .ok()
                    .and_then(|app| app.active_pack())
                    .and_then(|pack| pack.licence_reference())
                    == Some(licence_reference)
            })
            .map(|p| p.id))
    }

    async fn find_with_active_task(&self, task_types: &[TaskType]) -> Result<Vec<Process>, RepositoryError> {
        let processes = self.processes.read();
        let matching = processes
            .values()
            .filter(|p| p.active_tasks().any(|t| task_types.contains(&t.task_type)))
            .cloned()
            .collect();
        Ok(oldest_first(matching))
    }

    async fn list_active(&self) -> Result<Vec<Process>, RepositoryError> {
        let processes = self.processes.read();
        let active = processes.values().filter(|p| p.is_active).cloned().collect();
        Ok(oldest_first(active))
    }
}

// ============================================================================
// Users and organisations
// ============================================================================

#[derive(Clone, Default)]
pub struct InMemoryUserRepository {
    users: Arc<RwLock<HashMap<UserId, User>>>,
    organisations: Arc<RwLock<HashMap<OrganisationId, Organisation>>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn save(&self, user: &User) -> Result<(), RepositoryError> {
        self.users.write().insert(user.id, user.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.users.read().get(&id).cloned())
    }

    async fn find_org_contacts(&self, organisation: OrganisationId) -> Result<Vec<User>, RepositoryError> {
        let mut contacts: Vec<User> = self
            .users
            .read()
            .values()
            .filter(|u| u.is_active && u.is_contact_of(organisation))
            .cloned()
            .collect();
        contacts.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(contacts)
    }

    async fn find_ilb_admins(&self) -> Result<Vec<User>, RepositoryError> {
        let mut admins: Vec<User> = self
            .users
            .read()
            .values()
            .filter(|u| u.is_ilb_admin())
            .cloned()
            .collect();
        admins.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(admins)
    }

    async fn save_organisation(&self, organisation: &Organisation) -> Result<(), RepositoryError> {
        self.organisations
            .write()
            .insert(organisation.id, organisation.clone());
        Ok(())
    }

    async fn find_organisation(&self, id: OrganisationId) -> Result<Option<Organisation>, RepositoryError> {
        Ok(self.organisations.read().get(&id).cloned())
    }
}

// ============================================================================
// Reference sequences
// ============================================================================

#[derive(Clone, Default)]
pub struct InMemoryReferenceSequence {
    counters: Arc<Mutex<HashMap<(String, i32), u64>>>,
}

impl InMemoryReferenceSequence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReferenceSequence for InMemoryReferenceSequence {
    async fn next_value(&self, prefix: &str, year: i32) -> Result<u64, RepositoryError> {
        let mut counters = self.counters.lock();
        let value = counters.entry((prefix.to_string(), year)).or_insert(0);
        *value += 1;
        Ok(*value)
    }
}
