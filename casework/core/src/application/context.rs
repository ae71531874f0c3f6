// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Shared wiring for the case services: repositories, the job queue, the
//! event bus and the feature switches, plus the permission guards every
//! transition starts with.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use tracing::debug;

use crate::application::jobs::JobQueue;
use crate::application::notifications::Notifier;
use crate::domain::case::CaseError;
use crate::domain::process::{Process, ProcessId};
use crate::domain::repository::{ProcessRepository, ReferenceSequence, UserRepository};
use crate::domain::user::{check_application_permission, User, UserId};
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Clone, Copy, Default)]
pub struct CaseSettings {
    /// Offer the fake CHIEF reply actions. Never enable in production.
    pub allow_bypass_chief: bool,
    pub send_licence_to_chief: bool,
}

#[derive(Clone)]
pub struct CaseContext {
    pub processes: Arc<dyn ProcessRepository>,
    pub users: Arc<dyn UserRepository>,
    pub sequences: Arc<dyn ReferenceSequence>,
    pub jobs: JobQueue,
    pub event_bus: EventBus,
    pub settings: CaseSettings,
}

impl CaseContext {
    pub fn notifier(&self) -> Notifier {
        Notifier::new(self.users.clone(), self.jobs.clone())
    }

    pub async fn load(&self, id: ProcessId) -> Result<Process, CaseError> {
        self.processes
            .find_by_id(id)
            .await?
            .ok_or_else(|| CaseError::NotFound(format!("Process {id}")))
    }

    pub async fn load_user(&self, id: UserId) -> Result<User, CaseError> {
        self.users
            .find_by_id(id)
            .await?
            .ok_or_else(|| CaseError::NotFound(format!("User {id}")))
    }

    /// Store a new process and publish its creation events.
    pub async fn insert(&self, mut process: Process) -> Result<Process, CaseError> {
        self.processes.insert(&process).await?;
        self.event_bus.publish_all(process.take_events());
        Ok(process)
    }

    /// Apply `mutation` under the process lock, then publish the recorded events.
    pub async fn update<'a, F>(&'a self, id: ProcessId, mutation: F) -> Result<Process, CaseError>
    where
        F: FnOnce(&mut Process) -> Result<(), CaseError> + Send + 'a,
    {
        let mut process = self.processes.update(id, Box::new(mutation)).await?;
        let events = process.take_events();
        debug!(process_id = %id, events = events.len(), "Process updated");
        self.event_bus.publish_all(events);
        Ok(process)
    }

    /// Apply `mutation` to every process in `ids` as one unit, then publish
    /// the recorded events of all of them.
    pub async fn update_many<'a, F>(&'a self, ids: &[ProcessId], mutation: F) -> Result<Vec<Process>, CaseError>
    where
        F: FnOnce(&mut [Process]) -> Result<(), CaseError> + Send + 'a,
    {
        let mut processes = self.processes.update_many(ids, Box::new(mutation)).await?;
        for process in &mut processes {
            let events = process.take_events();
            debug!(process_id = %process.id, events = events.len(), "Process updated");
            self.event_bus.publish_all(events);
        }
        Ok(processes)
    }

    /// Next number of the (`prefix`, current year) sequence.
    pub async fn next_in_year(&self, prefix: &str) -> Result<(i32, u64), CaseError> {
        let year = Utc::now().year();
        let value = self.sequences.next_value(prefix, year).await?;
        Ok((year, value))
    }
}

// ============================================================================
// Permission guards
// ============================================================================

pub fn require_ilb_admin(user: &User) -> Result<(), CaseError> {
    if user.is_ilb_admin() {
        Ok(())
    } else {
        Err(CaseError::PermissionDenied(format!(
            "{} is not a caseworker",
            user.email
        )))
    }
}

/// Caseworker who currently owns the case.
pub fn require_case_owner(process: &Process, user: &User) -> Result<(), CaseError> {
    require_ilb_admin(user)?;
    if process.case_owner == Some(user.id) {
        Ok(())
    } else {
        Err(CaseError::PermissionDenied(format!(
            "{} is not the case owner",
            user.email
        )))
    }
}

/// Applicant (or caseworker) allowed to act on the case.
pub fn require_applicant(process: &Process, user: &User) -> Result<(), CaseError> {
    if check_application_permission(process, user)? {
        Ok(())
    } else {
        Err(CaseError::PermissionDenied(format!(
            "{} may not act on this case",
            user.email
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::case::tests::import_detail;
    use crate::domain::process::{CaseStatus, ProcessType};
    use crate::domain::user::SystemPermission;

    fn admin() -> User {
        let mut user = User::new("ilb@example.com", "Ilb", "Admin");
        user.grant(SystemPermission::IlbAdmin);
        user
    }

    #[test]
    fn test_case_owner_guard() {
        let owner = admin();
        let mut process = Process::new(
            ProcessType::Textiles,
            CaseStatus::Processing,
            UserId::new(),
            import_detail(ProcessType::Textiles),
        );
        assert!(matches!(
            require_case_owner(&process, &owner),
            Err(CaseError::PermissionDenied(_))
        ));

        process.case_owner = Some(owner.id);
        assert!(require_case_owner(&process, &owner).is_ok());

        let mut demoted = owner.clone();
        demoted.permissions.clear();
        assert!(require_case_owner(&process, &demoted).is_err());
    }

    #[test]
    fn test_applicant_guard_rejects_strangers() {
        let process = Process::new(
            ProcessType::Textiles,
            CaseStatus::InProgress,
            UserId::new(),
            import_detail(ProcessType::Textiles),
        );
        let stranger = User::new("someone@example.com", "Some", "One");
        assert!(require_applicant(&process, &stranger).is_err());
        assert!(require_applicant(&process, &admin()).is_ok());
    }
}
