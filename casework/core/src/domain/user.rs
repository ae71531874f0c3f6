// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Users, organisations and permission checks.
//!
//! System permissions gate whole areas (caseworking, importer or exporter
//! access). Organisation memberships link a user to the importers and
//! exporters they may act for, either as a direct contact or as an agent.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::case::ApplicationKind;
use crate::domain::process::{Process, ProcessError, ProcessKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrganisationId(pub Uuid);

impl OrganisationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OrganisationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrganisationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganisationKind {
    Importer,
    Exporter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organisation {
    pub id: OrganisationId,
    pub kind: OrganisationKind,
    pub name: String,
    pub eori_number: Option<String>,
    pub registered_number: Option<String>,
    pub address: Option<String>,
    pub is_active: bool,
}

impl Organisation {
    pub fn new(kind: OrganisationKind, name: impl Into<String>) -> Self {
        Self {
            id: OrganisationId::new(),
            kind,
            name: name.into(),
            eori_number: None,
            registered_number: None,
            address: None,
            is_active: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemPermission {
    IlbAdmin,
    ImporterAccess,
    ExporterAccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgRole {
    Contact,
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrgMembership {
    pub organisation: OrganisationId,
    pub role: OrgRole,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub permissions: HashSet<SystemPermission>,
    #[serde(default)]
    pub memberships: Vec<OrgMembership>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl User {
    pub fn new(email: impl Into<String>, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            email: email.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            permissions: HashSet::new(),
            memberships: Vec::new(),
            is_active: true,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn has_permission(&self, permission: SystemPermission) -> bool {
        self.is_active && self.permissions.contains(&permission)
    }

    pub fn is_ilb_admin(&self) -> bool {
        self.has_permission(SystemPermission::IlbAdmin)
    }

    pub fn grant(&mut self, permission: SystemPermission) {
        self.permissions.insert(permission);
    }

    pub fn add_membership(&mut self, organisation: OrganisationId, role: OrgRole) {
        let membership = OrgMembership { organisation, role };
        if !self.memberships.contains(&membership) {
            self.memberships.push(membership);
        }
    }

    pub fn has_role(&self, organisation: OrganisationId, role: OrgRole) -> bool {
        self.memberships
            .iter()
            .any(|m| m.organisation == organisation && m.role == role)
    }

    pub fn is_contact_of(&self, organisation: OrganisationId) -> bool {
        self.has_role(organisation, OrgRole::Contact)
    }
}

/// Whether `user` may view and act on `process` as an applicant or caseworker.
pub fn check_application_permission(process: &Process, user: &User) -> Result<bool, ProcessError> {
    if user.is_ilb_admin() {
        return Ok(true);
    }

    match process.kind()? {
        ProcessKind::AccessRequest => Ok(process.submitted_by == Some(user.id)),
        ProcessKind::ImportApplication | ProcessKind::ExportApplication => {
            let app = process.application()?;
            let permission = match app.kind {
                ApplicationKind::Import(_) => SystemPermission::ImporterAccess,
                ApplicationKind::Export(_) => SystemPermission::ExporterAccess,
            };
            if !user.has_permission(permission) {
                return Ok(false);
            }

            // Agents act through the agent organisation recorded on the case.
            let via_agent = app
                .agent
                .map(|agent| user.is_contact_of(agent) && user.has_role(app.organisation, OrgRole::Agent))
                .unwrap_or(false);

            Ok(user.is_contact_of(app.organisation) || via_agent)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::case::tests::{export_detail_for, import_detail_for};
    use crate::domain::process::{CaseStatus, ProcessType};

    fn importer_user(org: OrganisationId) -> User {
        let mut user = User::new("contact@example.com", "Ian", "Porter");
        user.grant(SystemPermission::ImporterAccess);
        user.add_membership(org, OrgRole::Contact);
        user
    }

    #[test]
    fn test_contact_with_access_may_view_application() {
        let org = OrganisationId::new();
        let process = Process::new(
            ProcessType::SpecificIndividualLicence,
            CaseStatus::InProgress,
            UserId::new(),
            import_detail_for(ProcessType::SpecificIndividualLicence, org, None),
        );

        assert!(check_application_permission(&process, &importer_user(org)).unwrap());
        assert!(!check_application_permission(&process, &importer_user(OrganisationId::new())).unwrap());
    }

    #[test]
    fn test_contact_needs_matching_access_permission() {
        let org = OrganisationId::new();
        let process = Process::new(
            ProcessType::CertificateOfFreeSale,
            CaseStatus::InProgress,
            UserId::new(),
            export_detail_for(ProcessType::CertificateOfFreeSale, org),
        );

        assert!(!check_application_permission(&process, &importer_user(org)).unwrap());
    }

    #[test]
    fn test_agent_acts_through_agent_organisation() {
        let importer = OrganisationId::new();
        let agent_org = OrganisationId::new();
        let process = Process::new(
            ProcessType::SpecificIndividualLicence,
            CaseStatus::InProgress,
            UserId::new(),
            import_detail_for(ProcessType::SpecificIndividualLicence, importer, Some(agent_org)),
        );

        let mut agent = User::new("agent@example.com", "Alex", "Gent");
        agent.grant(SystemPermission::ImporterAccess);
        agent.add_membership(agent_org, OrgRole::Contact);
        assert!(!check_application_permission(&process, &agent).unwrap());

        agent.add_membership(importer, OrgRole::Agent);
        assert!(check_application_permission(&process, &agent).unwrap());
    }

    #[test]
    fn test_ilb_admin_sees_everything() {
        let mut admin = User::new("case.officer@example.com", "Case", "Officer");
        admin.grant(SystemPermission::IlbAdmin);
        let process = Process::new(
            ProcessType::Textiles,
            CaseStatus::Submitted,
            UserId::new(),
            import_detail_for(ProcessType::Textiles, OrganisationId::new(), None),
        );
        assert!(check_application_permission(&process, &admin).unwrap());
    }

    #[test]
    fn test_inactive_user_has_no_permissions() {
        let mut admin = User::new("old@example.com", "Old", "Officer");
        admin.grant(SystemPermission::IlbAdmin);
        admin.is_active = false;
        assert!(!admin.is_ilb_admin());
    }
}
