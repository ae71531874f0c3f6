// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Email notifications.
//!
//! Services call the [`Notifier`] once their process update has committed.
//! The notifier resolves recipients, renders the template and enqueues a
//! [`Job::SendEmail`]; delivery happens on the job runner through a
//! [`Mailer`]. Failing to queue an email never undoes a committed transition,
//! so the notifier logs instead of returning errors.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::application::jobs::{Job, JobQueue};
use crate::domain::case::{ApplicationKind, CaseError};
use crate::domain::process::{Process, ProcessId};
use crate::domain::repository::UserRepository;
use crate::domain::template::{EmailTemplate, EmailTemplateCode};
use crate::domain::user::{SystemPermission, User};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub template: EmailTemplateCode,
    pub subject: String,
    pub body: String,
    pub to: Vec<String>,
    pub process_id: Option<ProcessId>,
}

#[derive(Debug, thiserror::Error)]
pub enum MailerError {
    #[error("Mail transport failed: {0}")]
    Transport(String),

    #[error("Mail provider rejected the message ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Mailer misconfigured: {0}")]
    Configuration(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailerError>;
}

pub type Placeholders = HashMap<&'static str, String>;

#[derive(Clone)]
pub struct Notifier {
    users: Arc<dyn UserRepository>,
    jobs: JobQueue,
}

impl Notifier {
    pub fn new(users: Arc<dyn UserRepository>, jobs: JobQueue) -> Self {
        Self { users, jobs }
    }

    /// CASE_REFERENCE, APPLICATION_TYPE and the importer/exporter name.
    pub async fn case_placeholders(&self, process: &Process) -> Result<Placeholders, CaseError> {
        let mut placeholders = Placeholders::from([
            (
                "CASE_REFERENCE",
                process.reference.clone().unwrap_or_else(|| "Not Assigned".to_string()),
            ),
            ("APPLICATION_TYPE", process.process_type.label().to_string()),
        ]);

        if let Ok(app) = process.application() {
            let name = self
                .users
                .find_organisation(app.organisation)
                .await?
                .map(|org| org.name)
                .unwrap_or_default();
            let key = match app.kind {
                ApplicationKind::Import(_) => "IMPORTER_NAME",
                ApplicationKind::Export(_) => "EXPORTER_NAME",
            };
            placeholders.insert(key, name);
        }

        Ok(placeholders)
    }

    /// Contacts of the application's organisation (and agent) holding the
    /// matching importer/exporter access permission.
    pub async fn application_contacts(&self, process: &Process) -> Result<Vec<User>, CaseError> {
        let app = process.application()?;
        let permission = match app.kind {
            ApplicationKind::Import(_) => SystemPermission::ImporterAccess,
            ApplicationKind::Export(_) => SystemPermission::ExporterAccess,
        };

        let mut seen = HashSet::new();
        let mut contacts = Vec::new();
        for org in std::iter::once(app.organisation).chain(app.agent) {
            for user in self.users.find_org_contacts(org).await? {
                if user.has_permission(permission) && seen.insert(user.id) {
                    contacts.push(user);
                }
            }
        }
        Ok(contacts)
    }

    /// Email the application's contacts, adding the case placeholders to `extra`.
    pub async fn send_to_contacts(&self, process: &Process, code: EmailTemplateCode, extra: Placeholders) {
        let result = async {
            let mut placeholders = self.case_placeholders(process).await?;
            placeholders.extend(extra);
            let recipients = self.application_contacts(process).await?;
            Ok::<_, CaseError>((placeholders, recipients))
        }
        .await;

        match result {
            Ok((placeholders, recipients)) => self.send(&recipients, code, &placeholders, Some(process.id)),
            Err(e) => error!(process_id = %process.id, template = %code, error = %e, "Failed to resolve email recipients"),
        }
    }

    pub async fn send_to_ilb_admins(&self, process_id: ProcessId, code: EmailTemplateCode, placeholders: Placeholders) {
        match self.users.find_ilb_admins().await {
            Ok(admins) => self.send(&admins, code, &placeholders, Some(process_id)),
            Err(e) => error!(%process_id, template = %code, error = %e, "Failed to load caseworkers for email"),
        }
    }

    /// Render `code` and queue one message addressed to every recipient.
    pub fn send(
        &self,
        recipients: &[User],
        code: EmailTemplateCode,
        placeholders: &Placeholders,
        process_id: Option<ProcessId>,
    ) {
        let to: Vec<String> = recipients
            .iter()
            .filter(|u| u.is_active)
            .map(|u| u.email.clone())
            .collect();

        if to.is_empty() {
            warn!(template = %code, "No recipients for email; not sent");
            return;
        }

        match EmailTemplate::get(code).render(placeholders) {
            Ok(rendered) => {
                info!(template = %code, recipients = to.len(), "Queueing email");
                self.jobs.enqueue(Job::SendEmail(EmailMessage {
                    template: code,
                    subject: rendered.subject,
                    body: rendered.body,
                    to,
                    process_id,
                }));
            }
            Err(e) => error!(template = %code, error = %e, "Failed to render email"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::case::tests::import_detail_for;
    use crate::domain::process::{CaseStatus, ProcessType};
    use crate::domain::user::{OrgRole, Organisation, OrganisationKind, UserId};
    use crate::infrastructure::repositories::InMemoryUserRepository;

    #[tokio::test]
    async fn test_contacts_need_access_permission() {
        let users = Arc::new(InMemoryUserRepository::new());
        let org = Organisation::new(OrganisationKind::Importer, "Dovetail Imports");
        users.save_organisation(&org).await.unwrap();

        let mut contact = User::new("contact@example.com", "Ian", "Porter");
        contact.grant(SystemPermission::ImporterAccess);
        contact.add_membership(org.id, OrgRole::Contact);
        users.save(&contact).await.unwrap();

        let mut no_access = User::new("lapsed@example.com", "Lap", "Sed");
        no_access.add_membership(org.id, OrgRole::Contact);
        users.save(&no_access).await.unwrap();

        let (jobs, mut receiver) = JobQueue::new();
        let notifier = Notifier::new(users, jobs);
        let mut process = Process::new(
            ProcessType::SpecificIndividualLicence,
            CaseStatus::Processing,
            UserId::new(),
            import_detail_for(ProcessType::SpecificIndividualLicence, org.id, None),
        );
        process.reference = Some("IMA/2024/00001".to_string());

        notifier
            .send_to_contacts(&process, EmailTemplateCode::StopCase, Placeholders::new())
            .await;

        match receiver.try_recv().unwrap() {
            Job::SendEmail(message) => {
                assert_eq!(message.to, vec!["contact@example.com".to_string()]);
                assert_eq!(message.subject, "IMA/2024/00001 Case stopped");
            }
            other => panic!("unexpected job {other:?}"),
        }
    }

    #[test]
    fn test_send_without_recipients_queues_nothing() {
        let (jobs, mut receiver) = JobQueue::new();
        let notifier = Notifier::new(Arc::new(InMemoryUserRepository::new()), jobs);
        notifier.send(&[], EmailTemplateCode::StopCase, &Placeholders::new(), None);
        assert!(receiver.try_recv().is_err());
    }
}
