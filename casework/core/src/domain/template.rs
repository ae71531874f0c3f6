// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Email templates with `[[PLACEHOLDER]]` substitution.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

static PLACEHOLDER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\[\[([A-Z_]+)\]\]").ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmailTemplateCode {
    ImaAppUpdate,
    CaApplicationUpdateEmail,
    StopCase,
    AccessRequest,
    AccessRequestClosed,
    ApplicationComplete,
    ApplicationRefused,
    LicenceRevoked,
    WithdrawalAccepted,
}

impl EmailTemplateCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailTemplateCode::ImaAppUpdate => "IMA_APP_UPDATE",
            EmailTemplateCode::CaApplicationUpdateEmail => "CA_APPLICATION_UPDATE_EMAIL",
            EmailTemplateCode::StopCase => "STOP_CASE",
            EmailTemplateCode::AccessRequest => "ACCESS_REQUEST",
            EmailTemplateCode::AccessRequestClosed => "ACCESS_REQUEST_CLOSED",
            EmailTemplateCode::ApplicationComplete => "APPLICATION_COMPLETE",
            EmailTemplateCode::ApplicationRefused => "APPLICATION_REFUSED",
            EmailTemplateCode::LicenceRevoked => "LICENCE_REVOKED",
            EmailTemplateCode::WithdrawalAccepted => "WITHDRAWAL_ACCEPTED",
        }
    }
}

impl fmt::Display for EmailTemplateCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailTemplate {
    pub code: EmailTemplateCode,
    pub title: &'static str,
    pub body: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedEmail {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("Template {code} uses unknown placeholder [[{placeholder}]]")]
    UnknownPlaceholder {
        code: EmailTemplateCode,
        placeholder: String,
    },

    #[error("Placeholder pattern failed to compile")]
    Pattern,
}

impl EmailTemplate {
    pub fn get(code: EmailTemplateCode) -> Self {
        let (title, body) = match code {
            EmailTemplateCode::ImaAppUpdate => (
                "[[CASE_REFERENCE]] Request for application update",
                "Dear [[IMPORTER_NAME]],\n\n[[REQUEST_DETAIL]]\n\nYours sincerely,\n\n[[CASE_OFFICER_NAME]]",
            ),
            EmailTemplateCode::CaApplicationUpdateEmail => (
                "[[CASE_REFERENCE]] Request for application update",
                "Dear [[EXPORTER_NAME]],\n\n[[REQUEST_DETAIL]]\n\nYours sincerely,\n\n[[CASE_OFFICER_NAME]]",
            ),
            EmailTemplateCode::StopCase => (
                "[[CASE_REFERENCE]] Case stopped",
                "Processing on application [[CASE_REFERENCE]] has been stopped and the case closed.",
            ),
            EmailTemplateCode::AccessRequest => (
                "Access request [[REQUEST_REFERENCE]]",
                "A new access request [[REQUEST_REFERENCE]] has been submitted by [[REQUESTER_NAME]] for [[ORGANISATION_NAME]].",
            ),
            EmailTemplateCode::AccessRequestClosed => (
                "Access request [[REQUEST_REFERENCE]] closed",
                "Your access request [[REQUEST_REFERENCE]] for [[ORGANISATION_NAME]] has been [[RESPONSE]].\n\n[[RESPONSE_REASON]]",
            ),
            EmailTemplateCode::ApplicationComplete => (
                "[[CASE_REFERENCE]] Application complete",
                "Your application [[CASE_REFERENCE]] ([[APPLICATION_TYPE]]) has been approved. The documents are available to download.",
            ),
            EmailTemplateCode::ApplicationRefused => (
                "[[CASE_REFERENCE]] Application refused",
                "Your application [[CASE_REFERENCE]] ([[APPLICATION_TYPE]]) has been refused.\n\nReason: [[REFUSE_REASON]]",
            ),
            EmailTemplateCode::LicenceRevoked => (
                "[[CASE_REFERENCE]] Licence revoked",
                "Licence [[LICENCE_REFERENCE]] issued under [[CASE_REFERENCE]] has been revoked.",
            ),
            EmailTemplateCode::WithdrawalAccepted => (
                "[[CASE_REFERENCE]] Withdrawal accepted",
                "Your request to withdraw application [[CASE_REFERENCE]] has been accepted.",
            ),
        };
        Self { code, title, body }
    }

    pub fn render(&self, context: &HashMap<&str, String>) -> Result<RenderedEmail, TemplateError> {
        Ok(RenderedEmail {
            subject: self.substitute(self.title, context)?,
            body: self.substitute(self.body, context)?,
        })
    }

    fn substitute(&self, text: &str, context: &HashMap<&str, String>) -> Result<String, TemplateError> {
        let pattern = PLACEHOLDER.as_ref().ok_or(TemplateError::Pattern)?;

        if let Some(missing) = pattern
            .captures_iter(text)
            .map(|c| c[1].to_string())
            .find(|name| !context.contains_key(name.as_str()))
        {
            return Err(TemplateError::UnknownPlaceholder {
                code: self.code,
                placeholder: missing,
            });
        }

        Ok(pattern
            .replace_all(text, |caps: &Captures| {
                context.get(&caps[1]).cloned().unwrap_or_default()
            })
            .into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_placeholders() {
        let template = EmailTemplate::get(EmailTemplateCode::ImaAppUpdate);
        let context = HashMap::from([
            ("CASE_REFERENCE", "IMA/2024/00001".to_string()),
            ("IMPORTER_NAME", "Dovetail Imports".to_string()),
            ("REQUEST_DETAIL", "Please update the goods".to_string()),
            ("CASE_OFFICER_NAME", "Case Officer".to_string()),
        ]);

        let email = template.render(&context).unwrap();
        assert_eq!(email.subject, "IMA/2024/00001 Request for application update");
        assert!(email.body.starts_with("Dear Dovetail Imports,"));
        assert!(email.body.ends_with("Case Officer"));
    }

    #[test]
    fn test_render_fails_on_missing_value() {
        let template = EmailTemplate::get(EmailTemplateCode::StopCase);
        let err = template.render(&HashMap::new()).unwrap_err();
        assert_eq!(
            err,
            TemplateError::UnknownPlaceholder {
                code: EmailTemplateCode::StopCase,
                placeholder: "CASE_REFERENCE".to_string()
            }
        );
    }
}
