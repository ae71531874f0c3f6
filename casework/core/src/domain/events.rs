// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain events recorded by the `Process` aggregate and published on the
//! event bus once a mutation has been committed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::document_pack::DocumentPackId;
use crate::domain::process::{CaseStatus, ProcessId, ProcessType, TaskId, TaskType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CaseEvent {
    ProcessCreated {
        process_id: ProcessId,
        process_type: ProcessType,
        created_at: DateTime<Utc>,
    },
    TaskStarted {
        process_id: ProcessId,
        task_id: TaskId,
        task_type: TaskType,
        previous: Option<TaskId>,
        started_at: DateTime<Utc>,
    },
    TaskEnded {
        process_id: ProcessId,
        task_id: TaskId,
        task_type: TaskType,
        finished_at: DateTime<Utc>,
    },
    StatusChanged {
        process_id: ProcessId,
        from: CaseStatus,
        to: CaseStatus,
        changed_at: DateTime<Utc>,
    },
    ChiefRequestSent {
        process_id: ProcessId,
        icms_hmrc_id: Uuid,
        revoke: bool,
        sent_at: DateTime<Utc>,
    },
    ChiefResponseReceived {
        process_id: ProcessId,
        icms_hmrc_id: Uuid,
        accepted: bool,
        received_at: DateTime<Utc>,
    },
    DocumentPackIssued {
        process_id: ProcessId,
        pack_id: DocumentPackId,
        issued_at: DateTime<Utc>,
    },
}

impl CaseEvent {
    pub fn process_id(&self) -> ProcessId {
        match self {
            CaseEvent::ProcessCreated { process_id, .. }
            | CaseEvent::TaskStarted { process_id, .. }
            | CaseEvent::TaskEnded { process_id, .. }
            | CaseEvent::StatusChanged { process_id, .. }
            | CaseEvent::ChiefRequestSent { process_id, .. }
            | CaseEvent::ChiefResponseReceived { process_id, .. }
            | CaseEvent::DocumentPackIssued { process_id, .. } => *process_id,
        }
    }
}
