// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Background Jobs
//!
//! Work that must not run inside a process update: sending email, rendering
//! document packs and posting licence data to CHIEF. Services enqueue a
//! [`Job`] after their update has committed; a [`JobRunner`] drains the queue
//! and retries failed jobs with a fixed delay (at-least-once delivery).
//!
//! Jobs re-load the process when they run, so a job that finds the case has
//! moved on fails with a workflow error and is not retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::application::notifications::{EmailMessage, MailerError};
use crate::domain::case::CaseError;
use crate::domain::process::ProcessId;
use crate::domain::user::UserId;

#[derive(Debug, Clone)]
pub enum Job {
    SendEmail(EmailMessage),
    /// Render the draft pack's documents, then continue to CHIEF or completion.
    CreateDocumentPack { process_id: ProcessId, requested_by: UserId },
    SendLicenceToChief { process_id: ProcessId, revoke: bool },
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::SendEmail(_) => "send_email",
            Job::CreateDocumentPack { .. } => "create_document_pack",
            Job::SendLicenceToChief { .. } => "send_licence_to_chief",
        }
    }
}

pub type JobReceiver = mpsc::UnboundedReceiver<Job>;

/// Sending half of the job queue. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::UnboundedSender<Job>,
}

impl JobQueue {
    pub fn new() -> (Self, JobReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn enqueue(&self, job: Job) {
        let name = job.name();
        if self.sender.send(job).is_err() {
            error!(job = name, "Job queue is closed; job dropped");
        } else {
            debug!(job = name, "Job enqueued");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Mail(#[from] MailerError),

    #[error(transparent)]
    Case(#[from] CaseError),
}

impl JobError {
    /// Transport and storage failures may succeed later; workflow errors will not.
    pub fn is_retryable(&self) -> bool {
        match self {
            JobError::Mail(_) => true,
            JobError::Case(CaseError::Repository(_)) | JobError::Case(CaseError::Integration(_)) => true,
            JobError::Case(_) => false,
        }
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), JobError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

pub struct JobRunner {
    handler: Arc<dyn JobHandler>,
    policy: RetryPolicy,
}

impl JobRunner {
    pub fn new(handler: Arc<dyn JobHandler>, policy: RetryPolicy) -> Self {
        Self { handler, policy }
    }

    /// Process jobs until every `JobQueue` handle has been dropped.
    pub async fn run(&self, mut receiver: JobReceiver) {
        info!("Job runner started");
        while let Some(job) = receiver.recv().await {
            self.execute(&job).await;
        }
        info!("Job queue closed, job runner stopping");
    }

    /// Process everything currently queued, including jobs enqueued by the
    /// jobs being processed. Returns the number of jobs that succeeded.
    pub async fn drain(&self, receiver: &mut JobReceiver) -> usize {
        let mut succeeded = 0;
        while let Ok(job) = receiver.try_recv() {
            if self.execute(&job).await {
                succeeded += 1;
            }
        }
        succeeded
    }

    async fn execute(&self, job: &Job) -> bool {
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.handler.handle(job).await {
                Ok(()) => {
                    debug!(job = job.name(), attempt, "Job completed");
                    metrics::counter!("icms_jobs_total", "job" => job.name(), "outcome" => "success").increment(1);
                    return true;
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(job = job.name(), attempt, error = %e, "Job failed, retrying");
                    tokio::time::sleep(self.policy.delay).await;
                }
                Err(e) => {
                    error!(job = job.name(), attempt, error = %e, "Job failed permanently");
                    metrics::counter!("icms_jobs_total", "job" => job.name(), "outcome" => "failure").increment(1);
                    return false;
                }
            }
        }

        false
    }
}
