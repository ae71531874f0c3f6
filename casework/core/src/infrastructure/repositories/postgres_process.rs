// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL Process Repository
//!
//! Stores each process as a JSONB document alongside the columns the
//! workbasket and CHIEF lookups filter on.
//!
//! # Schema
//!
//! The `processes` table stores:
//! - Identity and state (`id`, `process_type`, `status`, `is_active`, `reference`)
//! - Ordering (`order_datetime`)
//! - Lookup columns rebuilt on every write (`active_task_types`,
//!   `licence_reference`, `chief_request_ids`)
//! - The full aggregate (`document`)
//!
//! # Locking
//!
//! `update` opens a transaction and takes `SELECT ... FOR UPDATE` on the row
//! before running the mutation. A mutation error drops the transaction, which
//! rolls it back. `update_many` locks a set of rows in id order inside one
//! transaction.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow, Postgres};
use sqlx::{Row, Transaction};
use uuid::Uuid;

use crate::domain::case::CaseError;
use crate::domain::process::{Process, ProcessId, TaskType};
use crate::domain::repository::{BatchMutation, ProcessMutation, ProcessRepository, RepositoryError};

pub struct PostgresProcessRepository {
    pool: PgPool,
}

impl PostgresProcessRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Values for the indexed lookup columns.
struct LookupColumns {
    active_task_types: Vec<String>,
    licence_reference: Option<String>,
    chief_request_ids: Vec<Uuid>,
}

impl LookupColumns {
    fn of(process: &Process) -> Self {
        let app = process.application().ok();
        Self {
            active_task_types: process
                .active_tasks()
                .map(|t| t.task_type.as_str().to_string())
                .collect(),
            licence_reference: app
                .and_then(|a| a.active_pack())
                .and_then(|pack| pack.licence_reference())
                .map(str::to_string),
            chief_request_ids: app
                .and_then(|a| a.import())
                .map(|import| import.chief_requests.iter().map(|r| r.icms_hmrc_id).collect())
                .unwrap_or_default(),
        }
    }
}

fn process_from_row(row: &PgRow) -> Result<Process, RepositoryError> {
    let document: serde_json::Value = row.try_get("document")?;
    Ok(serde_json::from_value(document)?)
}

/// Rewrite a locked row from the mutated aggregate.
async fn write_process(tx: &mut Transaction<'_, Postgres>, process: &Process) -> Result<(), RepositoryError> {
    let document = serde_json::to_value(process)?;
    let lookup = LookupColumns::of(process);
    sqlx::query(
        r#"
        UPDATE processes SET
            status = $2,
            is_active = $3,
            reference = $4,
            order_datetime = $5,
            active_task_types = $6,
            licence_reference = $7,
            chief_request_ids = $8,
            document = $9,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(process.id.0)
    .bind(process.status.as_str())
    .bind(process.is_active)
    .bind(&process.reference)
    .bind(process.order_datetime)
    .bind(&lookup.active_task_types)
    .bind(&lookup.licence_reference)
    .bind(&lookup.chief_request_ids)
    .bind(document)
    .execute(&mut **tx)
    .await
    .map_err(|e| RepositoryError::Database(format!("Failed to update process: {}", e)))?;
    Ok(())
}

#[async_trait]
impl ProcessRepository for PostgresProcessRepository {
    async fn insert(&self, process: &Process) -> Result<(), RepositoryError> {
        let document = serde_json::to_value(process)?;
        let lookup = LookupColumns::of(process);

        sqlx::query(
            r#"
            INSERT INTO processes (
                id, process_type, status, is_active, reference, order_datetime, created,
                active_task_types, licence_reference, chief_request_ids, document
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(process.id.0)
        .bind(process.process_type.as_str())
        .bind(process.status.as_str())
        .bind(process.is_active)
        .bind(&process.reference)
        .bind(process.order_datetime)
        .bind(process.created)
        .bind(&lookup.active_task_types)
        .bind(&lookup.licence_reference)
        .bind(&lookup.chief_request_ids)
        .bind(document)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to insert process: {}", e)))?;

        Ok(())
    }

    async fn find_by_id(&self, id: ProcessId) -> Result<Option<Process>, RepositoryError> {
        let row = sqlx::query("SELECT document FROM processes WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(format!("Failed to load process: {}", e)))?;

        row.as_ref().map(process_from_row).transpose()
    }

    async fn update<'a>(&'a self, id: ProcessId, mutation: ProcessMutation<'a>) -> Result<Process, CaseError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        let row = sqlx::query("SELECT document FROM processes WHERE id = $1 FOR UPDATE")
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Database(format!("Failed to lock process: {}", e)))?
            .ok_or_else(|| CaseError::NotFound(format!("Process {id}")))?;
        let mut process = process_from_row(&row)?;

        mutation(&mut process)?;

        write_process(&mut tx, &process).await?;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(process)
    }

    async fn update_many<'a>(&'a self, ids: &[ProcessId], mutation: BatchMutation<'a>) -> Result<Vec<Process>, CaseError> {
        let mut unique: Vec<ProcessId> = Vec::with_capacity(ids.len());
        for id in ids {
            if !unique.contains(id) {
                unique.push(*id);
            }
        }
        let keys: Vec<Uuid> = unique.iter().map(|id| id.0).collect();

        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        // Always lock in id order.
        let rows = sqlx::query("SELECT document FROM processes WHERE id = ANY($1) ORDER BY id FOR UPDATE")
            .bind(&keys)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Database(format!("Failed to lock processes: {}", e)))?;
        let mut locked = rows.iter().map(process_from_row).collect::<Result<Vec<_>, _>>()?;

        let mut batch = Vec::with_capacity(unique.len());
        for id in &unique {
            let position = locked
                .iter()
                .position(|p| p.id == *id)
                .ok_or_else(|| CaseError::NotFound(format!("Process {id}")))?;
            batch.push(locked.swap_remove(position));
        }

        mutation(&mut batch)?;

        for process in &batch {
            write_process(&mut tx, process).await?;
        }

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(batch)
    }

    async fn find_by_chief_request(&self, icms_hmrc_id: Uuid) -> Result<Option<ProcessId>, RepositoryError> {
        let row = sqlx::query("SELECT id FROM processes WHERE $1 = ANY(chief_request_ids) LIMIT 1")
            .bind(icms_hmrc_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(format!("Failed to find CHIEF request: {}", e)))?;

        Ok(row.map(|r| ProcessId(r.get("id"))))
    }

    async fn find_by_licence_reference(&self, licence_reference: &str) -> Result<Option<ProcessId>, RepositoryError> {
        let row = sqlx::query("SELECT id FROM processes WHERE licence_reference = $1 LIMIT 1")
            .bind(licence_reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(format!("Failed to find licence: {}", e)))?;

        Ok(row.map(|r| ProcessId(r.get("id"))))
    }

    async fn find_with_active_task(&self, task_types: &[TaskType]) -> Result<Vec<Process>, RepositoryError> {
        let task_types: Vec<String> = task_types.iter().map(|t| t.as_str().to_string()).collect();
        let rows = sqlx::query(
            r#"
            SELECT document FROM processes
            WHERE active_task_types && $1
            ORDER BY order_datetime ASC
            "#,
        )
        .bind(task_types)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to query processes by task: {}", e)))?;

        rows.iter().map(process_from_row).collect()
    }

    async fn list_active(&self) -> Result<Vec<Process>, RepositoryError> {
        let rows = sqlx::query("SELECT document FROM processes WHERE is_active ORDER BY order_datetime ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(format!("Failed to list processes: {}", e)))?;

        rows.iter().map(process_from_row).collect()
    }
}
