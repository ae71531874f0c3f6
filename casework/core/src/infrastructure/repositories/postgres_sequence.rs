// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL reference counters.
//!
//! One row per (prefix, year). The upsert increments and returns the value in
//! a single statement, so concurrent allocations never hand out the same
//! number. A value allocated by a transition that later fails is not reused.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::repository::{ReferenceSequence, RepositoryError};

pub struct PostgresReferenceSequence {
    pool: PgPool,
}

impl PostgresReferenceSequence {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReferenceSequence for PostgresReferenceSequence {
    async fn next_value(&self, prefix: &str, year: i32) -> Result<u64, RepositoryError> {
        let row = sqlx::query(
            r#"
            INSERT INTO reference_sequences (prefix, year, value)
            VALUES ($1, $2, 1)
            ON CONFLICT (prefix, year) DO UPDATE SET
                value = reference_sequences.value + 1
            RETURNING value
            "#,
        )
        .bind(prefix)
        .bind(year)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to allocate {prefix} reference: {}", e)))?;

        let value: i64 = row.try_get("value")?;
        u64::try_from(value).map_err(|_| RepositoryError::Database(format!("Negative {prefix} sequence value")))
    }
}
