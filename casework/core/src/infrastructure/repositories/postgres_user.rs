// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL User Repository
//!
//! Users and organisations are stored as JSONB documents. Membership and
//! permission filters use JSONB containment so the GIN indexes on `document`
//! serve the contact and caseworker lookups.

use async_trait::async_trait;
use serde_json::json;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::repository::{RepositoryError, UserRepository};
use crate::domain::user::{OrgRole, Organisation, OrganisationId, SystemPermission, User, UserId};

pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn users_matching(&self, containment: serde_json::Value) -> Result<Vec<User>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT document FROM users
            WHERE is_active AND document @> $1
            ORDER BY email ASC
            "#,
        )
        .bind(containment)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to query users: {}", e)))?;

        rows.iter().map(document_from_row).collect()
    }
}

fn document_from_row<T: serde::de::DeserializeOwned>(row: &PgRow) -> Result<T, RepositoryError> {
    let document: serde_json::Value = row.try_get("document")?;
    Ok(serde_json::from_value(document)?)
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn save(&self, user: &User) -> Result<(), RepositoryError> {
        let document = serde_json::to_value(user)?;

        sqlx::query(
            r#"
            INSERT INTO users (id, email, is_active, document)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                email = EXCLUDED.email,
                is_active = EXCLUDED.is_active,
                document = EXCLUDED.document,
                updated_at = NOW()
            "#,
        )
        .bind(user.id.0)
        .bind(&user.email)
        .bind(user.is_active)
        .bind(document)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save user: {}", e)))?;

        Ok(())
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query("SELECT document FROM users WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(format!("Failed to load user: {}", e)))?;

        row.as_ref().map(document_from_row).transpose()
    }

    async fn find_org_contacts(&self, organisation: OrganisationId) -> Result<Vec<User>, RepositoryError> {
        let membership = json!({
            "memberships": [{ "organisation": organisation.0, "role": OrgRole::Contact }]
        });
        self.users_matching(membership).await
    }

    async fn find_ilb_admins(&self) -> Result<Vec<User>, RepositoryError> {
        self.users_matching(json!({ "permissions": [SystemPermission::IlbAdmin] }))
            .await
    }

    async fn save_organisation(&self, organisation: &Organisation) -> Result<(), RepositoryError> {
        let document = serde_json::to_value(organisation)?;
        let kind = serde_json::to_value(organisation.kind)?;

        sqlx::query(
            r#"
            INSERT INTO organisations (id, kind, name, is_active, document)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                kind = EXCLUDED.kind,
                name = EXCLUDED.name,
                is_active = EXCLUDED.is_active,
                document = EXCLUDED.document
            "#,
        )
        .bind(organisation.id.0)
        .bind(kind.as_str().unwrap_or_default())
        .bind(&organisation.name)
        .bind(organisation.is_active)
        .bind(document)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save organisation: {}", e)))?;

        Ok(())
    }

    async fn find_organisation(&self, id: OrganisationId) -> Result<Option<Organisation>, RepositoryError> {
        let row = sqlx::query("SELECT document FROM organisations WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(format!("Failed to load organisation: {}", e)))?;

        row.as_ref().map(document_from_row).transpose()
    }
}
