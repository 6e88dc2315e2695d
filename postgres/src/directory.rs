//! `PostgreSQL` client directory.
//!
//! Reads the client and cohort-membership tables owned by the surrounding
//! CRUD domain. This crate never migrates or writes those tables; it only
//! needs the three lookups the pipeline depends on.
//!
//! # Expected schema (owned elsewhere)
//!
//! ```sql
//! -- clients(id TEXT PRIMARY KEY, organization_key TEXT, ...)
//! -- cohort_members(cohort_tag TEXT, client_id TEXT, PRIMARY KEY (cohort_tag, client_id))
//! ```

use caresight_core::directory::{ClientDirectory, DirectoryError};
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;

/// Directory lookups backed by the CRUD domain's tables.
#[derive(Clone)]
pub struct PostgresClientDirectory {
    pool: PgPool,
}

impl PostgresClientDirectory {
    /// Create a directory using an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ClientDirectory for PostgresClientDirectory {
    fn organization_of(
        &self,
        client_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, DirectoryError>> + Send + '_>> {
        let client_id = client_id.to_string();
        Box::pin(async move {
            let row = sqlx::query("SELECT organization_key FROM clients WHERE id = $1")
                .bind(client_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| DirectoryError::Lookup(e.to_string()))?;

            Ok(row.and_then(|r| r.get("organization_key")))
        })
    }

    fn cohorts_of(
        &self,
        client_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, DirectoryError>> + Send + '_>> {
        let client_id = client_id.to_string();
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT cohort_tag FROM cohort_members WHERE client_id = $1 ORDER BY cohort_tag",
            )
            .bind(client_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DirectoryError::Lookup(e.to_string()))?;

            Ok(rows.iter().map(|r| r.get("cohort_tag")).collect())
        })
    }

    fn members_of(
        &self,
        cohort_tag: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, DirectoryError>> + Send + '_>> {
        let cohort_tag = cohort_tag.to_string();
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT client_id FROM cohort_members WHERE cohort_tag = $1 ORDER BY client_id",
            )
            .bind(cohort_tag)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DirectoryError::Lookup(e.to_string()))?;

            Ok(rows.iter().map(|r| r.get("client_id")).collect())
        })
    }
}
