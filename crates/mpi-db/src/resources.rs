//! Versioned resource collections and their history archive.
//!
//! Latest versions live in `resource`, superseded versions in
//! `resource_history`; rows are partitioned by `resource_type`, so the
//! `<type>_history` collection of a type is its slice of `resource_history`.

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, trace};
use uuid::Uuid;

use mpi_core::walker::segments;
use mpi_core::{CandidateQuery, Error, ReplaceOutcome, Resource, ResourceStore, Result};

/// Translate a dotted path into a lax-mode SQL/JSON path.
///
/// `name.given` becomes `lax $."name"[*]."given"[*]`. In lax mode `[*]` on a
/// non-array yields the value itself, so the result flattens arrays at every
/// level the same way the in-process walker does.
pub fn lax_jsonpath(path: &str) -> Result<String> {
    let parts = segments(path)
        .ok_or_else(|| Error::InvalidInput(format!("invalid field path: '{}'", path)))?;

    let mut out = String::from("lax $");
    for part in parts {
        let escaped = part.replace('\\', "\\\\").replace('"', "\\\"");
        out.push_str(&format!(".\"{}\"[*]", escaped));
    }
    Ok(out)
}

/// PostgreSQL implementation of ResourceStore.
pub struct PgResourceStore {
    pool: Pool<Postgres>,
}

impl PgResourceStore {
    /// Create a new PgResourceStore with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_resource_row(row: sqlx::postgres::PgRow) -> Resource {
        Resource {
            resource_type: row.get("resource_type"),
            id: row.get("id"),
            version_id: row.get("version_id"),
            body: row.get("document"),
        }
    }
}

#[async_trait]
impl ResourceStore for PgResourceStore {
    async fn insert(&self, resource: &Resource) -> Result<()> {
        sqlx::query(
            "INSERT INTO resource (resource_type, id, version_id, document, updated_at)
             VALUES ($1, $2, $3, $4, now())",
        )
        .bind(&resource.resource_type)
        .bind(&resource.id)
        .bind(resource.version_id)
        .bind(&resource.body)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn get(&self, resource_type: &str, id: &str) -> Result<Option<Resource>> {
        let row = sqlx::query(
            "SELECT resource_type, id, version_id, document
             FROM resource WHERE resource_type = $1 AND id = $2",
        )
        .bind(resource_type)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_resource_row))
    }

    async fn find_candidates(&self, query: &CandidateQuery) -> Result<Vec<Resource>> {
        let mut conditions = vec![
            "resource_type = $1".to_string(),
            "($2::text IS NULL OR id <> $2)".to_string(),
            "($3::text IS NULL OR id > $3)".to_string(),
        ];
        let mut param_idx = 4;
        let mut paths = Vec::with_capacity(query.clauses.len());

        for clause in &query.clauses {
            paths.push(lax_jsonpath(&clause.path)?);
            conditions.push(format!(
                "EXISTS (
                     SELECT 1 FROM jsonb_path_query(document, ${}::jsonpath) AS v(value)
                     WHERE v.value IN (SELECT jsonb_array_elements(${}::jsonb))
                 )",
                param_idx,
                param_idx + 1
            ));
            param_idx += 2;
        }

        let sql = format!(
            "SELECT resource_type, id, version_id, document
             FROM resource
             WHERE {}
             ORDER BY id ASC
             LIMIT ${}",
            conditions.join(" AND "),
            param_idx
        );

        let mut q = sqlx::query(&sql)
            .bind(&query.resource_type)
            .bind(query.exclude_id.as_deref())
            .bind(query.after_id.as_deref());
        for (clause, path) in query.clauses.iter().zip(&paths) {
            q = q.bind(path).bind(JsonValue::Array(clause.values.clone()));
        }
        q = q.bind(query.limit);

        let rows = q.fetch_all(&self.pool).await.map_err(Error::Database)?;

        trace!(
            subsystem = "db",
            component = "resource_store",
            op = "find_candidates",
            resource_type = %query.resource_type,
            clauses = query.clauses.len(),
            result_count = rows.len(),
            "Candidate query complete"
        );

        Ok(rows.into_iter().map(Self::parse_resource_row).collect())
    }

    async fn find_linked_to(&self, resource_type: &str, reference: &str) -> Result<Vec<Resource>> {
        let containment = json!([{ "other": { "reference": reference } }]);

        let rows = sqlx::query(
            "SELECT resource_type, id, version_id, document
             FROM resource
             WHERE resource_type = $1 AND document->'link' @> $2::jsonb
             ORDER BY id ASC",
        )
        .bind(resource_type)
        .bind(&containment)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_resource_row).collect())
    }

    async fn replace_version(
        &self,
        next: &Resource,
        expected_version: i64,
    ) -> Result<ReplaceOutcome> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Row lock serializes writers; a waiter re-reads the committed row.
        let stored = sqlx::query(
            "SELECT version_id, document FROM resource
             WHERE resource_type = $1 AND id = $2
             FOR UPDATE",
        )
        .bind(&next.resource_type)
        .bind(&next.id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let Some(row) = stored else {
            return Ok(ReplaceOutcome::NotFound);
        };
        let stored_version: i64 = row.get("version_id");
        if stored_version != expected_version {
            debug!(
                subsystem = "db",
                component = "resource_store",
                op = "replace_version",
                resource_type = %next.resource_type,
                resource_id = %next.id,
                expected_version,
                stored_version,
                "Stale write rejected"
            );
            return Ok(ReplaceOutcome::Conflict { stored_version });
        }
        let document: JsonValue = row.get("document");

        sqlx::query(
            "INSERT INTO resource_history (history_id, resource_type, id, version_id, document, archived_at)
             VALUES ($1, $2, $3, $4, $5, now())",
        )
        .bind(Uuid::now_v7())
        .bind(&next.resource_type)
        .bind(&next.id)
        .bind(stored_version)
        .bind(&document)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        sqlx::query(
            "UPDATE resource
             SET version_id = $3, document = $4, updated_at = now()
             WHERE resource_type = $1 AND id = $2",
        )
        .bind(&next.resource_type)
        .bind(&next.id)
        .bind(next.version_id)
        .bind(&next.body)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(ReplaceOutcome::Replaced)
    }

    async fn history(&self, resource_type: &str, id: &str) -> Result<Vec<Resource>> {
        let rows = sqlx::query(
            "SELECT resource_type, id, version_id, document
             FROM resource_history
             WHERE resource_type = $1 AND id = $2
             ORDER BY version_id ASC, archived_at ASC",
        )
        .bind(resource_type)
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_resource_row).collect())
    }

    async fn delete(&self, resource_type: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM resource WHERE resource_type = $1 AND id = $2")
            .bind(resource_type)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }
}
