use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{
    Document, DocumentFilter, DocumentId, DocumentStore, FindOptions, SortKey, StoredDocument,
};
use crate::error::{Result, StorageError};

#[derive(FromRow)]
struct DocumentRow {
    document_id: Uuid,
    body: Json<Document>,
}

impl From<DocumentRow> for StoredDocument {
    fn from(row: DocumentRow) -> Self {
        Self {
            id: row.document_id.into(),
            body: row.body.0,
        }
    }
}

/// Document store backed by a single JSONB table in Postgres.
///
/// Collections share the `documents` table and are told apart by the
/// `collection` column.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn find(
        &self,
        collection: &str,
        filter: &DocumentFilter,
        options: &FindOptions,
    ) -> Result<Vec<StoredDocument>> {
        let mut query = QueryBuilder::new("SELECT document_id, body FROM documents");
        push_filter(&mut query, collection, filter);

        query.push(" ORDER BY ");
        for (key, direction) in &options.sort {
            match key {
                SortKey::Id => {
                    query.push("document_id ");
                }
                SortKey::Field(field) => {
                    query.push("body -> ");
                    query.push_bind(field.clone());
                    query.push(" ");
                }
            }
            query.push(direction.as_sql());
            query.push(", ");
        }
        query.push("seq ASC");

        if let Some(limit) = options.limit {
            query.push(" LIMIT ");
            query.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }
        if options.skip > 0 {
            query.push(" OFFSET ");
            query.push_bind(i64::try_from(options.skip).unwrap_or(i64::MAX));
        }

        tracing::debug!(collection, sql = query.sql(), "finding documents");

        let rows: Vec<DocumentRow> = query.build_query_as().fetch_all(&self.pool).await?;

        Ok(rows.into_iter().map(StoredDocument::from).collect())
    }

    async fn find_one(&self, collection: &str, id: DocumentId) -> Result<Option<StoredDocument>> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT document_id, body
            FROM documents
            WHERE collection = $1 AND document_id = $2
            "#,
        )
        .bind(collection)
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(StoredDocument::from))
    }

    async fn count(&self, collection: &str, filter: &DocumentFilter) -> Result<u64> {
        let mut query = QueryBuilder::new("SELECT COUNT(*) FROM documents");
        push_filter(&mut query, collection, filter);

        let count = query
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        Ok(count.max(0) as u64)
    }

    async fn insert(&self, collection: &str, body: Document) -> Result<DocumentId> {
        let id = DocumentId::generate();

        sqlx::query(
            r#"
            INSERT INTO documents (collection, document_id, body)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(collection)
        .bind(id.as_uuid())
        .bind(Json(body))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            let error = StorageError::from(e);
            if error.is_unique_violation() {
                StorageError::ConstraintViolation(format!(
                    "duplicate identifier {} in {}",
                    id, collection
                ))
            } else {
                error
            }
        })?;

        Ok(id)
    }

    async fn update(&self, collection: &str, id: DocumentId, changes: Document) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET body = body || $3
            WHERE collection = $1 AND document_id = $2
            "#,
        )
        .bind(collection)
        .bind(id.as_uuid())
        .bind(Json(changes))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete(&self, collection: &str, id: DocumentId) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM documents WHERE collection = $1 AND document_id = $2")
                .bind(collection)
                .bind(id.as_uuid())
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }
}

fn push_filter(query: &mut QueryBuilder<'_, Postgres>, collection: &str, filter: &DocumentFilter) {
    query.push(" WHERE collection = ");
    query.push_bind(collection.to_string());

    if let Some(id) = filter.id {
        query.push(" AND document_id = ");
        query.push_bind(id.as_uuid());
    }

    let (nulls, values): (Vec<_>, Vec<_>) = filter
        .equals
        .iter()
        .partition(|(_, value)| value.is_null());

    if !values.is_empty() {
        let contained: Document = values
            .into_iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        query.push(" AND body @> ");
        query.push_bind(Json(Value::Object(contained)));
    }

    // Containment cannot express "null or missing".
    for (key, _) in nulls {
        query.push(" AND (body -> ");
        query.push_bind(key.clone());
        query.push(" IS NULL OR body -> ");
        query.push_bind(key.clone());
        query.push(" = 'null'::jsonb)");
    }
}
