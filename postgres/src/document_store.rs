//! `PostgreSQL` implementation of the document store.
//!
//! Every document lives in the `documents` table as a JSONB object keyed by
//! `(collection, id)`. Filters translate to JSONB field expressions; field
//! names are always bound as parameters, never interpolated.
//!
//! Range filters and ordering on text and timestamp fields compare under the
//! `"C"` collation, i.e. bytewise, which matches chronological order for the
//! canonical timestamp encoding.

use serde_json::{Map, Value};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::time::Duration;
use studio_core::document_store::{
    Collection, Direction, Document, DocumentId, DocumentStore, DocumentStoreError, FieldValue,
    Filter, Patch, Query, StoreFuture, timestamp,
};

/// `PostgreSQL`-backed document store.
#[derive(Clone, Debug)]
pub struct PostgresDocumentStore {
    pool: PgPool,
}

impl PostgresDocumentStore {
    /// Create a store from an existing connection pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the database.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Unavailable`] if the database cannot be reached.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, DocumentStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| DocumentStoreError::Unavailable(format!("Failed to connect: {e}")))?;
        Ok(Self { pool })
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns error if migrations fail.
    pub async fn migrate(&self) -> Result<(), DocumentStoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DocumentStoreError::Database(format!("Migration failed: {e}")))
    }

    /// Create a partial unique index over `fields` of `collection`.
    ///
    /// Only documents where every field is present participate. Collection
    /// and field names must be plain identifiers (`[A-Za-z0-9_]`).
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Database`] for invalid names or if the
    /// index cannot be built (for example because duplicates already exist).
    pub async fn ensure_unique_index(
        &self,
        collection: Collection,
        fields: &[&str],
    ) -> Result<(), DocumentStoreError> {
        let sql = unique_index_sql(collection, fields)?;
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| store_error(collection, e))?;
        tracing::info!(%collection, ?fields, "Unique index ensured");
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn unique_index_sql(collection: Collection, fields: &[&str]) -> Result<String, DocumentStoreError> {
    if fields.is_empty() || !is_identifier(collection.as_str()) || !fields.iter().all(|f| is_identifier(f)) {
        return Err(DocumentStoreError::Database(format!(
            "invalid unique index {collection}({})",
            fields.join(", ")
        )));
    }

    let mut name = format!("uq_{}_{}", collection, fields.join("_")).to_lowercase();
    name.truncate(63);
    let columns = fields
        .iter()
        .map(|f| format!("(data->>'{f}')"))
        .collect::<Vec<_>>()
        .join(", ");
    let present = fields
        .iter()
        .map(|f| format!("(data->>'{f}') IS NOT NULL"))
        .collect::<Vec<_>>()
        .join(" AND ");

    Ok(format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {name} ON documents ({columns}) \
         WHERE collection = '{collection}' AND {present}"
    ))
}

/// Map a sqlx error raised while touching `collection`.
fn store_error(collection: Collection, error: sqlx::Error) -> DocumentStoreError {
    match error {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            DocumentStoreError::Conflict {
                collection,
                reason: db
                    .constraint()
                    .map_or_else(|| db.message().to_string(), |c| format!("constraint {c} violated")),
            }
        }
        other => infra_error(other),
    }
}

fn infra_error(error: sqlx::Error) -> DocumentStoreError {
    match error {
        sqlx::Error::PoolTimedOut => {
            DocumentStoreError::Unavailable("connection pool timed out".to_string())
        }
        sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            DocumentStoreError::Unavailable(error.to_string())
        }
        other => DocumentStoreError::Database(other.to_string()),
    }
}

fn text_of(value: &FieldValue) -> String {
    match value {
        FieldValue::Text(s) => s.clone(),
        FieldValue::Timestamp(t) => timestamp::canonical(t),
        FieldValue::Integer(i) => i.to_string(),
        FieldValue::Bool(b) => b.to_string(),
    }
}

fn push_json_eq(qb: &mut QueryBuilder<'_, Postgres>, field: &str, value: &FieldValue) {
    qb.push("data->")
        .push_bind(field.to_string())
        .push(" = ")
        .push_bind(Json(value.to_json()));
}

fn push_range(qb: &mut QueryBuilder<'_, Postgres>, field: &str, op: &str, value: &FieldValue) {
    qb.push("(data->>").push_bind(field.to_string());
    match value {
        FieldValue::Integer(i) => {
            qb.push(")::bigint ").push(op).push(" ").push_bind(*i);
        }
        FieldValue::Bool(b) => {
            qb.push(")::boolean ").push(op).push(" ").push_bind(*b);
        }
        FieldValue::Text(_) | FieldValue::Timestamp(_) => {
            qb.push(") COLLATE \"C\" ").push(op).push(" ").push_bind(text_of(value));
        }
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    match filter {
        Filter::IsNull(field) => {
            qb.push("(data->>").push_bind(field.clone()).push(") IS NULL");
        }
        Filter::IsNotNull(field) => {
            qb.push("(data->>").push_bind(field.clone()).push(") IS NOT NULL");
        }
        Filter::Eq(field, value) => push_json_eq(qb, field, value),
        Filter::In(field, values) => {
            if values.is_empty() {
                qb.push("FALSE");
                return;
            }
            qb.push("(");
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                push_json_eq(qb, field, value);
            }
            qb.push(")");
        }
        Filter::Gt(field, value) => push_range(qb, field, ">", value),
        Filter::Gte(field, value) => push_range(qb, field, ">=", value),
        Filter::Lt(field, value) => push_range(qb, field, "<", value),
        Filter::Lte(field, value) => push_range(qb, field, "<=", value),
    }
}

fn push_conditions(qb: &mut QueryBuilder<'_, Postgres>, filters: &[Filter]) {
    for filter in filters {
        qb.push(" AND ");
        push_filter(qb, filter);
    }
}

fn decode_row(row: &PgRow) -> Result<Document, DocumentStoreError> {
    let id: String = row
        .try_get("id")
        .map_err(|e| DocumentStoreError::Serialization(e.to_string()))?;
    let Json(data): Json<Map<String, Value>> = row
        .try_get("data")
        .map_err(|e| DocumentStoreError::Serialization(format!("document {id}: {e}")))?;
    Ok(Document::new(DocumentId::new(id), data))
}

impl DocumentStore for PostgresDocumentStore {
    fn get(&self, collection: Collection, id: DocumentId) -> StoreFuture<'_, Option<Document>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT id, data FROM documents WHERE collection = $1 AND id = $2")
                .bind(collection.as_str())
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| store_error(collection, e))?;
            row.as_ref().map(decode_row).transpose()
        })
    }

    fn list(&self, collection: Collection, query: Query) -> StoreFuture<'_, Vec<Document>> {
        Box::pin(async move {
            let mut qb = QueryBuilder::<Postgres>::new(
                "SELECT id, data FROM documents WHERE collection = ",
            );
            qb.push_bind(collection.as_str());
            push_conditions(&mut qb, &query.filters);

            match &query.order_by {
                Some((field, Direction::Ascending)) => {
                    qb.push(" ORDER BY (data->>")
                        .push_bind(field.clone())
                        .push(") COLLATE \"C\" ASC NULLS LAST, id ASC");
                }
                Some((field, Direction::Descending)) => {
                    qb.push(" ORDER BY (data->>")
                        .push_bind(field.clone())
                        .push(") COLLATE \"C\" DESC NULLS FIRST, id ASC");
                }
                None => {
                    qb.push(" ORDER BY id ASC");
                }
            }

            if let Some(limit) = query.limit {
                qb.push(" LIMIT ").push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
            }
            if query.offset > 0 {
                qb.push(" OFFSET ").push_bind(i64::try_from(query.offset).unwrap_or(i64::MAX));
            }

            let rows = qb
                .build()
                .fetch_all(&self.pool)
                .await
                .map_err(|e| store_error(collection, e))?;
            rows.iter().map(decode_row).collect()
        })
    }

    fn count(&self, collection: Collection, filters: Vec<Filter>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let mut qb =
                QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM documents WHERE collection = ");
            qb.push_bind(collection.as_str());
            push_conditions(&mut qb, &filters);

            let count: i64 = qb
                .build_query_scalar()
                .fetch_one(&self.pool)
                .await
                .map_err(|e| store_error(collection, e))?;
            Ok(u64::try_from(count).unwrap_or(0))
        })
    }

    fn create(&self, collection: Collection, document: Document) -> StoreFuture<'_, Document> {
        Box::pin(async move {
            sqlx::query("INSERT INTO documents (collection, id, data) VALUES ($1, $2, $3)")
                .bind(collection.as_str())
                .bind(document.id.as_str())
                .bind(Json(&document.data))
                .execute(&self.pool)
                .await
                .map_err(|e| store_error(collection, e))?;
            Ok(document)
        })
    }

    fn update(
        &self,
        collection: Collection,
        id: DocumentId,
        patch: Patch,
        precondition: Vec<Filter>,
    ) -> StoreFuture<'_, Document> {
        Box::pin(async move {
            let mut qb = QueryBuilder::<Postgres>::new("UPDATE documents SET data = data || ");
            qb.push_bind(Json(Value::Object(patch)))
                .push(", updated_at = now() WHERE collection = ")
                .push_bind(collection.as_str())
                .push(" AND id = ")
                .push_bind(id.as_str().to_string());
            push_conditions(&mut qb, &precondition);
            qb.push(" RETURNING id, data");

            let row = qb
                .build()
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| store_error(collection, e))?;

            if let Some(row) = row {
                return decode_row(&row);
            }

            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM documents WHERE collection = $1 AND id = $2)",
            )
            .bind(collection.as_str())
            .bind(id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_error(collection, e))?;

            if exists {
                tracing::debug!(%collection, %id, "Conditional update rejected");
                Err(DocumentStoreError::PreconditionFailed { collection, id })
            } else {
                Err(DocumentStoreError::NotFound { collection, id })
            }
        })
    }

    fn delete(&self, collection: Collection, id: DocumentId) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
                .bind(collection.as_str())
                .bind(id.as_str())
                .execute(&self.pool)
                .await
                .map_err(|e| store_error(collection, e))?;

            if result.rows_affected() == 0 {
                return Err(DocumentStoreError::NotFound { collection, id });
            }
            Ok(())
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(infra_error)?;
            Ok(())
        })
    }
}
