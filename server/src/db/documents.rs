//! Database operations for the documents table.

use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use schoolsync_engine::remote::{stamp, LAST_UPDATED_FIELD};
use schoolsync_engine::{time, BatchWrite, Collection, FieldFilter, RemoteDocument, WriteBatch};
use serde_json::{Map, Value};
use sqlx::{PgPool, Postgres, Row, Transaction};

/// A stored document row from the database.
#[derive(Debug)]
pub struct StoredDocument {
    pub collection: String,
    pub id: String,
    pub data: Value,
    pub updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredDocument {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredDocument {
            collection: row.try_get("collection")?,
            id: row.try_get("id")?,
            data: row.try_get("data")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl StoredDocument {
    /// Convert database row to the wire shape.
    ///
    /// Rows written without a `lastUpdated` stamp get one from `updated_at`.
    pub fn into_remote(self) -> Result<RemoteDocument> {
        let collection: Collection = self.collection.parse()?;
        let mut data = match self.data {
            Value::Object(map) => map,
            other => {
                return Err(AppError::Internal(format!(
                    "document {}/{} holds non-object data: {}",
                    self.collection, self.id, other
                )))
            }
        };
        if !data.contains_key(LAST_UPDATED_FIELD) {
            let millis = self.updated_at.timestamp_millis().max(0) as u64;
            stamp(&mut data, &time::to_iso8601(millis));
        }
        Ok(RemoteDocument::new(collection, self.id, data))
    }
}

async fn upsert(
    tx: &mut Transaction<'_, Postgres>,
    collection: Collection,
    id: &str,
    data: &Map<String, Value>,
    merge: bool,
) -> std::result::Result<(), sqlx::Error> {
    // `||` on jsonb keeps existing keys that the new object does not name.
    let sql = if merge {
        r#"
        INSERT INTO documents (collection, id, data, updated_at)
        VALUES ($1, $2, $3, NOW())
        ON CONFLICT (collection, id) DO UPDATE SET
            data = documents.data || EXCLUDED.data,
            updated_at = NOW()
        "#
    } else {
        r#"
        INSERT INTO documents (collection, id, data, updated_at)
        VALUES ($1, $2, $3, NOW())
        ON CONFLICT (collection, id) DO UPDATE SET
            data = EXCLUDED.data,
            updated_at = NOW()
        "#
    };

    sqlx::query(sql)
        .bind(collection.as_str())
        .bind(id)
        .bind(Value::Object(data.clone()))
        .execute(&mut **tx)
        .await?;

    Ok(())
}

async fn apply_write(tx: &mut Transaction<'_, Postgres>, write: &BatchWrite) -> Result<()> {
    match write {
        BatchWrite::Set {
            collection,
            id,
            data,
            merge,
        } => upsert(tx, *collection, id, data, *merge).await?,
        BatchWrite::Patch {
            collection,
            id,
            fields,
        } => {
            let result = sqlx::query(
                r#"
                UPDATE documents
                SET data = data || $3, updated_at = NOW()
                WHERE collection = $1 AND id = $2
                "#,
            )
            .bind(collection.as_str())
            .bind(id)
            .bind(Value::Object(fields.clone()))
            .execute(&mut **tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(schoolsync_engine::Error::DocumentNotFound(write.path()).into());
            }
        }
        BatchWrite::Delete { collection, id } => {
            sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
                .bind(collection.as_str())
                .bind(id)
                .execute(&mut **tx)
                .await?;
        }
    }
    Ok(())
}

/// Apply every write of a batch in one transaction.
///
/// Any failing write rolls back the whole batch.
pub async fn apply_batch(pool: &PgPool, batch: &WriteBatch) -> Result<usize> {
    let mut tx = pool.begin().await?;

    for write in &batch.writes {
        // Dropping `tx` on the error path rolls back.
        apply_write(&mut tx, write).await?;
    }

    tx.commit().await?;
    Ok(batch.len())
}

/// Full result set for a collection, optionally filtered on one field.
pub async fn list_documents(
    pool: &PgPool,
    collection: Collection,
    filter: Option<&FieldFilter>,
) -> Result<Vec<RemoteDocument>> {
    let rows = sqlx::query_as::<_, StoredDocument>(
        r#"
        SELECT collection, id, data, updated_at
        FROM documents
        WHERE collection = $1
          AND ($2::text IS NULL OR data ->> $2 = $3)
        ORDER BY id
        "#,
    )
    .bind(collection.as_str())
    .bind(filter.map(|f| f.field.as_str()))
    .bind(filter.map(|f| f.value.as_str()))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(StoredDocument::into_remote).collect()
}

/// Get a document by collection and ID.
pub async fn get_document(
    pool: &PgPool,
    collection: Collection,
    id: &str,
) -> Result<Option<RemoteDocument>> {
    let row = sqlx::query_as::<_, StoredDocument>(
        r#"
        SELECT collection, id, data, updated_at
        FROM documents
        WHERE collection = $1 AND id = $2
        "#,
    )
    .bind(collection.as_str())
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(StoredDocument::into_remote).transpose()
}

/// Delete a document. Returns whether it existed.
pub async fn delete_document(pool: &PgPool, collection: Collection, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
        .bind(collection.as_str())
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
