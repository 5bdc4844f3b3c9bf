//! Collection queries and single-document access.

use std::collections::BTreeSet;

use schoolsync_engine::entity::validate_document_id;
use schoolsync_engine::{BatchWrite, Collection, FieldFilter, RemoteDocument, WriteBatch};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::PgPool;

use super::handle_batch;
use crate::db;
use crate::error::{AppError, Result};

/// Query parameters for a collection read.
#[derive(Debug, Default, Deserialize)]
pub struct CollectionQuery {
    pub field: Option<String>,
    pub value: Option<String>,
}

impl CollectionQuery {
    /// `field` and `value` come as a pair.
    pub fn filter(&self) -> Result<Option<FieldFilter>> {
        match (&self.field, &self.value) {
            (Some(field), Some(value)) => Ok(Some(FieldFilter::new(field, value))),
            (None, None) => Ok(None),
            _ => Err(AppError::BadRequest(
                "field and value must be given together".to_string(),
            )),
        }
    }
}

/// Response for a collection read.
#[derive(Debug, Serialize)]
pub struct CollectionResponse {
    pub collection: Collection,
    pub documents: Vec<RemoteDocument>,
}

pub fn parse_collection(raw: &str) -> Result<Collection> {
    Ok(raw.parse()?)
}

pub async fn handle_list(
    pool: &PgPool,
    collection: &str,
    query: CollectionQuery,
) -> Result<CollectionResponse> {
    let collection = parse_collection(collection)?;
    let filter = query.filter()?;
    let documents = db::list_documents(pool, collection, filter.as_ref()).await?;

    Ok(CollectionResponse {
        collection,
        documents,
    })
}

pub async fn handle_get(pool: &PgPool, collection: &str, id: &str) -> Result<RemoteDocument> {
    let collection = parse_collection(collection)?;
    validate_document_id(id)?;

    db::get_document(pool, collection, id)
        .await?
        .ok_or_else(|| AppError::NotFound(collection.path(id)))
}

/// Set-with-merge of one document.
///
/// Returns the stored document and the touched collections.
pub async fn handle_put(
    pool: &PgPool,
    collection: &str,
    id: &str,
    data: Map<String, Value>,
    max_batch_size: usize,
) -> Result<(RemoteDocument, BTreeSet<Collection>)> {
    let collection = parse_collection(collection)?;

    let mut batch = WriteBatch::new();
    batch.push(BatchWrite::Set {
        collection,
        id: id.to_string(),
        data,
        merge: true,
    });
    let (_, touched) = handle_batch(pool, batch, max_batch_size).await?;

    let stored = db::get_document(pool, collection, id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("{} vanished after write", collection.path(id))))?;
    Ok((stored, touched))
}

pub async fn handle_delete(pool: &PgPool, collection: &str, id: &str) -> Result<Collection> {
    let collection = parse_collection(collection)?;
    validate_document_id(id)?;

    if db::delete_document(pool, collection, id).await? {
        tracing::info!(path = %collection.path(id), "document deleted");
        Ok(collection)
    } else {
        Err(AppError::NotFound(collection.path(id)))
    }
}
