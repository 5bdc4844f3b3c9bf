//! Batch handler - applies a client's queued writes.

use std::collections::BTreeSet;

use chrono::Utc;
use schoolsync_engine::remote::{stamp, LAST_UPDATED_FIELD, SYNCED, SYNC_STATUS_FIELD};
use schoolsync_engine::{time, BatchWrite, Collection, CommitReceipt, WriteBatch};
use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::db;
use crate::error::{AppError, Result};

/// Make sure a write carries both stamps. Client stamps are kept.
fn ensure_stamped(fields: &mut Map<String, Value>, now: &str) {
    if fields.contains_key(LAST_UPDATED_FIELD) {
        fields.insert(
            SYNC_STATUS_FIELD.to_string(),
            Value::String(SYNCED.to_string()),
        );
    } else {
        stamp(fields, now);
    }
}

/// Reject what the database should never see.
pub fn prepare_batch(mut batch: WriteBatch, max_batch_size: usize, now: &str) -> Result<WriteBatch> {
    if batch.len() > max_batch_size {
        return Err(AppError::BadRequest(format!(
            "batch of {} writes exceeds the limit of {}",
            batch.len(),
            max_batch_size
        )));
    }

    for write in &mut batch.writes {
        write.validate()?;
        match write {
            BatchWrite::Set { data, .. } => ensure_stamped(data, now),
            BatchWrite::Patch { fields, .. } => ensure_stamped(fields, now),
            BatchWrite::Delete { .. } => {}
        }
    }

    Ok(batch)
}

/// Validate, stamp and commit a batch in one transaction.
///
/// Returns the receipt and the collections the batch touched.
pub async fn handle_batch(
    pool: &PgPool,
    batch: WriteBatch,
    max_batch_size: usize,
) -> Result<(CommitReceipt, BTreeSet<Collection>)> {
    let now = time::to_iso8601(Utc::now().timestamp_millis().max(0) as u64);
    let batch = prepare_batch(batch, max_batch_size, &now)?;

    if batch.is_empty() {
        return Ok((
            CommitReceipt {
                committed: 0,
                committed_at: now,
            },
            BTreeSet::new(),
        ));
    }

    let committed = db::apply_batch(pool, &batch).await?;
    tracing::info!(committed, collections = ?batch.collections(), "batch committed");

    Ok((
        CommitReceipt {
            committed,
            committed_at: now,
        },
        batch.collections(),
    ))
}
