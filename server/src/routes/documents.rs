//! Document store routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use schoolsync_engine::{CommitReceipt, RemoteDocument, WriteBatch};
use serde_json::{Map, Value};

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{
    handle_batch, handle_delete, handle_get, handle_list, handle_put, publish_snapshots,
    CollectionQuery, CollectionResponse,
};
use crate::AppState;

/// Create document routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/batch", post(batch_handler))
        .route("/collections/{collection}", get(list_handler))
        .route(
            "/documents/{collection}/{id}",
            get(get_handler).put(put_handler).delete(delete_handler),
        )
}

/// POST /batch - Commit a batch of writes atomically.
async fn batch_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(batch): Json<WriteBatch>,
) -> Result<Json<CommitReceipt>> {
    let (receipt, touched) =
        handle_batch(&state.pool, batch, state.config.max_batch_size).await?;
    publish_snapshots(&state.pool, &state.conn_manager, &touched).await;
    Ok(Json(receipt))
}

/// GET /collections/{collection} - Full result set, optionally filtered.
async fn list_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(collection): Path<String>,
    Query(query): Query<CollectionQuery>,
) -> Result<Json<CollectionResponse>> {
    Ok(Json(handle_list(&state.pool, &collection, query).await?))
}

async fn get_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Json<RemoteDocument>> {
    Ok(Json(handle_get(&state.pool, &collection, &id).await?))
}

/// PUT /documents/{collection}/{id} - Merge fields into one document.
async fn put_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((collection, id)): Path<(String, String)>,
    Json(data): Json<Map<String, Value>>,
) -> Result<Json<RemoteDocument>> {
    let (stored, touched) = handle_put(
        &state.pool,
        &collection,
        &id,
        data,
        state.config.max_batch_size,
    )
    .await?;
    publish_snapshots(&state.pool, &state.conn_manager, &touched).await;
    Ok(Json(stored))
}

async fn delete_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((collection, id)): Path<(String, String)>,
) -> Result<StatusCode> {
    let collection = handle_delete(&state.pool, &collection, &id).await?;
    publish_snapshots(&state.pool, &state.conn_manager, &[collection].into()).await;
    Ok(StatusCode::NO_CONTENT)
}
