//! HTTP route handlers for the vector table API.

use crate::centroid::{Centroid, RebalanceReport};
use crate::error::VectorTableError;
use crate::search::SearchResult;
use crate::server::AppState;
use crate::similarity::Operand;
use crate::store::{BackingStore, RowId};
use crate::table::Record;
use crate::vector::Vector;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

// --- Request/Response types ---

#[derive(Deserialize)]
pub struct InsertRequest {
    pub vector: Vec<f64>,
    pub id: Option<RowId>,
}

#[derive(Deserialize)]
pub struct BatchInsertRequest {
    pub vectors: Vec<Vec<f64>>,
}

#[derive(Deserialize)]
pub struct SearchRequest {
    pub vector: Vec<f64>,
    pub k: Option<usize>,
}

/// Either a stored id or a literal vector.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum OperandBody {
    Id(RowId),
    Vector(Vec<f64>),
}

impl From<OperandBody> for Operand {
    fn from(body: OperandBody) -> Self {
        match body {
            OperandBody::Id(id) => Operand::ById(id),
            OperandBody::Vector(values) => Operand::ByVector(Vector::new(values)),
        }
    }
}

#[derive(Deserialize, Clone, Copy, Default)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Dot,
    Cosine,
}

#[derive(Deserialize)]
pub struct SimilarityRequest {
    pub a: OperandBody,
    pub b: OperandBody,
    #[serde(default)]
    pub metric: Metric,
}

#[derive(Serialize)]
pub struct SimilarityResponse {
    pub value: f64,
}

#[derive(Serialize)]
pub struct InsertResponse {
    pub ids: Vec<RowId>,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub id: RowId,
    pub deleted: bool,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub table: String,
    pub dimension: usize,
    pub vector_count: usize,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A table error rendered as a JSON response.
pub struct ApiError(VectorTableError);

impl From<VectorTableError> for ApiError {
    fn from(err: VectorTableError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            VectorTableError::NotFound { .. } => StatusCode::NOT_FOUND,
            VectorTableError::DimensionMismatch { .. }
            | VectorTableError::InvalidVector { .. }
            | VectorTableError::DuplicateId { .. } => StatusCode::BAD_REQUEST,
            VectorTableError::ConcurrencyConflict { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!("request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// --- Router ---

pub fn create_router<S: BackingStore + Send + Sync + 'static>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/vectors", post(insert_vector::<S>).get(list_vectors::<S>))
        .route("/vectors/batch", post(insert_batch::<S>))
        .route("/vectors/:id", get(get_vector::<S>).delete(delete_vector::<S>))
        .route("/search", post(search_vectors::<S>))
        .route("/similarity", post(similarity::<S>))
        .route("/centroids", get(list_centroids::<S>))
        .route("/rebalance", post(rebalance::<S>))
        .route("/health", get(health::<S>))
        .with_state(state)
}

// --- Handlers ---

async fn insert_vector<S: BackingStore + Send + Sync + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<InsertRequest>,
) -> ApiResult<(StatusCode, Json<InsertResponse>)> {
    let id = state
        .table
        .upsert(&state.store, &Vector::new(req.vector), req.id)?;
    Ok((StatusCode::CREATED, Json(InsertResponse { ids: vec![id] })))
}

async fn insert_batch<S: BackingStore + Send + Sync + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<BatchInsertRequest>,
) -> ApiResult<(StatusCode, Json<InsertResponse>)> {
    let vectors: Vec<Vector> = req.vectors.into_iter().map(Vector::new).collect();
    let ids = state.table.upsert_batch(&state.store, &vectors)?;
    Ok((StatusCode::CREATED, Json(InsertResponse { ids })))
}

async fn get_vector<S: BackingStore + Send + Sync + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<RowId>,
) -> ApiResult<Json<Record>> {
    let values = state
        .table
        .select(&state.store, &[id])?
        .remove(&id)
        .ok_or(VectorTableError::NotFound { id })?;
    Ok(Json(Record { id, values }))
}

async fn delete_vector<S: BackingStore + Send + Sync + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<RowId>,
) -> ApiResult<Json<DeleteResponse>> {
    let deleted = state.table.delete(&state.store, id)?;
    Ok(Json(DeleteResponse { id, deleted }))
}

async fn list_vectors<S: BackingStore + Send + Sync + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> ApiResult<Json<Vec<Record>>> {
    let records = state
        .table
        .select_all(&state.store)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(records))
}

async fn search_vectors<S: BackingStore + Send + Sync + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<SearchRequest>,
) -> ApiResult<Json<Vec<SearchResult>>> {
    let query = Vector::new(req.vector);
    let results = state
        .table
        .search(&state.store, &query, req.k.unwrap_or(10))?;
    Ok(Json(results))
}

async fn similarity<S: BackingStore + Send + Sync + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<SimilarityRequest>,
) -> ApiResult<Json<SimilarityResponse>> {
    let value = match req.metric {
        Metric::Dot => state.table.dot(&state.store, req.a, req.b)?,
        Metric::Cosine => state.table.cosine(&state.store, req.a, req.b)?,
    };
    Ok(Json(SimilarityResponse { value }))
}

async fn list_centroids<S: BackingStore + Send + Sync + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> ApiResult<Json<Vec<Centroid>>> {
    Ok(Json(state.table.centroids(&state.store)?))
}

async fn rebalance<S: BackingStore + Send + Sync + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> ApiResult<Json<RebalanceReport>> {
    Ok(Json(state.table.rebalance(&state.store)?))
}

async fn health<S: BackingStore + Send + Sync + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> ApiResult<Json<HealthResponse>> {
    let vector_count = state.table.count(&state.store)?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        table: state.table.config().name.clone(),
        dimension: state.table.dimension(),
        vector_count,
    }))
}
