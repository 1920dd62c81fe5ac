//! Read-only catalog endpoints over the content store.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};

use grandguru_storage::{ProductRecord, SearchResult};

use crate::AppState;
use crate::error::AppError;

const DEFAULT_PAGE: u32 = 50;
const MAX_PAGE: u32 = 200;
const DEFAULT_SEARCH_LIMIT: u32 = 10;

#[derive(Debug, Deserialize)]
pub(crate) struct ListParams {
    limit: Option<u32>,
    offset: Option<u32>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ProductList {
    items: Vec<ProductRecord>,
    total: u64,
}

/// `GET /products`
pub(crate) async fn list_products(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ProductList>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let (items, total) = state
        .storage
        .list_products(limit, params.offset.unwrap_or(0))
        .await?;
    Ok(Json(ProductList { items, total }))
}

/// `GET /products/{id}`
pub(crate) async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ProductRecord>, AppError> {
    state
        .storage
        .get_product(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("product not found: {id}")))
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchParams {
    #[serde(default)]
    q: String,
    limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SearchResponse {
    query: String,
    results: Vec<SearchResult>,
}

/// `GET /search?q=&limit=`
pub(crate) async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    let query = params.q.trim();
    if query.is_empty() {
        return Err(AppError::bad_request("q must not be empty"));
    }
    let limit = params
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .clamp(1, MAX_PAGE);
    let results = state.storage.search_documents(query, limit).await?;
    Ok(Json(SearchResponse {
        query: query.to_string(),
        results,
    }))
}

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// `GET /health`
pub(crate) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
