use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use uuid::Uuid;

use crate::cache::PrincipalId;
use crate::domain::items::ItemQuery;

use super::error::ApiError;
use super::models::{ItemCreateRequest, ItemUpdateRequest};
use super::state::ApiState;

pub async fn list_items(
    State(state): State<ApiState>,
    Extension(principal): Extension<PrincipalId>,
    Query(query): Query<ItemQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state.items.list_items(&principal, query).await?;
    Ok(Json(page))
}

pub async fn get_item(
    State(state): State<ApiState>,
    Extension(principal): Extension<PrincipalId>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state.items.get_item(&principal, id).await?;
    Ok(Json(item))
}

pub async fn create_item(
    State(state): State<ApiState>,
    Extension(principal): Extension<PrincipalId>,
    Json(payload): Json<ItemCreateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state
        .items
        .create_item(&principal, payload.into())
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn update_item(
    State(state): State<ApiState>,
    Extension(principal): Extension<PrincipalId>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ItemUpdateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state
        .items
        .update_item(&principal, id, payload.into())
        .await?;
    Ok(Json(item))
}

pub async fn delete_item(
    State(state): State<ApiState>,
    Extension(principal): Extension<PrincipalId>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.items.delete_item(&principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn archive_item(
    State(state): State<ApiState>,
    Extension(principal): Extension<PrincipalId>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state.items.archive_item(&principal, id).await?;
    Ok(Json(item))
}

pub async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}
