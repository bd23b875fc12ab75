use axum::{
    extract::{Path, State},
    Json,
};
use coordinator_engine::{
    AssignDispatchRequest, CreateDispatchRequest, ListDispatchesRequest, TakeDispatchRequest,
    UpdateDispatchRequest, UpdateDispatchStatusRequest,
};

use crate::{
    error::ApiResult,
    extract::CallerIdentity,
    response::{created, success},
    routes::AppState,
};

pub async fn list_dispatches(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Json(request): Json<ListDispatchesRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let dispatches = state.service.list_dispatches(&caller, request).await?;
    Ok(success(dispatches))
}

pub async fn create_dispatch(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Json(request): Json<CreateDispatchRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let dispatch = state.service.create_dispatch(&caller, request).await?;
    Ok(created(dispatch))
}

pub async fn update_dispatch(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Json(request): Json<UpdateDispatchRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let dispatch = state.service.update_dispatch(&caller, request).await?;
    Ok(success(dispatch))
}

pub async fn assign_dispatch(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Json(request): Json<AssignDispatchRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let dispatch = state.service.assign_dispatch(&caller, request).await?;
    Ok(success(dispatch))
}

/// 单元接受或拒绝一个或多个派遣单
pub async fn take_dispatch(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Json(request): Json<TakeDispatchRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let dispatches = state.service.take_dispatch(&caller, request).await?;
    Ok(success(dispatches))
}

pub async fn update_dispatch_status(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Json(request): Json<UpdateDispatchStatusRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let dispatch = state.service.update_dispatch_status(&caller, request).await?;
    Ok(success(dispatch))
}

pub async fn delete_dispatch(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<u64>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let deleted = state.service.delete_dispatch(&caller, id).await?;
    Ok(success(deleted))
}
