use axum::{
    extract::{Path, State},
    Json,
};
use coordinator_engine::{
    AssignUnitRequest, CreateOrUpdateUnitRequest, ListUnitsRequest, UpdateUnitStatusRequest,
};

use crate::{
    error::ApiResult,
    extract::CallerIdentity,
    response::{created, success},
    routes::AppState,
};

pub async fn list_units(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Json(request): Json<ListUnitsRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let units = state.service.list_units(&caller, request).await?;
    Ok(success(units))
}

/// 请求中带 id 时更新已有单元，否则新建
pub async fn create_or_update_unit(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Json(request): Json<CreateOrUpdateUnitRequest>,
) -> ApiResult<axum::response::Response> {
    use axum::response::IntoResponse;

    let is_update = request.id.is_some_and(|id| id > 0);
    let unit = state.service.create_or_update_unit(&caller, request).await?;
    if is_update {
        Ok(success(unit).into_response())
    } else {
        Ok(created(unit).into_response())
    }
}

pub async fn delete_unit(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<u64>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let deleted = state.service.delete_unit(&caller, id).await?;
    Ok(success(deleted))
}

pub async fn assign_unit(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Json(request): Json<AssignUnitRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let unit = state.service.assign_unit(&caller, request).await?;
    Ok(success(unit))
}

pub async fn update_unit_status(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Json(request): Json<UpdateUnitStatusRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let unit = state.service.update_unit_status(&caller, request).await?;
    Ok(success(unit))
}
