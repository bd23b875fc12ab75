use axum::{extract::State, Json};
use coordinator_engine::{TakeControlRequest, UpdateSettingsRequest};

use crate::{
    error::ApiResult, extract::CallerIdentity, response::success, routes::AppState,
};

pub async fn get_settings(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
) -> ApiResult<impl axum::response::IntoResponse> {
    let settings = state.service.get_settings(&caller).await?;
    Ok(success(settings))
}

pub async fn update_settings(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Json(request): Json<UpdateSettingsRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let settings = state.service.update_settings(&caller, request).await?;
    Ok(success(settings))
}

/// 调度员上岗或离岗
pub async fn take_control(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Json(request): Json<TakeControlRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let disponents = state.service.take_control(&caller, request.signon).await?;
    Ok(success(disponents))
}
