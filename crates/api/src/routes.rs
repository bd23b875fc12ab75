use axum::{
    routing::{get, post},
    Router,
};
use coordinator_engine::CoordinatorService;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::handlers::{
    dispatches::{
        assign_dispatch, create_dispatch, delete_dispatch, list_dispatches, take_dispatch,
        update_dispatch, update_dispatch_status,
    },
    health::health_check,
    metrics::render_metrics,
    settings::{get_settings, take_control, update_settings},
    stream::stream,
    units::{assign_unit, create_or_update_unit, delete_unit, list_units, update_unit_status},
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CoordinatorService>,
    /// 未启用指标导出时为 None
    pub metrics: Option<PrometheusHandle>,
}

pub const DEFAULT_METRICS_ENDPOINT: &str = "/metrics";

/// 创建API路由
pub fn create_routes(state: AppState, metrics_endpoint: &str) -> Router {
    Router::new()
        // 健康检查与指标
        .route("/health", get(health_check))
        .route(metrics_endpoint, get(render_metrics))
        // 组织设置与调度员
        .route("/api/settings", get(get_settings).post(update_settings))
        .route("/api/settings/take-control", post(take_control))
        // 单元
        .route("/api/units", post(create_or_update_unit))
        .route("/api/units/list", post(list_units))
        .route("/api/units/members", post(assign_unit))
        .route("/api/units/status", post(update_unit_status))
        .route("/api/units/{id}/delete", post(delete_unit))
        // 派遣单
        .route("/api/dispatches", post(create_dispatch))
        .route("/api/dispatches/list", post(list_dispatches))
        .route("/api/dispatches/update", post(update_dispatch))
        .route("/api/dispatches/assign", post(assign_dispatch))
        .route("/api/dispatches/take", post(take_dispatch))
        .route("/api/dispatches/status", post(update_dispatch_status))
        .route("/api/dispatches/{id}/delete", post(delete_dispatch))
        // 实时推送
        .route("/api/stream", get(stream))
        .with_state(state)
}
