//! # Coordinator API
//!
//! 协同引擎的 HTTP 接口：RPC 方法以 JSON POST 暴露，实时流通过 SSE 推送。
//!
//! 调用者身份由上游网关通过 `x-job` 与 `x-user-id` 请求头注入。
//!
//! ## 端点
//!
//! - `GET /health`、`GET /metrics`
//! - `GET|POST /api/settings`、`POST /api/settings/take-control`
//! - `POST /api/units`、`/api/units/list`、`/api/units/members`、`/api/units/status`、`/api/units/{id}/delete`
//! - `POST /api/dispatches`、`/api/dispatches/list`、`/api/dispatches/update`、`/api/dispatches/assign`、
//!   `/api/dispatches/take`、`/api/dispatches/status`、`/api/dispatches/{id}/delete`
//! - `GET /api/stream`

pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use coordinator_config::ApiConfig;
use coordinator_engine::CoordinatorService;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower::ServiceBuilder;

use middleware::{cors_layer, request_logging, trace_layer};
use routes::{create_routes, AppState};

pub use routes::DEFAULT_METRICS_ENDPOINT;

pub use error::{ApiError, ApiResult};
pub use extract::{CallerIdentity, JOB_HEADER, USER_ID_HEADER};
pub use response::ApiResponse;

/// 创建带中间件的完整应用
pub fn create_app(
    service: Arc<CoordinatorService>,
    metrics: Option<PrometheusHandle>,
    config: &ApiConfig,
    metrics_endpoint: &str,
) -> Router {
    let state = AppState { service, metrics };

    let app = create_routes(state, metrics_endpoint).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    );

    if config.cors_enabled {
        app.layer(cors_layer(config))
    } else {
        app
    }
}
