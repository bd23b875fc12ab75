use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use coordinator_errors::CoordinatorError;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("协同引擎错误: {0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("缺少调用者身份: {0}")]
    MissingIdentity(String),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源")]
    NotFound,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Coordinator(e) if e.is_invalid_argument() => StatusCode::BAD_REQUEST,
            ApiError::Coordinator(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            ApiError::Coordinator(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::MissingIdentity(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::Coordinator(CoordinatorError::ModeForbidsAction) => "MODE_FORBIDS_ACTION",
            ApiError::Coordinator(CoordinatorError::DispatchAlreadyCompleted { .. }) => {
                "DISPATCH_ALREADY_COMPLETED"
            }
            ApiError::Coordinator(CoordinatorError::NotPartOfUnit { .. }) => "NOT_PART_OF_UNIT",
            ApiError::Coordinator(CoordinatorError::NotPartOfDispatch { .. }) => {
                "NOT_PART_OF_DISPATCH"
            }
            ApiError::Coordinator(CoordinatorError::NotOnDuty { .. }) => "NOT_ON_DUTY",
            ApiError::Coordinator(CoordinatorError::DispatchNotFound { .. }) => "DISPATCH_NOT_FOUND",
            ApiError::Coordinator(CoordinatorError::UnitNotFound { .. }) => "UNIT_NOT_FOUND",
            ApiError::Coordinator(e) if e.is_invalid_argument() => "INVALID_ARGUMENT",
            ApiError::Coordinator(e) if e.is_not_found() => "NOT_FOUND",
            ApiError::Coordinator(_) => "INTERNAL_ERROR",
            ApiError::MissingIdentity(_) => "MISSING_IDENTITY",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::NotFound => "NOT_FOUND",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // 内部错误只记录日志，不把细节返回给调用方
        let message = match &self {
            ApiError::Coordinator(e) if status == StatusCode::INTERNAL_SERVER_ERROR => {
                error!(error = %e, "请求处理失败");
                e.user_message().to_string()
            }
            ApiError::Coordinator(e) => e.to_string(),
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": self.error_type(),
                "code": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
