//! 从网关注入的请求头中取得调用者身份

use axum::{extract::FromRequestParts, http::request::Parts};
use coordinator_domain::events::Subject;
use coordinator_engine::Caller;

use crate::error::ApiError;

pub const JOB_HEADER: &str = "x-job";
pub const USER_ID_HEADER: &str = "x-user-id";

/// 上游网关已认证的调用者
#[derive(Debug, Clone)]
pub struct CallerIdentity(pub Caller);

fn header<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, ApiError> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::MissingIdentity(format!("缺少请求头 {}", name)))
}

impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let job = header(parts, JOB_HEADER)?;
        if !Subject::is_valid_job(job) {
            return Err(ApiError::BadRequest(format!(
                "{} 不能包含 '.'、'*'、'>' 或空白",
                JOB_HEADER
            )));
        }
        let job = job.to_string();
        let user_id = header(parts, USER_ID_HEADER)?
            .parse::<i32>()
            .map_err(|_| ApiError::BadRequest(format!("{} 必须是整数", USER_ID_HEADER)))?;

        Ok(CallerIdentity(Caller::new(job, user_id)))
    }
}
