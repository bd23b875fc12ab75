use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("派遣单未找到: {job}/{id}")]
    DispatchNotFound { job: String, id: u64 },
    #[error("单元未找到: {job}/{id}")]
    UnitNotFound { job: String, id: u64 },
    #[error("组织设置未找到: {job}")]
    SettingsNotFound { job: String },
    #[error("当前调度模式不允许该操作")]
    ModeForbidsAction,
    #[error("派遣单 {id} 已结束")]
    DispatchAlreadyCompleted { id: u64 },
    #[error("用户 {user_id} 不属于单元 {unit_id}")]
    NotPartOfUnit { user_id: i32, unit_id: u64 },
    #[error("单元 {unit_id} 未分配到派遣单 {dispatch_id}")]
    NotPartOfDispatch { unit_id: u64, dispatch_id: u64 },
    #[error("用户 {user_id} 当前不在值班")]
    NotOnDuty { user_id: i32 },
    #[error("无效的参数: {0}")]
    InvalidArgument(String),
    #[error("消息总线错误: {0}")]
    MessageBus(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

impl CoordinatorError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn dispatch_not_found<S: Into<String>>(job: S, id: u64) -> Self {
        Self::DispatchNotFound { job: job.into(), id }
    }
    pub fn unit_not_found<S: Into<String>>(job: S, id: u64) -> Self {
        Self::UnitNotFound { job: job.into(), id }
    }
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Self::InvalidArgument(msg.into())
    }
    pub fn bus_error<S: Into<String>>(msg: S) -> Self {
        Self::MessageBus(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// 业务规则被违反，直接返回给调用方
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            CoordinatorError::ModeForbidsAction
                | CoordinatorError::DispatchAlreadyCompleted { .. }
                | CoordinatorError::NotPartOfUnit { .. }
                | CoordinatorError::NotPartOfDispatch { .. }
                | CoordinatorError::NotOnDuty { .. }
                | CoordinatorError::InvalidArgument(_)
        )
    }

    /// 存储失败或引用了过期/未知的ID
    pub fn is_failed_query(&self) -> bool {
        matches!(
            self,
            CoordinatorError::Database(_)
                | CoordinatorError::DatabaseOperation(_)
                | CoordinatorError::DispatchNotFound { .. }
                | CoordinatorError::UnitNotFound { .. }
                | CoordinatorError::SettingsNotFound { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CoordinatorError::DispatchNotFound { .. }
                | CoordinatorError::UnitNotFound { .. }
                | CoordinatorError::SettingsNotFound { .. }
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinatorError::Database(_)
                | CoordinatorError::DatabaseOperation(_)
                | CoordinatorError::MessageBus(_)
        )
    }

    pub fn user_message(&self) -> &str {
        match self {
            CoordinatorError::DispatchNotFound { .. } => "请求的派遣单不存在",
            CoordinatorError::UnitNotFound { .. } => "请求的单元不存在",
            CoordinatorError::SettingsNotFound { .. } => "该组织尚未配置调度中心",
            CoordinatorError::ModeForbidsAction => "当前调度模式不允许该操作",
            CoordinatorError::DispatchAlreadyCompleted { .. } => "派遣单已结束",
            CoordinatorError::NotPartOfUnit { .. } => "您不属于该单元",
            CoordinatorError::NotPartOfDispatch { .. } => "该单元未分配到此派遣单",
            CoordinatorError::NotOnDuty { .. } => "您当前不在值班",
            CoordinatorError::InvalidArgument(_) => "请求参数有误",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for CoordinatorError {
    fn from(err: serde_json::Error) -> Self {
        CoordinatorError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for CoordinatorError {
    fn from(err: anyhow::Error) -> Self {
        CoordinatorError::Internal(err.to_string())
    }
}
