use async_trait::async_trait;
use coordinator_errors::CoordinatorResult;
use tokio::sync::mpsc;

/// 总线上传输的原始消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(subject: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            subject: subject.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// 只投递给当前订阅者
    Transient,
    /// 保留每个主题的最新一条，新订阅者会先收到它
    LastValue,
}

pub type BusSubscription = mpsc::Receiver<BusMessage>;

/// 副本之间的发布/订阅通道
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, message: BusMessage, retention: Retention) -> CoordinatorResult<()>;

    /// `pattern` 支持 `*` 匹配单个段，`>` 匹配剩余全部段
    async fn subscribe(&self, pattern: &str) -> CoordinatorResult<BusSubscription>;
}

pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
