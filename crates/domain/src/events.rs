//! 副本间同步事件与消息主题
//!
//! 主题格式为 `<base>.<job>.<topic>.<type>[.<id>]`，载荷是带标签的 JSON。

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::entities::{Dispatch, DispatchStatus, Disponents, Settings, Unit, UnitStatus};
use coordinator_errors::{CoordinatorError, CoordinatorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    General,
    Dispatch,
    Unit,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::General => "general",
            Topic::Dispatch => "dispatch",
            Topic::Unit => "unit",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "general" => Some(Topic::General),
            "dispatch" => Some(Topic::Dispatch),
            "unit" => Some(Topic::Unit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Settings,
    Disponents,
    Created,
    Updated,
    Deleted,
    Status,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Settings => "settings",
            EventType::Disponents => "disponents",
            EventType::Created => "created",
            EventType::Updated => "updated",
            EventType::Deleted => "deleted",
            EventType::Status => "status",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "settings" => Some(EventType::Settings),
            "disponents" => Some(EventType::Disponents),
            "created" => Some(EventType::Created),
            "updated" => Some(EventType::Updated),
            "deleted" => Some(EventType::Deleted),
            "status" => Some(EventType::Status),
            _ => None,
        }
    }
}

/// 结构化的消息主题
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subject {
    pub job: String,
    pub topic: Topic,
    pub event_type: EventType,
    pub id: Option<u64>,
}

impl Subject {
    pub fn render(&self, base: &str) -> String {
        let mut subject = format!(
            "{}.{}.{}.{}",
            base,
            self.job,
            self.topic.as_str(),
            self.event_type.as_str()
        );
        if let Some(id) = self.id {
            subject.push('.');
            subject.push_str(&id.to_string());
        }
        subject
    }

    pub fn parse(base: &str, subject: &str) -> Option<Self> {
        let rest = subject.strip_prefix(base)?.strip_prefix('.')?;
        let mut tokens = rest.split('.');

        let job = tokens.next().filter(|t| !t.is_empty())?;
        let topic = Topic::parse(tokens.next()?)?;
        let event_type = EventType::parse(tokens.next()?)?;
        let id = match tokens.next() {
            Some(token) => Some(token.parse().ok()?),
            None => None,
        };
        if tokens.next().is_some() {
            return None;
        }

        Some(Self {
            job: job.to_string(),
            topic,
            event_type,
            id,
        })
    }

    /// 组织名会成为主题中的一个片段，不能包含分隔符、通配符或空白
    pub fn is_valid_job(job: &str) -> bool {
        !job.is_empty()
            && !job
                .chars()
                .any(|c| matches!(c, '.' | '*' | '>') || c.is_whitespace())
    }

    /// 订阅某个根前缀下的全部事件
    pub fn wildcard_all(base: &str) -> String {
        format!("{base}.>")
    }

    /// 设置与在岗调度员只需保留每个主题的最新一条
    pub fn is_last_value(&self) -> bool {
        self.topic == Topic::General
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            self.job,
            self.topic.as_str(),
            self.event_type.as_str()
        )?;
        if let Some(id) = self.id {
            write!(f, ".{id}")?;
        }
        Ok(())
    }
}

/// 在副本之间同步、并转发给实时客户端的变更事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum BusEvent {
    Settings(Settings),
    Disponents(Disponents),
    DispatchCreated(Dispatch),
    DispatchUpdated(Dispatch),
    DispatchDeleted { id: u64 },
    DispatchStatus(DispatchStatus),
    UnitCreated(Unit),
    UnitUpdated(Unit),
    UnitDeleted { id: u64 },
    UnitStatus(UnitStatus),
}

impl BusEvent {
    pub fn subject(&self, job: &str) -> Subject {
        let (topic, event_type, id) = match self {
            BusEvent::Settings(_) => (Topic::General, EventType::Settings, None),
            BusEvent::Disponents(_) => (Topic::General, EventType::Disponents, None),
            BusEvent::DispatchCreated(d) => (Topic::Dispatch, EventType::Created, Some(d.id)),
            BusEvent::DispatchUpdated(d) => (Topic::Dispatch, EventType::Updated, Some(d.id)),
            BusEvent::DispatchDeleted { id } => (Topic::Dispatch, EventType::Deleted, Some(*id)),
            BusEvent::DispatchStatus(s) => {
                (Topic::Dispatch, EventType::Status, Some(s.dispatch_id))
            }
            BusEvent::UnitCreated(u) => (Topic::Unit, EventType::Created, Some(u.id)),
            BusEvent::UnitUpdated(u) => (Topic::Unit, EventType::Updated, Some(u.id)),
            BusEvent::UnitDeleted { id } => (Topic::Unit, EventType::Deleted, Some(*id)),
            BusEvent::UnitStatus(s) => (Topic::Unit, EventType::Status, Some(s.unit_id)),
        };
        Subject {
            job: job.to_string(),
            topic,
            event_type,
            id,
        }
    }

    pub fn encode(&self) -> CoordinatorResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> CoordinatorResult<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| CoordinatorError::Serialization(format!("无法解析同步事件: {e}")))
    }

    pub fn name(&self) -> &'static str {
        match self {
            BusEvent::Settings(_) => "settings",
            BusEvent::Disponents(_) => "disponents",
            BusEvent::DispatchCreated(_) => "dispatch_created",
            BusEvent::DispatchUpdated(_) => "dispatch_updated",
            BusEvent::DispatchDeleted { .. } => "dispatch_deleted",
            BusEvent::DispatchStatus(_) => "dispatch_status",
            BusEvent::UnitCreated(_) => "unit_created",
            BusEvent::UnitUpdated(_) => "unit_updated",
            BusEvent::UnitDeleted { .. } => "unit_deleted",
            BusEvent::UnitStatus(_) => "unit_status",
        }
    }
}
