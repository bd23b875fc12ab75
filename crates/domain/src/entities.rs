use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::{DispatchStatusKind, OperatingMode, UnitStatusKind};

/// 与附近活动派遣单位置重叠
pub const ATTRIBUTE_DUPLICATE: &str = "duplicate";
/// 由自动派遣机器人分配
pub const ATTRIBUTE_AUTO_ASSIGNED: &str = "auto_assigned";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchAttributes {
    pub list: Vec<String>,
}

impl DispatchAttributes {
    pub fn has(&self, attribute: &str) -> bool {
        self.list.iter().any(|a| a == attribute)
    }

    pub fn add(&mut self, attribute: &str) -> bool {
        if self.has(attribute) {
            return false;
        }
        self.list.push(attribute.to_string());
        true
    }

    pub fn remove(&mut self, attribute: &str) -> bool {
        let before = self.list.len();
        self.list.retain(|a| a != attribute);
        before != self.list.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatch {
    pub id: u64,
    pub job: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message: String,
    pub description: Option<String>,
    pub attributes: DispatchAttributes,
    pub x: f64,
    pub y: f64,
    pub postal: Option<String>,
    pub anon: bool,
    pub creator_id: Option<i32>,
    /// 最近一条状态记录
    pub status: Option<DispatchStatus>,
    pub units: Vec<DispatchAssignment>,
}

impl Dispatch {
    pub fn new(job: impl Into<String>, message: impl Into<String>, x: f64, y: f64) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由数据库生成
            job: job.into(),
            created_at: now,
            updated_at: now,
            message: message.into(),
            description: None,
            attributes: DispatchAttributes::default(),
            x,
            y,
            postal: None,
            anon: false,
            creator_id: None,
            status: None,
            units: Vec::new(),
        }
    }

    pub fn status_kind(&self) -> Option<DispatchStatusKind> {
        self.status.as_ref().map(|s| s.status)
    }

    pub fn is_terminal(&self) -> bool {
        self.status_kind().is_some_and(DispatchStatusKind::is_terminal)
    }

    pub fn has_unit(&self, unit_id: u64) -> bool {
        self.units.iter().any(|a| a.unit_id == unit_id)
    }

    pub fn assignment(&self, unit_id: u64) -> Option<&DispatchAssignment> {
        self.units.iter().find(|a| a.unit_id == unit_id)
    }

    /// 等待自动分配：没有任何单元且状态仍处于初始阶段
    pub fn awaits_assignment(&self) -> bool {
        if !self.units.is_empty() || self.is_terminal() {
            return false;
        }
        matches!(
            self.status_kind(),
            None | Some(DispatchStatusKind::New)
                | Some(DispatchStatusKind::Unassigned)
                | Some(DispatchStatusKind::UnitUnassigned)
                | Some(DispatchStatusKind::UnitDeclined)
        )
    }

    /// 最近一次状态变化的时间，没有状态时退回创建时间
    pub fn last_status_at(&self) -> DateTime<Utc> {
        self.status
            .as_ref()
            .map(|s| s.created_at)
            .unwrap_or(self.created_at)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchStatus {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub dispatch_id: u64,
    pub unit_id: Option<u64>,
    pub status: DispatchStatusKind,
    pub reason: Option<String>,
    pub code: Option<String>,
    pub user_id: Option<i32>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub postal: Option<String>,
}

impl DispatchStatus {
    pub fn new(dispatch_id: u64, status: DispatchStatusKind, created_at: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            created_at,
            dispatch_id,
            unit_id: None,
            status,
            reason: None,
            code: None,
            user_id: None,
            x: None,
            y: None,
            postal: None,
        }
    }

    pub fn with_unit(mut self, unit_id: Option<u64>) -> Self {
        self.unit_id = unit_id;
        self
    }

    pub fn with_user(mut self, user_id: Option<i32>) -> Self {
        self.user_id = user_id;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchAssignment {
    pub dispatch_id: u64,
    pub unit_id: u64,
    pub created_at: DateTime<Utc>,
    /// 有值表示尚待确认的提议，为空表示已确认
    pub expires_at: Option<DateTime<Utc>>,
}

impl DispatchAssignment {
    pub fn is_proposal(&self) -> bool {
        self.expires_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: u64,
    pub job: String,
    pub name: String,
    pub initials: String,
    pub color: String,
    pub description: Option<String>,
    pub status: Option<UnitStatus>,
    pub users: Vec<UnitAssignment>,
    /// 资料或成员每次写入后递增，用于判断快照新旧
    #[serde(default)]
    pub revision: u64,
}

impl Unit {
    pub fn new(job: impl Into<String>, name: impl Into<String>, initials: impl Into<String>) -> Self {
        Self {
            id: 0,
            job: job.into(),
            name: name.into(),
            initials: initials.into(),
            color: "#000000".to_string(),
            description: None,
            status: None,
            users: Vec::new(),
            revision: 0,
        }
    }

    pub fn status_kind(&self) -> Option<UnitStatusKind> {
        self.status.as_ref().map(|s| s.status)
    }

    pub fn has_user(&self, user_id: i32) -> bool {
        self.users.iter().any(|u| u.user_id == user_id)
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitStatus {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub unit_id: u64,
    pub status: UnitStatusKind,
    pub reason: Option<String>,
    pub code: Option<String>,
    /// 状态涉及的用户，例如被加入或移出的成员
    pub user_id: Option<i32>,
    /// 触发该状态的操作者
    pub creator_id: Option<i32>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub postal: Option<String>,
}

impl UnitStatus {
    pub fn new(unit_id: u64, status: UnitStatusKind, created_at: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            created_at,
            unit_id,
            status,
            reason: None,
            code: None,
            user_id: None,
            creator_id: None,
            x: None,
            y: None,
            postal: None,
        }
    }

    pub fn with_user(mut self, user_id: Option<i32>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_creator(mut self, creator_id: Option<i32>) -> Self {
        self.creator_id = creator_id;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitAssignment {
    pub unit_id: u64,
    pub user_id: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUnitMapping {
    pub job: String,
    pub user_id: i32,
    pub unit_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub job: String,
    pub enabled: bool,
    pub mode: OperatingMode,
    pub fallback_mode: OperatingMode,
}

impl Settings {
    pub fn new(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            enabled: false,
            mode: OperatingMode::Manual,
            fallback_mode: OperatingMode::AutoRoundRobin,
        }
    }

    /// 根据是否有调度员在岗得出当前生效的调度模式
    pub fn effective_mode(&self, anyone_on_duty: bool) -> OperatingMode {
        if self.mode == OperatingMode::AutoRoundRobin {
            return OperatingMode::AutoRoundRobin;
        }
        if !anyone_on_duty && self.fallback_mode != OperatingMode::Unspecified {
            return self.fallback_mode;
        }
        self.mode
    }
}

/// 在岗调度员列表
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disponents {
    pub job: String,
    pub user_ids: Vec<i32>,
}

impl Disponents {
    pub fn new(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            user_ids: Vec::new(),
        }
    }

    pub fn is_on_duty(&self, user_id: i32) -> bool {
        self.user_ids.contains(&user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiredAssignment {
    pub job: String,
    pub dispatch_id: u64,
    pub unit_id: u64,
}

/// 单元成员变更的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipChange {
    pub members: Vec<UnitAssignment>,
    pub added: Vec<i32>,
    pub removed: Vec<i32>,
    /// 因加入本单元而被移出其他单元的 (unit_id, user_id)
    pub moved_from: Vec<(u64, i32)>,
    /// 写入后本单元的修订号
    pub revision: u64,
}
