//! 派遣单与单元的状态枚举及其转换规则

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 派遣单状态，声明顺序即生命周期顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchStatusKind {
    Unspecified,
    New,
    Unassigned,
    UnitAssigned,
    UnitUnassigned,
    UnitAccepted,
    UnitDeclined,
    EnRoute,
    OnScene,
    NeedAssistance,
    Completed,
    Cancelled,
    Archived,
}

impl DispatchStatusKind {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DispatchStatusKind::Completed
                | DispatchStatusKind::Cancelled
                | DispatchStatusKind::Archived
        )
    }

    /// 由单元分配变化触发的状态
    pub fn is_assignment_driven(self) -> bool {
        matches!(
            self,
            DispatchStatusKind::Unassigned
                | DispatchStatusKind::UnitUnassigned
                | DispatchStatusKind::UnitAccepted
                | DispatchStatusKind::UnitDeclined
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DispatchStatusKind::Unspecified => "UNSPECIFIED",
            DispatchStatusKind::New => "NEW",
            DispatchStatusKind::Unassigned => "UNASSIGNED",
            DispatchStatusKind::UnitAssigned => "UNIT_ASSIGNED",
            DispatchStatusKind::UnitUnassigned => "UNIT_UNASSIGNED",
            DispatchStatusKind::UnitAccepted => "UNIT_ACCEPTED",
            DispatchStatusKind::UnitDeclined => "UNIT_DECLINED",
            DispatchStatusKind::EnRoute => "EN_ROUTE",
            DispatchStatusKind::OnScene => "ON_SCENE",
            DispatchStatusKind::NeedAssistance => "NEED_ASSISTANCE",
            DispatchStatusKind::Completed => "COMPLETED",
            DispatchStatusKind::Cancelled => "CANCELLED",
            DispatchStatusKind::Archived => "ARCHIVED",
        }
    }

    pub const TERMINAL: [DispatchStatusKind; 3] = [
        DispatchStatusKind::Completed,
        DispatchStatusKind::Cancelled,
        DispatchStatusKind::Archived,
    ];
}

impl fmt::Display for DispatchStatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DispatchStatusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "UNSPECIFIED" => DispatchStatusKind::Unspecified,
            "NEW" => DispatchStatusKind::New,
            "UNASSIGNED" => DispatchStatusKind::Unassigned,
            "UNIT_ASSIGNED" => DispatchStatusKind::UnitAssigned,
            "UNIT_UNASSIGNED" => DispatchStatusKind::UnitUnassigned,
            "UNIT_ACCEPTED" => DispatchStatusKind::UnitAccepted,
            "UNIT_DECLINED" => DispatchStatusKind::UnitDeclined,
            "EN_ROUTE" => DispatchStatusKind::EnRoute,
            "ON_SCENE" => DispatchStatusKind::OnScene,
            "NEED_ASSISTANCE" => DispatchStatusKind::NeedAssistance,
            "COMPLETED" => DispatchStatusKind::Completed,
            "CANCELLED" => DispatchStatusKind::Cancelled,
            "ARCHIVED" => DispatchStatusKind::Archived,
            other => return Err(format!("Invalid dispatch status: {other}")),
        };
        Ok(kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitStatusKind {
    Unknown,
    UserAdded,
    UserRemoved,
    Unavailable,
    Available,
    OnBreak,
    Busy,
}

impl UnitStatusKind {
    /// 稳定状态，重复写入会被抑制
    pub fn is_steady(self) -> bool {
        matches!(
            self,
            UnitStatusKind::Unavailable
                | UnitStatusKind::Available
                | UnitStatusKind::OnBreak
                | UnitStatusKind::Busy
        )
    }

    /// 需要至少一名成员才能进入的状态
    pub fn requires_members(self) -> bool {
        matches!(
            self,
            UnitStatusKind::Available | UnitStatusKind::OnBreak | UnitStatusKind::Busy
        )
    }

    pub fn is_membership_marker(self) -> bool {
        matches!(self, UnitStatusKind::UserAdded | UnitStatusKind::UserRemoved)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UnitStatusKind::Unknown => "UNKNOWN",
            UnitStatusKind::UserAdded => "USER_ADDED",
            UnitStatusKind::UserRemoved => "USER_REMOVED",
            UnitStatusKind::Unavailable => "UNAVAILABLE",
            UnitStatusKind::Available => "AVAILABLE",
            UnitStatusKind::OnBreak => "ON_BREAK",
            UnitStatusKind::Busy => "BUSY",
        }
    }
}

impl fmt::Display for UnitStatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitStatusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "UNKNOWN" => UnitStatusKind::Unknown,
            "USER_ADDED" => UnitStatusKind::UserAdded,
            "USER_REMOVED" => UnitStatusKind::UserRemoved,
            "UNAVAILABLE" => UnitStatusKind::Unavailable,
            "AVAILABLE" => UnitStatusKind::Available,
            "ON_BREAK" => UnitStatusKind::OnBreak,
            "BUSY" => UnitStatusKind::Busy,
            other => return Err(format!("Invalid unit status: {other}")),
        };
        Ok(kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatingMode {
    #[default]
    Unspecified,
    Manual,
    CentralCommand,
    AutoRoundRobin,
}

impl OperatingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            OperatingMode::Unspecified => "UNSPECIFIED",
            OperatingMode::Manual => "MANUAL",
            OperatingMode::CentralCommand => "CENTRAL_COMMAND",
            OperatingMode::AutoRoundRobin => "AUTO_ROUND_ROBIN",
        }
    }
}

impl FromStr for OperatingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mode = match s {
            "UNSPECIFIED" => OperatingMode::Unspecified,
            "MANUAL" => OperatingMode::Manual,
            "CENTRAL_COMMAND" => OperatingMode::CentralCommand,
            "AUTO_ROUND_ROBIN" => OperatingMode::AutoRoundRobin,
            other => return Err(format!("Invalid operating mode: {other}")),
        };
        Ok(mode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionDecision {
    Apply,
    Suppress,
}

/// 判断派遣单能否从 `current` 转换到 `next`
pub fn evaluate_dispatch_transition(
    current: Option<DispatchStatusKind>,
    next: DispatchStatusKind,
) -> TransitionDecision {
    let Some(current) = current else {
        return TransitionDecision::Apply;
    };

    if current.is_terminal() {
        // 终态之后只允许归档一次
        if next == DispatchStatusKind::Archived && current != DispatchStatusKind::Archived {
            return TransitionDecision::Apply;
        }
        return TransitionDecision::Suppress;
    }

    if current == next
        && matches!(
            next,
            DispatchStatusKind::New | DispatchStatusKind::Unassigned
        )
    {
        return TransitionDecision::Suppress;
    }

    TransitionDecision::Apply
}

/// 计算单元实际要写入的状态，返回 `None` 表示无需写入
pub fn resolve_unit_transition(
    current: Option<UnitStatusKind>,
    next: UnitStatusKind,
    member_count: usize,
) -> Option<UnitStatusKind> {
    let target = if member_count == 0 && next.requires_members() {
        UnitStatusKind::Unavailable
    } else {
        next
    };

    if target.is_steady() && current == Some(target) {
        return None;
    }

    Some(target)
}
