//! Test data builders for creating test entities
//!
//! 带合理默认值的构建器，便于在测试中快速构造数据

use chrono::{DateTime, Utc};
use coordinator_domain::entities::{
    Dispatch, DispatchAssignment, DispatchAttributes, DispatchStatus, Settings, Unit,
    UnitAssignment, UnitStatus,
};
use coordinator_domain::status::{DispatchStatusKind, OperatingMode, UnitStatusKind};

/// Builder for creating test Dispatch entities
pub struct DispatchBuilder {
    dispatch: Dispatch,
}

impl DispatchBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            dispatch: Dispatch {
                id: 1,
                job: "ambulance".to_string(),
                created_at: now,
                updated_at: now,
                message: "Verletzte Person".to_string(),
                description: None,
                attributes: DispatchAttributes::default(),
                x: 100.0,
                y: 200.0,
                postal: Some("8020".to_string()),
                anon: false,
                creator_id: Some(1),
                status: None,
                units: vec![],
            },
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.dispatch.id = id;
        if let Some(status) = self.dispatch.status.as_mut() {
            status.dispatch_id = id;
        }
        for unit in self.dispatch.units.iter_mut() {
            unit.dispatch_id = id;
        }
        self
    }

    pub fn with_job(mut self, job: &str) -> Self {
        self.dispatch.job = job.to_string();
        self
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.dispatch.message = message.to_string();
        self
    }

    pub fn with_location(mut self, x: f64, y: f64) -> Self {
        self.dispatch.x = x;
        self.dispatch.y = y;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.dispatch.created_at = created_at;
        self.dispatch.updated_at = created_at;
        self
    }

    /// 设置最新状态，状态id默认为1
    pub fn with_status(self, kind: DispatchStatusKind, created_at: DateTime<Utc>) -> Self {
        self.with_status_id(1, kind, created_at)
    }

    pub fn with_status_id(
        mut self,
        status_id: u64,
        kind: DispatchStatusKind,
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut status = DispatchStatus::new(self.dispatch.id, kind, created_at);
        status.id = status_id;
        self.dispatch.status = Some(status);
        self
    }

    /// 已确认的分配
    pub fn with_unit(mut self, unit_id: u64) -> Self {
        self.dispatch.units.push(DispatchAssignment {
            dispatch_id: self.dispatch.id,
            unit_id,
            created_at: self.dispatch.created_at,
            expires_at: None,
        });
        self
    }

    /// 带过期时间的提议
    pub fn with_proposal(mut self, unit_id: u64, expires_at: DateTime<Utc>) -> Self {
        self.dispatch.units.push(DispatchAssignment {
            dispatch_id: self.dispatch.id,
            unit_id,
            created_at: self.dispatch.created_at,
            expires_at: Some(expires_at),
        });
        self
    }

    pub fn with_attribute(mut self, attribute: &str) -> Self {
        self.dispatch.attributes.add(attribute);
        self
    }

    pub fn build(self) -> Dispatch {
        self.dispatch
    }
}

impl Default for DispatchBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test Unit entities
pub struct UnitBuilder {
    unit: Unit,
}

impl UnitBuilder {
    pub fn new() -> Self {
        Self {
            unit: Unit {
                id: 1,
                job: "ambulance".to_string(),
                name: "Rettungswagen 1".to_string(),
                initials: "RTW1".to_string(),
                color: "#ff0000".to_string(),
                description: None,
                status: None,
                users: vec![],
                revision: 0,
            },
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.unit.id = id;
        if let Some(status) = self.unit.status.as_mut() {
            status.unit_id = id;
        }
        for user in self.unit.users.iter_mut() {
            user.unit_id = id;
        }
        self
    }

    pub fn with_job(mut self, job: &str) -> Self {
        self.unit.job = job.to_string();
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.unit.name = name.to_string();
        self
    }

    pub fn with_status(mut self, kind: UnitStatusKind) -> Self {
        let mut status = UnitStatus::new(self.unit.id, kind, Utc::now());
        status.id = 1;
        self.unit.status = Some(status);
        self
    }

    pub fn with_revision(mut self, revision: u64) -> Self {
        self.unit.revision = revision;
        self
    }

    pub fn with_user(mut self, user_id: i32) -> Self {
        self.unit.users.push(UnitAssignment {
            unit_id: self.unit.id,
            user_id,
            created_at: Utc::now(),
        });
        self
    }

    pub fn build(self) -> Unit {
        self.unit
    }
}

impl Default for UnitBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test Settings
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    pub fn new() -> Self {
        Self {
            settings: Settings {
                job: "ambulance".to_string(),
                enabled: true,
                mode: OperatingMode::Manual,
                fallback_mode: OperatingMode::Unspecified,
            },
        }
    }

    pub fn with_job(mut self, job: &str) -> Self {
        self.settings.job = job.to_string();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.settings.enabled = enabled;
        self
    }

    pub fn with_mode(mut self, mode: OperatingMode) -> Self {
        self.settings.mode = mode;
        self
    }

    pub fn with_fallback_mode(mut self, mode: OperatingMode) -> Self {
        self.settings.fallback_mode = mode;
        self
    }

    pub fn build(self) -> Settings {
        self.settings
    }
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
