//! 领域仓储抽象
//!
//! 持久化存储是派遣单、单元、设置的唯一事实来源，内存缓存从这里加载

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coordinator_errors::CoordinatorResult;

use crate::entities::{
    Dispatch, DispatchAssignment, DispatchStatus, Disponents, ExpiredAssignment,
    MembershipChange, Settings, Unit, UnitStatus, UserUnitMapping,
};
use crate::status::DispatchStatusKind;

/// 派遣单仓储抽象
#[async_trait]
pub trait DispatchRepository: Send + Sync {
    /// 返回的派遣单带有最新状态和当前分配
    async fn list(&self, job: &str, include_archived: bool) -> CoordinatorResult<Vec<Dispatch>>;
    async fn get(&self, job: &str, id: u64) -> CoordinatorResult<Option<Dispatch>>;
    async fn create(&self, dispatch: &Dispatch) -> CoordinatorResult<Dispatch>;
    /// 只更新描述性字段，状态与分配走各自的接口
    async fn update(&self, dispatch: &Dispatch) -> CoordinatorResult<()>;
    /// 同时删除状态记录和分配
    async fn delete(&self, job: &str, id: u64) -> CoordinatorResult<bool>;
    async fn add_status(&self, status: &DispatchStatus) -> CoordinatorResult<DispatchStatus>;

    /// 在同一事务中增删分配，返回更新后的全部分配
    async fn update_assignments(
        &self,
        job: &str,
        dispatch_id: u64,
        to_add: &[u64],
        to_remove: &[u64],
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<Vec<DispatchAssignment>>;

    /// 把提议转为确认，返回是否存在待确认的提议
    async fn accept_assignment(&self, dispatch_id: u64, unit_id: u64) -> CoordinatorResult<bool>;

    async fn list_expired_assignments(
        &self,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<Vec<ExpiredAssignment>>;

    /// 最新状态属于 `kinds`（为空表示不限）且早于 `older_than` 的派遣单
    async fn list_by_latest_status(
        &self,
        kinds: &[DispatchStatusKind],
        older_than: DateTime<Utc>,
    ) -> CoordinatorResult<Vec<Dispatch>>;
}

/// 单元仓储抽象
#[async_trait]
pub trait UnitRepository: Send + Sync {
    async fn list(&self, job: &str) -> CoordinatorResult<Vec<Unit>>;
    async fn get(&self, job: &str, id: u64) -> CoordinatorResult<Option<Unit>>;
    async fn create(&self, unit: &Unit) -> CoordinatorResult<Unit>;
    /// 更新单元资料，返回递增后的修订号
    async fn update(&self, unit: &Unit) -> CoordinatorResult<u64>;
    async fn delete(&self, job: &str, id: u64) -> CoordinatorResult<bool>;
    async fn add_status(&self, status: &UnitStatus) -> CoordinatorResult<UnitStatus>;

    /// 一个用户同一时间只属于一个单元，加入时会从原单元移出
    async fn update_members(
        &self,
        job: &str,
        unit_id: u64,
        to_add: &[i32],
        to_remove: &[i32],
        now: DateTime<Utc>,
    ) -> CoordinatorResult<MembershipChange>;

    async fn list_user_unit_mappings(&self, job: &str) -> CoordinatorResult<Vec<UserUnitMapping>>;
}

/// 组织设置与在岗调度员仓储抽象
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn get(&self, job: &str) -> CoordinatorResult<Option<Settings>>;
    async fn list(&self) -> CoordinatorResult<Vec<Settings>>;
    async fn upsert(&self, settings: &Settings) -> CoordinatorResult<()>;
    async fn get_disponents(&self, job: &str) -> CoordinatorResult<Disponents>;
    async fn set_disponents(&self, disponents: &Disponents) -> CoordinatorResult<()>;
}
