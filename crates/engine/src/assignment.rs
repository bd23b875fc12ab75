//! 派遣单与单元的分配生命周期
//!
//! 所有写操作先落库，再更新本地缓存，最后异步广播给其他副本。
//! 状态变更经过 [`evaluate_dispatch_transition`] 和 [`resolve_unit_transition`]，
//! 被规则抑制的状态不会写入。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use coordinator_domain::clock::Clock;
use coordinator_domain::entities::{Dispatch, DispatchStatus, Settings, Unit, UnitStatus};
use coordinator_domain::events::BusEvent;
use coordinator_domain::repositories::{DispatchRepository, UnitRepository};
use coordinator_domain::status::{
    evaluate_dispatch_transition, resolve_unit_transition, DispatchStatusKind, OperatingMode,
    TransitionDecision, UnitStatusKind,
};
use coordinator_errors::{CoordinatorError, CoordinatorResult};
use coordinator_infrastructure::MetricsCollector;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::locks::KeyedLocks;
use crate::state::StateCache;
use crate::sync::{EventPublisher, StateLoader};

/// 单元对派遣单的答复
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TakeDispatchResponse {
    Accepted,
    Declined,
}

pub struct AssignmentEngine {
    dispatches: Arc<dyn DispatchRepository>,
    units: Arc<dyn UnitRepository>,
    cache: Arc<StateCache>,
    loader: Arc<StateLoader>,
    publisher: Arc<EventPublisher>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
    dispatch_locks: KeyedLocks,
    unit_locks: KeyedLocks,
}

impl AssignmentEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dispatches: Arc<dyn DispatchRepository>,
        units: Arc<dyn UnitRepository>,
        cache: Arc<StateCache>,
        loader: Arc<StateLoader>,
        publisher: Arc<EventPublisher>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            dispatches,
            units,
            cache,
            loader,
            publisher,
            clock,
            metrics,
            dispatch_locks: KeyedLocks::new(),
            unit_locks: KeyedLocks::new(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// 根据设置和在岗调度员得出当前生效的模式
    pub fn effective_mode(&self, job: &str) -> OperatingMode {
        let settings = self
            .cache
            .get_settings(job)
            .unwrap_or_else(|| Settings::new(job));
        let anyone_on_duty = !self.cache.get_disponents(job).user_ids.is_empty();
        settings.effective_mode(anyone_on_duty)
    }

    async fn load_dispatch(&self, job: &str, id: u64) -> CoordinatorResult<Dispatch> {
        if let Some(dispatch) = self.cache.get_dispatch(job, id) {
            return Ok(dispatch);
        }
        self.loader
            .reload_dispatch(job, id)
            .await?
            .ok_or_else(|| CoordinatorError::dispatch_not_found(job, id))
    }

    async fn load_unit(&self, job: &str, id: u64) -> CoordinatorResult<Unit> {
        if let Some(unit) = self.cache.get_unit(job, id) {
            return Ok(unit);
        }
        self.loader
            .reload_unit(job, id)
            .await?
            .ok_or_else(|| CoordinatorError::unit_not_found(job, id))
    }

    /// 追加一条派遣单状态，被状态机抑制时返回 None
    async fn append_dispatch_status(
        &self,
        dispatch: &mut Dispatch,
        mut status: DispatchStatus,
    ) -> CoordinatorResult<Option<DispatchStatus>> {
        if evaluate_dispatch_transition(dispatch.status_kind(), status.status)
            == TransitionDecision::Suppress
        {
            debug!(
                dispatch_id = dispatch.id,
                current = ?dispatch.status_kind(),
                next = %status.status,
                "派遣单状态变更被抑制"
            );
            return Ok(None);
        }

        status.dispatch_id = dispatch.id;
        status.created_at = self.clock.now();
        let stored = self.dispatches.add_status(&status).await?;

        dispatch.status = Some(stored.clone());
        dispatch.updated_at = stored.created_at;
        self.publisher
            .publish(&dispatch.job, BusEvent::DispatchStatus(stored.clone()));
        Ok(Some(stored))
    }

    /// 追加一条单元状态，重复的稳定状态返回 None
    async fn append_unit_status(
        &self,
        unit: &mut Unit,
        mut status: UnitStatus,
    ) -> CoordinatorResult<Option<UnitStatus>> {
        let Some(target) =
            resolve_unit_transition(unit.status_kind(), status.status, unit.users.len())
        else {
            debug!(unit_id = unit.id, status = %status.status, "单元状态未变化");
            return Ok(None);
        };

        status.unit_id = unit.id;
        status.status = target;
        status.created_at = self.clock.now();
        let stored = self.units.add_status(&status).await?;

        unit.status = Some(stored.clone());
        self.publisher
            .publish(&unit.job, BusEvent::UnitStatus(stored.clone()));
        Ok(Some(stored))
    }

    fn store_dispatch(&self, dispatch: &Dispatch) {
        if dispatch.status_kind() == Some(DispatchStatusKind::Archived) {
            self.cache.remove_dispatch(&dispatch.job, dispatch.id);
        } else {
            self.cache.put_dispatch(dispatch.clone());
        }
        self.publisher
            .publish(&dispatch.job, BusEvent::DispatchUpdated(dispatch.clone()));
    }

    // ---- 派遣单 ----

    /// 新建派遣单并写入初始状态
    #[instrument(skip(self, dispatch), fields(job = %dispatch.job))]
    pub async fn create_dispatch(&self, dispatch: Dispatch) -> CoordinatorResult<Dispatch> {
        let mut created = self.dispatches.create(&dispatch).await?;
        let _guard = self.dispatch_locks.lock(created.id).await;

        self.cache.put_dispatch(created.clone());
        self.publisher
            .publish(&created.job, BusEvent::DispatchCreated(created.clone()));

        let initial = DispatchStatus::new(created.id, DispatchStatusKind::New, self.clock.now())
            .with_user(created.creator_id);
        self.append_dispatch_status(&mut created, initial).await?;
        self.cache.put_dispatch(created.clone());

        info!(dispatch_id = created.id, "派遣单已创建");
        Ok(created)
    }

    /// 修改派遣单的描述性字段
    pub async fn update_dispatch_with<F>(&self, job: &str, dispatch_id: u64, apply: F) -> CoordinatorResult<Dispatch>
    where
        F: FnOnce(&mut Dispatch) + Send,
    {
        let _guard = self.dispatch_locks.lock(dispatch_id).await;
        let mut dispatch = self.load_dispatch(job, dispatch_id).await?;

        apply(&mut dispatch);
        dispatch.id = dispatch_id;
        dispatch.job = job.to_string();
        dispatch.updated_at = self.clock.now();

        self.dispatches.update(&dispatch).await?;
        self.store_dispatch(&dispatch);
        Ok(dispatch)
    }

    /// 为派遣单增删单元
    ///
    /// `expires_at` 为空时新增的是确认分配，否则是等待单元答复的提议。
    /// 已在派遣单上的单元不会重复添加；派遣单失去全部单元时回到 Unassigned。
    #[instrument(skip(self, to_add, to_remove))]
    pub async fn assign_units(
        &self,
        job: &str,
        dispatch_id: u64,
        to_add: &[u64],
        to_remove: &[u64],
        expires_at: Option<DateTime<Utc>>,
        actor: Option<i32>,
    ) -> CoordinatorResult<Dispatch> {
        let _guard = self.dispatch_locks.lock(dispatch_id).await;
        let mut dispatch = self.load_dispatch(job, dispatch_id).await?;

        let mut added: Vec<u64> = Vec::new();
        for unit_id in to_add {
            if dispatch.has_unit(*unit_id) || added.contains(unit_id) || to_remove.contains(unit_id) {
                continue;
            }
            self.load_unit(job, *unit_id).await?;
            added.push(*unit_id);
        }
        let mut removed: Vec<u64> = Vec::new();
        for unit_id in to_remove {
            if dispatch.has_unit(*unit_id) && !removed.contains(unit_id) {
                removed.push(*unit_id);
            }
        }

        if added.is_empty() && removed.is_empty() {
            return Ok(dispatch);
        }
        if !added.is_empty() && dispatch.is_terminal() {
            return Err(CoordinatorError::DispatchAlreadyCompleted { id: dispatch_id });
        }

        let now = self.clock.now();
        dispatch.units = self
            .dispatches
            .update_assignments(job, dispatch_id, &added, &removed, expires_at, now)
            .await?;
        dispatch.updated_at = now;
        self.metrics.record_assignment_change(added.len(), removed.len());

        for unit_id in &added {
            let status = DispatchStatus::new(dispatch_id, DispatchStatusKind::UnitAssigned, now)
                .with_unit(Some(*unit_id))
                .with_user(actor);
            self.append_dispatch_status(&mut dispatch, status).await?;
        }
        for unit_id in &removed {
            let status = DispatchStatus::new(dispatch_id, DispatchStatusKind::UnitUnassigned, now)
                .with_unit(Some(*unit_id))
                .with_user(actor);
            self.append_dispatch_status(&mut dispatch, status).await?;
        }
        if dispatch.units.is_empty() && !dispatch.is_terminal() {
            let status = DispatchStatus::new(dispatch_id, DispatchStatusKind::Unassigned, now)
                .with_user(actor);
            self.append_dispatch_status(&mut dispatch, status).await?;
        }

        self.store_dispatch(&dispatch);
        info!(
            job,
            dispatch_id,
            added = ?added,
            removed = ?removed,
            proposal = expires_at.is_some(),
            "派遣单分配已更新"
        );
        Ok(dispatch)
    }

    /// 直接删除分配行，用于已不在缓存中的派遣单（例如已归档）
    pub async fn purge_assignments(&self, job: &str, dispatch_id: u64, unit_ids: &[u64]) -> CoordinatorResult<()> {
        let _guard = self.dispatch_locks.lock(dispatch_id).await;
        self.dispatches
            .update_assignments(job, dispatch_id, &[], unit_ids, None, self.clock.now())
            .await?;
        Ok(())
    }

    /// 单元接受或拒绝一组派遣单
    #[instrument(skip(self, dispatch_ids))]
    pub async fn take_dispatch(
        &self,
        job: &str,
        unit_id: u64,
        response: TakeDispatchResponse,
        dispatch_ids: &[u64],
        user_id: Option<i32>,
    ) -> CoordinatorResult<Vec<Dispatch>> {
        let _unit_guard = self.unit_locks.lock(unit_id).await;
        let mut unit = self.load_unit(job, unit_id).await?;
        if let Some(user_id) = user_id {
            if !unit.has_user(user_id) {
                return Err(CoordinatorError::NotPartOfUnit { user_id, unit_id });
            }
        }

        let mode = self.effective_mode(job);
        let mut taken = Vec::with_capacity(dispatch_ids.len());

        let mut outcome = Ok(());
        for dispatch_id in dispatch_ids {
            match self
                .take_one(job, &mut unit, response, *dispatch_id, user_id, mode)
                .await
            {
                Ok(dispatch) => taken.push(dispatch),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        // 之前的派遣单可能已把单元置为 Busy，出错时也要写回缓存
        self.cache.put_unit(unit);
        outcome.map(|()| taken)
    }

    async fn take_one(
        &self,
        job: &str,
        unit: &mut Unit,
        response: TakeDispatchResponse,
        dispatch_id: u64,
        user_id: Option<i32>,
        mode: OperatingMode,
    ) -> CoordinatorResult<Dispatch> {
        let unit_id = unit.id;
        let _guard = self.dispatch_locks.lock(dispatch_id).await;
        let mut dispatch = self.load_dispatch(job, dispatch_id).await?;
        let existing = dispatch.assignment(unit_id).cloned();

        if mode == OperatingMode::CentralCommand && existing.is_none() {
            return Err(CoordinatorError::ModeForbidsAction);
        }
        if dispatch.is_terminal() {
            return Err(CoordinatorError::DispatchAlreadyCompleted { id: dispatch_id });
        }

        let now = self.clock.now();
        match response {
            TakeDispatchResponse::Accepted => {
                let first_confirmation = match &existing {
                    None => {
                        dispatch.units = self
                            .dispatches
                            .update_assignments(job, dispatch_id, &[unit_id], &[], None, now)
                            .await?;
                        self.metrics.record_assignment_change(1, 0);
                        true
                    }
                    Some(assignment) if assignment.is_proposal() => {
                        if assignment.is_expired(now)
                            || !self.dispatches.accept_assignment(dispatch_id, unit_id).await?
                        {
                            return Err(CoordinatorError::NotPartOfDispatch {
                                unit_id,
                                dispatch_id,
                            });
                        }
                        for assignment in dispatch.units.iter_mut() {
                            if assignment.unit_id == unit_id {
                                assignment.expires_at = None;
                            }
                        }
                        true
                    }
                    Some(_) => false,
                };

                let status = DispatchStatus::new(dispatch_id, DispatchStatusKind::UnitAccepted, now)
                    .with_unit(Some(unit_id))
                    .with_user(user_id);
                self.append_dispatch_status(&mut dispatch, status).await?;

                if first_confirmation {
                    let busy = UnitStatus::new(unit_id, UnitStatusKind::Busy, now)
                        .with_user(user_id)
                        .with_creator(user_id);
                    self.append_unit_status(unit, busy).await?;
                }
            }
            TakeDispatchResponse::Declined => {
                if existing.is_none() {
                    return Err(CoordinatorError::NotPartOfDispatch { unit_id, dispatch_id });
                }
                dispatch.units = self
                    .dispatches
                    .update_assignments(job, dispatch_id, &[], &[unit_id], None, now)
                    .await?;
                self.metrics.record_assignment_change(0, 1);

                let status = DispatchStatus::new(dispatch_id, DispatchStatusKind::UnitDeclined, now)
                    .with_unit(Some(unit_id))
                    .with_user(user_id);
                self.append_dispatch_status(&mut dispatch, status).await?;
                if dispatch.units.is_empty() && !dispatch.is_terminal() {
                    let status = DispatchStatus::new(dispatch_id, DispatchStatusKind::Unassigned, now)
                        .with_user(user_id);
                    self.append_dispatch_status(&mut dispatch, status).await?;
                }
            }
        }

        dispatch.updated_at = now;
        self.store_dispatch(&dispatch);
        info!(job, dispatch_id, unit_id, response = ?response, "单元已答复派遣单");
        Ok(dispatch)
    }

    /// 写入一条派遣单状态；带单元时该单元必须在派遣单上
    #[instrument(skip(self, status), fields(dispatch_id = status.dispatch_id, status = %status.status))]
    pub async fn update_dispatch_status(&self, job: &str, status: DispatchStatus) -> CoordinatorResult<Dispatch> {
        let dispatch_id = status.dispatch_id;
        let _guard = self.dispatch_locks.lock(dispatch_id).await;
        let mut dispatch = self.load_dispatch(job, dispatch_id).await?;

        if let Some(unit_id) = status.unit_id {
            if !dispatch.has_unit(unit_id) {
                return Err(CoordinatorError::NotPartOfDispatch { unit_id, dispatch_id });
            }
        }

        if self.append_dispatch_status(&mut dispatch, status).await?.is_some() {
            if dispatch.status_kind() == Some(DispatchStatusKind::Archived) {
                self.cache.remove_dispatch(job, dispatch_id);
            } else {
                self.cache.put_dispatch(dispatch.clone());
            }
        }
        Ok(dispatch)
    }

    /// 彻底删除派遣单及其状态和分配
    pub async fn delete_dispatch(&self, job: &str, dispatch_id: u64) -> CoordinatorResult<bool> {
        let deleted = {
            let _guard = self.dispatch_locks.lock(dispatch_id).await;
            let deleted = self.dispatches.delete(job, dispatch_id).await?;
            self.cache.remove_dispatch(job, dispatch_id);
            if deleted {
                self.publisher
                    .publish(job, BusEvent::DispatchDeleted { id: dispatch_id });
            }
            deleted
        };
        self.dispatch_locks.forget(dispatch_id);
        Ok(deleted)
    }

    // ---- 单元 ----

    /// 新建单元，没有成员的单元从 Unavailable 开始
    #[instrument(skip(self, unit), fields(job = %unit.job, name = %unit.name))]
    pub async fn create_unit(&self, unit: Unit, actor: Option<i32>) -> CoordinatorResult<Unit> {
        let mut created = self.units.create(&unit).await?;
        let _guard = self.unit_locks.lock(created.id).await;

        let initial = UnitStatus::new(created.id, UnitStatusKind::Unavailable, self.clock.now())
            .with_creator(actor);
        self.append_unit_status(&mut created, initial).await?;

        self.cache.put_unit(created.clone());
        self.publisher
            .publish(&created.job, BusEvent::UnitCreated(created.clone()));
        info!(unit_id = created.id, "单元已创建");
        Ok(created)
    }

    /// 修改单元的名称、缩写、颜色和描述
    pub async fn update_unit_details(&self, unit: Unit) -> CoordinatorResult<Unit> {
        let _guard = self.unit_locks.lock(unit.id).await;
        let mut current = self.load_unit(&unit.job, unit.id).await?;

        current.name = unit.name;
        current.initials = unit.initials;
        current.color = unit.color;
        current.description = unit.description;
        current.revision = self.units.update(&current).await?;

        self.cache.put_unit(current.clone());
        self.publisher
            .publish(&current.job, BusEvent::UnitUpdated(current.clone()));
        Ok(current)
    }

    /// 删除单元，先把它从所有派遣单上撤下
    pub async fn delete_unit(&self, job: &str, unit_id: u64, actor: Option<i32>) -> CoordinatorResult<bool> {
        let deleted = {
            let _guard = self.unit_locks.lock(unit_id).await;
            self.load_unit(job, unit_id).await?;
            self.unassign_unit_everywhere(job, unit_id, actor).await?;

            let deleted = self.units.delete(job, unit_id).await?;
            self.cache.remove_unit(job, unit_id);
            if deleted {
                self.publisher.publish(job, BusEvent::UnitDeleted { id: unit_id });
            }
            deleted
        };
        self.unit_locks.forget(unit_id);
        Ok(deleted)
    }

    #[instrument(skip(self, status), fields(unit_id = status.unit_id, status = %status.status))]
    pub async fn update_unit_status(&self, job: &str, status: UnitStatus) -> CoordinatorResult<Unit> {
        let unit_id = status.unit_id;
        let _guard = self.unit_locks.lock(unit_id).await;
        let mut unit = self.load_unit(job, unit_id).await?;

        if self.append_unit_status(&mut unit, status).await?.is_some() {
            self.cache.put_unit(unit.clone());
        }
        Ok(unit)
    }

    /// 增删单元成员
    ///
    /// 用户同一时间只属于一个单元，加入时会从原单元移出；
    /// 单元失去全部成员后变为 Unavailable 并立即从所有派遣单上撤下。
    #[instrument(skip(self, to_add, to_remove))]
    pub async fn assign_unit_members(
        &self,
        job: &str,
        unit_id: u64,
        to_add: &[i32],
        to_remove: &[i32],
        actor: Option<i32>,
    ) -> CoordinatorResult<Unit> {
        let (unit, moved_from) = {
            let _guard = self.unit_locks.lock(unit_id).await;
            let mut unit = self.load_unit(job, unit_id).await?;
            let previous = unit.status_kind().filter(|kind| kind.is_steady());

            let change = self
                .units
                .update_members(job, unit_id, to_add, to_remove, self.clock.now())
                .await?;
            unit.users = change.members.clone();
            unit.revision = change.revision;

            self.record_membership(&mut unit, &change.added, &change.removed, previous, actor)
                .await?;
            self.cache.put_unit(unit.clone());
            self.publisher
                .publish(job, BusEvent::UnitUpdated(unit.clone()));

            info!(
                job,
                unit_id,
                added = ?change.added,
                removed = ?change.removed,
                members = unit.users.len(),
                "单元成员已更新"
            );
            (unit, change.moved_from)
        };

        if unit.is_empty() {
            self.unassign_unit_everywhere(job, unit_id, actor).await?;
        }
        for (other_unit, user_id) in moved_from {
            self.member_left(job, other_unit, user_id, actor).await?;
        }

        Ok(self.cache.get_unit(job, unit_id).unwrap_or(unit))
    }

    /// 成员变化后写入标记状态，再重新推导稳定状态
    async fn record_membership(
        &self,
        unit: &mut Unit,
        added: &[i32],
        removed: &[i32],
        previous: Option<UnitStatusKind>,
        actor: Option<i32>,
    ) -> CoordinatorResult<()> {
        if added.is_empty() && removed.is_empty() {
            return Ok(());
        }

        let now = self.clock.now();
        for user_id in added {
            let marker = UnitStatus::new(unit.id, UnitStatusKind::UserAdded, now)
                .with_user(Some(*user_id))
                .with_creator(actor);
            self.append_unit_status(unit, marker).await?;
        }
        for user_id in removed {
            let marker = UnitStatus::new(unit.id, UnitStatusKind::UserRemoved, now)
                .with_user(Some(*user_id))
                .with_creator(actor);
            self.append_unit_status(unit, marker).await?;
        }

        let steady = if unit.is_empty() {
            UnitStatusKind::Unavailable
        } else if !added.is_empty()
            && matches!(previous, None | Some(UnitStatusKind::Unavailable))
        {
            UnitStatusKind::Available
        } else {
            previous.unwrap_or(UnitStatusKind::Available)
        };
        let status = UnitStatus::new(unit.id, steady, now).with_creator(actor);
        self.append_unit_status(unit, status).await?;
        Ok(())
    }

    /// 用户被移到其他单元后更新原单元
    async fn member_left(&self, job: &str, unit_id: u64, user_id: i32, actor: Option<i32>) -> CoordinatorResult<()> {
        let emptied = {
            let _guard = self.unit_locks.lock(unit_id).await;
            let previous = self
                .cache
                .get_unit(job, unit_id)
                .and_then(|u| u.status_kind())
                .filter(|kind| kind.is_steady());
            let Some(mut unit) = self.loader.reload_unit(job, unit_id).await? else {
                return Ok(());
            };

            self.record_membership(&mut unit, &[], &[user_id], previous, actor)
                .await?;
            self.cache.put_unit(unit.clone());
            self.publisher
                .publish(job, BusEvent::UnitUpdated(unit.clone()));
            unit.is_empty()
        };

        if emptied {
            self.unassign_unit_everywhere(job, unit_id, actor).await?;
        }
        Ok(())
    }

    /// 把单元从缓存中所有派遣单上撤下
    pub async fn unassign_unit_everywhere(&self, job: &str, unit_id: u64, actor: Option<i32>) -> CoordinatorResult<usize> {
        let affected: Vec<u64> = self
            .cache
            .list_dispatches(job)
            .into_iter()
            .filter(|d| d.has_unit(unit_id))
            .map(|d| d.id)
            .collect();

        for dispatch_id in &affected {
            self.assign_units(job, *dispatch_id, &[], &[unit_id], None, actor)
                .await?;
        }
        if !affected.is_empty() {
            info!(job, unit_id, dispatches = affected.len(), "单元已从派遣单撤下");
        }
        Ok(affected.len())
    }
}
