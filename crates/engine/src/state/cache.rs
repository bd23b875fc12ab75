use std::sync::Arc;

use coordinator_domain::entities::{Dispatch, DispatchStatus, Disponents, Settings, Unit, UnitStatus};
use coordinator_domain::status::{DispatchStatusKind, UnitStatusKind};
use dashmap::{DashMap, DashSet};

use super::spatial::SpatialIndex;

/// 把状态事件挂到缓存实体上的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Applied,
    /// 缓存中已有同样或更新的状态
    Stale,
    /// 实体不在缓存中，需要从存储重新加载
    Missing,
}

type Shard<K, V> = Arc<DashMap<K, V>>;

/// 按组织划分的内存状态
///
/// 所有方法都可以被多个任务并发调用，返回的实体都是拷贝。
#[derive(Debug, Default)]
pub struct StateCache {
    dispatches: DashMap<String, Shard<u64, Dispatch>>,
    units: DashMap<String, Shard<u64, Unit>>,
    settings: DashMap<String, Settings>,
    disponents: DashMap<String, Disponents>,
    user_units: DashMap<String, Shard<i32, u64>>,
    locations: DashMap<String, Arc<SpatialIndex>>,
    loaded_jobs: DashSet<String>,
}

fn shard<K, V>(map: &DashMap<String, Shard<K, V>>, job: &str) -> Shard<K, V>
where
    K: Eq + std::hash::Hash,
{
    if let Some(existing) = map.get(job) {
        return existing.clone();
    }
    map.entry(job.to_string()).or_default().clone()
}

fn newest_status_id<T>(status: &Option<T>, id_of: impl Fn(&T) -> u64) -> u64 {
    status.as_ref().map(id_of).unwrap_or(0)
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn locations(&self, job: &str) -> Arc<SpatialIndex> {
        if let Some(existing) = self.locations.get(job) {
            return existing.clone();
        }
        self.locations.entry(job.to_string()).or_default().clone()
    }

    /// 已出现过的全部组织
    pub fn jobs(&self) -> Vec<String> {
        let mut jobs: Vec<String> = self
            .loaded_jobs
            .iter()
            .map(|job| job.key().clone())
            .chain(self.settings.iter().map(|entry| entry.key().clone()))
            .chain(self.dispatches.iter().map(|entry| entry.key().clone()))
            .chain(self.units.iter().map(|entry| entry.key().clone()))
            .collect();
        jobs.sort();
        jobs.dedup();
        jobs
    }

    pub fn is_loaded(&self, job: &str) -> bool {
        self.loaded_jobs.contains(job)
    }

    pub fn mark_loaded(&self, job: &str) {
        self.loaded_jobs.insert(job.to_string());
    }

    // ---- 派遣单 ----

    pub fn get_dispatch(&self, job: &str, id: u64) -> Option<Dispatch> {
        shard(&self.dispatches, job).get(&id).map(|d| d.clone())
    }

    pub fn list_dispatches(&self, job: &str) -> Vec<Dispatch> {
        let mut dispatches: Vec<Dispatch> = shard(&self.dispatches, job)
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        dispatches.sort_by_key(|d| d.id);
        dispatches
    }

    /// `include` 为空表示不限；没有状态的派遣单只在 `include` 为空时返回
    pub fn filter_dispatches(
        &self,
        job: &str,
        include: &[DispatchStatusKind],
        exclude: &[DispatchStatusKind],
    ) -> Vec<Dispatch> {
        self.list_dispatches(job)
            .into_iter()
            .filter(|d| match d.status_kind() {
                Some(kind) => {
                    (include.is_empty() || include.contains(&kind)) && !exclude.contains(&kind)
                }
                None => include.is_empty(),
            })
            .collect()
    }

    pub fn put_dispatch(&self, dispatch: Dispatch) {
        self.locations(&dispatch.job)
            .insert(dispatch.id, dispatch.x, dispatch.y);
        shard(&self.dispatches, &dispatch.job).insert(dispatch.id, dispatch);
    }

    /// 合并来自其他副本的快照，状态以 id 更大的为准
    ///
    /// 返回缓存是否发生变化，重复应用同一快照返回 false。
    pub fn merge_dispatch(&self, incoming: Dispatch) -> bool {
        let dispatches = shard(&self.dispatches, &incoming.job);
        let merged = match dispatches.get(&incoming.id).map(|d| d.clone()) {
            None => incoming,
            Some(current) => {
                // 较旧的快照仍可能带着更新的状态，两者分开比较
                let status = if newest_status_id(&incoming.status, |s| s.id)
                    >= newest_status_id(&current.status, |s| s.id)
                {
                    incoming.status.clone()
                } else {
                    current.status.clone()
                };

                let mut merged = if incoming.updated_at >= current.updated_at {
                    incoming
                } else {
                    current.clone()
                };
                merged.status = status;

                if merged == current {
                    return false;
                }
                merged
            }
        };
        self.put_dispatch(merged);
        true
    }

    pub fn remove_dispatch(&self, job: &str, id: u64) -> Option<Dispatch> {
        self.locations(job).remove(id);
        shard(&self.dispatches, job).remove(&id).map(|(_, d)| d)
    }

    pub fn attach_dispatch_status(&self, job: &str, status: &DispatchStatus) -> AttachOutcome {
        let dispatches = shard(&self.dispatches, job);
        let Some(mut dispatch) = dispatches.get_mut(&status.dispatch_id) else {
            return AttachOutcome::Missing;
        };
        if newest_status_id(&dispatch.status, |s| s.id) >= status.id {
            return AttachOutcome::Stale;
        }
        dispatch.status = Some(status.clone());
        if status.created_at > dispatch.updated_at {
            dispatch.updated_at = status.created_at;
        }
        AttachOutcome::Applied
    }

    /// 附近是否存在满足条件的派遣单
    pub fn has_dispatch_near<F>(&self, job: &str, x: f64, y: f64, radius: f64, predicate: F) -> bool
    where
        F: Fn(&Dispatch) -> bool,
    {
        let dispatches = shard(&self.dispatches, job);
        self.locations(job).has_within(x, y, radius, |id| {
            dispatches.get(&id).is_some_and(|d| predicate(d.value()))
        })
    }

    // ---- 单元 ----

    pub fn get_unit(&self, job: &str, id: u64) -> Option<Unit> {
        shard(&self.units, job).get(&id).map(|u| u.clone())
    }

    pub fn list_units(&self, job: &str) -> Vec<Unit> {
        let mut units: Vec<Unit> = shard(&self.units, job)
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        units.sort_by_key(|u| u.id);
        units
    }

    pub fn filter_units(
        &self,
        job: &str,
        include: &[UnitStatusKind],
        exclude: &[UnitStatusKind],
    ) -> Vec<Unit> {
        self.list_units(job)
            .into_iter()
            .filter(|u| match u.status_kind() {
                Some(kind) => {
                    (include.is_empty() || include.contains(&kind)) && !exclude.contains(&kind)
                }
                None => include.is_empty(),
            })
            .collect()
    }

    /// 写入单元，并同步用户到单元的反向索引
    pub fn put_unit(&self, unit: Unit) {
        let index = shard(&self.user_units, &unit.job);
        index.retain(|user_id, unit_id| *unit_id != unit.id || unit.has_user(*user_id));
        for member in &unit.users {
            index.insert(member.user_id, unit.id);
        }
        shard(&self.units, &unit.job).insert(unit.id, unit);
    }

    /// 合并单元快照：资料和成员以修订号更大的为准，状态以 id 更大的为准
    pub fn merge_unit(&self, incoming: Unit) -> bool {
        let current = self.get_unit(&incoming.job, incoming.id);
        let merged = match current {
            None => incoming,
            Some(current) => {
                let incoming_status = newest_status_id(&incoming.status, |s| s.id);
                let current_status = newest_status_id(&current.status, |s| s.id);
                let status = if incoming_status >= current_status {
                    incoming.status.clone()
                } else {
                    current.status.clone()
                };

                // 修订号相同时快照来自同一次写入之后，用状态 id 区分先后
                let mut merged = if (incoming.revision, incoming_status)
                    >= (current.revision, current_status)
                {
                    incoming
                } else {
                    current.clone()
                };
                merged.status = status;

                if merged == current {
                    return false;
                }
                merged
            }
        };
        self.put_unit(merged);
        true
    }

    pub fn remove_unit(&self, job: &str, id: u64) -> Option<Unit> {
        shard(&self.user_units, job).retain(|_, unit_id| *unit_id != id);
        shard(&self.units, job).remove(&id).map(|(_, u)| u)
    }

    pub fn attach_unit_status(&self, job: &str, status: &UnitStatus) -> AttachOutcome {
        let units = shard(&self.units, job);
        let Some(mut unit) = units.get_mut(&status.unit_id) else {
            return AttachOutcome::Missing;
        };
        if newest_status_id(&unit.status, |s| s.id) >= status.id {
            return AttachOutcome::Stale;
        }
        unit.status = Some(status.clone());
        AttachOutcome::Applied
    }

    pub fn get_user_unit(&self, job: &str, user_id: i32) -> Option<u64> {
        shard(&self.user_units, job).get(&user_id).map(|unit_id| *unit_id)
    }

    pub fn set_user_unit(&self, job: &str, user_id: i32, unit_id: Option<u64>) {
        let index = shard(&self.user_units, job);
        match unit_id {
            Some(unit_id) => {
                index.insert(user_id, unit_id);
            }
            None => {
                index.remove(&user_id);
            }
        }
    }

    // ---- 设置与在岗调度员 ----

    pub fn get_settings(&self, job: &str) -> Option<Settings> {
        self.settings.get(job).map(|s| s.clone())
    }

    pub fn set_settings(&self, settings: Settings) {
        self.settings.insert(settings.job.clone(), settings);
    }

    pub fn get_disponents(&self, job: &str) -> Disponents {
        self.disponents
            .get(job)
            .map(|d| d.clone())
            .unwrap_or_else(|| Disponents::new(job))
    }

    pub fn set_disponents(&self, disponents: Disponents) {
        self.disponents.insert(disponents.job.clone(), disponents);
    }

    /// 用存储中的完整数据替换一个组织的缓存
    pub fn replace_job(
        &self,
        job: &str,
        dispatches: Vec<Dispatch>,
        units: Vec<Unit>,
        settings: Option<Settings>,
        disponents: Disponents,
    ) {
        let dispatch_shard = shard(&self.dispatches, job);
        let locations = self.locations(job);
        dispatch_shard.clear();
        locations.clear();
        for dispatch in dispatches {
            locations.insert(dispatch.id, dispatch.x, dispatch.y);
            dispatch_shard.insert(dispatch.id, dispatch);
        }

        shard(&self.units, job).clear();
        shard(&self.user_units, job).clear();
        for unit in units {
            self.put_unit(unit);
        }

        match settings {
            Some(settings) => self.set_settings(settings),
            None => {
                self.settings.remove(job);
            }
        }
        self.set_disponents(disponents);
        self.mark_loaded(job);
    }
}
