//! Mock implementations for the repository and message bus traits
//!
//! 内存实现，单元测试不需要真实数据库或Redis

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coordinator_domain::entities::{
    Dispatch, DispatchAssignment, DispatchStatus, Disponents, ExpiredAssignment,
    MembershipChange, Settings, Unit, UnitAssignment, UnitStatus, UserUnitMapping,
};
use coordinator_domain::messaging::{
    subject_matches, BusMessage, BusSubscription, MessageBus, Retention,
};
use coordinator_domain::repositories::{DispatchRepository, SettingsRepository, UnitRepository};
use coordinator_domain::status::DispatchStatusKind;
use coordinator_domain::BusEvent;
use coordinator_errors::{CoordinatorError, CoordinatorResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};

/// Mock implementation of DispatchRepository for testing
#[derive(Debug, Clone)]
pub struct MockDispatchRepository {
    dispatches: Arc<Mutex<HashMap<u64, Dispatch>>>,
    statuses: Arc<Mutex<Vec<DispatchStatus>>>,
    next_id: Arc<Mutex<u64>>,
    next_status_id: Arc<Mutex<u64>>,
}

impl MockDispatchRepository {
    pub fn new() -> Self {
        Self {
            dispatches: Arc::new(Mutex::new(HashMap::new())),
            statuses: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(Mutex::new(1)),
            next_status_id: Arc::new(Mutex::new(1)),
        }
    }

    /// 直接写入一条派遣单（包括状态和分配），不经过id分配
    pub fn insert(&self, dispatch: Dispatch) {
        {
            let mut next_id = self.next_id.lock().unwrap();
            if dispatch.id >= *next_id {
                *next_id = dispatch.id + 1;
            }
        }
        if let Some(status) = &dispatch.status {
            let mut next_status_id = self.next_status_id.lock().unwrap();
            if status.id >= *next_status_id {
                *next_status_id = status.id + 1;
            }
            self.statuses.lock().unwrap().push(status.clone());
        }
        self.dispatches.lock().unwrap().insert(dispatch.id, dispatch);
    }

    pub fn count(&self) -> usize {
        self.dispatches.lock().unwrap().len()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.dispatches.lock().unwrap().contains_key(&id)
    }

    /// 某个派遣单的全部状态记录，按写入顺序
    pub fn statuses_for(&self, dispatch_id: u64) -> Vec<DispatchStatus> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.dispatch_id == dispatch_id)
            .cloned()
            .collect()
    }

    pub fn status_kinds_for(&self, dispatch_id: u64) -> Vec<DispatchStatusKind> {
        self.statuses_for(dispatch_id)
            .into_iter()
            .map(|s| s.status)
            .collect()
    }
}

impl Default for MockDispatchRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DispatchRepository for MockDispatchRepository {
    async fn list(&self, job: &str, include_archived: bool) -> CoordinatorResult<Vec<Dispatch>> {
        let dispatches = self.dispatches.lock().unwrap();
        let mut result: Vec<Dispatch> = dispatches
            .values()
            .filter(|d| d.job == job)
            .filter(|d| include_archived || d.status_kind() != Some(DispatchStatusKind::Archived))
            .cloned()
            .collect();
        result.sort_by_key(|d| d.id);
        Ok(result)
    }

    async fn get(&self, job: &str, id: u64) -> CoordinatorResult<Option<Dispatch>> {
        let dispatches = self.dispatches.lock().unwrap();
        Ok(dispatches.get(&id).filter(|d| d.job == job).cloned())
    }

    async fn create(&self, dispatch: &Dispatch) -> CoordinatorResult<Dispatch> {
        let mut dispatches = self.dispatches.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();

        let mut new_dispatch = dispatch.clone();
        new_dispatch.id = *next_id;
        new_dispatch.status = None;
        new_dispatch.units = Vec::new();
        *next_id += 1;

        dispatches.insert(new_dispatch.id, new_dispatch.clone());
        Ok(new_dispatch)
    }

    async fn update(&self, dispatch: &Dispatch) -> CoordinatorResult<()> {
        let mut dispatches = self.dispatches.lock().unwrap();
        let existing = dispatches
            .get_mut(&dispatch.id)
            .filter(|d| d.job == dispatch.job)
            .ok_or_else(|| CoordinatorError::dispatch_not_found(&dispatch.job, dispatch.id))?;

        existing.updated_at = dispatch.updated_at;
        existing.message = dispatch.message.clone();
        existing.description = dispatch.description.clone();
        existing.attributes = dispatch.attributes.clone();
        existing.x = dispatch.x;
        existing.y = dispatch.y;
        existing.postal = dispatch.postal.clone();
        existing.anon = dispatch.anon;
        existing.creator_id = dispatch.creator_id;
        Ok(())
    }

    async fn delete(&self, job: &str, id: u64) -> CoordinatorResult<bool> {
        let mut dispatches = self.dispatches.lock().unwrap();
        if dispatches.get(&id).is_some_and(|d| d.job == job) {
            dispatches.remove(&id);
            self.statuses
                .lock()
                .unwrap()
                .retain(|s| s.dispatch_id != id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn add_status(&self, status: &DispatchStatus) -> CoordinatorResult<DispatchStatus> {
        let mut dispatches = self.dispatches.lock().unwrap();
        let dispatch = dispatches
            .get_mut(&status.dispatch_id)
            .ok_or_else(|| CoordinatorError::database_error("dispatch does not exist"))?;

        let mut next_status_id = self.next_status_id.lock().unwrap();
        let mut stored = status.clone();
        stored.id = *next_status_id;
        *next_status_id += 1;

        dispatch.status = Some(stored.clone());
        self.statuses.lock().unwrap().push(stored.clone());
        Ok(stored)
    }

    async fn update_assignments(
        &self,
        job: &str,
        dispatch_id: u64,
        to_add: &[u64],
        to_remove: &[u64],
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<Vec<DispatchAssignment>> {
        let mut dispatches = self.dispatches.lock().unwrap();
        let dispatch = dispatches
            .get_mut(&dispatch_id)
            .filter(|d| d.job == job)
            .ok_or_else(|| CoordinatorError::dispatch_not_found(job, dispatch_id))?;

        dispatch.units.retain(|a| !to_remove.contains(&a.unit_id));
        for unit_id in to_add {
            if dispatch.has_unit(*unit_id) {
                continue;
            }
            dispatch.units.push(DispatchAssignment {
                dispatch_id,
                unit_id: *unit_id,
                created_at: now,
                expires_at,
            });
        }
        Ok(dispatch.units.clone())
    }

    async fn accept_assignment(&self, dispatch_id: u64, unit_id: u64) -> CoordinatorResult<bool> {
        let mut dispatches = self.dispatches.lock().unwrap();
        let Some(dispatch) = dispatches.get_mut(&dispatch_id) else {
            return Ok(false);
        };
        match dispatch
            .units
            .iter_mut()
            .find(|a| a.unit_id == unit_id && a.expires_at.is_some())
        {
            Some(assignment) => {
                assignment.expires_at = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_expired_assignments(
        &self,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<Vec<ExpiredAssignment>> {
        let dispatches = self.dispatches.lock().unwrap();
        let mut expired: Vec<ExpiredAssignment> = dispatches
            .values()
            .flat_map(|d| {
                d.units
                    .iter()
                    .filter(|a| a.is_expired(now))
                    .map(|a| ExpiredAssignment {
                        job: d.job.clone(),
                        dispatch_id: d.id,
                        unit_id: a.unit_id,
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        expired.sort_by_key(|e| (e.dispatch_id, e.unit_id));
        Ok(expired)
    }

    async fn list_by_latest_status(
        &self,
        kinds: &[DispatchStatusKind],
        older_than: DateTime<Utc>,
    ) -> CoordinatorResult<Vec<Dispatch>> {
        let dispatches = self.dispatches.lock().unwrap();
        let mut result: Vec<Dispatch> = dispatches
            .values()
            .filter(|d| match d.status_kind() {
                Some(kind) => kinds.is_empty() || kinds.contains(&kind),
                None => kinds.is_empty(),
            })
            .filter(|d| d.last_status_at() < older_than)
            .cloned()
            .collect();
        result.sort_by_key(|d| d.id);
        Ok(result)
    }
}

/// Mock implementation of UnitRepository for testing
#[derive(Debug, Clone)]
pub struct MockUnitRepository {
    units: Arc<Mutex<HashMap<u64, Unit>>>,
    statuses: Arc<Mutex<Vec<UnitStatus>>>,
    next_id: Arc<Mutex<u64>>,
    next_status_id: Arc<Mutex<u64>>,
}

impl MockUnitRepository {
    pub fn new() -> Self {
        Self {
            units: Arc::new(Mutex::new(HashMap::new())),
            statuses: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(Mutex::new(1)),
            next_status_id: Arc::new(Mutex::new(1)),
        }
    }

    pub fn insert(&self, unit: Unit) {
        {
            let mut next_id = self.next_id.lock().unwrap();
            if unit.id >= *next_id {
                *next_id = unit.id + 1;
            }
        }
        if let Some(status) = &unit.status {
            let mut next_status_id = self.next_status_id.lock().unwrap();
            if status.id >= *next_status_id {
                *next_status_id = status.id + 1;
            }
            self.statuses.lock().unwrap().push(status.clone());
        }
        self.units.lock().unwrap().insert(unit.id, unit);
    }

    pub fn count(&self) -> usize {
        self.units.lock().unwrap().len()
    }

    pub fn statuses_for(&self, unit_id: u64) -> Vec<UnitStatus> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.unit_id == unit_id)
            .cloned()
            .collect()
    }
}

impl Default for MockUnitRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UnitRepository for MockUnitRepository {
    async fn list(&self, job: &str) -> CoordinatorResult<Vec<Unit>> {
        let units = self.units.lock().unwrap();
        let mut result: Vec<Unit> = units.values().filter(|u| u.job == job).cloned().collect();
        result.sort_by_key(|u| u.id);
        Ok(result)
    }

    async fn get(&self, job: &str, id: u64) -> CoordinatorResult<Option<Unit>> {
        let units = self.units.lock().unwrap();
        Ok(units.get(&id).filter(|u| u.job == job).cloned())
    }

    async fn create(&self, unit: &Unit) -> CoordinatorResult<Unit> {
        let mut units = self.units.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();

        let mut new_unit = unit.clone();
        new_unit.id = *next_id;
        new_unit.status = None;
        new_unit.users = Vec::new();
        *next_id += 1;

        units.insert(new_unit.id, new_unit.clone());
        Ok(new_unit)
    }

    async fn update(&self, unit: &Unit) -> CoordinatorResult<u64> {
        let mut units = self.units.lock().unwrap();
        let existing = units
            .get_mut(&unit.id)
            .filter(|u| u.job == unit.job)
            .ok_or_else(|| CoordinatorError::unit_not_found(&unit.job, unit.id))?;
        existing.name = unit.name.clone();
        existing.initials = unit.initials.clone();
        existing.color = unit.color.clone();
        existing.description = unit.description.clone();
        existing.revision += 1;
        Ok(existing.revision)
    }

    async fn delete(&self, job: &str, id: u64) -> CoordinatorResult<bool> {
        let mut units = self.units.lock().unwrap();
        if units.get(&id).is_some_and(|u| u.job == job) {
            units.remove(&id);
            self.statuses.lock().unwrap().retain(|s| s.unit_id != id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn add_status(&self, status: &UnitStatus) -> CoordinatorResult<UnitStatus> {
        let mut units = self.units.lock().unwrap();
        let unit = units
            .get_mut(&status.unit_id)
            .ok_or_else(|| CoordinatorError::database_error("unit does not exist"))?;

        let mut next_status_id = self.next_status_id.lock().unwrap();
        let mut stored = status.clone();
        stored.id = *next_status_id;
        *next_status_id += 1;

        unit.status = Some(stored.clone());
        self.statuses.lock().unwrap().push(stored.clone());
        Ok(stored)
    }

    async fn update_members(
        &self,
        job: &str,
        unit_id: u64,
        to_add: &[i32],
        to_remove: &[i32],
        now: DateTime<Utc>,
    ) -> CoordinatorResult<MembershipChange> {
        let mut units = self.units.lock().unwrap();
        if !units.get(&unit_id).is_some_and(|u| u.job == job) {
            return Err(CoordinatorError::unit_not_found(job, unit_id));
        }

        let mut change = MembershipChange::default();

        for user_id in to_add {
            if units[&unit_id].has_user(*user_id) {
                continue;
            }
            for other in units.values_mut() {
                if other.id != unit_id && other.job == job && other.has_user(*user_id) {
                    other.users.retain(|u| u.user_id != *user_id);
                    other.revision += 1;
                    change.moved_from.push((other.id, *user_id));
                }
            }
            if let Some(unit) = units.get_mut(&unit_id) {
                unit.users.push(UnitAssignment {
                    unit_id,
                    user_id: *user_id,
                    created_at: now,
                });
            }
            change.added.push(*user_id);
        }

        if let Some(unit) = units.get_mut(&unit_id) {
            for user_id in to_remove {
                if unit.has_user(*user_id) {
                    unit.users.retain(|u| u.user_id != *user_id);
                    change.removed.push(*user_id);
                }
            }
            if !change.added.is_empty() || !change.removed.is_empty() {
                unit.revision += 1;
            }
            change.members = unit.users.clone();
            change.revision = unit.revision;
        }

        Ok(change)
    }

    async fn list_user_unit_mappings(&self, job: &str) -> CoordinatorResult<Vec<UserUnitMapping>> {
        let units = self.units.lock().unwrap();
        Ok(units
            .values()
            .filter(|u| u.job == job)
            .flat_map(|u| {
                u.users.iter().map(|member| UserUnitMapping {
                    job: u.job.clone(),
                    user_id: member.user_id,
                    unit_id: u.id,
                })
            })
            .collect())
    }
}

/// Mock implementation of SettingsRepository for testing
#[derive(Debug, Clone, Default)]
pub struct MockSettingsRepository {
    settings: Arc<Mutex<HashMap<String, Settings>>>,
    disponents: Arc<Mutex<HashMap<String, Disponents>>>,
}

impl MockSettingsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: Vec<Settings>) -> Self {
        let repo = Self::new();
        {
            let mut map = repo.settings.lock().unwrap();
            for s in settings {
                map.insert(s.job.clone(), s);
            }
        }
        repo
    }
}

#[async_trait]
impl SettingsRepository for MockSettingsRepository {
    async fn get(&self, job: &str) -> CoordinatorResult<Option<Settings>> {
        Ok(self.settings.lock().unwrap().get(job).cloned())
    }

    async fn list(&self) -> CoordinatorResult<Vec<Settings>> {
        let mut result: Vec<Settings> = self.settings.lock().unwrap().values().cloned().collect();
        result.sort_by(|a, b| a.job.cmp(&b.job));
        Ok(result)
    }

    async fn upsert(&self, settings: &Settings) -> CoordinatorResult<()> {
        self.settings
            .lock()
            .unwrap()
            .insert(settings.job.clone(), settings.clone());
        Ok(())
    }

    async fn get_disponents(&self, job: &str) -> CoordinatorResult<Disponents> {
        Ok(self
            .disponents
            .lock()
            .unwrap()
            .get(job)
            .cloned()
            .unwrap_or_else(|| Disponents::new(job)))
    }

    async fn set_disponents(&self, disponents: &Disponents) -> CoordinatorResult<()> {
        self.disponents
            .lock()
            .unwrap()
            .insert(disponents.job.clone(), disponents.clone());
        Ok(())
    }
}

/// 记录所有发布消息的内存消息总线
#[derive(Debug, Clone)]
pub struct RecordingMessageBus {
    published: Arc<Mutex<Vec<BusMessage>>>,
    sender: broadcast::Sender<BusMessage>,
}

impl RecordingMessageBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            published: Arc::new(Mutex::new(Vec::new())),
            sender,
        }
    }

    pub fn published(&self) -> Vec<BusMessage> {
        self.published.lock().unwrap().clone()
    }

    /// 能解析的已发布事件
    pub fn published_events(&self) -> Vec<BusEvent> {
        self.published()
            .iter()
            .filter_map(|m| BusEvent::decode(&m.payload).ok())
            .collect()
    }

    pub fn clear(&self) {
        self.published.lock().unwrap().clear();
    }
}

impl Default for RecordingMessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for RecordingMessageBus {
    async fn publish(&self, message: BusMessage, _retention: Retention) -> CoordinatorResult<()> {
        self.published.lock().unwrap().push(message.clone());
        // 没有订阅者时发送失败，可以忽略
        let _ = self.sender.send(message);
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> CoordinatorResult<BusSubscription> {
        let mut receiver = self.sender.subscribe();
        let (tx, rx) = mpsc::channel(1024);
        let pattern = pattern.to_string();
        tokio::spawn(async move {
            while let Ok(message) = receiver.recv().await {
                if subject_matches(&pattern, &message.subject) && tx.send(message).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}
