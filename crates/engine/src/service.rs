//! 对外的 RPC 方法
//!
//! 调用方身份（组织与用户）由上游网关确认，这里只做业务规则检查。

use std::sync::Arc;

use chrono::Utc;
use coordinator_config::EngineConfig;
use coordinator_domain::entities::{
    Dispatch, DispatchStatus, Disponents, Settings, Unit, UnitStatus, ATTRIBUTE_DUPLICATE,
};
use coordinator_domain::events::BusEvent;
use coordinator_domain::repositories::SettingsRepository;
use coordinator_domain::status::{
    DispatchStatusKind, OperatingMode, UnitStatusKind,
};
use coordinator_errors::{CoordinatorError, CoordinatorResult};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::assignment::{AssignmentEngine, TakeDispatchResponse};
use crate::state::StateCache;
use crate::stream::{EventStream, StreamHub};
use crate::sync::{EventPublisher, StateLoader};

/// 发起调用的组织和用户
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub job: String,
    pub user_id: i32,
}

impl Caller {
    pub fn new(job: impl Into<String>, user_id: i32) -> Self {
        Self {
            job: job.into(),
            user_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSettingsRequest {
    pub enabled: bool,
    pub mode: OperatingMode,
    #[serde(default)]
    pub fallback_mode: OperatingMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeControlRequest {
    pub signon: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrUpdateUnitRequest {
    #[serde(default)]
    pub id: Option<u64>,
    pub name: String,
    pub initials: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignUnitRequest {
    pub unit_id: u64,
    #[serde(default)]
    pub to_add: Vec<i32>,
    #[serde(default)]
    pub to_remove: Vec<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignDispatchRequest {
    pub dispatch_id: u64,
    #[serde(default)]
    pub to_add: Vec<u64>,
    #[serde(default)]
    pub to_remove: Vec<u64>,
    /// 为 true 时直接确认，否则作为提议等待单元答复
    #[serde(default)]
    pub forced: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDispatchRequest {
    pub message: String,
    #[serde(default)]
    pub description: Option<String>,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub postal: Option<String>,
    #[serde(default)]
    pub anon: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateDispatchRequest {
    pub id: u64,
    pub message: String,
    #[serde(default)]
    pub description: Option<String>,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub postal: Option<String>,
    #[serde(default)]
    pub anon: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeDispatchRequest {
    pub dispatch_ids: Vec<u64>,
    /// 缺省时使用调用者当前所在的单元
    #[serde(default)]
    pub unit_id: Option<u64>,
    pub response: TakeDispatchResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateDispatchStatusRequest {
    pub dispatch_id: u64,
    pub status: DispatchStatusKind,
    #[serde(default)]
    pub unit_id: Option<u64>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub postal: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateUnitStatusRequest {
    pub unit_id: u64,
    pub status: UnitStatusKind,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub postal: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListDispatchesRequest {
    #[serde(default)]
    pub status: Vec<DispatchStatusKind>,
    #[serde(default)]
    pub not_status: Vec<DispatchStatusKind>,
    #[serde(default)]
    pub ids: Vec<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListUnitsRequest {
    #[serde(default)]
    pub status: Vec<UnitStatusKind>,
    #[serde(default)]
    pub not_status: Vec<UnitStatusKind>,
}

pub struct CoordinatorService {
    engine: Arc<AssignmentEngine>,
    settings: Arc<dyn SettingsRepository>,
    cache: Arc<StateCache>,
    loader: Arc<StateLoader>,
    publisher: Arc<EventPublisher>,
    streams: Arc<StreamHub>,
    config: EngineConfig,
}

impl CoordinatorService {
    pub fn new(
        engine: Arc<AssignmentEngine>,
        settings: Arc<dyn SettingsRepository>,
        cache: Arc<StateCache>,
        loader: Arc<StateLoader>,
        publisher: Arc<EventPublisher>,
        streams: Arc<StreamHub>,
        config: EngineConfig,
    ) -> Self {
        Self {
            engine,
            settings,
            cache,
            loader,
            publisher,
            streams,
            config,
        }
    }

    fn is_disponent(&self, caller: &Caller) -> bool {
        self.cache
            .get_disponents(&caller.job)
            .is_on_duty(caller.user_id)
    }

    fn expiry(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.assignment_expiry())
            .unwrap_or_else(|_| chrono::Duration::seconds(20))
    }

    // ---- 设置与调度员 ----

    pub async fn get_settings(&self, caller: &Caller) -> CoordinatorResult<Settings> {
        self.loader.ensure_job(&caller.job).await?;
        Ok(self
            .cache
            .get_settings(&caller.job)
            .unwrap_or_else(|| Settings::new(&caller.job)))
    }

    #[instrument(skip(self, request), fields(job = %caller.job))]
    pub async fn update_settings(
        &self,
        caller: &Caller,
        request: UpdateSettingsRequest,
    ) -> CoordinatorResult<Settings> {
        self.loader.ensure_job(&caller.job).await?;
        if request.mode == OperatingMode::Unspecified {
            return Err(CoordinatorError::invalid_argument("调度模式不能为空"));
        }

        let settings = Settings {
            job: caller.job.clone(),
            enabled: request.enabled,
            mode: request.mode,
            fallback_mode: request.fallback_mode,
        };
        self.settings.upsert(&settings).await?;
        self.cache.set_settings(settings.clone());
        self.publisher
            .publish(&caller.job, BusEvent::Settings(settings.clone()));

        info!(job = %caller.job, mode = settings.mode.as_str(), enabled = settings.enabled, "组织设置已更新");
        Ok(settings)
    }

    /// 调度员上岗或离岗
    #[instrument(skip(self), fields(job = %caller.job, user_id = caller.user_id))]
    pub async fn take_control(&self, caller: &Caller, signon: bool) -> CoordinatorResult<Disponents> {
        self.loader.ensure_job(&caller.job).await?;

        let mut disponents = self.settings.get_disponents(&caller.job).await?;
        disponents.job = caller.job.clone();
        disponents.user_ids.retain(|id| *id != caller.user_id);
        if signon {
            disponents.user_ids.push(caller.user_id);
        }
        disponents.user_ids.sort_unstable();

        self.settings.set_disponents(&disponents).await?;
        self.cache.set_disponents(disponents.clone());
        self.publisher
            .publish(&caller.job, BusEvent::Disponents(disponents.clone()));

        info!(job = %caller.job, user_id = caller.user_id, signon, on_duty = disponents.user_ids.len(), "调度员在岗状态已更新");
        Ok(disponents)
    }

    // ---- 单元 ----

    pub async fn list_units(&self, caller: &Caller, request: ListUnitsRequest) -> CoordinatorResult<Vec<Unit>> {
        self.loader.ensure_job(&caller.job).await?;
        Ok(self
            .cache
            .filter_units(&caller.job, &request.status, &request.not_status))
    }

    pub async fn create_or_update_unit(
        &self,
        caller: &Caller,
        request: CreateOrUpdateUnitRequest,
    ) -> CoordinatorResult<Unit> {
        self.loader.ensure_job(&caller.job).await?;
        if request.name.trim().is_empty() || request.initials.trim().is_empty() {
            return Err(CoordinatorError::invalid_argument("单元名称和缩写不能为空"));
        }

        let mut unit = Unit::new(&caller.job, request.name, request.initials);
        unit.color = request.color;
        unit.description = request.description;

        match request.id {
            Some(id) if id > 0 => {
                unit.id = id;
                self.engine.update_unit_details(unit).await
            }
            _ => self.engine.create_unit(unit, Some(caller.user_id)).await,
        }
    }

    pub async fn delete_unit(&self, caller: &Caller, unit_id: u64) -> CoordinatorResult<bool> {
        self.loader.ensure_job(&caller.job).await?;
        self.engine
            .delete_unit(&caller.job, unit_id, Some(caller.user_id))
            .await
    }

    /// 增删单元成员
    pub async fn assign_unit(&self, caller: &Caller, request: AssignUnitRequest) -> CoordinatorResult<Unit> {
        self.loader.ensure_job(&caller.job).await?;
        self.engine
            .assign_unit_members(
                &caller.job,
                request.unit_id,
                &request.to_add,
                &request.to_remove,
                Some(caller.user_id),
            )
            .await
    }

    /// 只有单元成员或在岗调度员可以修改单元状态
    pub async fn update_unit_status(
        &self,
        caller: &Caller,
        request: UpdateUnitStatusRequest,
    ) -> CoordinatorResult<Unit> {
        self.loader.ensure_job(&caller.job).await?;

        let is_member = self.cache.get_user_unit(&caller.job, caller.user_id) == Some(request.unit_id);
        if !is_member && !self.is_disponent(caller) {
            return Err(CoordinatorError::NotPartOfUnit {
                user_id: caller.user_id,
                unit_id: request.unit_id,
            });
        }

        let mut status = UnitStatus::new(request.unit_id, request.status, Utc::now())
            .with_user(Some(caller.user_id))
            .with_creator(Some(caller.user_id));
        status.reason = request.reason;
        status.code = request.code;
        status.x = request.x;
        status.y = request.y;
        status.postal = request.postal;

        self.engine.update_unit_status(&caller.job, status).await
    }

    // ---- 派遣单 ----

    /// 列出派遣单，已归档的不在缓存中因此不会返回
    pub async fn list_dispatches(
        &self,
        caller: &Caller,
        request: ListDispatchesRequest,
    ) -> CoordinatorResult<Vec<Dispatch>> {
        self.loader.ensure_job(&caller.job).await?;
        let mut exclude = request.not_status;
        exclude.push(DispatchStatusKind::Archived);

        Ok(self
            .cache
            .filter_dispatches(&caller.job, &request.status, &exclude)
            .into_iter()
            .filter(|d| request.ids.is_empty() || request.ids.contains(&d.id))
            .collect())
    }

    /// 新建派遣单，附近已有未结束的派遣单时标记为可能重复
    pub async fn create_dispatch(
        &self,
        caller: &Caller,
        request: CreateDispatchRequest,
    ) -> CoordinatorResult<Dispatch> {
        self.loader.ensure_job(&caller.job).await?;
        if request.message.trim().is_empty() {
            return Err(CoordinatorError::invalid_argument("派遣单内容不能为空"));
        }
        if !request.x.is_finite() || !request.y.is_finite() {
            return Err(CoordinatorError::invalid_argument("派遣单坐标无效"));
        }

        let mut dispatch = Dispatch::new(&caller.job, request.message, request.x, request.y);
        dispatch.description = request.description;
        dispatch.postal = request.postal;
        dispatch.anon = request.anon;
        dispatch.creator_id = Some(caller.user_id);

        let duplicate = self.cache.has_dispatch_near(
            &caller.job,
            request.x,
            request.y,
            self.config.duplicate_radius,
            |d| !d.is_terminal(),
        );
        if duplicate {
            dispatch.attributes.add(ATTRIBUTE_DUPLICATE);
        }

        self.engine.create_dispatch(dispatch).await
    }

    pub async fn update_dispatch(
        &self,
        caller: &Caller,
        request: UpdateDispatchRequest,
    ) -> CoordinatorResult<Dispatch> {
        self.loader.ensure_job(&caller.job).await?;
        if request.message.trim().is_empty() {
            return Err(CoordinatorError::invalid_argument("派遣单内容不能为空"));
        }

        self.engine
            .update_dispatch_with(&caller.job, request.id, move |dispatch| {
                dispatch.message = request.message;
                dispatch.description = request.description;
                dispatch.x = request.x;
                dispatch.y = request.y;
                dispatch.postal = request.postal;
                dispatch.anon = request.anon;
            })
            .await
    }

    /// 调度员为派遣单增删单元；CentralCommand 模式下只允许在岗调度员操作
    pub async fn assign_dispatch(
        &self,
        caller: &Caller,
        request: AssignDispatchRequest,
    ) -> CoordinatorResult<Dispatch> {
        self.loader.ensure_job(&caller.job).await?;

        if self.engine.effective_mode(&caller.job) == OperatingMode::CentralCommand
            && !self.is_disponent(caller)
        {
            return Err(CoordinatorError::NotOnDuty {
                user_id: caller.user_id,
            });
        }

        let expires_at = if request.forced {
            None
        } else {
            Some(self.engine.now() + self.expiry())
        };
        self.engine
            .assign_units(
                &caller.job,
                request.dispatch_id,
                &request.to_add,
                &request.to_remove,
                expires_at,
                Some(caller.user_id),
            )
            .await
    }

    pub async fn take_dispatch(
        &self,
        caller: &Caller,
        request: TakeDispatchRequest,
    ) -> CoordinatorResult<Vec<Dispatch>> {
        self.loader.ensure_job(&caller.job).await?;
        if request.dispatch_ids.is_empty() {
            return Err(CoordinatorError::invalid_argument("未指定派遣单"));
        }

        let unit_id = request
            .unit_id
            .or_else(|| self.cache.get_user_unit(&caller.job, caller.user_id))
            .ok_or_else(|| CoordinatorError::invalid_argument("调用者不属于任何单元"))?;

        self.engine
            .take_dispatch(
                &caller.job,
                unit_id,
                request.response,
                &request.dispatch_ids,
                Some(caller.user_id),
            )
            .await
    }

    /// 非调度员只能以自己所在单元的名义修改状态
    pub async fn update_dispatch_status(
        &self,
        caller: &Caller,
        request: UpdateDispatchStatusRequest,
    ) -> CoordinatorResult<Dispatch> {
        self.loader.ensure_job(&caller.job).await?;

        let unit_id = if self.is_disponent(caller) {
            request.unit_id
        } else {
            request
                .unit_id
                .or_else(|| self.cache.get_user_unit(&caller.job, caller.user_id))
        };

        let mut status = DispatchStatus::new(request.dispatch_id, request.status, Utc::now())
            .with_unit(unit_id)
            .with_user(Some(caller.user_id));
        status.reason = request.reason;
        status.code = request.code;
        status.x = request.x;
        status.y = request.y;
        status.postal = request.postal;

        self.engine.update_dispatch_status(&caller.job, status).await
    }

    pub async fn delete_dispatch(&self, caller: &Caller, dispatch_id: u64) -> CoordinatorResult<bool> {
        self.loader.ensure_job(&caller.job).await?;
        self.engine.delete_dispatch(&caller.job, dispatch_id).await
    }

    /// 打开实时流：全量快照之后是持续的变更事件
    pub async fn stream(&self, caller: &Caller) -> CoordinatorResult<EventStream> {
        self.loader.ensure_job(&caller.job).await?;
        Ok(self.streams.open(&caller.job, Some(caller.user_id)))
    }

    pub fn effective_mode(&self, job: &str) -> OperatingMode {
        self.engine.effective_mode(job)
    }

    pub fn stream_clients(&self, job: &str) -> usize {
        self.streams.subscriber_count(job)
    }
}
