use std::sync::Arc;

use coordinator_domain::entities::{Dispatch, Unit};
use coordinator_domain::repositories::{DispatchRepository, SettingsRepository, UnitRepository};
use coordinator_domain::status::DispatchStatusKind;
use coordinator_errors::CoordinatorResult;
use coordinator_infrastructure::MetricsCollector;
use tracing::{debug, info, instrument};

use crate::state::StateCache;

/// 从持久化存储加载缓存
pub struct StateLoader {
    dispatches: Arc<dyn DispatchRepository>,
    units: Arc<dyn UnitRepository>,
    settings: Arc<dyn SettingsRepository>,
    cache: Arc<StateCache>,
    metrics: Arc<MetricsCollector>,
}

impl StateLoader {
    pub fn new(
        dispatches: Arc<dyn DispatchRepository>,
        units: Arc<dyn UnitRepository>,
        settings: Arc<dyn SettingsRepository>,
        cache: Arc<StateCache>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            dispatches,
            units,
            settings,
            cache,
            metrics,
        }
    }

    /// 加载存储中有设置的组织以及缓存中已知的组织
    pub async fn load_all(&self) -> CoordinatorResult<usize> {
        let mut jobs: Vec<String> = self
            .settings
            .list()
            .await?
            .into_iter()
            .map(|s| s.job)
            .collect();
        jobs.extend(self.cache.jobs());
        jobs.sort();
        jobs.dedup();

        for job in &jobs {
            self.load_job(job).await?;
        }
        info!(jobs = jobs.len(), "缓存已从存储加载");
        Ok(jobs.len())
    }

    #[instrument(skip(self))]
    pub async fn load_job(&self, job: &str) -> CoordinatorResult<()> {
        let dispatches = self.dispatches.list(job, false).await?;
        let units = self.units.list(job).await?;
        let settings = self.settings.get(job).await?;
        let disponents = self.settings.get_disponents(job).await?;

        debug!(
            job,
            dispatches = dispatches.len(),
            units = units.len(),
            "组织数据已加载"
        );
        self.cache
            .replace_job(job, dispatches, units, settings, disponents);
        Ok(())
    }

    /// 组织第一次被访问时加载
    pub async fn ensure_job(&self, job: &str) -> CoordinatorResult<()> {
        if !self.cache.is_loaded(job) {
            self.load_job(job).await?;
        }
        Ok(())
    }

    /// 缓存未命中时按 id 重新加载派遣单；已归档或已删除的会从缓存移除
    #[instrument(skip(self))]
    pub async fn reload_dispatch(&self, job: &str, id: u64) -> CoordinatorResult<Option<Dispatch>> {
        self.metrics.record_cache_reload("dispatch");
        match self.dispatches.get(job, id).await? {
            Some(dispatch) if dispatch.status_kind() != Some(DispatchStatusKind::Archived) => {
                self.cache.put_dispatch(dispatch.clone());
                Ok(Some(dispatch))
            }
            _ => {
                self.cache.remove_dispatch(job, id);
                Ok(None)
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn reload_unit(&self, job: &str, id: u64) -> CoordinatorResult<Option<Unit>> {
        self.metrics.record_cache_reload("unit");
        match self.units.get(job, id).await? {
            Some(unit) => {
                self.cache.put_unit(unit.clone());
                Ok(Some(unit))
            }
            None => {
                self.cache.remove_unit(job, id);
                Ok(None)
            }
        }
    }
}
