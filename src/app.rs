use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use coordinator_api::create_app;
use coordinator_config::AppConfig;
use coordinator_domain::clock::SystemClock;
use coordinator_engine::{EngineContainer, EngineDeps};
use coordinator_infrastructure::{
    create_message_bus, DatabaseManager, MetricsCollector, SqliteDispatchRepository,
    SqliteSettingsRepository, SqliteUnitRepository,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::shutdown::ShutdownManager;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// 组合根：显式创建每个组件并传递共享句柄
pub struct Application {
    config: AppConfig,
    replica_id: String,
    database: DatabaseManager,
    container: EngineContainer,
    metrics_handle: Option<PrometheusHandle>,
    shutdown: ShutdownManager,
}

impl Application {
    /// 按配置连接数据库和消息总线
    pub async fn new(
        config: AppConfig,
        metrics_handle: Option<PrometheusHandle>,
        shutdown: ShutdownManager,
    ) -> Result<Self> {
        let database = DatabaseManager::new(&config.database)
            .await
            .context("连接数据库失败")?;
        Self::with_database(config, database, metrics_handle, shutdown).await
    }

    pub async fn with_database(
        config: AppConfig,
        database: DatabaseManager,
        metrics_handle: Option<PrometheusHandle>,
        shutdown: ShutdownManager,
    ) -> Result<Self> {
        let replica_id = resolve_replica_id(&config);
        info!(replica_id = %replica_id, "初始化协同服务副本");

        let bus = create_message_bus(&config.message_bus)
            .await
            .context("创建消息总线失败")?;

        let pool = database.pool().clone();
        let deps = EngineDeps {
            dispatches: Arc::new(SqliteDispatchRepository::new(pool.clone())),
            units: Arc::new(SqliteUnitRepository::new(pool.clone())),
            settings: Arc::new(SqliteSettingsRepository::new(pool)),
            bus,
            clock: Arc::new(SystemClock),
            metrics: Arc::new(MetricsCollector::new()),
        };
        let container = EngineContainer::build(
            deps,
            &config.engine,
            &config.broker,
            &config.message_bus.subject_base,
            shutdown.sender(),
        );

        Ok(Self {
            config,
            replica_id,
            database,
            container,
            metrics_handle,
            shutdown,
        })
    }

    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    pub fn container(&self) -> &EngineContainer {
        &self.container
    }

    pub fn router(&self) -> Router {
        create_app(
            self.container.service.clone(),
            self.metrics_handle.clone(),
            &self.config.api,
            &self.config.observability.metrics_endpoint,
        )
    }

    /// 启动引擎与 HTTP 服务，直到收到关闭信号
    pub async fn run(&self) -> Result<()> {
        let mut handles = self.container.start().await.context("启动引擎失败")?;

        if self.config.api.enabled {
            let listener = TcpListener::bind(&self.config.api.bind_address)
                .await
                .with_context(|| format!("绑定地址失败: {}", self.config.api.bind_address))?;
            info!(address = %self.config.api.bind_address, "API服务器已启动");

            let app = self.router();
            let mut shutdown_rx = self.shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                });
                if let Err(e) = server.await {
                    error!(error = %e, "API服务器运行失败");
                }
            }));
        }

        let mut shutdown_rx = self.shutdown.subscribe();
        let _ = shutdown_rx.recv().await;
        info!(replica_id = %self.replica_id, "收到关闭信号，等待后台任务退出");

        self.shutdown.drain(handles, DRAIN_TIMEOUT).await;
        self.database.close().await;

        info!(replica_id = %self.replica_id, "协同服务副本已停止");
        Ok(())
    }
}

/// 配置中未指定时使用主机名
pub fn resolve_replica_id(config: &AppConfig) -> String {
    config
        .replica_id
        .clone()
        .or_else(|| {
            hostname::get()
                .ok()
                .and_then(|name| name.into_string().ok())
        })
        .unwrap_or_else(|| "coordinator".to_string())
}
