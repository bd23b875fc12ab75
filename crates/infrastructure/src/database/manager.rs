use coordinator_config::DatabaseConfig;
use coordinator_errors::CoordinatorResult;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use super::sqlite::schema;

pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// 连接数据库并确保表结构存在
    pub async fn new(config: &DatabaseConfig) -> CoordinatorResult<Self> {
        let connect_options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(connect_options)
            .await?;

        schema::run_migrations(&pool).await?;

        info!(url = %config.url, "数据库连接已建立");
        Ok(Self { pool })
    }

    /// 单连接的内存数据库，连接关闭后数据即丢失
    pub async fn in_memory() -> CoordinatorResult<Self> {
        let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_options)
            .await?;

        schema::run_migrations(&pool).await?;

        debug!("内存数据库已初始化");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn health_check(&self) -> CoordinatorResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
