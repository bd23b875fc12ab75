use async_trait::async_trait;
use coordinator_domain::{
    entities::{Disponents, Settings},
    repositories::SettingsRepository,
};
use coordinator_errors::CoordinatorResult;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::instrument;

use super::mapping::MappingHelpers;

pub struct SqliteSettingsRepository {
    pool: SqlitePool,
}

impl SqliteSettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_settings(row: &SqliteRow) -> CoordinatorResult<Settings> {
        Ok(Settings {
            job: row.try_get("job")?,
            enabled: row.try_get("enabled")?,
            mode: MappingHelpers::operating_mode(row, "mode")?,
            fallback_mode: MappingHelpers::operating_mode(row, "fallback_mode")?,
        })
    }
}

#[async_trait]
impl SettingsRepository for SqliteSettingsRepository {
    #[instrument(skip(self))]
    async fn get(&self, job: &str) -> CoordinatorResult<Option<Settings>> {
        let row = sqlx::query("SELECT * FROM centrum_settings WHERE job = ?")
            .bind(job)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_settings).transpose()
    }

    #[instrument(skip(self))]
    async fn list(&self) -> CoordinatorResult<Vec<Settings>> {
        let rows = sqlx::query("SELECT * FROM centrum_settings ORDER BY job")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_settings).collect()
    }

    #[instrument(skip(self, settings), fields(job = %settings.job))]
    async fn upsert(&self, settings: &Settings) -> CoordinatorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO centrum_settings (job, enabled, mode, fallback_mode)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(job) DO UPDATE SET
                enabled = excluded.enabled,
                mode = excluded.mode,
                fallback_mode = excluded.fallback_mode
            "#,
        )
        .bind(&settings.job)
        .bind(settings.enabled)
        .bind(settings.mode.as_str())
        .bind(settings.fallback_mode.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_disponents(&self, job: &str) -> CoordinatorResult<Disponents> {
        let user_ids: Vec<i32> = sqlx::query_scalar(
            "SELECT user_id FROM centrum_disponents WHERE job = ? ORDER BY user_id",
        )
        .bind(job)
        .fetch_all(&self.pool)
        .await?;

        Ok(Disponents {
            job: job.to_string(),
            user_ids,
        })
    }

    #[instrument(skip(self, disponents), fields(job = %disponents.job))]
    async fn set_disponents(&self, disponents: &Disponents) -> CoordinatorResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM centrum_disponents WHERE job = ?")
            .bind(&disponents.job)
            .execute(&mut *tx)
            .await?;

        for user_id in &disponents.user_ids {
            sqlx::query("INSERT OR IGNORE INTO centrum_disponents (job, user_id) VALUES (?, ?)")
                .bind(&disponents.job)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
