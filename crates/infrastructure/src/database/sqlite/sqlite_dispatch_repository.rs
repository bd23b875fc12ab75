use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coordinator_domain::{
    entities::{Dispatch, DispatchAssignment, DispatchStatus, ExpiredAssignment},
    repositories::DispatchRepository,
    status::DispatchStatusKind,
};
use coordinator_errors::{CoordinatorError, CoordinatorResult};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::collections::HashMap;
use tracing::{debug, instrument};

use super::mapping::MappingHelpers;

const DISPATCH_COLUMNS: &str = "d.id, d.job, d.created_at, d.updated_at, d.message, d.description, \
     d.attributes, d.x, d.y, d.postal, d.anon, d.creator_id";

/// 每个派遣单最新一条状态
const LATEST_STATUS_JOIN: &str = "INNER JOIN (SELECT dispatch_id, MAX(id) AS max_id \
     FROM centrum_dispatches_status GROUP BY dispatch_id) latest ON s.id = latest.max_id";

pub struct SqliteDispatchRepository {
    pool: SqlitePool,
}

impl SqliteDispatchRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_dispatch(row: &SqliteRow) -> CoordinatorResult<Dispatch> {
        Ok(Dispatch {
            id: MappingHelpers::id(row, "id")?,
            job: row.try_get("job")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            message: row.try_get("message")?,
            description: row.try_get("description")?,
            attributes: MappingHelpers::attributes(row, "attributes")?,
            x: row.try_get("x")?,
            y: row.try_get("y")?,
            postal: row.try_get("postal")?,
            anon: row.try_get("anon")?,
            creator_id: row.try_get("creator_id")?,
            status: None,
            units: Vec::new(),
        })
    }

    async fn latest_status(&self, dispatch_id: u64) -> CoordinatorResult<Option<DispatchStatus>> {
        let row = sqlx::query(
            "SELECT * FROM centrum_dispatches_status WHERE dispatch_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(MappingHelpers::to_db_id(dispatch_id))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref()
            .map(MappingHelpers::row_to_dispatch_status)
            .transpose()
    }

    async fn assignments(&self, dispatch_id: u64) -> CoordinatorResult<Vec<DispatchAssignment>> {
        let rows = sqlx::query(
            "SELECT * FROM centrum_dispatches_asgmts WHERE dispatch_id = ? ORDER BY created_at, unit_id",
        )
        .bind(MappingHelpers::to_db_id(dispatch_id))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(MappingHelpers::row_to_assignment).collect()
    }
}

#[async_trait]
impl DispatchRepository for SqliteDispatchRepository {
    #[instrument(skip(self))]
    async fn list(&self, job: &str, include_archived: bool) -> CoordinatorResult<Vec<Dispatch>> {
        let rows = sqlx::query(&format!(
            "SELECT {DISPATCH_COLUMNS} FROM centrum_dispatches d WHERE d.job = ? ORDER BY d.id"
        ))
        .bind(job)
        .fetch_all(&self.pool)
        .await?;

        let mut dispatches = rows
            .iter()
            .map(Self::row_to_dispatch)
            .collect::<CoordinatorResult<Vec<_>>>()?;

        let status_rows = sqlx::query(&format!(
            "SELECT s.* FROM centrum_dispatches_status s {LATEST_STATUS_JOIN} \
             INNER JOIN centrum_dispatches d ON d.id = s.dispatch_id WHERE d.job = ?"
        ))
        .bind(job)
        .fetch_all(&self.pool)
        .await?;
        let mut statuses: HashMap<u64, DispatchStatus> = HashMap::new();
        for row in &status_rows {
            let status = MappingHelpers::row_to_dispatch_status(row)?;
            statuses.insert(status.dispatch_id, status);
        }

        let assignment_rows = sqlx::query(
            "SELECT a.* FROM centrum_dispatches_asgmts a \
             INNER JOIN centrum_dispatches d ON d.id = a.dispatch_id \
             WHERE d.job = ? ORDER BY a.created_at, a.unit_id",
        )
        .bind(job)
        .fetch_all(&self.pool)
        .await?;
        let mut assignments: HashMap<u64, Vec<DispatchAssignment>> = HashMap::new();
        for row in &assignment_rows {
            let assignment = MappingHelpers::row_to_assignment(row)?;
            assignments
                .entry(assignment.dispatch_id)
                .or_default()
                .push(assignment);
        }

        for dispatch in dispatches.iter_mut() {
            dispatch.status = statuses.remove(&dispatch.id);
            dispatch.units = assignments.remove(&dispatch.id).unwrap_or_default();
        }

        if !include_archived {
            dispatches.retain(|d| d.status_kind() != Some(DispatchStatusKind::Archived));
        }

        debug!(job, count = dispatches.len(), "加载派遣单列表");
        Ok(dispatches)
    }

    #[instrument(skip(self))]
    async fn get(&self, job: &str, id: u64) -> CoordinatorResult<Option<Dispatch>> {
        let row = sqlx::query(&format!(
            "SELECT {DISPATCH_COLUMNS} FROM centrum_dispatches d WHERE d.job = ? AND d.id = ?"
        ))
        .bind(job)
        .bind(MappingHelpers::to_db_id(id))
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut dispatch = Self::row_to_dispatch(&row)?;
        dispatch.status = self.latest_status(id).await?;
        dispatch.units = self.assignments(id).await?;
        Ok(Some(dispatch))
    }

    #[instrument(skip(self, dispatch), fields(job = %dispatch.job))]
    async fn create(&self, dispatch: &Dispatch) -> CoordinatorResult<Dispatch> {
        let attributes = serde_json::to_string(&dispatch.attributes)?;

        let result = sqlx::query(
            r#"
            INSERT INTO centrum_dispatches
                (job, created_at, updated_at, message, description, attributes, x, y, postal, anon, creator_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&dispatch.job)
        .bind(dispatch.created_at)
        .bind(dispatch.updated_at)
        .bind(&dispatch.message)
        .bind(&dispatch.description)
        .bind(attributes)
        .bind(dispatch.x)
        .bind(dispatch.y)
        .bind(&dispatch.postal)
        .bind(dispatch.anon)
        .bind(dispatch.creator_id)
        .execute(&self.pool)
        .await?;

        let mut created = dispatch.clone();
        created.id = result.last_insert_rowid() as u64;
        created.status = None;
        created.units = Vec::new();

        debug!(dispatch_id = created.id, "派遣单已创建");
        Ok(created)
    }

    #[instrument(skip(self, dispatch), fields(job = %dispatch.job, dispatch_id = dispatch.id))]
    async fn update(&self, dispatch: &Dispatch) -> CoordinatorResult<()> {
        let attributes = serde_json::to_string(&dispatch.attributes)?;

        let result = sqlx::query(
            r#"
            UPDATE centrum_dispatches
            SET updated_at = ?, message = ?, description = ?, attributes = ?,
                x = ?, y = ?, postal = ?, anon = ?, creator_id = ?
            WHERE id = ? AND job = ?
            "#,
        )
        .bind(dispatch.updated_at)
        .bind(&dispatch.message)
        .bind(&dispatch.description)
        .bind(attributes)
        .bind(dispatch.x)
        .bind(dispatch.y)
        .bind(&dispatch.postal)
        .bind(dispatch.anon)
        .bind(dispatch.creator_id)
        .bind(MappingHelpers::to_db_id(dispatch.id))
        .bind(&dispatch.job)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoordinatorError::dispatch_not_found(&dispatch.job, dispatch.id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, job: &str, id: u64) -> CoordinatorResult<bool> {
        let result = sqlx::query("DELETE FROM centrum_dispatches WHERE id = ? AND job = ?")
            .bind(MappingHelpers::to_db_id(id))
            .bind(job)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, status), fields(dispatch_id = status.dispatch_id, status = %status.status))]
    async fn add_status(&self, status: &DispatchStatus) -> CoordinatorResult<DispatchStatus> {
        let result = sqlx::query(
            r#"
            INSERT INTO centrum_dispatches_status
                (created_at, dispatch_id, unit_id, status, reason, code, user_id, x, y, postal)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(status.created_at)
        .bind(MappingHelpers::to_db_id(status.dispatch_id))
        .bind(status.unit_id.map(MappingHelpers::to_db_id))
        .bind(status.status.as_str())
        .bind(&status.reason)
        .bind(&status.code)
        .bind(status.user_id)
        .bind(status.x)
        .bind(status.y)
        .bind(&status.postal)
        .execute(&self.pool)
        .await?;

        let mut stored = status.clone();
        stored.id = result.last_insert_rowid() as u64;
        Ok(stored)
    }

    #[instrument(skip(self, to_add, to_remove))]
    async fn update_assignments(
        &self,
        job: &str,
        dispatch_id: u64,
        to_add: &[u64],
        to_remove: &[u64],
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<Vec<DispatchAssignment>> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT id FROM centrum_dispatches WHERE id = ? AND job = ?")
            .bind(MappingHelpers::to_db_id(dispatch_id))
            .bind(job)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(CoordinatorError::dispatch_not_found(job, dispatch_id));
        }

        for unit_id in to_remove {
            sqlx::query("DELETE FROM centrum_dispatches_asgmts WHERE dispatch_id = ? AND unit_id = ?")
                .bind(MappingHelpers::to_db_id(dispatch_id))
                .bind(MappingHelpers::to_db_id(*unit_id))
                .execute(&mut *tx)
                .await?;
        }

        for unit_id in to_add {
            sqlx::query(
                "INSERT OR IGNORE INTO centrum_dispatches_asgmts (dispatch_id, unit_id, created_at, expires_at) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(MappingHelpers::to_db_id(dispatch_id))
            .bind(MappingHelpers::to_db_id(*unit_id))
            .bind(now)
            .bind(expires_at)
            .execute(&mut *tx)
            .await?;
        }

        let rows = sqlx::query(
            "SELECT * FROM centrum_dispatches_asgmts WHERE dispatch_id = ? ORDER BY created_at, unit_id",
        )
        .bind(MappingHelpers::to_db_id(dispatch_id))
        .fetch_all(&mut *tx)
        .await?;
        let assignments = rows
            .iter()
            .map(MappingHelpers::row_to_assignment)
            .collect::<CoordinatorResult<Vec<_>>>()?;

        tx.commit().await?;
        Ok(assignments)
    }

    #[instrument(skip(self))]
    async fn accept_assignment(&self, dispatch_id: u64, unit_id: u64) -> CoordinatorResult<bool> {
        let result = sqlx::query(
            "UPDATE centrum_dispatches_asgmts SET expires_at = NULL \
             WHERE dispatch_id = ? AND unit_id = ? AND expires_at IS NOT NULL",
        )
        .bind(MappingHelpers::to_db_id(dispatch_id))
        .bind(MappingHelpers::to_db_id(unit_id))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn list_expired_assignments(
        &self,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<Vec<ExpiredAssignment>> {
        let rows = sqlx::query(
            "SELECT d.job, a.dispatch_id, a.unit_id FROM centrum_dispatches_asgmts a \
             INNER JOIN centrum_dispatches d ON d.id = a.dispatch_id \
             WHERE a.expires_at IS NOT NULL AND a.expires_at <= ? \
             ORDER BY a.dispatch_id, a.unit_id",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ExpiredAssignment {
                    job: row.try_get("job")?,
                    dispatch_id: MappingHelpers::id(row, "dispatch_id")?,
                    unit_id: MappingHelpers::id(row, "unit_id")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self, kinds))]
    async fn list_by_latest_status(
        &self,
        kinds: &[DispatchStatusKind],
        older_than: DateTime<Utc>,
    ) -> CoordinatorResult<Vec<Dispatch>> {
        let sql = if kinds.is_empty() {
            "SELECT d.job, d.id FROM centrum_dispatches d \
             LEFT JOIN (SELECT dispatch_id, MAX(id) AS max_id FROM centrum_dispatches_status GROUP BY dispatch_id) latest \
                 ON latest.dispatch_id = d.id \
             LEFT JOIN centrum_dispatches_status s ON s.id = latest.max_id \
             WHERE COALESCE(s.created_at, d.created_at) < ? ORDER BY d.id"
                .to_string()
        } else {
            let placeholders = vec!["?"; kinds.len()].join(", ");
            format!(
                "SELECT d.job, d.id FROM centrum_dispatches_status s {LATEST_STATUS_JOIN} \
                 INNER JOIN centrum_dispatches d ON d.id = s.dispatch_id \
                 WHERE s.created_at < ? AND s.status IN ({placeholders}) ORDER BY d.id"
            )
        };

        let mut query = sqlx::query(&sql).bind(older_than);
        for kind in kinds {
            query = query.bind(kind.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut dispatches = Vec::with_capacity(rows.len());
        for row in &rows {
            let job: String = row.try_get("job")?;
            let id = MappingHelpers::id(row, "id")?;
            if let Some(dispatch) = self.get(&job, id).await? {
                dispatches.push(dispatch);
            }
        }
        Ok(dispatches)
    }
}
