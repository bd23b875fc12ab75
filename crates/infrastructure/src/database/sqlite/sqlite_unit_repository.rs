use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coordinator_domain::{
    entities::{MembershipChange, Unit, UnitAssignment, UnitStatus, UserUnitMapping},
    repositories::UnitRepository,
};
use coordinator_errors::{CoordinatorError, CoordinatorResult};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::collections::HashMap;
use tracing::{debug, instrument};

use super::mapping::MappingHelpers;

pub struct SqliteUnitRepository {
    pool: SqlitePool,
}

impl SqliteUnitRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_unit(row: &SqliteRow) -> CoordinatorResult<Unit> {
        Ok(Unit {
            id: MappingHelpers::id(row, "id")?,
            job: row.try_get("job")?,
            name: row.try_get("name")?,
            initials: row.try_get("initials")?,
            color: row.try_get("color")?,
            description: row.try_get("description")?,
            status: None,
            users: Vec::new(),
            revision: MappingHelpers::id(row, "revision")?,
        })
    }

    async fn latest_status(&self, unit_id: u64) -> CoordinatorResult<Option<UnitStatus>> {
        let row = sqlx::query(
            "SELECT * FROM centrum_units_status WHERE unit_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(MappingHelpers::to_db_id(unit_id))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(MappingHelpers::row_to_unit_status).transpose()
    }

    async fn members(&self, unit_id: u64) -> CoordinatorResult<Vec<UnitAssignment>> {
        let rows = sqlx::query(
            "SELECT * FROM centrum_units_users WHERE unit_id = ? ORDER BY created_at, user_id",
        )
        .bind(MappingHelpers::to_db_id(unit_id))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(MappingHelpers::row_to_unit_member).collect()
    }
}

#[async_trait]
impl UnitRepository for SqliteUnitRepository {
    #[instrument(skip(self))]
    async fn list(&self, job: &str) -> CoordinatorResult<Vec<Unit>> {
        let rows = sqlx::query("SELECT * FROM centrum_units WHERE job = ? ORDER BY id")
            .bind(job)
            .fetch_all(&self.pool)
            .await?;
        let mut units = rows
            .iter()
            .map(Self::row_to_unit)
            .collect::<CoordinatorResult<Vec<_>>>()?;

        let status_rows = sqlx::query(
            "SELECT s.* FROM centrum_units_status s \
             INNER JOIN (SELECT unit_id, MAX(id) AS max_id FROM centrum_units_status GROUP BY unit_id) latest \
                 ON s.id = latest.max_id \
             INNER JOIN centrum_units u ON u.id = s.unit_id WHERE u.job = ?",
        )
        .bind(job)
        .fetch_all(&self.pool)
        .await?;
        let mut statuses: HashMap<u64, UnitStatus> = HashMap::new();
        for row in &status_rows {
            let status = MappingHelpers::row_to_unit_status(row)?;
            statuses.insert(status.unit_id, status);
        }

        let member_rows = sqlx::query(
            "SELECT * FROM centrum_units_users WHERE job = ? ORDER BY created_at, user_id",
        )
        .bind(job)
        .fetch_all(&self.pool)
        .await?;
        let mut members: HashMap<u64, Vec<UnitAssignment>> = HashMap::new();
        for row in &member_rows {
            let member = MappingHelpers::row_to_unit_member(row)?;
            members.entry(member.unit_id).or_default().push(member);
        }

        for unit in units.iter_mut() {
            unit.status = statuses.remove(&unit.id);
            unit.users = members.remove(&unit.id).unwrap_or_default();
        }

        Ok(units)
    }

    #[instrument(skip(self))]
    async fn get(&self, job: &str, id: u64) -> CoordinatorResult<Option<Unit>> {
        let row = sqlx::query("SELECT * FROM centrum_units WHERE job = ? AND id = ?")
            .bind(job)
            .bind(MappingHelpers::to_db_id(id))
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut unit = Self::row_to_unit(&row)?;
        unit.status = self.latest_status(id).await?;
        unit.users = self.members(id).await?;
        Ok(Some(unit))
    }

    #[instrument(skip(self, unit), fields(job = %unit.job, name = %unit.name))]
    async fn create(&self, unit: &Unit) -> CoordinatorResult<Unit> {
        let result = sqlx::query(
            "INSERT INTO centrum_units (job, name, initials, color, description, revision) \
             VALUES (?, ?, ?, ?, ?, 0)",
        )
        .bind(&unit.job)
        .bind(&unit.name)
        .bind(&unit.initials)
        .bind(&unit.color)
        .bind(&unit.description)
        .execute(&self.pool)
        .await?;

        let mut created = unit.clone();
        created.id = result.last_insert_rowid() as u64;
        created.status = None;
        created.users = Vec::new();
        created.revision = 0;
        Ok(created)
    }

    #[instrument(skip(self, unit), fields(job = %unit.job, unit_id = unit.id))]
    async fn update(&self, unit: &Unit) -> CoordinatorResult<u64> {
        let row = sqlx::query(
            "UPDATE centrum_units SET name = ?, initials = ?, color = ?, description = ?, \
             revision = revision + 1 WHERE id = ? AND job = ? RETURNING revision",
        )
        .bind(&unit.name)
        .bind(&unit.initials)
        .bind(&unit.color)
        .bind(&unit.description)
        .bind(MappingHelpers::to_db_id(unit.id))
        .bind(&unit.job)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => MappingHelpers::id(&row, "revision"),
            None => Err(CoordinatorError::unit_not_found(&unit.job, unit.id)),
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, job: &str, id: u64) -> CoordinatorResult<bool> {
        let result = sqlx::query("DELETE FROM centrum_units WHERE id = ? AND job = ?")
            .bind(MappingHelpers::to_db_id(id))
            .bind(job)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, status), fields(unit_id = status.unit_id, status = %status.status))]
    async fn add_status(&self, status: &UnitStatus) -> CoordinatorResult<UnitStatus> {
        let result = sqlx::query(
            r#"
            INSERT INTO centrum_units_status
                (created_at, unit_id, status, reason, code, user_id, creator_id, x, y, postal)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(status.created_at)
        .bind(MappingHelpers::to_db_id(status.unit_id))
        .bind(status.status.as_str())
        .bind(&status.reason)
        .bind(&status.code)
        .bind(status.user_id)
        .bind(status.creator_id)
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
    async fn update_members(
        &self,
        job: &str,
        unit_id: u64,
        to_add: &[i32],
        to_remove: &[i32],
        now: DateTime<Utc>,
    ) -> CoordinatorResult<MembershipChange> {
        let db_unit_id = MappingHelpers::to_db_id(unit_id);
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT id FROM centrum_units WHERE id = ? AND job = ?")
            .bind(db_unit_id)
            .bind(job)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(CoordinatorError::unit_not_found(job, unit_id));
        }

        let mut change = MembershipChange::default();

        for user_id in to_add {
            let current = sqlx::query(
                "SELECT unit_id FROM centrum_units_users WHERE job = ? AND user_id = ?",
            )
            .bind(job)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(row) = current {
                let current_unit = MappingHelpers::id(&row, "unit_id")?;
                if current_unit == unit_id {
                    continue;
                }
                sqlx::query("DELETE FROM centrum_units_users WHERE job = ? AND user_id = ?")
                    .bind(job)
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("UPDATE centrum_units SET revision = revision + 1 WHERE id = ?")
                    .bind(MappingHelpers::to_db_id(current_unit))
                    .execute(&mut *tx)
                    .await?;
                change.moved_from.push((current_unit, *user_id));
            }

            sqlx::query(
                "INSERT INTO centrum_units_users (unit_id, job, user_id, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(db_unit_id)
            .bind(job)
            .bind(user_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            change.added.push(*user_id);
        }

        for user_id in to_remove {
            let result =
                sqlx::query("DELETE FROM centrum_units_users WHERE unit_id = ? AND user_id = ?")
                    .bind(db_unit_id)
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
            if result.rows_affected() > 0 {
                change.removed.push(*user_id);
            }
        }

        if !change.added.is_empty() || !change.removed.is_empty() {
            sqlx::query("UPDATE centrum_units SET revision = revision + 1 WHERE id = ?")
                .bind(db_unit_id)
                .execute(&mut *tx)
                .await?;
        }
        let row = sqlx::query("SELECT revision FROM centrum_units WHERE id = ?")
            .bind(db_unit_id)
            .fetch_one(&mut *tx)
            .await?;
        change.revision = MappingHelpers::id(&row, "revision")?;

        let rows = sqlx::query(
            "SELECT * FROM centrum_units_users WHERE unit_id = ? ORDER BY created_at, user_id",
        )
        .bind(db_unit_id)
        .fetch_all(&mut *tx)
        .await?;
        change.members = rows
            .iter()
            .map(MappingHelpers::row_to_unit_member)
            .collect::<CoordinatorResult<Vec<_>>>()?;

        tx.commit().await?;

        debug!(
            unit_id,
            added = change.added.len(),
            removed = change.removed.len(),
            moved = change.moved_from.len(),
            "单元成员已更新"
        );
        Ok(change)
    }

    #[instrument(skip(self))]
    async fn list_user_unit_mappings(&self, job: &str) -> CoordinatorResult<Vec<UserUnitMapping>> {
        let rows = sqlx::query(
            "SELECT job, user_id, unit_id FROM centrum_units_users WHERE job = ? ORDER BY user_id",
        )
        .bind(job)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(UserUnitMapping {
                    job: row.try_get("job")?,
                    user_id: row.try_get("user_id")?,
                    unit_id: MappingHelpers::id(row, "unit_id")?,
                })
            })
            .collect()
    }
}
