//! 行映射辅助函数

use coordinator_domain::entities::{
    DispatchAssignment, DispatchAttributes, DispatchStatus, UnitAssignment, UnitStatus,
};
use coordinator_domain::status::{DispatchStatusKind, OperatingMode, UnitStatusKind};
use coordinator_errors::{CoordinatorError, CoordinatorResult};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub(crate) struct MappingHelpers;

impl MappingHelpers {
    pub fn to_db_id(id: u64) -> i64 {
        id as i64
    }

    pub fn id(row: &SqliteRow, field_name: &str) -> CoordinatorResult<u64> {
        let id: i64 = row.try_get(field_name)?;
        Ok(id as u64)
    }

    pub fn optional_id(row: &SqliteRow, field_name: &str) -> CoordinatorResult<Option<u64>> {
        let id: Option<i64> = row.try_get(field_name)?;
        Ok(id.map(|id| id as u64))
    }

    pub fn dispatch_status_kind(row: &SqliteRow, field_name: &str) -> CoordinatorResult<DispatchStatusKind> {
        let value: String = row.try_get(field_name)?;
        value.parse().map_err(CoordinatorError::Serialization)
    }

    pub fn unit_status_kind(row: &SqliteRow, field_name: &str) -> CoordinatorResult<UnitStatusKind> {
        let value: String = row.try_get(field_name)?;
        value.parse().map_err(CoordinatorError::Serialization)
    }

    pub fn operating_mode(row: &SqliteRow, field_name: &str) -> CoordinatorResult<OperatingMode> {
        let value: String = row.try_get(field_name)?;
        value.parse().map_err(CoordinatorError::Serialization)
    }

    pub fn attributes(row: &SqliteRow, field_name: &str) -> CoordinatorResult<DispatchAttributes> {
        let json_str: String = row.try_get(field_name)?;
        serde_json::from_str(&json_str)
            .map_err(|e| CoordinatorError::Serialization(format!("解析派遣单属性失败: {e}")))
    }

    pub fn row_to_dispatch_status(row: &SqliteRow) -> CoordinatorResult<DispatchStatus> {
        Ok(DispatchStatus {
            id: Self::id(row, "id")?,
            created_at: row.try_get("created_at")?,
            dispatch_id: Self::id(row, "dispatch_id")?,
            unit_id: Self::optional_id(row, "unit_id")?,
            status: Self::dispatch_status_kind(row, "status")?,
            reason: row.try_get("reason")?,
            code: row.try_get("code")?,
            user_id: row.try_get("user_id")?,
            x: row.try_get("x")?,
            y: row.try_get("y")?,
            postal: row.try_get("postal")?,
        })
    }

    pub fn row_to_assignment(row: &SqliteRow) -> CoordinatorResult<DispatchAssignment> {
        Ok(DispatchAssignment {
            dispatch_id: Self::id(row, "dispatch_id")?,
            unit_id: Self::id(row, "unit_id")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }

    pub fn row_to_unit_status(row: &SqliteRow) -> CoordinatorResult<UnitStatus> {
        Ok(UnitStatus {
            id: Self::id(row, "id")?,
            created_at: row.try_get("created_at")?,
            unit_id: Self::id(row, "unit_id")?,
            status: Self::unit_status_kind(row, "status")?,
            reason: row.try_get("reason")?,
            code: row.try_get("code")?,
            user_id: row.try_get("user_id")?,
            creator_id: row.try_get("creator_id")?,
            x: row.try_get("x")?,
            y: row.try_get("y")?,
            postal: row.try_get("postal")?,
        })
    }

    pub fn row_to_unit_member(row: &SqliteRow) -> CoordinatorResult<UnitAssignment> {
        Ok(UnitAssignment {
            unit_id: Self::id(row, "unit_id")?,
            user_id: row.try_get("user_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
