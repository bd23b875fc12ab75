use coordinator_errors::CoordinatorResult;
use sqlx::SqlitePool;
use tracing::debug;

const TABLES: [&str; 8] = [
    r#"
    CREATE TABLE IF NOT EXISTS centrum_settings (
        job TEXT PRIMARY KEY,
        enabled INTEGER NOT NULL DEFAULT 0,
        mode TEXT NOT NULL DEFAULT 'MANUAL',
        fallback_mode TEXT NOT NULL DEFAULT 'AUTO_ROUND_ROBIN'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS centrum_disponents (
        job TEXT NOT NULL,
        user_id INTEGER NOT NULL,
        PRIMARY KEY (job, user_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS centrum_units (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job TEXT NOT NULL,
        name TEXT NOT NULL,
        initials TEXT NOT NULL,
        color TEXT NOT NULL,
        description TEXT,
        revision INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS centrum_units_status (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at DATETIME NOT NULL,
        unit_id INTEGER NOT NULL,
        status TEXT NOT NULL,
        reason TEXT,
        code TEXT,
        user_id INTEGER,
        creator_id INTEGER,
        x REAL,
        y REAL,
        postal TEXT,
        FOREIGN KEY (unit_id) REFERENCES centrum_units(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS centrum_units_users (
        unit_id INTEGER NOT NULL,
        job TEXT NOT NULL,
        user_id INTEGER NOT NULL,
        created_at DATETIME NOT NULL,
        PRIMARY KEY (unit_id, user_id),
        UNIQUE (job, user_id),
        FOREIGN KEY (unit_id) REFERENCES centrum_units(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS centrum_dispatches (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job TEXT NOT NULL,
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL,
        message TEXT NOT NULL,
        description TEXT,
        attributes TEXT NOT NULL DEFAULT '{"list":[]}',
        x REAL NOT NULL,
        y REAL NOT NULL,
        postal TEXT,
        anon INTEGER NOT NULL DEFAULT 0,
        creator_id INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS centrum_dispatches_status (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at DATETIME NOT NULL,
        dispatch_id INTEGER NOT NULL,
        unit_id INTEGER,
        status TEXT NOT NULL,
        reason TEXT,
        code TEXT,
        user_id INTEGER,
        x REAL,
        y REAL,
        postal TEXT,
        FOREIGN KEY (dispatch_id) REFERENCES centrum_dispatches(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS centrum_dispatches_asgmts (
        dispatch_id INTEGER NOT NULL,
        unit_id INTEGER NOT NULL,
        created_at DATETIME NOT NULL,
        expires_at DATETIME,
        PRIMARY KEY (dispatch_id, unit_id),
        FOREIGN KEY (dispatch_id) REFERENCES centrum_dispatches(id) ON DELETE CASCADE,
        FOREIGN KEY (unit_id) REFERENCES centrum_units(id) ON DELETE CASCADE
    )
    "#,
];

const INDEXES: [&str; 6] = [
    "CREATE INDEX IF NOT EXISTS idx_dispatches_job ON centrum_dispatches(job)",
    "CREATE INDEX IF NOT EXISTS idx_dispatches_status_dispatch ON centrum_dispatches_status(dispatch_id, id)",
    "CREATE INDEX IF NOT EXISTS idx_dispatches_asgmts_expires ON centrum_dispatches_asgmts(expires_at)",
    "CREATE INDEX IF NOT EXISTS idx_units_job ON centrum_units(job)",
    "CREATE INDEX IF NOT EXISTS idx_units_status_unit ON centrum_units_status(unit_id, id)",
    "CREATE INDEX IF NOT EXISTS idx_units_users_job ON centrum_units_users(job)",
];

/// 建表与索引，可重复执行
pub async fn run_migrations(pool: &SqlitePool) -> CoordinatorResult<()> {
    debug!("Running SQLite database migrations");

    for table_sql in TABLES {
        sqlx::query(table_sql).execute(pool).await?;
    }
    for index_sql in INDEXES {
        sqlx::query(index_sql).execute(pool).await?;
    }

    debug!("Successfully completed SQLite database migrations");
    Ok(())
}
