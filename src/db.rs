// ==========================================
// 加油机交易归集系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少并发访问时的偶发 busy 错误
// - 空库可直接使用: 缺表时按当前版本建表
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;
use tracing::{info, warn};

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
///
/// 说明：旧版本仅登记新版本号（表结构由 SCHEMA_SQL 幂等补齐）
pub const CURRENT_SCHEMA_VERSION: i64 = 2;

/// 标准交易表 + 追加去重查找索引 + 运行溯源表
///
/// v2: 去掉 v1 的唯一索引 ux_despachos_dedup；append 去重改为查找已有行
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS despachos (
    fecha     TEXT NOT NULL,
    hora      TEXT NOT NULL DEFAULT '00:00:00',
    sucursal  TEXT NOT NULL,
    pico      TEXT NOT NULL,
    manguera  TEXT NOT NULL DEFAULT 'a',
    producto  TEXT NOT NULL,
    volumen   REAL,
    importe   REAL,
    ppu       REAL,
    origen    TEXT NOT NULL
);

DROP INDEX IF EXISTS ux_despachos_dedup;

CREATE INDEX IF NOT EXISTS ix_despachos_dedup ON despachos (
    fecha, hora, sucursal, pico, manguera, producto
);

CREATE INDEX IF NOT EXISTS ix_despachos_fecha ON despachos (fecha, hora);

CREATE TABLE IF NOT EXISTS ingest_run (
    run_id             TEXT PRIMARY KEY,
    policy             TEXT NOT NULL,
    state              TEXT NOT NULL,
    files              INTEGER NOT NULL,
    skipped_files      INTEGER NOT NULL,
    records            INTEGER NOT NULL,
    persisted          INTEGER NOT NULL,
    duplicates_skipped INTEGER NOT NULL,
    report_json        TEXT NOT NULL,
    finished_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

/// 配置 SQLite 连接的统一 PRAGMA
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 建表（幂等），旧版本登记升级，新版本告警
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    match read_schema_version(conn)? {
        None => {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                [CURRENT_SCHEMA_VERSION],
            )?;
            info!(version = CURRENT_SCHEMA_VERSION, "初始化 schema_version");
        }
        Some(version) if version < CURRENT_SCHEMA_VERSION => {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                [CURRENT_SCHEMA_VERSION],
            )?;
            info!(from = version, to = CURRENT_SCHEMA_VERSION, "schema_version 已升级");
        }
        Some(version) if version != CURRENT_SCHEMA_VERSION => {
            warn!(
                expected = CURRENT_SCHEMA_VERSION,
                actual = version,
                "schema_version 高于当前代码，可能运行在新版本库上"
            );
        }
        Some(_) => {}
    }
    Ok(())
}
