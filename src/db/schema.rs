//! Schema 初始化子模块
//!
//! ## 职责
//! - 创建/迁移 `entries` 表结构与索引（按列存在性检查做增量迁移，绝不破坏性）
//! - 维护 `entries_fts` 全文索引及其同步触发器，列不齐时透明重建
//! - 打开阶段的损坏隔离：非法数据库文件重命名隔离后重建空 Schema
//!
//! ## 输入/输出
//! - 输入：`&StorageLayout` / `&Connection`
//! - 输出：`Result<(), AppError>`
//!
//! ## 错误语义
//! - DDL 失败统一映射为 `AppError::Database`
//! - 隔离重命名失败映射为 `AppError::Storage`（唯一会上抛的恢复失败）

use std::fs;

use rusqlite::Connection;

use crate::error::AppError;
use crate::layout::StorageLayout;

/// `entries` 表必备列：名称与增量迁移 DDL
const REQUIRED_COLUMNS: &[(&str, &str)] = &[
    ("app_source", "ALTER TABLE entries ADD COLUMN app_source TEXT"),
    ("is_pinned", "ALTER TABLE entries ADD COLUMN is_pinned INTEGER NOT NULL DEFAULT 0"),
    ("label", "ALTER TABLE entries ADD COLUMN label TEXT"),
    ("card_color", "ALTER TABLE entries ADD COLUMN card_color TEXT"),
    ("metadata", "ALTER TABLE entries ADD COLUMN metadata TEXT"),
    ("paste_count", "ALTER TABLE entries ADD COLUMN paste_count INTEGER NOT NULL DEFAULT 0"),
    ("content_hash", "ALTER TABLE entries ADD COLUMN content_hash TEXT"),
];

/// 全文索引覆盖的列，缺任何一列视为过期索引
const FTS_COLUMNS: &[&str] = &["content", "app_source", "label"];

fn create_base_table(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS entries (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL DEFAULT '',
            entry_type TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            modified_at INTEGER NOT NULL,
            app_source TEXT,
            is_pinned INTEGER NOT NULL DEFAULT 0,
            label TEXT,
            card_color TEXT,
            metadata TEXT,
            paste_count INTEGER NOT NULL DEFAULT 0,
            content_hash TEXT
        );",
    )
    .map_err(|e| AppError::Database(format!("创建条目表失败: {}", e)))
}

/// 按存在性检查补齐缺失列（增量迁移，永不删除列）
fn ensure_entry_columns(conn: &Connection) -> Result<(), AppError> {
    let mut stmt = conn
        .prepare("PRAGMA table_info(entries)")
        .map_err(|e| AppError::Database(format!("读取表结构失败: {}", e)))?;
    let existing: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(|e| AppError::Database(format!("查询表结构失败: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::Database(format!("读取列名失败: {}", e)))?;

    for (name, ddl) in REQUIRED_COLUMNS {
        if !existing.iter().any(|c| c == name) {
            conn.execute(ddl, [])
                .map_err(|e| AppError::Database(format!("补齐列 '{}' 失败: {}", name, e)))?;
        }
    }
    Ok(())
}

fn create_indexes(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_entries_created_at ON entries(created_at);
         CREATE INDEX IF NOT EXISTS idx_entries_modified_at ON entries(modified_at);
         CREATE INDEX IF NOT EXISTS idx_entries_type ON entries(entry_type);
         CREATE INDEX IF NOT EXISTS idx_entries_pinned ON entries(is_pinned);
         CREATE INDEX IF NOT EXISTS idx_entries_content_hash ON entries(content_hash);",
    )
    .map_err(|e| AppError::Database(format!("创建条目索引失败: {}", e)))
}

/// 已注册的 FTS 表 DDL；不存在时返回 None
fn registered_fts_sql(conn: &Connection) -> Result<Option<String>, AppError> {
    conn.query_row(
        "SELECT sql FROM sqlite_master WHERE type='table' AND name='entries_fts'",
        [],
        |row| row.get::<_, Option<String>>(0),
    )
    .or_else(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other),
    })
    .map_err(|e| AppError::Database(format!("查询全文索引注册信息失败: {}", e)))
}

fn drop_fts(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(
        "DROP TRIGGER IF EXISTS entries_fts_ai;
         DROP TRIGGER IF EXISTS entries_fts_ad;
         DROP TRIGGER IF EXISTS entries_fts_au;
         DROP TABLE IF EXISTS entries_fts;",
    )
    .map_err(|e| AppError::Database(format!("删除过期全文索引失败: {}", e)))
}

fn create_fts(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS entries_fts USING fts5(
            content, app_source, label,
            content='entries', content_rowid='rowid'
        );
        CREATE TRIGGER IF NOT EXISTS entries_fts_ai AFTER INSERT ON entries BEGIN
            INSERT INTO entries_fts(rowid, content, app_source, label)
            VALUES (new.rowid, new.content, new.app_source, new.label);
        END;
        CREATE TRIGGER IF NOT EXISTS entries_fts_ad AFTER DELETE ON entries BEGIN
            INSERT INTO entries_fts(entries_fts, rowid, content, app_source, label)
            VALUES ('delete', old.rowid, old.content, old.app_source, old.label);
        END;
        CREATE TRIGGER IF NOT EXISTS entries_fts_au AFTER UPDATE ON entries BEGIN
            INSERT INTO entries_fts(entries_fts, rowid, content, app_source, label)
            VALUES ('delete', old.rowid, old.content, old.app_source, old.label);
            INSERT INTO entries_fts(rowid, content, app_source, label)
            VALUES (new.rowid, new.content, new.app_source, new.label);
        END;",
    )
    .map_err(|e| AppError::Database(format!("创建全文索引失败: {}", e)))
}

/// 校验并按需重建全文索引
///
/// 注册 DDL 缺少任一必备列说明索引来自旧版本，直接删除重建；
/// 新建（含重建）后执行 'rebuild' 从主表回填。
fn ensure_fts(conn: &Connection) -> Result<(), AppError> {
    let mut needs_rebuild = false;

    match registered_fts_sql(conn)? {
        Some(sql) => {
            let stale = FTS_COLUMNS.iter().any(|col| !sql.contains(col));
            if stale {
                log::warn!("全文索引列不齐，删除重建");
                drop_fts(conn)?;
                needs_rebuild = true;
            }
        }
        None => needs_rebuild = true,
    }

    create_fts(conn)?;

    if needs_rebuild {
        conn.execute(
            "INSERT INTO entries_fts(entries_fts) VALUES('rebuild')",
            [],
        )
        .map_err(|e| AppError::Database(format!("回填全文索引失败: {}", e)))?;
    }
    Ok(())
}

pub(super) fn initialize_schema(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .ok();

    create_base_table(conn)?;
    ensure_entry_columns(conn)?;
    create_indexes(conn)?;
    ensure_fts(conn)?;
    Ok(())
}

fn is_not_a_database(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(code, _)
            if code.code == rusqlite::ErrorCode::NotADatabase
                || code.code == rusqlite::ErrorCode::DatabaseCorrupt
    )
}

/// 打开并探测主文件；文件非法时返回底层错误供隔离判断
fn try_open(layout: &StorageLayout) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open(layout.db_path())?;
    // 对损坏文件，首个真实读操作才会暴露 NOTADB
    conn.query_row("PRAGMA schema_version", [], |row| row.get::<_, i64>(0))?;
    Ok(conn)
}

/// 把非法数据库文件移出主路径，丢弃 WAL/SHM 伴生文件
fn quarantine(layout: &StorageLayout) -> Result<(), AppError> {
    let db_path = layout.db_path();
    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
    let quarantined = db_path.with_file_name(format!("clipboard.db.corrupt-{}", stamp));

    fs::rename(&db_path, &quarantined).map_err(|e| {
        AppError::Storage(format!(
            "隔离损坏数据库 '{}' 失败: {}",
            db_path.display(),
            e
        ))
    })?;

    for companion in ["db-wal", "db-shm"] {
        let _ = fs::remove_file(db_path.with_extension(companion));
    }

    log::warn!("数据库文件损坏，已隔离到 {}", quarantined.display());
    Ok(())
}

/// 打开存储：损坏文件静默隔离并重建，调用方总是得到可用 Schema
pub(super) fn open_with_recovery(layout: &StorageLayout) -> Result<(), AppError> {
    match try_open(layout) {
        Ok(conn) => initialize_schema(&conn),
        Err(e) if is_not_a_database(&e) => {
            quarantine(layout)?;
            let conn = Connection::open(layout.db_path())
                .map_err(|e| AppError::Database(format!("重建数据库失败: {}", e)))?;
            initialize_schema(&conn)
        }
        Err(e) => Err(AppError::Database(format!("打开数据库失败: {}", e))),
    }
}
