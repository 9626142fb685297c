//! 数据库模块
//!
//! # 设计思路
//!
//! 将所有 SQLite 操作集中到 `ClipboardStore`，上层（采集协调器、
//! 保留调度器、备份管理器、外部 UI 外壳）只通过它的方法访问数据。
//!
//! # 并发模型
//!
//! 每个逻辑操作打开一条短生命周期连接，操作结束即关闭；
//! 不持有长事务，不在进程内加锁。WAL 日志模式允许写入期间并发读。
//! 正确性依赖每个操作自包含，以及 SQLite 引擎自身的并发控制。
//!
//! # 损坏恢复
//!
//! 打开时若主文件不是合法数据库，将其隔离（带时间戳后缀重命名，
//! 丢弃 WAL/SHM 伴生文件）并重建空 Schema。该路径对调用方静默，
//! 仅不可恢复的文件系统故障才会上抛。

use rusqlite::{Connection, Row};

use crate::error::AppError;
use crate::layout::StorageLayout;
use crate::model::{CardColor, ClipboardEntry, EntryMetadata, EntryType};

mod entries;
mod schema;
mod search;

pub use search::SearchFilter;

/// 条目查询的统一列顺序，行映射按此索引读取
pub(crate) const ENTRY_COLUMNS: &str = "id, content, entry_type, created_at, modified_at, \
     app_source, is_pinned, label, card_color, metadata, paste_count, content_hash";

/// 持久化存储：拥有数据库文件及其伴生文件的唯一所有权
///
/// 资源目录（images/thumbs）与备份管理器共享：本层写入与按条目删除，
/// 备份层整体读取/替换。调用方不得并发执行采集与还原。
pub struct ClipboardStore {
    layout: StorageLayout,
}

impl ClipboardStore {
    /// 打开（或新建）存储：确保目录存在、必要时隔离损坏文件、初始化 Schema
    pub fn open(layout: StorageLayout) -> Result<Self, AppError> {
        layout.ensure_dirs()?;
        let store = Self { layout };
        schema::open_with_recovery(&store.layout)?;
        Ok(store)
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// 打开一条操作级连接并设置运行参数
    pub(crate) fn connect(&self) -> Result<Connection, AppError> {
        let conn = Connection::open(self.layout.db_path())
            .map_err(|e| AppError::Database(format!("打开数据库失败: {}", e)))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .ok();
        Ok(conn)
    }
}

/// 按 `ENTRY_COLUMNS` 的列顺序把一行映射为条目
pub(crate) fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<ClipboardEntry> {
    let type_raw: String = row.get(2)?;
    let color_raw: Option<String> = row.get(8)?;
    let metadata_raw: Option<String> = row.get(9)?;
    let is_pinned: i64 = row.get(6)?;

    Ok(ClipboardEntry {
        id: row.get(0)?,
        content: row.get(1)?,
        entry_type: EntryType::parse(&type_raw),
        created_at: row.get(3)?,
        modified_at: row.get(4)?,
        app_source: row.get(5)?,
        is_pinned: is_pinned != 0,
        label: row.get(7)?,
        card_color: CardColor::parse(color_raw.as_deref().unwrap_or("none")),
        metadata: EntryMetadata::from_column(metadata_raw.as_deref()),
        paste_count: row.get(10)?,
        content_hash: row.get(11)?,
    })
}
