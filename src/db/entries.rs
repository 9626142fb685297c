//! 条目 CRUD 子模块
//!
//! ## 职责
//! - 条目的保存/全量替换/点查/列表/删除
//! - 按天数的保留清理（可选排除置顶），超阈值批次后触发压缩
//! - 删除条目时尽力清理其拥有的资源文件（图片原件 + 各扩展名缩略图）
//!
//! ## 错误语义
//! - SQL 失败统一映射为 `AppError::Database`
//! - 空 id 的 `update` 是程序性错误，映射为 `AppError::InvalidArgument`
//! - 资源文件删除失败仅记录日志，不影响主操作结果

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::error::AppError;
use crate::model::{ClipboardEntry, EntryMetadata, EntryType};

use super::{entry_from_row, ClipboardStore, ENTRY_COLUMNS};

/// 缩略图可能的扩展名变体，删除时全部尝试
const THUMB_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// 单批删除超过此行数时执行压缩，抑制存储膨胀
const COMPACT_THRESHOLD: i64 = 50;

impl ClipboardStore {
    /// 保存新条目；id 为空时在此分配
    pub fn save(&self, entry: &mut ClipboardEntry) -> Result<(), AppError> {
        if entry.id.is_empty() {
            entry.id = Uuid::new_v4().to_string();
        }

        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO entries (id, content, entry_type, created_at, modified_at,
                 app_source, is_pinned, label, card_color, metadata, paste_count, content_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                entry.id,
                entry.content,
                entry.entry_type.as_str(),
                entry.created_at,
                entry.modified_at,
                entry.app_source,
                entry.is_pinned as i64,
                entry.label,
                entry.card_color.as_str(),
                entry.metadata.to_column(),
                entry.paste_count,
                entry.content_hash,
            ],
        )
        .map_err(|e| AppError::Database(format!("插入条目失败: {}", e)))?;
        Ok(())
    }

    /// 按 id 全量替换（无部分更新语义）
    pub fn update(&self, entry: &ClipboardEntry) -> Result<(), AppError> {
        if entry.id.is_empty() {
            return Err(AppError::InvalidArgument("更新条目时 id 不能为空".to_string()));
        }

        let conn = self.connect()?;
        conn.execute(
            "UPDATE entries SET content = ?2, entry_type = ?3, created_at = ?4,
                 modified_at = ?5, app_source = ?6, is_pinned = ?7, label = ?8,
                 card_color = ?9, metadata = ?10, paste_count = ?11, content_hash = ?12
             WHERE id = ?1",
            params![
                entry.id,
                entry.content,
                entry.entry_type.as_str(),
                entry.created_at,
                entry.modified_at,
                entry.app_source,
                entry.is_pinned as i64,
                entry.label,
                entry.card_color.as_str(),
                entry.metadata.to_column(),
                entry.paste_count,
                entry.content_hash,
            ],
        )
        .map_err(|e| AppError::Database(format!("更新条目失败: {}", e)))?;
        Ok(())
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<ClipboardEntry>, AppError> {
        let conn = self.connect()?;
        conn.query_row(
            &format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?1"),
            params![id],
            entry_from_row,
        )
        .optional()
        .map_err(|e| AppError::Database(format!("按 id 查询条目失败: {}", e)))
    }

    /// 最近修改的一条（排除 Unknown）
    pub fn get_latest(&self) -> Result<Option<ClipboardEntry>, AppError> {
        let conn = self.connect()?;
        conn.query_row(
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM entries
                 WHERE entry_type <> 'unknown'
                 ORDER BY modified_at DESC LIMIT 1"
            ),
            [],
            entry_from_row,
        )
        .optional()
        .map_err(|e| AppError::Database(format!("查询最新条目失败: {}", e)))
    }

    pub fn find_by_content_and_type(
        &self,
        content: &str,
        entry_type: EntryType,
    ) -> Result<Option<ClipboardEntry>, AppError> {
        let conn = self.connect()?;
        conn.query_row(
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM entries
                 WHERE content = ?1 AND entry_type = ?2 LIMIT 1"
            ),
            params![content, entry_type.as_str()],
            entry_from_row,
        )
        .optional()
        .map_err(|e| AppError::Database(format!("按内容与类型查询失败: {}", e)))
    }

    pub fn find_by_content_hash(&self, hash: &str) -> Result<Option<ClipboardEntry>, AppError> {
        let conn = self.connect()?;
        conn.query_row(
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM entries
                 WHERE content_hash = ?1 LIMIT 1"
            ),
            params![hash],
            entry_from_row,
        )
        .optional()
        .map_err(|e| AppError::Database(format!("按内容哈希查询失败: {}", e)))
    }

    /// 全部非 Unknown 条目，按修改时间倒序
    pub fn get_all(&self) -> Result<Vec<ClipboardEntry>, AppError> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM entries
                 WHERE entry_type <> 'unknown'
                 ORDER BY modified_at DESC"
            ))
            .map_err(|e| AppError::Database(format!("准备列表查询失败: {}", e)))?;
        let items = stmt
            .query_map([], entry_from_row)
            .map_err(|e| AppError::Database(format!("查询条目列表失败: {}", e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Database(format!("读取条目行失败: {}", e)))?;
        Ok(items)
    }

    /// 删除条目并尽力清理其拥有的资源文件
    ///
    /// 读取与删除在同一条语句内完成，并发更新不会在两步之间丢失
    pub fn delete(&self, id: &str) -> Result<(), AppError> {
        let conn = self.connect()?;
        let doomed = conn
            .query_row(
                &format!("DELETE FROM entries WHERE id = ?1 RETURNING {ENTRY_COLUMNS}"),
                params![id],
                entry_from_row,
            )
            .optional()
            .map_err(|e| AppError::Database(format!("删除条目失败: {}", e)))?;
        drop(conn);

        if let Some(entry) = doomed {
            self.remove_owned_assets(&entry);
        }
        Ok(())
    }

    /// 保留清理：删除创建时间早于 `now − days` 的条目，返回删除数
    ///
    /// `exclude_pinned` 为 true 时置顶条目豁免。单批超过阈值后压缩一次。
    pub fn clear_old_items(&self, days: i64, exclude_pinned: bool) -> Result<i64, AppError> {
        let cutoff = crate::model::now_millis() - days * 24 * 60 * 60 * 1000;
        let pinned_clause = if exclude_pinned { "AND is_pinned = 0" } else { "" };

        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM entries
                 WHERE created_at < ?1 {pinned_clause}"
            ))
            .map_err(|e| AppError::Database(format!("准备保留清理查询失败: {}", e)))?;
        let doomed = stmt
            .query_map(params![cutoff], entry_from_row)
            .map_err(|e| AppError::Database(format!("查询过期条目失败: {}", e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Database(format!("读取过期条目失败: {}", e)))?;
        drop(stmt);

        let deleted = conn
            .execute(
                &format!("DELETE FROM entries WHERE created_at < ?1 {pinned_clause}"),
                params![cutoff],
            )
            .map_err(|e| AppError::Database(format!("删除过期条目失败: {}", e)))?
            as i64;

        if deleted > COMPACT_THRESHOLD {
            // 删除已提交；压缩失败不改变结果，也不能跳过后面的资产清理
            if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE); VACUUM;") {
                log::warn!("保留清理后压缩数据库失败: {}", e);
            }
        }
        drop(conn);

        for entry in &doomed {
            self.remove_owned_assets(entry);
        }

        Ok(deleted)
    }

    pub fn count(&self) -> Result<i64, AppError> {
        let conn = self.connect()?;
        conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))
            .map_err(|e| AppError::Database(format!("查询条目总数失败: {}", e)))
    }

    pub fn count_pinned(&self) -> Result<i64, AppError> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE is_pinned = 1",
            [],
            |row| row.get(0),
        )
        .map_err(|e| AppError::Database(format!("查询置顶数失败: {}", e)))
    }

    /// 把 WAL 中的写入刷回主文件，供备份导出前调用
    pub fn checkpoint(&self) -> Result<(), AppError> {
        let conn = self.connect()?;
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
            .map_err(|e| AppError::Database(format!("WAL 检查点失败: {}", e)))
    }

    /// 条目拥有的资源文件候选：元数据记录的图片/缩略图路径
    /// （限定在托管目录内），加上按条目 id 的全部缩略图扩展名变体
    fn owned_asset_candidates(&self, entry: &ClipboardEntry) -> Vec<PathBuf> {
        let images_dir = self.layout.images_dir();
        let thumbs_dir = self.layout.thumbs_dir();
        let managed = |raw: &str| {
            let path = PathBuf::from(raw);
            (path.starts_with(&images_dir) || path.starts_with(&thumbs_dir)).then_some(path)
        };

        let mut candidates = Vec::new();
        if let EntryMetadata::Image(meta) = &entry.metadata {
            if let Some(path) = meta.image_path.as_deref().and_then(managed) {
                candidates.push(path);
            }
            if let Some(path) = meta.thumbnail_path.as_deref().and_then(managed) {
                candidates.push(path);
            }
        }
        // 图片条目富化后 content 即为持久化路径
        if entry.entry_type == EntryType::Image {
            if let Some(path) = managed(&entry.content) {
                candidates.push(path);
            }
        }
        for ext in THUMB_EXTENSIONS {
            candidates.push(thumbs_dir.join(format!("{}.{}", entry.id, ext)));
        }
        candidates
    }

    fn remove_owned_assets(&self, entry: &ClipboardEntry) {
        for path in self.owned_asset_candidates(entry) {
            remove_file_best_effort(&path);
        }
    }
}

/// 尽力删除单个文件：不存在是正常情况，其余失败记录日志后继续
fn remove_file_best_effort(path: &Path) {
    match fs::remove_file(path) {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            log::warn!("删除资源文件 '{}' 失败: {}", path.display(), e);
        }
    }
}
