//! 备份管理模块
//!
//! # 设计思路
//!
//! 导出一个自描述归档（gzip 压缩的 tar 容器）：`manifest.json`、
//! 主数据库文件 `clipboard.db`、`images/*`、`thumbs/*`、`config/*`。
//! 清单是唯一一个无需触碰数据库即可校验/描述备份的入口。
//!
//! 导出前先对存储做 WAL 检查点，保证归档内的数据库文件自洽。
//! 校验/查看只读清单、无副作用，归档损坏一律返回「无效」而非报错。
//!
//! 还原状态机：校验 → 快照 → 替换 → {成功: 删除快照 | 失败: 从快照回滚}，
//! 不存在部分成功状态（见 `restore` 子模块）。

use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tar::{Archive, Builder, Header};

use crate::db::ClipboardStore;
use crate::error::AppError;
use crate::layout::StorageLayout;

mod restore;

/// 当前支持的清单版本；更新版本的归档拒绝还原
pub const MANIFEST_VERSION: i64 = 1;

pub(crate) const MANIFEST_ENTRY: &str = "manifest.json";
pub(crate) const DB_ENTRY: &str = "clipboard.db";
pub(crate) const IMAGES_PREFIX: &str = "images/";
pub(crate) const THUMBS_PREFIX: &str = "thumbs/";
pub(crate) const CONFIG_PREFIX: &str = "config/";

/// 备份清单：描述一次导出的全部元信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    pub version: i64,
    pub app_version: String,
    pub created_at_utc: String,
    pub item_count: i64,
    pub image_count: i64,
    pub thumbnail_count: i64,
    pub has_pinned_items: bool,
    pub machine_name: String,
}

/// 备份管理器：导出、校验、还原
pub struct BackupManager {
    store: Arc<ClipboardStore>,
    layout: StorageLayout,
}

impl BackupManager {
    pub fn new(store: Arc<ClipboardStore>, layout: StorageLayout) -> Self {
        Self { store, layout }
    }

    /// 导出备份归档到 `dest`，返回写入的清单
    pub fn create_backup(&self, dest: &Path) -> Result<BackupManifest, AppError> {
        // 先把 WAL 刷回主文件，导出的数据库才是自洽的
        self.store.checkpoint()?;

        let images_info = self.layout.dir_info(&self.layout.images_dir());
        let thumbs_info = self.layout.dir_info(&self.layout.thumbs_dir());
        let manifest = BackupManifest {
            version: MANIFEST_VERSION,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            created_at_utc: chrono::Utc::now().to_rfc3339(),
            item_count: self.store.count()?,
            image_count: images_info.file_count as i64,
            thumbnail_count: thumbs_info.file_count as i64,
            has_pinned_items: self.store.count_pinned()? > 0,
            machine_name: gethostname::gethostname().to_string_lossy().to_string(),
        };

        let file = File::create(dest)
            .map_err(|e| AppError::Backup(format!("创建备份文件失败: {}", e)))?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = Builder::new(encoder);

        append_bytes(
            &mut builder,
            MANIFEST_ENTRY,
            &serde_json::to_vec_pretty(&manifest)
                .map_err(|e| AppError::Backup(format!("序列化清单失败: {}", e)))?,
        )?;

        builder
            .append_path_with_name(self.layout.db_path(), DB_ENTRY)
            .map_err(|e| AppError::Backup(format!("归档数据库文件失败: {}", e)))?;

        append_dir_flat(&mut builder, &self.layout.images_dir(), IMAGES_PREFIX)?;
        append_dir_flat(&mut builder, &self.layout.thumbs_dir(), THUMBS_PREFIX)?;
        append_dir_flat(&mut builder, &self.layout.config_dir(), CONFIG_PREFIX)?;

        builder
            .into_inner()
            .and_then(|encoder| encoder.finish())
            .map_err(|e| AppError::Backup(format!("写入备份归档失败: {}", e)))?;

        Ok(manifest)
    }

    /// 校验归档：只读清单，不碰其他内容；任何损坏返回 None
    pub fn validate_backup(path: &Path) -> Option<BackupManifest> {
        let file = File::open(path).ok()?;
        let mut archive = Archive::new(GzDecoder::new(file));

        for entry in archive.entries().ok()? {
            let entry = entry.ok()?;
            let entry_path = entry.path().ok()?;
            if entry_path.as_ref() == Path::new(MANIFEST_ENTRY) {
                return serde_json::from_reader(entry).ok();
            }
        }
        None
    }

    /// 查看归档内容描述，与校验同一条只读路径
    pub fn inspect_backup(path: &Path) -> Option<BackupManifest> {
        Self::validate_backup(path)
    }
}

fn append_bytes<W: std::io::Write>(
    builder: &mut Builder<W>,
    name: &str,
    bytes: &[u8],
) -> Result<(), AppError> {
    let mut header = Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, name, bytes)
        .map_err(|e| AppError::Backup(format!("归档 '{}' 失败: {}", name, e)))
}

/// 把目录下的常规文件平铺归档到 `prefix/<文件名>`；目录不存在时跳过
fn append_dir_flat<W: std::io::Write>(
    builder: &mut Builder<W>,
    dir: &Path,
    prefix: &str,
) -> Result<(), AppError> {
    if !dir.exists() {
        return Ok(());
    }
    let entries = fs::read_dir(dir)
        .map_err(|e| AppError::Backup(format!("读取目录 '{}' 失败: {}", dir.display(), e)))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        builder
            .append_path_with_name(&path, format!("{prefix}{name}"))
            .map_err(|e| AppError::Backup(format!("归档 '{}' 失败: {}", path.display(), e)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{BackupManager, MANIFEST_VERSION};
    use crate::db::test_support::open_temp_store;
    use crate::db::ClipboardStore;
    use crate::model::{ClipboardEntry, EntryType};

    pub(super) fn seeded_manager() -> (tempfile::TempDir, Arc<ClipboardStore>, BackupManager) {
        let (dir, store) = open_temp_store();
        let layout = store.layout().clone();
        let store = Arc::new(store);

        let mut plain = ClipboardEntry::new("plain", EntryType::Text);
        store.save(&mut plain).expect("save plain");
        let mut pinned = ClipboardEntry::new("pinned", EntryType::Text);
        pinned.is_pinned = true;
        store.save(&mut pinned).expect("save pinned");

        std::fs::write(layout.images_dir().join("img_1.png"), b"img").expect("write image");
        std::fs::write(layout.thumbs_dir().join("t1.png"), b"t1").expect("write thumb 1");
        std::fs::write(layout.thumbs_dir().join("t2.png"), b"t2").expect("write thumb 2");
        std::fs::write(layout.config_dir().join("settings.json"), b"{}").expect("write config");

        let manager = BackupManager::new(Arc::clone(&store), layout);
        (dir, store, manager)
    }

    #[test]
    fn backup_roundtrip_manifest_matches_created_state() {
        let (dir, _store, manager) = seeded_manager();
        let archive = dir.path().join("backup.tar.gz");

        let created = manager.create_backup(&archive).expect("create backup");
        let validated = BackupManager::validate_backup(&archive).expect("validate backup");

        assert_eq!(validated, created);
        assert_eq!(validated.version, MANIFEST_VERSION);
        assert_eq!(validated.item_count, 2);
        assert_eq!(validated.image_count, 1);
        assert_eq!(validated.thumbnail_count, 2);
        assert!(validated.has_pinned_items);
        assert!(!validated.machine_name.is_empty());
    }

    #[test]
    fn validate_rejects_garbage_and_missing_files() {
        let dir = tempfile::tempdir().expect("create temp dir");

        let garbage = dir.path().join("garbage.tar.gz");
        std::fs::write(&garbage, b"definitely not a tarball").expect("write garbage");
        assert!(BackupManager::validate_backup(&garbage).is_none());

        assert!(BackupManager::validate_backup(&dir.path().join("missing.tar.gz")).is_none());
        assert!(BackupManager::inspect_backup(&garbage).is_none());
    }
}
