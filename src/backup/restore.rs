//! 还原子模块
//!
//! ## 职责
//! - 还原前在 `restore_snapshot/` 下快照当前数据库与资产目录
//! - 从归档整体替换数据库文件与 `images/` `thumbs/` `config/`
//! - 替换途中任何失败从快照回滚，保证不留下半还原状态
//!
//! ## 错误语义
//! - 归档无效或清单版本过新：返回 `Ok(false)`，现有数据不动
//! - 快照创建失败：记警告后继续（只是失去回滚能力），不中断还原
//! - 替换失败且回滚成功：返回 `AppError::Backup`，数据等同还原前

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;

use crate::error::AppError;

use super::{
    BackupManager, CONFIG_PREFIX, DB_ENTRY, IMAGES_PREFIX, MANIFEST_ENTRY, MANIFEST_VERSION,
    THUMBS_PREFIX,
};

impl BackupManager {
    /// 从归档还原；无效或版本过新返回 `Ok(false)`，成功返回 `Ok(true)`
    pub fn restore_backup(&self, archive: &Path) -> Result<bool, AppError> {
        let Some(manifest) = Self::validate_backup(archive) else {
            log::warn!("备份归档 '{}' 无效，拒绝还原", archive.display());
            return Ok(false);
        };
        if manifest.version > MANIFEST_VERSION {
            log::warn!(
                "备份清单版本 {} 高于支持的 {}，拒绝还原",
                manifest.version,
                MANIFEST_VERSION
            );
            return Ok(false);
        }

        // 替换前先刷 WAL，快照里的数据库文件才完整
        self.store.checkpoint()?;

        let snapshot = match self.take_snapshot() {
            Ok(dir) => Some(dir),
            Err(e) => {
                log::warn!("创建还原快照失败，本次还原不可回滚: {}", e);
                None
            }
        };

        match self.replace_from_archive(archive) {
            Ok(()) => {
                if let Some(dir) = snapshot {
                    let _ = fs::remove_dir_all(dir);
                }
                Ok(true)
            }
            Err(e) => {
                if let Some(dir) = &snapshot {
                    match self.rollback_from_snapshot(dir) {
                        Ok(()) => {
                            let _ = fs::remove_dir_all(dir);
                            Err(AppError::Backup(format!("还原失败，已回滚: {}", e)))
                        }
                        Err(rb) => Err(AppError::Backup(format!(
                            "还原失败且回滚失败（快照保留在 '{}'）: {}; 回滚错误: {}",
                            dir.display(),
                            e,
                            rb
                        ))),
                    }
                } else {
                    Err(AppError::Backup(format!("还原失败且无快照可回滚: {}", e)))
                }
            }
        }
    }

    /// 把当前数据库与资产目录复制到快照目录，返回快照路径
    fn take_snapshot(&self) -> Result<PathBuf, AppError> {
        let snapshot = self.layout.snapshot_dir();
        if snapshot.exists() {
            fs::remove_dir_all(&snapshot)?;
        }
        fs::create_dir_all(&snapshot)?;

        fs::copy(self.layout.db_path(), snapshot.join(DB_ENTRY))?;
        copy_dir_flat(&self.layout.images_dir(), &snapshot.join("images"))?;
        copy_dir_flat(&self.layout.thumbs_dir(), &snapshot.join("thumbs"))?;
        copy_dir_flat(&self.layout.config_dir(), &snapshot.join("config"))?;
        Ok(snapshot)
    }

    /// 清空现场并从归档解包；条目名只取文件名部分，防止路径穿越
    fn replace_from_archive(&self, archive: &Path) -> Result<(), AppError> {
        remove_wal_sidecars(&self.layout.db_path());
        reset_dir(&self.layout.images_dir())?;
        reset_dir(&self.layout.thumbs_dir())?;
        reset_dir(&self.layout.config_dir())?;

        let file = File::open(archive)
            .map_err(|e| AppError::Backup(format!("打开备份归档失败: {}", e)))?;
        let mut reader = Archive::new(GzDecoder::new(file));
        let entries = reader
            .entries()
            .map_err(|e| AppError::Backup(format!("读取备份归档失败: {}", e)))?;

        for entry in entries {
            let mut entry =
                entry.map_err(|e| AppError::Backup(format!("读取归档条目失败: {}", e)))?;
            let name = entry
                .path()
                .map_err(|e| AppError::Backup(format!("解析归档条目名失败: {}", e)))?
                .to_string_lossy()
                .to_string();

            let target = if name == DB_ENTRY {
                Some(self.layout.db_path())
            } else if name == MANIFEST_ENTRY {
                None
            } else if let Some(rest) = name.strip_prefix(IMAGES_PREFIX) {
                entry_target(&self.layout.images_dir(), rest)
            } else if let Some(rest) = name.strip_prefix(THUMBS_PREFIX) {
                entry_target(&self.layout.thumbs_dir(), rest)
            } else if let Some(rest) = name.strip_prefix(CONFIG_PREFIX) {
                entry_target(&self.layout.config_dir(), rest)
            } else {
                log::debug!("跳过未知归档条目 '{}'", name);
                None
            };

            if let Some(target) = target {
                entry
                    .unpack(&target)
                    .map_err(|e| AppError::Backup(format!("解包 '{}' 失败: {}", name, e)))?;
            }
        }
        Ok(())
    }

    fn rollback_from_snapshot(&self, snapshot: &Path) -> Result<(), AppError> {
        remove_wal_sidecars(&self.layout.db_path());
        fs::copy(snapshot.join(DB_ENTRY), self.layout.db_path())?;
        reset_dir(&self.layout.images_dir())?;
        copy_dir_flat(&snapshot.join("images"), &self.layout.images_dir())?;
        reset_dir(&self.layout.thumbs_dir())?;
        copy_dir_flat(&snapshot.join("thumbs"), &self.layout.thumbs_dir())?;
        reset_dir(&self.layout.config_dir())?;
        copy_dir_flat(&snapshot.join("config"), &self.layout.config_dir())?;
        Ok(())
    }
}

/// 归档条目名映射到目标目录下的文件路径；名字异常时跳过
fn entry_target(dir: &Path, rest: &str) -> Option<PathBuf> {
    let name = Path::new(rest).file_name()?;
    Some(dir.join(name))
}

/// WAL 侧文件和主文件必须一起替换，否则旧日志会污染新数据库
fn remove_wal_sidecars(db_path: &Path) {
    for suffix in ["-wal", "-shm"] {
        let sidecar = PathBuf::from(format!("{}{}", db_path.display(), suffix));
        if let Err(e) = fs::remove_file(&sidecar) {
            if e.kind() != io::ErrorKind::NotFound {
                log::warn!("删除 '{}' 失败: {}", sidecar.display(), e);
            }
        }
    }
}

fn reset_dir(dir: &Path) -> Result<(), io::Error> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)
}

/// 平铺复制目录下的常规文件；源目录不存在视为空
fn copy_dir_flat(src: &Path, dst: &Path) -> Result<(), io::Error> {
    fs::create_dir_all(dst)?;
    if !src.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(src)?.flatten() {
        let path = entry.path();
        if path.is_file() {
            fs::copy(&path, dst.join(entry.file_name()))?;
        }
    }
    Ok(())
}
