//! 存储目录管理模块
//!
//! # 设计思路
//!
//! 统一管理数据库文件与各资源子目录的路径，由调用方显式传入基准目录，
//! 各组件通过构造函数接收 `StorageLayout` 值——不依赖任何全局可变状态。
//!
//! # 实现思路
//!
//! - 所有子路径由 `base_dir` 派生，保证同一布局下路径一致。
//! - `ensure_dirs` 在目录不存在时自动 `create_dir_all`，避免上层判断。
//! - 所有可能失败的操作均返回 `Result`，不使用 `expect()` / `unwrap()`。

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::AppError;

/// 存储布局：数据库文件与资源目录的路径集合
#[derive(Debug, Clone)]
pub struct StorageLayout {
    base_dir: PathBuf,
}

/// 存储目录信息（路径 + 占用大小 + 文件数）
#[derive(Debug, Clone, Serialize)]
pub struct StorageInfo {
    pub path: String,
    pub total_size: u64,
    pub file_count: u64,
}

impl StorageLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// 主数据库文件
    pub fn db_path(&self) -> PathBuf {
        self.base_dir.join("clipboard.db")
    }

    /// 图片原件目录
    pub fn images_dir(&self) -> PathBuf {
        self.base_dir.join("images")
    }

    /// 缩略图目录
    pub fn thumbs_dir(&self) -> PathBuf {
        self.base_dir.join("thumbs")
    }

    /// 配置目录
    pub fn config_dir(&self) -> PathBuf {
        self.base_dir.join("config")
    }

    /// 保留清理哨兵文件
    pub fn sentinel_path(&self) -> PathBuf {
        self.base_dir.join("last_cleanup.txt")
    }

    /// 还原前快照目录（仅在还原期间存在）
    pub fn snapshot_dir(&self) -> PathBuf {
        self.base_dir.join("restore_snapshot")
    }

    /// 创建基准目录与各资源子目录
    pub fn ensure_dirs(&self) -> Result<(), AppError> {
        for dir in [
            self.base_dir.clone(),
            self.images_dir(),
            self.thumbs_dir(),
            self.config_dir(),
        ] {
            if !dir.exists() {
                fs::create_dir_all(&dir).map_err(|e| {
                    AppError::Storage(format!("创建目录 '{}' 失败: {}", dir.display(), e))
                })?;
            }
        }
        Ok(())
    }

    /// 统计某个托管目录的占用情况，单个条目读取失败时跳过
    pub fn dir_info(&self, dir: &Path) -> StorageInfo {
        let mut total_size: u64 = 0;
        let mut file_count: u64 = 0;

        if dir.exists() {
            if let Ok(entries) = fs::read_dir(dir) {
                for entry in entries.flatten() {
                    if let Ok(metadata) = entry.metadata() {
                        if metadata.is_file() {
                            total_size += metadata.len();
                            file_count += 1;
                        }
                    }
                }
            }
        }

        StorageInfo {
            path: dir.to_string_lossy().to_string(),
            total_size,
            file_count,
        }
    }
}
