//! 异步富化子模块
//!
//! ## 职责
//! - 图片捕获：解码内存载荷，持久化为 `images/img_<ts>.png`，
//!   生成缩略图到 `thumbs/<id>.png`，把路径/尺寸合并回条目元数据，
//!   并把 `content` 重写为持久化路径
//! - 文件捕获：统计数量/总大小/是否含目录；单个媒体文件记录其大小与路径
//!
//! ## 错误语义
//! - 富化在采集路径之外执行，任何失败由调用方记日志；基础插入不回滚
//! - 条目在富化完成前被删除属正常竞态：丢弃结果并清理已写文件

use std::fs;
use std::path::Path;
use std::sync::Arc;

use image::{GenericImageView, ImageFormat};
use tokio::sync::broadcast;

use crate::db::ClipboardStore;
use crate::error::AppError;
use crate::layout::StorageLayout;
use crate::model::{
    ClipboardEntry, EntryMetadata, EntryType, FileMetadata, ImageMetadata, MediaMetadata,
};

use super::IngestEvent;

/// 解码并落盘后的图片产物
struct PersistedImage {
    image_path: String,
    thumbnail_path: String,
    width: u32,
    height: u32,
    byte_size: u64,
}

/// CPU 密集的解码/缩放/编码放到阻塞线程池执行
fn persist_image_blocking(
    layout: &StorageLayout,
    entry_id: &str,
    bytes: &[u8],
    max_dim: u32,
) -> Result<PersistedImage, AppError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| AppError::Image(format!("图片解码失败: {}", e)))?;

    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S%3f");
    let image_path = layout.images_dir().join(format!("img_{}.png", stamp));
    decoded
        .save_with_format(&image_path, ImageFormat::Png)
        .map_err(|e| AppError::Image(format!("保存图片失败: {}", e)))?;

    let thumbnail_path = layout.thumbs_dir().join(format!("{}.png", entry_id));
    decoded
        .thumbnail(max_dim, max_dim)
        .save_with_format(&thumbnail_path, ImageFormat::Png)
        .map_err(|e| AppError::Image(format!("生成缩略图失败: {}", e)))?;

    let (width, height) = decoded.dimensions();
    Ok(PersistedImage {
        image_path: image_path.to_string_lossy().to_string(),
        thumbnail_path: thumbnail_path.to_string_lossy().to_string(),
        width,
        height,
        byte_size: bytes.len() as u64,
    })
}

pub(super) async fn enrich_image(
    store: Arc<ClipboardStore>,
    layout: StorageLayout,
    events: broadcast::Sender<IngestEvent>,
    entry: ClipboardEntry,
    bytes: Vec<u8>,
    max_dim: u32,
) -> Result<(), AppError> {
    let entry_id = entry.id.clone();
    let persisted = tokio::task::spawn_blocking(move || {
        persist_image_blocking(&layout, &entry.id, &bytes, max_dim)
    })
    .await
    .map_err(|e| AppError::Image(format!("富化任务执行失败: {}", e)))??;

    // 重新读取：富化期间条目可能已被用户操作更新或删除
    let Some(mut current) = store.get_by_id(&entry_id)? else {
        log::debug!("条目 {} 在富化完成前被删除，丢弃产物", entry_id);
        let _ = fs::remove_file(&persisted.image_path);
        let _ = fs::remove_file(&persisted.thumbnail_path);
        return Ok(());
    };

    current.metadata.merge(EntryMetadata::Image(ImageMetadata {
        width: Some(persisted.width),
        height: Some(persisted.height),
        byte_size: Some(persisted.byte_size),
        image_path: Some(persisted.image_path.clone()),
        thumbnail_path: Some(persisted.thumbnail_path),
    }));
    current.content = persisted.image_path;
    current.touch();
    store.update(&current)?;

    let _ = events.send(IngestEvent::ThumbnailReady(current));
    Ok(())
}

/// 统计路径列表的文件元数据，单个路径读取失败时跳过
fn collect_file_stats(paths: &[String]) -> FileMetadata {
    let mut total_size = 0_u64;
    let mut contains_directory = false;
    for raw in paths {
        let path = Path::new(raw);
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => contains_directory = true,
            Ok(meta) => total_size += meta.len(),
            Err(e) => log::debug!("读取 '{}' 元数据失败: {}", raw, e),
        }
    }
    FileMetadata {
        file_count: Some(paths.len() as u64),
        total_size: Some(total_size),
        contains_directory: Some(contains_directory),
    }
}

pub(super) async fn enrich_files(
    store: Arc<ClipboardStore>,
    entry: ClipboardEntry,
    paths: Vec<String>,
) -> Result<(), AppError> {
    let patch = match entry.entry_type {
        EntryType::Audio | EntryType::Video => {
            let byte_size = paths
                .first()
                .and_then(|p| fs::metadata(p).ok())
                .map(|m| m.len());
            EntryMetadata::Media(MediaMetadata {
                duration_secs: None,
                byte_size,
                media_path: paths.first().cloned(),
            })
        }
        _ => EntryMetadata::File(collect_file_stats(&paths)),
    };

    let Some(mut current) = store.get_by_id(&entry.id)? else {
        return Ok(());
    };
    current.metadata.merge(patch);
    current.touch();
    store.update(&current)
}

#[cfg(test)]
mod tests {
    use super::collect_file_stats;

    #[test]
    fn collect_file_stats_counts_sizes_and_directories() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let file_a = dir.path().join("a.bin");
        let file_b = dir.path().join("b.bin");
        std::fs::write(&file_a, vec![0_u8; 5]).expect("write a");
        std::fs::write(&file_b, vec![0_u8; 11]).expect("write b");
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).expect("create dir");

        let paths = vec![
            file_a.to_string_lossy().to_string(),
            file_b.to_string_lossy().to_string(),
            sub.to_string_lossy().to_string(),
            dir.path().join("missing.bin").to_string_lossy().to_string(),
        ];
        let stats = collect_file_stats(&paths);

        assert_eq!(stats.file_count, Some(4));
        assert_eq!(stats.total_size, Some(16));
        assert_eq!(stats.contains_directory, Some(true));
    }
}
