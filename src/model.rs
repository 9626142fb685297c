//! 数据模型模块
//!
//! # 设计思路
//!
//! 定义持久化单元 `ClipboardEntry` 及其附属枚举。
//! 条目 id 为 UUID v4 字符串，首次保存时分配，此后不变。
//! 时间戳统一为 UTC 毫秒（`chrono::Utc::now().timestamp_millis()`）。
//!
//! 元数据不使用开放式字符串字典，而是按内容类型建模为带标签联合
//! `EntryMetadata`，并提供显式的 `merge` 补丁操作供异步富化阶段使用。

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// 条目内容类型
///
/// `Unknown` 仅作为失败捕获的暂态存在，按约定被所有读取/搜索/最新查询排除。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Text,
    Image,
    File,
    Folder,
    Link,
    Audio,
    Video,
    Unknown,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Text => "text",
            EntryType::Image => "image",
            EntryType::File => "file",
            EntryType::Folder => "folder",
            EntryType::Link => "link",
            EntryType::Audio => "audio",
            EntryType::Video => "video",
            EntryType::Unknown => "unknown",
        }
    }

    /// 从持久化字符串解析；无法识别的值按 `Unknown` 处理
    pub fn parse(value: &str) -> Self {
        match value {
            "text" => EntryType::Text,
            "image" => EntryType::Image,
            "file" => EntryType::File,
            "folder" => EntryType::Folder,
            "link" => EntryType::Link,
            "audio" => EntryType::Audio,
            "video" => EntryType::Video,
            _ => EntryType::Unknown,
        }
    }
}

/// 卡片颜色（封闭枚举）
///
/// 持久化中无法识别的值统一归一化为 `None`。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardColor {
    #[default]
    None,
    Red,
    Orange,
    Yellow,
    Green,
    Blue,
    Purple,
    Gray,
}

impl CardColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardColor::None => "none",
            CardColor::Red => "red",
            CardColor::Orange => "orange",
            CardColor::Yellow => "yellow",
            CardColor::Green => "green",
            CardColor::Blue => "blue",
            CardColor::Purple => "purple",
            CardColor::Gray => "gray",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "red" => CardColor::Red,
            "orange" => CardColor::Orange,
            "yellow" => CardColor::Yellow,
            "green" => CardColor::Green,
            "blue" => CardColor::Blue,
            "purple" => CardColor::Purple,
            "gray" => CardColor::Gray,
            _ => CardColor::None,
        }
    }
}

/// 图片条目元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub byte_size: Option<u64>,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub thumbnail_path: Option<String>,
}

/// 音视频条目元数据
///
/// 核心层不引入媒体探测依赖，时长由外部平台胶水层（如有）回填。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaMetadata {
    #[serde(default)]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub byte_size: Option<u64>,
    #[serde(default)]
    pub media_path: Option<String>,
}

/// 文件/文件夹条目元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    #[serde(default)]
    pub file_count: Option<u64>,
    #[serde(default)]
    pub total_size: Option<u64>,
    #[serde(default)]
    pub contains_directory: Option<bool>,
}

/// 按内容类型建模的条目元数据联合
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntryMetadata {
    #[default]
    None,
    Image(ImageMetadata),
    Media(MediaMetadata),
    File(FileMetadata),
}

impl EntryMetadata {
    /// 显式补丁合并：补丁中为 `Some` 的字段覆盖基底对应字段。
    ///
    /// 类型不一致时（如富化阶段重判了内容类型），补丁整体取代基底。
    pub fn merge(&mut self, patch: EntryMetadata) {
        match (self, patch) {
            (_, EntryMetadata::None) => {}
            (EntryMetadata::Image(base), EntryMetadata::Image(p)) => {
                if p.width.is_some() {
                    base.width = p.width;
                }
                if p.height.is_some() {
                    base.height = p.height;
                }
                if p.byte_size.is_some() {
                    base.byte_size = p.byte_size;
                }
                if p.image_path.is_some() {
                    base.image_path = p.image_path;
                }
                if p.thumbnail_path.is_some() {
                    base.thumbnail_path = p.thumbnail_path;
                }
            }
            (EntryMetadata::Media(base), EntryMetadata::Media(p)) => {
                if p.duration_secs.is_some() {
                    base.duration_secs = p.duration_secs;
                }
                if p.byte_size.is_some() {
                    base.byte_size = p.byte_size;
                }
                if p.media_path.is_some() {
                    base.media_path = p.media_path;
                }
            }
            (EntryMetadata::File(base), EntryMetadata::File(p)) => {
                if p.file_count.is_some() {
                    base.file_count = p.file_count;
                }
                if p.total_size.is_some() {
                    base.total_size = p.total_size;
                }
                if p.contains_directory.is_some() {
                    base.contains_directory = p.contains_directory;
                }
            }
            (slot, patch) => {
                *slot = patch;
            }
        }
    }

    /// 序列化为数据库列值；`None` 不落盘
    pub fn to_column(&self) -> Option<String> {
        if matches!(self, EntryMetadata::None) {
            return None;
        }
        serde_json::to_string(self).ok()
    }

    /// 从数据库列值解析；列为空或 JSON 损坏时归一化为 `None`
    pub fn from_column(value: Option<&str>) -> Self {
        match value {
            Some(raw) if !raw.trim().is_empty() => {
                serde_json::from_str(raw).unwrap_or(EntryMetadata::None)
            }
            _ => EntryMetadata::None,
        }
    }
}

/// 剪贴板历史条目——持久化单元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipboardEntry {
    /// 稳定唯一标识，首次保存时分配，此后不变
    pub id: String,
    /// 主载荷：文本、单个路径或换行连接的路径列表
    pub content: String,
    pub entry_type: EntryType,
    /// UTC 毫秒，创建后不变
    pub created_at: i64,
    /// UTC 毫秒，每次逻辑更新（置顶/标注/重激活/使用）递增
    pub modified_at: i64,
    /// 来源应用名（可选）
    pub app_source: Option<String>,
    pub is_pinned: bool,
    pub label: Option<String>,
    pub card_color: CardColor,
    pub metadata: EntryMetadata,
    /// 粘贴使用计数，单调递增
    pub paste_count: i64,
    /// 内容寻址键，图片条目填充，用于 O(1) 去重查找
    pub content_hash: Option<String>,
}

impl ClipboardEntry {
    /// 以当前时间构造一条新条目，id 留空等待保存时分配
    pub fn new(content: impl Into<String>, entry_type: EntryType) -> Self {
        let now = now_millis();
        Self {
            id: String::new(),
            content: content.into(),
            entry_type,
            created_at: now,
            modified_at: now,
            app_source: None,
            is_pinned: false,
            label: None,
            card_color: CardColor::None,
            metadata: EntryMetadata::None,
            paste_count: 0,
            content_hash: None,
        }
    }

    /// 逻辑更新：把修改时间推进到当前时刻
    ///
    /// 同一毫秒内的连续更新仍保证严格递增，排序与重激活判定依赖这一点。
    pub fn touch(&mut self) {
        self.modified_at = now_millis().max(self.modified_at + 1);
    }
}

/// 当前 UTC 时间，毫秒
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 原始字节的 SHA-256 十六进制摘要，用于图片内容寻址
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_type_and_color_roundtrip_with_unknown_fallback() {
        for t in [
            EntryType::Text,
            EntryType::Image,
            EntryType::File,
            EntryType::Folder,
            EntryType::Link,
            EntryType::Audio,
            EntryType::Video,
        ] {
            assert_eq!(EntryType::parse(t.as_str()), t);
        }
        assert_eq!(EntryType::parse("hologram"), EntryType::Unknown);

        for c in [
            CardColor::Red,
            CardColor::Orange,
            CardColor::Yellow,
            CardColor::Green,
            CardColor::Blue,
            CardColor::Purple,
            CardColor::Gray,
        ] {
            assert_eq!(CardColor::parse(c.as_str()), c);
        }
        assert_eq!(CardColor::parse("mauve"), CardColor::None);
    }

    #[test]
    fn metadata_merge_overlays_only_present_fields() {
        let mut base = EntryMetadata::Image(ImageMetadata {
            width: Some(800),
            height: Some(600),
            byte_size: None,
            image_path: Some("/tmp/a.png".to_string()),
            thumbnail_path: None,
        });

        base.merge(EntryMetadata::Image(ImageMetadata {
            width: None,
            height: None,
            byte_size: Some(1024),
            image_path: None,
            thumbnail_path: Some("/tmp/a_thumb.png".to_string()),
        }));

        let EntryMetadata::Image(merged) = base else {
            panic!("merge should keep the image variant");
        };
        assert_eq!(merged.width, Some(800));
        assert_eq!(merged.byte_size, Some(1024));
        assert_eq!(merged.image_path.as_deref(), Some("/tmp/a.png"));
        assert_eq!(merged.thumbnail_path.as_deref(), Some("/tmp/a_thumb.png"));
    }

    #[test]
    fn metadata_merge_replaces_on_variant_mismatch() {
        let mut base = EntryMetadata::File(FileMetadata {
            file_count: Some(3),
            ..Default::default()
        });
        base.merge(EntryMetadata::Media(MediaMetadata {
            byte_size: Some(9),
            ..Default::default()
        }));
        assert!(matches!(base, EntryMetadata::Media(_)));

        let mut none = EntryMetadata::Media(MediaMetadata::default());
        none.merge(EntryMetadata::None);
        assert!(matches!(none, EntryMetadata::Media(_)), "none patch is a no-op");
    }

    #[test]
    fn metadata_column_roundtrip_and_corruption_fallback() {
        let meta = EntryMetadata::Image(ImageMetadata {
            width: Some(1),
            height: Some(2),
            ..Default::default()
        });
        let column = meta.to_column().expect("serialize metadata");
        assert_eq!(EntryMetadata::from_column(Some(&column)), meta);

        assert_eq!(EntryMetadata::from_column(None), EntryMetadata::None);
        assert_eq!(EntryMetadata::from_column(Some("{broken")), EntryMetadata::None);
        assert_eq!(EntryMetadata::None.to_column(), None);
    }

    #[test]
    fn hash_bytes_is_stable_sha256() {
        assert_eq!(
            hash_bytes(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(hash_bytes(b"a"), hash_bytes(b"a"));
        assert_ne!(hash_bytes(b"a"), hash_bytes(b"b"));
    }
}
