//! 采集协调模块
//!
//! # 设计思路
//!
//! 把一次原始捕获（文本/链接、文件路径列表、图片载荷）变成已存储的
//! `ClipboardEntry`：先做粘贴回声抑制，再做去重判定（图片按内容哈希，
//! 其余按内容+类型精确匹配），命中则只推进既有条目的修改时间并广播
//! 「重激活」，未命中则插入新行并广播「已添加」。
//!
//! 插入成功后按类型派发异步富化（图片落盘 + 缩略图、文件元数据统计），
//! 富化失败只记日志，绝不回滚基础插入——半富化条目是合法可展示状态。
//!
//! # 事件模型
//!
//! 观察者通过 `subscribe()` 拿到 `tokio::sync::broadcast` 接收端，
//! 订阅/退订确定性由接收端的生命周期决定，无回调注册表。
//!
//! # 已知竞态
//!
//! 查重与更新不是原子操作：两次并发的相同捕获可能都判定「无重复」
//! 而各插一行。罕见且无害，按已接受的竞态处理（见 DESIGN.md）。

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::db::ClipboardStore;
use crate::error::AppError;
use crate::layout::StorageLayout;
use crate::model::{hash_bytes, CardColor, ClipboardEntry, EntryType};

mod enrich;

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "ogg", "m4a", "aac"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "webm", "wmv"];

/// 采集层对外广播的观察者事件
#[derive(Debug, Clone)]
pub enum IngestEvent {
    /// 新条目已插入
    ItemAdded(ClipboardEntry),
    /// 重复捕获命中既有条目，已推进其修改时间
    ItemReactivated(ClipboardEntry),
    /// 异步富化完成，资源路径/尺寸已写回条目
    ThumbnailReady(ClipboardEntry),
}

/// 采集行为配置，显式传入构造函数
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// 粘贴后的无条件抑制窗口（毫秒）
    pub echo_window_ms: u64,
    /// 内容相等时的延长抑制窗口（毫秒），吸收迟到的回声
    pub echo_content_window_ms: u64,
    /// 缩略图最长边（像素）
    pub thumbnail_max_dim: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            echo_window_ms: 450,
            echo_content_window_ms: 2000,
            thumbnail_max_dim: 256,
        }
    }
}

/// 最近一次由本应用触发的粘贴的记忆
struct PasteMark {
    entry_id: String,
    content: String,
    at: Instant,
}

/// 采集协调器
pub struct IngestCoordinator {
    store: Arc<ClipboardStore>,
    layout: StorageLayout,
    config: IngestConfig,
    events: broadcast::Sender<IngestEvent>,
    last_paste: Mutex<Option<PasteMark>>,
}

impl IngestCoordinator {
    pub fn new(store: Arc<ClipboardStore>, config: IngestConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        let layout = store.layout().clone();
        Self {
            store,
            layout,
            config,
            events,
            last_paste: Mutex::new(None),
        }
    }

    /// 订阅采集事件；丢弃接收端即退订
    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.events.subscribe()
    }

    /// 记录本应用刚刚触发的粘贴，供回声抑制判定
    pub fn notify_paste_initiated(&self, entry_id: &str, content: &str) {
        if let Ok(mut guard) = self.last_paste.lock() {
            *guard = Some(PasteMark {
                entry_id: entry_id.to_string(),
                content: content.to_string(),
                at: Instant::now(),
            });
        }
    }

    /// 回声判定：窗口内一律抑制；内容相等时放宽到延长窗口
    fn is_paste_echo(&self, content: Option<&str>) -> bool {
        let guard = match self.last_paste.lock() {
            Ok(g) => g,
            Err(_) => return false,
        };
        let Some(mark) = guard.as_ref() else {
            return false;
        };
        let elapsed = mark.at.elapsed();
        if elapsed < Duration::from_millis(self.config.echo_window_ms) {
            log::debug!("抑制粘贴回声（短窗口，源条目 {}）", mark.entry_id);
            return true;
        }
        if let Some(content) = content {
            if content == mark.content
                && elapsed < Duration::from_millis(self.config.echo_content_window_ms)
            {
                log::debug!("抑制粘贴回声（内容窗口，源条目 {}）", mark.entry_id);
                return true;
            }
        }
        false
    }

    /// 采集文本/链接捕获；返回生效的条目（被抑制或空内容时为 None）
    pub async fn add_text(
        &self,
        content: &str,
        app_source: Option<String>,
    ) -> Result<Option<ClipboardEntry>, AppError> {
        let content = content.trim();
        if content.is_empty() || self.is_paste_echo(Some(content)) {
            return Ok(None);
        }

        let entry_type = classify_text(content);
        if let Some(existing) = self.store.find_by_content_and_type(content, entry_type)? {
            return Ok(Some(self.reactivate(existing)?));
        }

        let mut entry = ClipboardEntry::new(content, entry_type);
        entry.app_source = app_source;
        self.store.save(&mut entry)?;
        let _ = self.events.send(IngestEvent::ItemAdded(entry.clone()));
        Ok(Some(entry))
    }

    /// 采集文件路径列表捕获
    pub async fn add_files(
        &self,
        paths: &[String],
        app_source: Option<String>,
    ) -> Result<Option<ClipboardEntry>, AppError> {
        if paths.is_empty() {
            return Ok(None);
        }
        let content = paths.join("\n");
        if self.is_paste_echo(Some(&content)) {
            return Ok(None);
        }

        let entry_type = classify_paths(paths);
        if let Some(existing) = self.store.find_by_content_and_type(&content, entry_type)? {
            return Ok(Some(self.reactivate(existing)?));
        }

        let mut entry = ClipboardEntry::new(content, entry_type);
        entry.app_source = app_source;
        self.store.save(&mut entry)?;
        let _ = self.events.send(IngestEvent::ItemAdded(entry.clone()));

        self.spawn_file_enrichment(entry.clone(), paths.to_vec());
        Ok(Some(entry))
    }

    /// 采集图片捕获：按内容哈希去重，哈希在富化前即落库，
    /// 保证处理期间到达的重复捕获仍能命中。
    /// 命中的行若 content 仍为空（上次富化失败或中断），
    /// 用手上的载荷重新派发一次富化，避免该哈希永久指向空条目。
    pub async fn add_image(
        &self,
        bytes: Vec<u8>,
        app_source: Option<String>,
    ) -> Result<Option<ClipboardEntry>, AppError> {
        if bytes.is_empty() || self.is_paste_echo(None) {
            return Ok(None);
        }

        let hash = hash_bytes(&bytes);
        if let Some(existing) = self.store.find_by_content_hash(&hash)? {
            let reactivated = self.reactivate(existing)?;
            if reactivated.content.is_empty() {
                self.spawn_image_enrichment(reactivated.clone(), bytes);
            }
            return Ok(Some(reactivated));
        }

        let mut entry = ClipboardEntry::new("", EntryType::Image);
        entry.app_source = app_source;
        entry.content_hash = Some(hash);
        self.store.save(&mut entry)?;
        let _ = self.events.send(IngestEvent::ItemAdded(entry.clone()));

        self.spawn_image_enrichment(entry.clone(), bytes);
        Ok(Some(entry))
    }

    /// 删除条目（委托存储层做行删除与资源清理）
    pub fn remove_item(&self, id: &str) -> Result<(), AppError> {
        self.store.delete(id)
    }

    /// 置顶/取消置顶；目标不存在时静默无操作
    pub fn update_pin(&self, id: &str, pinned: bool) -> Result<(), AppError> {
        let Some(mut entry) = self.store.get_by_id(id)? else {
            return Ok(());
        };
        entry.is_pinned = pinned;
        entry.touch();
        self.store.update(&entry)
    }

    /// 编辑标签与卡片颜色；目标不存在时静默无操作
    pub fn update_label_and_color(
        &self,
        id: &str,
        label: Option<String>,
        color: CardColor,
    ) -> Result<(), AppError> {
        let Some(mut entry) = self.store.get_by_id(id)? else {
            return Ok(());
        };
        entry.label = label;
        entry.card_color = color;
        entry.touch();
        self.store.update(&entry)
    }

    /// 标记一次使用：粘贴计数 +1，推进修改时间
    pub fn mark_item_used(&self, id: &str) -> Result<(), AppError> {
        let Some(mut entry) = self.store.get_by_id(id)? else {
            return Ok(());
        };
        entry.paste_count += 1;
        entry.touch();
        self.store.update(&entry)
    }

    fn reactivate(&self, mut existing: ClipboardEntry) -> Result<ClipboardEntry, AppError> {
        existing.touch();
        self.store.update(&existing)?;
        let _ = self
            .events
            .send(IngestEvent::ItemReactivated(existing.clone()));
        Ok(existing)
    }

    /// 图片富化：脱离采集路径执行，失败只记日志
    fn spawn_image_enrichment(&self, entry: ClipboardEntry, bytes: Vec<u8>) {
        let store = Arc::clone(&self.store);
        let layout = self.layout.clone();
        let events = self.events.clone();
        let max_dim = self.config.thumbnail_max_dim;
        tokio::spawn(async move {
            if let Err(e) = enrich::enrich_image(store, layout, events, entry, bytes, max_dim).await
            {
                log::error!("图片富化失败: {}", e);
            }
        });
    }

    fn spawn_file_enrichment(&self, entry: ClipboardEntry, paths: Vec<String>) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(e) = enrich::enrich_files(store, entry, paths).await {
                log::error!("文件元数据富化失败: {}", e);
            }
        });
    }
}

/// 文本捕获分类：单行 URL 视为链接
fn classify_text(content: &str) -> EntryType {
    let is_single_line = !content.contains('\n');
    if is_single_line
        && (content.starts_with("http://") || content.starts_with("https://"))
        && !content.contains(char::is_whitespace)
    {
        EntryType::Link
    } else {
        EntryType::Text
    }
}

/// 路径列表分类：全为目录则 Folder；单个媒体文件按扩展名细分；其余为 File
fn classify_paths(paths: &[String]) -> EntryType {
    if paths.iter().all(|p| Path::new(p).is_dir()) {
        return EntryType::Folder;
    }
    if paths.len() == 1 {
        let ext = Path::new(&paths[0])
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            return EntryType::Audio;
        }
        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            return EntryType::Video;
        }
    }
    EntryType::File
}
