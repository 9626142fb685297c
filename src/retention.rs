//! 保留清理调度模块
//!
//! # 设计思路
//!
//! 周期性节拍（固定间隔，与保留天数无关）触发一次检查：
//! 保留天数 ≤ 0 时禁用；否则读取哨兵文件（上次清理的 UTC 时间戳），
//! 比较其**日历日期**（UTC）与今天——不是比较流逝时长。同日即无操作，
//! 跨日则调用 `clear_old_items(days, 置顶豁免)` 并把哨兵重写为当前时刻。
//!
//! 哨兵缺失/不可读/无法解析一律视为「从未运行」。写哨兵时自动创建
//! 所在目录。所有 I/O 失败只记日志，不中断调度。
//!
//! # 生命周期
//!
//! `start` / `run_now` / `stop` 显式控制，无隐式定时器重置语义。
//! `stop` 幂等；停止后的手动调用是无操作。

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::task::JoinHandle;

use crate::db::ClipboardStore;
use crate::error::AppError;
use crate::layout::StorageLayout;

/// 调度配置
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// 保留天数；≤ 0 表示禁用
    pub days: i64,
    /// 检查间隔（与保留天数无关）
    pub tick: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: 30,
            tick: Duration::from_secs(30 * 60),
        }
    }
}

struct Inner {
    store: Arc<ClipboardStore>,
    sentinel_path: PathBuf,
    days: AtomicI64,
    stopped: AtomicBool,
}

/// 保留清理调度器
pub struct RetentionScheduler {
    inner: Arc<Inner>,
    tick: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RetentionScheduler {
    pub fn new(store: Arc<ClipboardStore>, layout: &StorageLayout, config: RetentionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                sentinel_path: layout.sentinel_path(),
                days: AtomicI64::new(config.days),
                stopped: AtomicBool::new(false),
            }),
            tick: config.tick,
            task: Mutex::new(None),
        }
    }

    /// 运行期调整保留天数
    pub fn set_days(&self, days: i64) {
        self.inner.days.store(days, Ordering::Relaxed);
    }

    /// 启动周期检查任务；重复调用只保留一个任务
    pub fn start(&self) {
        let mut guard = match self.task.lock() {
            Ok(g) => g,
            Err(_) => return,
        };
        if guard.is_some() || self.inner.stopped.load(Ordering::Relaxed) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let tick = self.tick;
        *guard = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            // 首个立即到期的节拍跳过，启动时不抢跑
            interval.tick().await;
            loop {
                interval.tick().await;
                if inner.stopped.load(Ordering::Relaxed) {
                    break;
                }
                match inner.run_check() {
                    Ok(0) => {}
                    Ok(deleted) => log::info!("保留清理删除 {} 条过期条目", deleted),
                    Err(e) => log::error!("保留清理失败: {}", e),
                }
            }
        }));
    }

    /// 立即执行一次检查，返回删除数（被日历门禁或禁用时为 0）
    pub fn run_now(&self) -> Result<i64, AppError> {
        self.inner.run_check()
    }

    /// 停止调度；幂等，停止后 `run_now` 变为无操作
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Relaxed);
        if let Ok(mut guard) = self.task.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for RetentionScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    fn run_check(&self) -> Result<i64, AppError> {
        if self.stopped.load(Ordering::Relaxed) {
            return Ok(0);
        }
        let days = self.days.load(Ordering::Relaxed);
        if days <= 0 {
            return Ok(0);
        }

        let today = Utc::now().date_naive();
        if read_sentinel_date(&self.sentinel_path) == Some(today) {
            return Ok(0);
        }

        let deleted = self.store.clear_old_items(days, true)?;

        if let Err(e) = write_sentinel(&self.sentinel_path) {
            log::warn!("写入清理哨兵失败: {}", e);
        }
        Ok(deleted)
    }
}

/// 读取哨兵的 UTC 日历日期；缺失/不可读/无法解析视为「从未运行」
fn read_sentinel_date(path: &Path) -> Option<NaiveDate> {
    let raw = fs::read_to_string(path).ok()?;
    let parsed = DateTime::parse_from_rfc3339(raw.trim()).ok()?;
    Some(parsed.with_timezone(&Utc).date_naive())
}

fn write_sentinel(path: &Path) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, Utc::now().to_rfc3339())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{Duration as ChronoDuration, Utc};

    use super::{RetentionConfig, RetentionScheduler};
    use crate::db::test_support::open_temp_store;
    use crate::db::ClipboardStore;
    use crate::layout::StorageLayout;
    use crate::model::{now_millis, ClipboardEntry, EntryType};

    const DAY_MS: i64 = 24 * 60 * 60 * 1000;

    fn scheduler_with_store(
        days: i64,
    ) -> (tempfile::TempDir, Arc<ClipboardStore>, StorageLayout, RetentionScheduler) {
        let (dir, store) = open_temp_store();
        let layout = store.layout().clone();
        let store = Arc::new(store);
        let scheduler = RetentionScheduler::new(
            Arc::clone(&store),
            &layout,
            RetentionConfig { days, tick: Duration::from_secs(3600) },
        );
        (dir, store, layout, scheduler)
    }

    fn seed_old_entry(store: &ClipboardStore, content: &str) {
        let mut e = ClipboardEntry::new(content, EntryType::Text);
        e.created_at = now_millis() - 40 * DAY_MS;
        store.save(&mut e).expect("save old entry");
    }

    #[test]
    fn non_positive_days_disables_retention() {
        let (_dir, store, layout, scheduler) = scheduler_with_store(0);
        seed_old_entry(&store, "old");

        let deleted = scheduler.run_now().expect("run disabled check");
        assert_eq!(deleted, 0);
        assert_eq!(store.count().expect("count"), 1);
        assert!(!layout.sentinel_path().exists(), "disabled check must not touch the sentinel");
    }

    #[test]
    fn same_day_checks_run_exactly_one_pass() {
        let (_dir, store, layout, scheduler) = scheduler_with_store(30);
        seed_old_entry(&store, "old-1");

        let first = scheduler.run_now().expect("first check");
        assert_eq!(first, 1);
        assert!(layout.sentinel_path().exists());

        // 同一 UTC 日历日内的后续检查全部是无操作
        seed_old_entry(&store, "old-2");
        assert_eq!(scheduler.run_now().expect("second check"), 0);
        assert_eq!(scheduler.run_now().expect("third check"), 0);
        assert_eq!(store.count().expect("count"), 1, "old-2 survives until the next day");
    }

    #[test]
    fn stale_or_corrupt_sentinel_counts_as_never_run() {
        let (_dir, store, layout, scheduler) = scheduler_with_store(30);
        seed_old_entry(&store, "old");

        let yesterday = (Utc::now() - ChronoDuration::days(1)).to_rfc3339();
        std::fs::write(layout.sentinel_path(), yesterday).expect("write stale sentinel");
        assert_eq!(scheduler.run_now().expect("stale sentinel check"), 1);

        seed_old_entry(&store, "old-again");
        std::fs::write(layout.sentinel_path(), "not a timestamp").expect("write corrupt sentinel");
        assert_eq!(scheduler.run_now().expect("corrupt sentinel check"), 1);
    }

    #[test]
    fn stop_is_idempotent_and_silences_run_now() {
        let (_dir, store, _layout, scheduler) = scheduler_with_store(30);
        seed_old_entry(&store, "old");

        scheduler.stop();
        scheduler.stop();

        assert_eq!(scheduler.run_now().expect("run after stop"), 0);
        assert_eq!(store.count().expect("count"), 1, "stopped scheduler must not delete");
    }

    #[tokio::test]
    async fn start_spawns_a_single_background_task() {
        let (_dir, _store, _layout, scheduler) = scheduler_with_store(30);
        scheduler.start();
        scheduler.start();
        scheduler.stop();
    }
}
