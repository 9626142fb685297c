//! # 剪贴板历史持久化核心 — 库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │              外部外壳 (剪贴板监听 / UI / IPC)              │
//! └───────┬──────────────────────────────────────────────────┘
//!         ↕ Result<T, AppError> / broadcast 事件
//! ┌───────┼──────────────────────────────────────────────────┐
//! │       ↕            持久化核心 (本库)                      │
//! │                                                          │
//! │  ┌─ error ────── AppError (统一错误类型)                  │
//! │  │                                                       │
//! │  ├─ layout ───── 存储目录布局 (db/images/thumbs/config)    │
//! │  ├─ model ────── 条目模型·类型分类·元数据合并              │
//! │  │                                                       │
//! │  ├─ db ───────── SQLite (rusqlite) CRUD + FTS5 混合搜索    │
//! │  │   ├─ schema        建表·增量迁移·损坏隔离重建           │
//! │  │   ├─ entries       增删改查·过期清理·资产回收           │
//! │  │   └─ search        FTS5 ∪ LIKE 两级检索·过滤策略        │
//! │  │                                                       │
//! │  ├─ ingest ───── 采集协调·去重复活·粘贴回声抑制            │
//! │  │   └─ enrich        图片落盘/缩略图·文件统计 (异步)      │
//! │  │                                                       │
//! │  ├─ retention ── 保留调度·日历日哨兵门禁                   │
//! │  └─ backup ───── tar.gz 归档·清单校验·快照回滚还原         │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 统一错误类型 `AppError`，所有公开操作的返回类型 |
//! | [`layout`] | 基准目录下数据库/资源/哨兵/快照路径的唯一来源 |
//! | [`model`] | 条目与元数据模型、类型/颜色解析、内容哈希 |
//! | [`db`] | SQLite 存储：Schema 迁移、CRUD、混合搜索、损坏恢复 |
//! | [`ingest`] | 新内容入库：去重、回声抑制、分类、异步富化、事件广播 |
//! | [`retention`] | 按保留天数的周期清理，置顶豁免，每日历日至多一次 |
//! | [`backup`] | 自描述备份归档的导出、校验与快照保护下的还原 |

pub mod backup;
pub mod db;
pub mod error;
pub mod ingest;
pub mod layout;
pub mod model;
pub mod retention;

pub use backup::{BackupManager, BackupManifest};
pub use db::{ClipboardStore, SearchFilter};
pub use error::AppError;
pub use ingest::{IngestConfig, IngestCoordinator, IngestEvent};
pub use layout::{StorageInfo, StorageLayout};
pub use model::{CardColor, ClipboardEntry, EntryMetadata, EntryType};
pub use retention::{RetentionConfig, RetentionScheduler};
