//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 定义全局统一的 `AppError` 枚举，替代各模块中分散的
//! `.map_err(|e| e.to_string())`、`format!(...)`、`expect()` 等不一致模式。
//!
//! 核心层所有可失败操作统一返回 `Result<T, AppError>`。
//! 「未找到」「无事可做」不是错误：相应接口返回 `Ok(None)` / `Ok(0)` / `Ok(false)`。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息。
//! - 为 `std::io::Error` 提供 `From` 转换，无需手动 map。
//! - 实现 `Serialize` 将错误序列化为字符串，供上层 IPC 外壳直接透传。

use serde::Serialize;

/// 应用级统一错误类型
///
/// 核心层所有公开接口均返回此类型，确保调用方收到一致的错误格式。
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 数据库操作失败
    #[error("数据库错误: {0}")]
    Database(String),

    /// 存储目录或存储文件不可用
    #[error("存储目录不可用: {0}")]
    Storage(String),

    /// 文件系统 I/O 错误
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),

    /// 图片解码 / 缩略图生成失败
    #[error("图片处理失败: {0}")]
    Image(String),

    /// 程序性错误：调用方传入了非法参数（如空 id 的更新）
    #[error("非法参数: {0}")]
    InvalidArgument(String),

    /// 备份导出 / 还原失败
    #[error("备份操作失败: {0}")]
    Backup(String),
}

/// 上层 IPC 外壳要求返回值实现 `Serialize`。
/// 将错误序列化为人类可读的字符串。
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
