//! 统一错误类型定义.
//!
//! 所有 WAD crate 共用的错误类型, 支持跨模块传播.

use thiserror::Error;

/// WAD 统一错误类型
#[derive(Debug, Error)]
pub enum WadError {
    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 无效数据 (损坏的压缩负载等)
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// 压缩数据提前结束
    #[error("已到达输入末尾")]
    Eof,

    /// 不支持的操作或命令
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// 原生解码器报告的错误
    #[error("编解码器错误: {0}")]
    Codec(String),

    /// 模块分配器内存耗尽
    #[error("内存分配失败: {0}")]
    OutOfMemory(String),

    /// 模块边界错误 (越界指针, 缺失导出等)
    #[error("模块错误: {0}")]
    Module(String),

    /// 解码器尚未就绪
    #[error("解码器尚未初始化")]
    NotInitialized,

    /// Worker 已终止
    #[error("Worker 已终止")]
    WorkerTerminated,

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),
}

/// WAD 统一 Result 类型
pub type WadResult<T> = Result<T, WadError>;
