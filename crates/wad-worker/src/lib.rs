//! # wad-worker
//!
//! 在独立线程中运行解码器, 调用方通过单一消息管道转发请求.
//!
//! - [`DecoderWorker`]: 调用方代理, 并发请求按 id 复用同一管道
//! - [`WorkerBootstrap`]: 工作线程的启动参数, 线程内从注册表构造解码器
//! - [`protocol`]: 请求/响应消息格式

pub mod channel;
pub mod protocol;
pub mod worker;

// 重导出常用类型
pub use channel::{DecoderWorker, WorkerState};
pub use protocol::{Command, ErrorKind, Payload, Request, Response, ResponseBody};
pub use worker::{WorkerBootstrap, spawn_worker};
