//! Worker 消息协议.
//!
//! 请求: `{ id, command, data }`; 响应: `{ id, ...结果字段 }`.
//! 结果字段原样平铺在响应中: 错误为 `{ error, kind }`, 解码结果为 [`DecodedAudio`] 的字段,
//! 其他命令的确认不带任何字段.

use serde::{Deserialize, Serialize};
use wad_codec::DecodedAudio;
use wad_core::{WadError, WadResult};

/// Worker 支持的命令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// 等待解码器就绪
    Ready,
    /// 释放解码器
    Free,
    /// 重置解码器
    Reset,
    /// 整段解码
    Decode,
    /// 解码单帧
    DecodeFrame,
    /// 解码多帧
    DecodeFrames,
}

impl Command {
    /// 线上名称
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Free => "free",
            Self::Reset => "reset",
            Self::Decode => "decode",
            Self::DecodeFrame => "decodeFrame",
            Self::DecodeFrames => "decodeFrames",
        }
    }

    /// 按线上名称解析
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "ready" => Some(Self::Ready),
            "free" => Some(Self::Free),
            "reset" => Some(Self::Reset),
            "decode" => Some(Self::Decode),
            "decodeFrame" => Some(Self::DecodeFrame),
            "decodeFrames" => Some(Self::DecodeFrames),
            _ => None,
        }
    }
}

/// 请求载荷
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// 无载荷
    #[default]
    Empty,
    /// 一段字节
    Bytes(Vec<u8>),
    /// 多帧
    Frames(Vec<Vec<u8>>),
}

impl Payload {
    /// 取出字节载荷
    pub fn into_bytes(self) -> WadResult<Vec<u8>> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            other => Err(WadError::InvalidArgument(format!(
                "待解码数据必须是字节序列, 实际为 {}",
                other.kind(),
            ))),
        }
    }

    /// 取出多帧载荷
    ///
    /// 空字节序列与空帧列表在线上无法区分, 视为零帧.
    pub fn into_frames(self) -> WadResult<Vec<Vec<u8>>> {
        match self {
            Self::Frames(frames) => Ok(frames),
            Self::Bytes(bytes) if bytes.is_empty() => Ok(Vec::new()),
            other => Err(WadError::InvalidArgument(format!(
                "待解码数据必须是帧序列, 实际为 {}",
                other.kind(),
            ))),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Empty => "空",
            Self::Bytes(_) => "字节序列",
            Self::Frames(_) => "帧序列",
        }
    }
}

/// 请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// 请求 id
    pub id: i64,
    /// 命令名
    pub command: String,
    /// 载荷
    #[serde(default)]
    pub data: Payload,
}

/// 错误种类, 用于在边界另一侧还原 [`WadError`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// 无效参数
    InvalidArgument,
    /// 无效数据
    InvalidData,
    /// 输入提前结束
    Eof,
    /// 不支持的操作或命令
    Unsupported,
    /// 原生解码器错误 (缺省)
    #[default]
    Codec,
    /// 模块内存耗尽
    OutOfMemory,
    /// 模块边界错误
    Module,
    /// 解码器尚未就绪
    NotInitialized,
    /// Worker 已终止
    WorkerTerminated,
    /// I/O 错误
    Io,
}

/// 响应结果字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseBody {
    /// 失败
    Error {
        /// 错误描述
        error: String,
        /// 错误种类
        #[serde(default)]
        kind: ErrorKind,
    },
    /// 解码结果
    Decoded(DecodedAudio),
    /// 确认
    Ack {},
}

impl ResponseBody {
    /// 由错误构造响应
    pub fn error(err: &WadError) -> Self {
        let (kind, error) = match err {
            WadError::InvalidArgument(m) => (ErrorKind::InvalidArgument, m.clone()),
            WadError::InvalidData(m) => (ErrorKind::InvalidData, m.clone()),
            WadError::Eof => (ErrorKind::Eof, err.to_string()),
            WadError::Unsupported(m) => (ErrorKind::Unsupported, m.clone()),
            WadError::Codec(m) => (ErrorKind::Codec, m.clone()),
            WadError::OutOfMemory(m) => (ErrorKind::OutOfMemory, m.clone()),
            WadError::Module(m) => (ErrorKind::Module, m.clone()),
            WadError::NotInitialized => (ErrorKind::NotInitialized, err.to_string()),
            WadError::WorkerTerminated => (ErrorKind::WorkerTerminated, err.to_string()),
            WadError::Io(e) => (ErrorKind::Io, e.to_string()),
        };
        Self::Error { error, kind }
    }

    /// 错误响应转为 `Err`, 其他原样返回
    pub fn into_result(self) -> WadResult<Self> {
        match self {
            Self::Error { error, kind } => Err(match kind {
                ErrorKind::InvalidArgument => WadError::InvalidArgument(error),
                ErrorKind::InvalidData => WadError::InvalidData(error),
                ErrorKind::Eof => WadError::Eof,
                ErrorKind::Unsupported => WadError::Unsupported(error),
                ErrorKind::Codec => WadError::Codec(error),
                ErrorKind::OutOfMemory => WadError::OutOfMemory(error),
                ErrorKind::Module => WadError::Module(error),
                ErrorKind::NotInitialized => WadError::NotInitialized,
                ErrorKind::WorkerTerminated => WadError::WorkerTerminated,
                ErrorKind::Io => WadError::Io(std::io::Error::other(error)),
            }),
            other => Ok(other),
        }
    }
}

impl From<WadResult<DecodedAudio>> for ResponseBody {
    fn from(result: WadResult<DecodedAudio>) -> Self {
        match result {
            Ok(audio) => Self::Decoded(audio),
            Err(e) => Self::error(&e),
        }
    }
}

impl From<WadResult<()>> for ResponseBody {
    fn from(result: WadResult<()>) -> Self {
        match result {
            Ok(()) => Self::Ack {},
            Err(e) => Self::error(&e),
        }
    }
}

/// 响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// 对应请求的 id
    pub id: i64,
    /// 结果字段
    #[serde(flatten)]
    pub body: ResponseBody,
}
