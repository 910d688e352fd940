//! 编解码器标识符.

use std::fmt;

use serde::{Deserialize, Serialize};

/// 编解码器标识符
///
/// 每个标识对应一个解码核心模块和一个宿主侧封装.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecId {
    /// Opus (逐帧解码, 固定 48 kHz 输出)
    Opus,
    /// MPEG-1/2 Audio Layer I/II/III
    Mpeg,
    /// FLAC (Free Lossless Audio Codec)
    Flac,
}

impl CodecId {
    /// 所有已知的编解码器
    pub const ALL: [CodecId; 3] = [Self::Opus, Self::Mpeg, Self::Flac];

    /// 获取编解码器的名称
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Opus => "opus",
            Self::Mpeg => "mpeg",
            Self::Flac => "flac",
        }
    }

    /// 按名称查找 (不区分大小写, `mp3` 视为 `mpeg`)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "opus" => Some(Self::Opus),
            "mpeg" | "mp3" => Some(Self::Mpeg),
            "flac" => Some(Self::Flac),
            _ => None,
        }
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
