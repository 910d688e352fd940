//! 解码器缓冲区布局与选项.

use serde::{Deserialize, Serialize};
use wad_core::{WadError, WadResult};

/// 共享缓冲区布局
///
/// 解码器初始化时按此布局一次性分配输入与输出缓冲区, 之后每次解码复用.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    /// 输入缓冲区字节数
    pub input_bytes: usize,
    /// 每声道输出采样数
    pub output_samples: usize,
    /// 输出声道数
    pub output_channels: usize,
}

impl BufferLayout {
    /// 输出缓冲区的 f32 元素总数
    pub fn output_len(&self) -> usize {
        self.output_samples * self.output_channels
    }

    /// 应用选项中的覆盖值
    pub fn with_options(mut self, options: &DecoderOptions) -> WadResult<Self> {
        options.validate()?;
        if let Some(bytes) = options.input_bytes {
            self.input_bytes = bytes;
        }
        if let Some(samples) = options.output_samples {
            self.output_samples = samples;
        }
        Ok(self)
    }
}

/// 解码器选项
///
/// 所有字段可选, 缺省时使用各编解码器的默认值.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecoderOptions {
    /// 输入缓冲区字节数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_bytes: Option<usize>,
    /// 每声道输出采样数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_samples: Option<usize>,
    /// FLAC 每次送入模块的最大字节数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_limit: Option<usize>,
}

impl DecoderOptions {
    /// 检查选项, 零值无效
    pub fn validate(&self) -> WadResult<()> {
        let fields = [
            ("inputBytes", self.input_bytes),
            ("outputSamples", self.output_samples),
            ("chunkLimit", self.chunk_limit),
        ];
        for (name, value) in fields {
            if value == Some(0) {
                return Err(WadError::InvalidArgument(format!("{} 不能为 0", name)));
            }
        }
        Ok(())
    }
}
