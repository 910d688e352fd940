//! 解码器 trait 定义.

use wad_core::{WadError, WadResult};

use crate::audio::{DecodedAudio, assemble_multi_channel};
use crate::codec_id::CodecId;
use crate::module::BoxFuture;

/// 音频解码器 trait
///
/// 解码流程:
/// 1. 等待 `ready()` 完成 (取得模块实例并分配缓冲区)
/// 2. 调用 `decode_frame()` / `decode_frames()` / `decode()` 解码数据
/// 3. 需要从头开始时调用 `reset()`
/// 4. 调用 `free()` 归还所有模块内存 (丢弃解码器时自动执行)
pub trait AudioDecoder: Send {
    /// 获取解码器标识
    fn codec_id(&self) -> CodecId;

    /// 获取解码器名称
    fn name(&self) -> &str;

    /// 初始化, 重复调用无副作用
    fn ready(&mut self) -> BoxFuture<'_, WadResult<()>>;

    /// 释放后重新初始化
    fn reset(&mut self) -> BoxFuture<'_, WadResult<()>>;

    /// 释放模块内存, 重复调用无副作用
    fn free(&mut self);

    /// 是否已初始化
    fn is_ready(&self) -> bool;

    /// 当前输出声道数
    fn channels(&self) -> usize;

    /// 当前输出采样率 (尚未解码时为 0)
    fn sample_rate(&self) -> u32;

    /// 解码一段连续码流
    ///
    /// 默认不支持, 只能逐帧解码的格式保持默认实现.
    fn decode(&mut self, _data: &[u8]) -> WadResult<DecodedAudio> {
        Err(WadError::Unsupported(format!("{} 只支持逐帧解码", self.name())))
    }

    /// 解码单帧
    fn decode_frame(&mut self, frame: &[u8]) -> WadResult<DecodedAudio>;

    /// 逐帧解码并按调用顺序重组
    fn decode_frames(&mut self, frames: &[Vec<u8>]) -> WadResult<DecodedAudio> {
        let mut outputs = Vec::with_capacity(frames.len());
        let mut samples = 0;
        let mut sample_rate = self.sample_rate();

        for frame in frames {
            let decoded = self.decode_frame(frame)?;
            samples += decoded.samples_decoded;
            sample_rate = decoded.sample_rate;
            outputs.push(decoded.channel_data);
        }

        assemble_multi_channel(outputs, self.channels(), samples, sample_rate)
    }
}
