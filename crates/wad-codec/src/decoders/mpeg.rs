//! MPEG 音频解码器封装.
//!
//! 模块导出:
//! - `mpeg_frame_decoder_create() -> decoder`
//! - `mpeg_decode_interleaved(decoder, input, input_len, decoded_bytes, interval, output, output_size, sample_rate) -> samples`
//! - `mpeg_frame_decoder_destroy(decoder)`
//!
//! `decoded_bytes` 与 `sample_rate` 是模块写回的 u32 出参.
//! 输出按声道连续存放, 第二声道从 `output_size` 开始.

use std::sync::Arc;

use log::{debug, trace, warn};
use wad_core::{WadError, WadResult};

use crate::audio::{DecodedAudio, assemble_multi_channel};
use crate::codec_id::CodecId;
use crate::codec_parameters::{BufferLayout, DecoderOptions};
use crate::common::{DecoderContext, DecoderCore, init_decoder};
use crate::decoder::AudioDecoder;
use crate::memory::HeapView;
use crate::module::{BoxFuture, ModuleSource};

/// 输入缓冲区 256 KiB
pub const MPEG_INPUT_BYTES: usize = 1 << 18;

/// 每声道输出采样数: 512 个最大帧
pub const MPEG_OUTPUT_SAMPLES: usize = 1152 * 512;

const MPEG_CHANNELS: usize = 2;

/// 整段解码时每次调用解码的帧间隔
const DECODE_INTERVAL: i32 = 48;

/// 默认缓冲区布局
pub const MPEG_LAYOUT: BufferLayout = BufferLayout {
    input_bytes: MPEG_INPUT_BYTES,
    output_samples: MPEG_OUTPUT_SAMPLES,
    output_channels: MPEG_CHANNELS,
};

struct MpegSession {
    core: DecoderCore,
    decoder: i32,
    /// 本次调用消耗的输入字节数
    decoded_bytes: HeapView<u32>,
    /// 码流采样率
    sample_rate: HeapView<u32>,
}

/// MPEG 音频解码器
pub struct MpegDecoder {
    ctx: DecoderContext,
    source: Arc<dyn ModuleSource>,
    layout: BufferLayout,
    session: Option<MpegSession>,
    sample_rate: u32,
}

impl MpegDecoder {
    /// 创建解码器 (尚未初始化)
    pub fn new(
        ctx: DecoderContext,
        source: Arc<dyn ModuleSource>,
        options: &DecoderOptions,
    ) -> WadResult<Self> {
        Ok(Self {
            ctx,
            source,
            layout: MPEG_LAYOUT.with_options(options)?,
            session: None,
            sample_rate: 0,
        })
    }

    /// 注册表使用的工厂函数
    pub fn create(
        ctx: DecoderContext,
        source: Arc<dyn ModuleSource>,
        options: &DecoderOptions,
    ) -> WadResult<Box<dyn AudioDecoder>> {
        Ok(Box::new(Self::new(ctx, source, options)?))
    }

    async fn init(&mut self) -> WadResult<()> {
        let mut core = init_decoder(&self.ctx, self.source.as_ref(), self.layout).await?;
        let decoded_bytes = core.common.allocate::<u32>(1)?;
        let sample_rate = core.common.allocate::<u32>(1)?;

        let decoder = core.common.call("mpeg_frame_decoder_create", &[])?;
        if decoder == 0 {
            return Err(WadError::Codec("mpeg 解码器创建失败".into()));
        }
        debug!("mpeg 解码器就绪: handle=0x{:08X}", decoder);

        self.session = Some(MpegSession {
            core,
            decoder,
            decoded_bytes,
            sample_rate,
        });
        Ok(())
    }

    /// 解码一段输入, 返回 (每声道输出, 采样数, 消耗的字节数)
    fn decode_chunk(&mut self, data: &[u8], interval: i32) -> WadResult<(Vec<Vec<f32>>, usize, usize)> {
        let session = self.session.as_ref().ok_or(WadError::NotInitialized)?;
        let core = &session.core;
        let module = core.common.module();

        core.write_input(data)?;
        session.decoded_bytes.set(module, 0, 0)?;

        let samples = core.common.call(
            "mpeg_decode_interleaved",
            &[
                session.decoder,
                core.input.ptr() as i32,
                data.len() as i32,
                session.decoded_bytes.ptr() as i32,
                interval,
                core.output.ptr() as i32,
                core.layout.output_samples as i32,
                session.sample_rate.ptr() as i32,
            ],
        )?;
        if samples < 0 {
            return Err(WadError::Codec(format!("mpeg 解码失败: 返回码 {}", samples)));
        }

        let samples = samples as usize;
        if samples > core.layout.output_samples {
            return Err(WadError::InvalidData(format!(
                "mpeg 输出 {} 个采样超过缓冲区 {}",
                samples, core.layout.output_samples,
            )));
        }

        let channel_data = core.read_output(core.layout.output_samples, samples)?;
        let consumed = session.decoded_bytes.get(module, 0)? as usize;
        let sample_rate = session.sample_rate.get(module, 0)?;
        self.sample_rate = sample_rate;

        trace!("mpeg 解码: 输入 {} 字节, 消耗 {} 字节, {} 个采样", data.len(), consumed, samples);
        Ok((channel_data, samples, consumed))
    }
}

impl AudioDecoder for MpegDecoder {
    fn codec_id(&self) -> CodecId {
        CodecId::Mpeg
    }

    fn name(&self) -> &str {
        "mpeg"
    }

    fn ready(&mut self) -> BoxFuture<'_, WadResult<()>> {
        Box::pin(async move {
            if self.session.is_none() {
                self.init().await?;
            }
            Ok(())
        })
    }

    fn reset(&mut self) -> BoxFuture<'_, WadResult<()>> {
        Box::pin(async move {
            self.free();
            self.init().await
        })
    }

    fn free(&mut self) {
        if let Some(mut session) = self.session.take() {
            let common = &mut session.core.common;
            if let Err(e) = common.call("mpeg_frame_decoder_destroy", &[session.decoder]) {
                warn!("销毁 mpeg 解码器失败: {}", e);
            }
            // 解码器句柄由模块分配, 不在指针登记表中
            common.module().free(session.decoder as u32);
            common.release();
        }
        self.sample_rate = 0;
    }

    fn is_ready(&self) -> bool {
        self.session.is_some()
    }

    fn channels(&self) -> usize {
        MPEG_CHANNELS
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// 按输入缓冲区大小分段送入, 以模块报告的消耗字节数前进
    fn decode(&mut self, data: &[u8]) -> WadResult<DecodedAudio> {
        let input_bytes = self
            .session
            .as_ref()
            .ok_or(WadError::NotInitialized)?
            .core
            .layout
            .input_bytes;

        let mut outputs = Vec::new();
        let mut samples = 0;
        let mut offset = 0;

        while offset < data.len() {
            let end = (offset + input_bytes).min(data.len());
            let (channel_data, decoded, consumed) = self.decode_chunk(&data[offset..end], DECODE_INTERVAL)?;
            outputs.push(channel_data);
            samples += decoded;

            if consumed == 0 {
                debug!("mpeg 模块未消耗任何输入, 剩余 {} 字节", data.len() - offset);
                break;
            }
            offset += consumed;
        }

        assemble_multi_channel(outputs, MPEG_CHANNELS, samples, self.sample_rate)
    }

    fn decode_frame(&mut self, frame: &[u8]) -> WadResult<DecodedAudio> {
        let (channel_data, samples, _) = self.decode_chunk(frame, frame.len() as i32)?;
        Ok(DecodedAudio::new(channel_data, samples, self.sample_rate))
    }
}

impl Drop for MpegDecoder {
    fn drop(&mut self) {
        self.free();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{FakeCodec, FakeSource, MPEG_FRAME_BYTES, MPEG_FRAME_SAMPLES};

    async fn ready_decoder(input_bytes: usize) -> MpegDecoder {
        let options = DecoderOptions {
            input_bytes: Some(input_bytes),
            output_samples: Some(4096),
            ..Default::default()
        };
        let mut decoder = MpegDecoder::new(
            DecoderContext::isolated(),
            Arc::new(FakeSource::new(FakeCodec::Mpeg)),
            &options,
        )
        .unwrap();
        decoder.ready().await.unwrap();
        decoder
    }

    /// `count` 个伪帧, 第 i 帧首字节为 i
    fn stream(count: usize) -> Vec<u8> {
        (0..count)
            .flat_map(|i| {
                let mut frame = vec![0u8; MPEG_FRAME_BYTES];
                frame[0] = i as u8;
                frame
            })
            .collect()
    }

    #[tokio::test]
    async fn test_整段解码按消耗字节前进() {
        // 输入窗口 20 字节, 每次只能容纳 2 个完整帧
        let mut decoder = ready_decoder(20).await;
        let data = stream(5);
        let audio = decoder.decode(&data).unwrap();

        assert_eq!(audio.samples_decoded, 5 * MPEG_FRAME_SAMPLES);
        assert_eq!(audio.sample_rate, 44100);
        assert_eq!(decoder.sample_rate(), 44100);

        let expected: Vec<f32> = (0..5)
            .flat_map(|i| std::iter::repeat_n(i as f32, MPEG_FRAME_SAMPLES))
            .collect();
        assert_eq!(audio.channel_data[0], expected);
        let right: Vec<f32> = expected.iter().map(|v| v + 0.5).collect();
        assert_eq!(audio.channel_data[1], right);
    }

    #[tokio::test]
    async fn test_未消耗输入时停止() {
        let mut decoder = ready_decoder(64).await;
        let mut data = stream(2);
        data.extend_from_slice(&[9, 9, 9]);

        let audio = decoder.decode(&data).unwrap();
        assert_eq!(audio.samples_decoded, 2 * MPEG_FRAME_SAMPLES);
    }

    #[tokio::test]
    async fn test_逐帧解码() {
        let mut decoder = ready_decoder(64).await;
        let frames: Vec<Vec<u8>> = stream(3).chunks(MPEG_FRAME_BYTES).map(<[u8]>::to_vec).collect();

        let audio = decoder.decode_frame(&frames[1]).unwrap();
        assert_eq!(audio.channel_data[0], vec![1.0; MPEG_FRAME_SAMPLES]);

        let audio = decoder.decode_frames(&frames).unwrap();
        assert_eq!(audio.samples_decoded, 3 * MPEG_FRAME_SAMPLES);
        assert_eq!(audio.channel_data[0][2 * MPEG_FRAME_SAMPLES], 2.0);
    }

    #[tokio::test]
    async fn test_重置后采样率清零() {
        let mut decoder = ready_decoder(64).await;
        decoder.decode(&stream(1)).unwrap();
        assert_eq!(decoder.sample_rate(), 44100);

        decoder.reset().await.unwrap();
        assert!(decoder.is_ready());
        assert_eq!(decoder.sample_rate(), 0);

        decoder.free();
        assert!(matches!(decoder.decode(&stream(1)), Err(WadError::NotInitialized)));
    }
}
