//! Opus 解码器封装.
//!
//! 模块导出:
//! - `opus_frame_decoder_create() -> decoder`
//! - `opus_frame_decode_float_deinterleaved(decoder, input, input_len, output) -> samples`
//! - `opus_frame_decoder_destroy(decoder)`
//!
//! 输出固定为 48 kHz 双声道, 按声道连续存放, 声道间步长等于本次解码的采样数.

use std::sync::Arc;

use log::{debug, warn};
use wad_core::{WadError, WadResult};

use crate::audio::DecodedAudio;
use crate::codec_id::CodecId;
use crate::codec_parameters::{BufferLayout, DecoderOptions};
use crate::common::{DecoderContext, DecoderCore, init_decoder};
use crate::decoder::AudioDecoder;
use crate::module::{BoxFuture, ModuleSource};

/// 最大帧 120 ms, 最大码率 510 kbit/s
pub const OPUS_INPUT_BYTES: usize = 7650;

/// 120 ms @ 48 kHz
pub const OPUS_OUTPUT_SAMPLES: usize = 120 * 48;

/// 输出采样率
pub const OPUS_SAMPLE_RATE: u32 = 48000;

const OPUS_CHANNELS: usize = 2;

/// 默认缓冲区布局
pub const OPUS_LAYOUT: BufferLayout = BufferLayout {
    input_bytes: OPUS_INPUT_BYTES,
    output_samples: OPUS_OUTPUT_SAMPLES,
    output_channels: OPUS_CHANNELS,
};

struct OpusSession {
    core: DecoderCore,
    decoder: i32,
}

/// Opus 解码器
pub struct OpusDecoder {
    ctx: DecoderContext,
    source: Arc<dyn ModuleSource>,
    layout: BufferLayout,
    session: Option<OpusSession>,
}

impl OpusDecoder {
    /// 创建解码器 (尚未初始化)
    pub fn new(
        ctx: DecoderContext,
        source: Arc<dyn ModuleSource>,
        options: &DecoderOptions,
    ) -> WadResult<Self> {
        Ok(Self {
            ctx,
            source,
            layout: OPUS_LAYOUT.with_options(options)?,
            session: None,
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
        let core = init_decoder(&self.ctx, self.source.as_ref(), self.layout).await?;
        let decoder = core.common.call("opus_frame_decoder_create", &[])?;
        if decoder == 0 {
            return Err(WadError::Codec("opus 解码器创建失败".into()));
        }
        debug!("opus 解码器就绪: handle=0x{:08X}", decoder);
        self.session = Some(OpusSession { core, decoder });
        Ok(())
    }
}

impl AudioDecoder for OpusDecoder {
    fn codec_id(&self) -> CodecId {
        CodecId::Opus
    }

    fn name(&self) -> &str {
        "opus"
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
            if let Err(e) = session
                .core
                .common
                .call("opus_frame_decoder_destroy", &[session.decoder])
            {
                warn!("销毁 opus 解码器失败: {}", e);
            }
            session.core.common.release();
        }
    }

    fn is_ready(&self) -> bool {
        self.session.is_some()
    }

    fn channels(&self) -> usize {
        OPUS_CHANNELS
    }

    fn sample_rate(&self) -> u32 {
        OPUS_SAMPLE_RATE
    }

    fn decode_frame(&mut self, frame: &[u8]) -> WadResult<DecodedAudio> {
        let session = self.session.as_ref().ok_or(WadError::NotInitialized)?;
        let core = &session.core;
        core.write_input(frame)?;

        let samples = core.common.call(
            "opus_frame_decode_float_deinterleaved",
            &[
                session.decoder,
                core.input.ptr() as i32,
                frame.len() as i32,
                core.output.ptr() as i32,
            ],
        )?;
        if samples < 0 {
            return Err(WadError::Codec(format!("opus 解码失败: 返回码 {}", samples)));
        }

        let samples = samples as usize;
        let channel_data = core
            .common
            .get_output_channels(&core.output, OPUS_CHANNELS, samples)?;
        Ok(DecodedAudio::new(channel_data, samples, OPUS_SAMPLE_RATE))
    }
}

impl Drop for OpusDecoder {
    fn drop(&mut self) {
        self.free();
    }
}
