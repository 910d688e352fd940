//! FLAC 解码器封装.
//!
//! 模块导出:
//! - `create_decoder(channels, sample_rate, bits_per_sample, samples_decoded, out_ptr, out_len, error_string, state_string) -> decoder`
//! - `decode_frame(decoder, input, input_len) -> success`
//! - `destroy_decoder(decoder)`
//!
//! 八个出参都是宿主分配的 u32. 输出缓冲区由模块分配, 宿主读出后负责释放.
//! 没有共享输入缓冲区: 每次调用临时分配输入, 用完即释放.

use std::sync::Arc;

use log::{debug, error, warn};
use wad_core::{WadError, WadResult};

use crate::audio::{DecodedAudio, assemble_multi_channel};
use crate::codec_id::CodecId;
use crate::codec_parameters::DecoderOptions;
use crate::common::{DecoderCommon, DecoderContext, init_common};
use crate::decoder::AudioDecoder;
use crate::memory::HeapView;
use crate::module::{BoxFuture, ModuleSource};

/// 每次送入模块的最大字节数
pub const FLAC_MAX_INPUT_BYTES: usize = 65535 * 8;

/// 模块写回的出参
struct FlacOutParams {
    channels: HeapView<u32>,
    sample_rate: HeapView<u32>,
    bits_per_sample: HeapView<u32>,
    samples_decoded: HeapView<u32>,
    output_ptr: HeapView<u32>,
    output_len: HeapView<u32>,
    error_string: HeapView<u32>,
    state_string: HeapView<u32>,
}

impl FlacOutParams {
    fn allocate(common: &mut DecoderCommon) -> WadResult<Self> {
        Ok(Self {
            channels: common.allocate(1)?,
            sample_rate: common.allocate(1)?,
            bits_per_sample: common.allocate(1)?,
            samples_decoded: common.allocate(1)?,
            output_ptr: common.allocate(1)?,
            output_len: common.allocate(1)?,
            error_string: common.allocate(1)?,
            state_string: common.allocate(1)?,
        })
    }

    fn as_args(&self) -> [i32; 8] {
        [
            self.channels.ptr() as i32,
            self.sample_rate.ptr() as i32,
            self.bits_per_sample.ptr() as i32,
            self.samples_decoded.ptr() as i32,
            self.output_ptr.ptr() as i32,
            self.output_len.ptr() as i32,
            self.error_string.ptr() as i32,
            self.state_string.ptr() as i32,
        ]
    }
}

struct FlacSession {
    common: DecoderCommon,
    decoder: i32,
    params: FlacOutParams,
}

impl FlacSession {
    fn read_param(&self, view: &HeapView<u32>) -> WadResult<u32> {
        view.get(self.common.module(), 0)
    }

    /// 解码一段数据; 模块报告失败时返回 `None`
    fn decode_chunk(&mut self, data: &[u8]) -> WadResult<Option<(Vec<Vec<f32>>, usize)>> {
        let input = self.common.allocate_from(data)?;
        let result = self
            .common
            .call("decode_frame", &[self.decoder, input.ptr() as i32, data.len() as i32]);
        self.common.free_view(input);

        if result? == 0 {
            let error = self.read_message(&self.params.error_string);
            let state = self.read_message(&self.params.state_string);
            error!("flac 解码失败: 错误: {}, 状态: {}", error, state);
            return Ok(None);
        }

        let channels = self.read_param(&self.params.channels)? as usize;
        let samples = self.read_param(&self.params.samples_decoded)? as usize;
        let output_ptr = self.read_param(&self.params.output_ptr)?;
        let output_len = self.read_param(&self.params.output_len)? as usize;

        let output = HeapView::<f32>::new(output_ptr, output_len);
        let channel_data = self.common.get_output_channels(&output, channels, samples);

        // 无论读取是否成功都归还模块分配的输出缓冲区
        if output_ptr != 0 {
            self.common.module().free(output_ptr);
        }
        let module = self.common.module();
        self.params.output_len.set(module, 0, 0)?;
        self.params.samples_decoded.set(module, 0, 0)?;

        Ok(Some((channel_data?, samples)))
    }

    fn read_message(&self, view: &HeapView<u32>) -> String {
        match self.read_param(view) {
            Ok(0) => String::new(),
            Ok(ptr) => self.common.read_c_string(ptr).unwrap_or_default(),
            Err(e) => e.to_string(),
        }
    }
}

/// FLAC 解码器
pub struct FlacDecoder {
    ctx: DecoderContext,
    source: Arc<dyn ModuleSource>,
    chunk_limit: usize,
    session: Option<FlacSession>,
    channels: usize,
    sample_rate: u32,
    bit_depth: u32,
}

impl FlacDecoder {
    /// 创建解码器 (尚未初始化)
    pub fn new(
        ctx: DecoderContext,
        source: Arc<dyn ModuleSource>,
        options: &DecoderOptions,
    ) -> WadResult<Self> {
        options.validate()?;
        Ok(Self {
            ctx,
            source,
            chunk_limit: options.chunk_limit.unwrap_or(FLAC_MAX_INPUT_BYTES),
            session: None,
            channels: 0,
            sample_rate: 0,
            bit_depth: 0,
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

    /// 最近一次解码的位深
    pub fn bit_depth(&self) -> u32 {
        self.bit_depth
    }

    async fn init(&mut self) -> WadResult<()> {
        let mut common = init_common(&self.ctx, self.source.as_ref()).await?;
        let params = FlacOutParams::allocate(&mut common)?;

        let decoder = common.call("create_decoder", &params.as_args())?;
        if decoder == 0 {
            return Err(WadError::Codec("flac 解码器创建失败".into()));
        }
        debug!("flac 解码器就绪: handle=0x{:08X}", decoder);

        self.session = Some(FlacSession {
            common,
            decoder,
            params,
        });
        Ok(())
    }

    fn decode_chunks<'a>(&mut self, frames: impl Iterator<Item = &'a [u8]>) -> WadResult<DecodedAudio> {
        let chunk_limit = self.chunk_limit;
        let session = self.session.as_mut().ok_or(WadError::NotInitialized)?;

        let mut outputs = Vec::new();
        let mut samples = 0;

        for frame in frames {
            for chunk in frame.chunks(chunk_limit) {
                if let Some((channel_data, decoded)) = session.decode_chunk(chunk)? {
                    outputs.push(channel_data);
                    samples += decoded;
                }
            }
        }

        let params = &session.params;
        self.channels = session.read_param(&params.channels)? as usize;
        self.sample_rate = session.read_param(&params.sample_rate)?;
        self.bit_depth = session.read_param(&params.bits_per_sample)?;

        // 以最后报告的声道数为准, 之前多出的声道丢弃
        for output in &mut outputs {
            if output.len() > self.channels {
                debug!("flac 声道数变化: {} -> {}", output.len(), self.channels);
                output.truncate(self.channels);
            }
        }

        let audio = assemble_multi_channel(outputs, self.channels, samples, self.sample_rate)?;
        Ok(audio.with_bit_depth(self.bit_depth))
    }
}

impl AudioDecoder for FlacDecoder {
    fn codec_id(&self) -> CodecId {
        CodecId::Flac
    }

    fn name(&self) -> &str {
        "flac"
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
            if let Err(e) = session.common.call("destroy_decoder", &[session.decoder]) {
                warn!("销毁 flac 解码器失败: {}", e);
            }
            session.common.release();
        }
        self.channels = 0;
        self.sample_rate = 0;
        self.bit_depth = 0;
    }

    fn is_ready(&self) -> bool {
        self.session.is_some()
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn decode_frame(&mut self, frame: &[u8]) -> WadResult<DecodedAudio> {
        self.decode_chunks(std::iter::once(frame))
    }

    fn decode_frames(&mut self, frames: &[Vec<u8>]) -> WadResult<DecodedAudio> {
        self.decode_chunks(frames.iter().map(Vec::as_slice))
    }
}

impl Drop for FlacDecoder {
    fn drop(&mut self) {
        self.free();
    }
}
