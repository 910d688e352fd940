//! 单元测试用的伪解码核心.
//!
//! 以宿主函数模拟三种模块的导出, 输出由输入字节确定, 便于断言.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use wad_core::{WadError, WadResult};

use crate::memory::LinearMemory;
use crate::module::{BoxFuture, HostModule, ModuleId, ModuleSource, WasmModule};

pub const FAKE_ERROR: &str = "FLAC__STREAM_DECODER_ERROR_STATUS_LOST_SYNC";
pub const FAKE_STATE: &str = "FLAC__STREAM_DECODER_SEARCH_FOR_FRAME_SYNC";

/// 伪 MPEG 帧长与每帧采样数
pub const MPEG_FRAME_BYTES: usize = 8;
pub const MPEG_FRAME_SAMPLES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeCodec {
    Opus,
    Mpeg,
    Flac,
}

pub struct FakeSource {
    codec: FakeCodec,
    pub instantiations: AtomicUsize,
}

impl FakeSource {
    pub fn new(codec: FakeCodec) -> Self {
        Self {
            codec,
            instantiations: AtomicUsize::new(0),
        }
    }
}

impl ModuleSource for FakeSource {
    fn module_id(&self) -> ModuleId {
        ModuleId::new(format!("fake-{:?}", self.codec).to_lowercase())
    }

    fn instantiate(&self) -> BoxFuture<'_, WadResult<Arc<dyn WasmModule>>> {
        Box::pin(async move {
            self.instantiations.fetch_add(1, Ordering::SeqCst);
            let module: Arc<dyn WasmModule> = Arc::new(fake_module(self.codec));
            Ok(module)
        })
    }
}

pub fn fake_module(codec: FakeCodec) -> HostModule {
    let module = HostModule::new(LinearMemory::default());
    match codec {
        FakeCodec::Opus => fake_opus(module),
        FakeCodec::Mpeg => fake_mpeg(module),
        FakeCodec::Flac => fake_flac(module),
    }
}

fn arg(args: &[i32], i: usize) -> WadResult<u32> {
    args.get(i)
        .map(|&a| a as u32)
        .ok_or_else(|| WadError::Module(format!("缺少第 {} 个参数", i)))
}

fn read_u32(mem: &LinearMemory, ptr: u32) -> WadResult<u32> {
    let mut buf = [0u8; 4];
    mem.read(ptr, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn write_u32(mem: &mut LinearMemory, ptr: u32, value: u32) -> WadResult<()> {
    mem.write(ptr, &value.to_le_bytes())
}

fn write_f32s(mem: &mut LinearMemory, ptr: u32, values: &[f32]) -> WadResult<()> {
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    mem.write(ptr, &bytes)
}

/// 伪 Opus 每个输入字节产生 10 个采样
pub fn opus_expected(frame: &[u8]) -> Vec<f32> {
    (0..frame.len() * 10)
        .map(|i| f32::from(frame[i % frame.len()]) / 255.0)
        .collect()
}

fn fake_opus(module: HostModule) -> HostModule {
    module
        .with_export("opus_frame_decoder_create", |mem, _| Ok(mem.malloc(16)? as i32))
        .with_export("opus_frame_decode_float_deinterleaved", |mem, args| {
            let (input, len, out) = (arg(args, 1)?, arg(args, 2)? as usize, arg(args, 3)?);
            let frame = mem.slice(input, len)?.to_vec();
            if frame.first().is_none_or(|&b| b == 0xFF) {
                return Ok(-4);
            }

            let left = opus_expected(&frame);
            let right: Vec<f32> = left.iter().map(|v| -v).collect();
            let samples = left.len();
            write_f32s(mem, out, &left)?;
            write_f32s(mem, out + (samples * 4) as u32, &right)?;
            Ok(samples as i32)
        })
        .with_export("opus_frame_decoder_destroy", |mem, args| {
            mem.free(arg(args, 0)?);
            Ok(0)
        })
}

fn fake_mpeg(module: HostModule) -> HostModule {
    module
        .with_export("mpeg_frame_decoder_create", |mem, _| Ok(mem.malloc(16)? as i32))
        .with_export("mpeg_decode_interleaved", |mem, args| {
            let input = arg(args, 1)?;
            let len = arg(args, 2)? as usize;
            let decoded_bytes = arg(args, 3)?;
            let interval = arg(args, 4)? as usize;
            let out = arg(args, 5)?;
            let out_size = arg(args, 6)?;
            let rate = arg(args, 7)?;

            let data = mem.slice(input, len)?.to_vec();
            let frames = (len / MPEG_FRAME_BYTES).min(interval);
            let mut left = Vec::new();
            for frame in data.chunks_exact(MPEG_FRAME_BYTES).take(frames) {
                left.extend(std::iter::repeat_n(f32::from(frame[0]), MPEG_FRAME_SAMPLES));
            }
            let right: Vec<f32> = left.iter().map(|v| v + 0.5).collect();

            write_f32s(mem, out, &left)?;
            write_f32s(mem, out + out_size * 4, &right)?;
            write_u32(mem, decoded_bytes, (frames * MPEG_FRAME_BYTES) as u32)?;
            write_u32(mem, rate, 44100)?;
            Ok(left.len() as i32)
        })
        .with_export("mpeg_frame_decoder_destroy", |_, _| Ok(0))
}

/// 伪 FLAC 帧: 首字节为声道数, 其余每字节一个采样, 第 c 声道加 c * 1000
pub fn flac_frame(channels: u8, samples: &[u8]) -> Vec<u8> {
    let mut frame = vec![channels];
    frame.extend_from_slice(samples);
    frame
}

fn fake_flac(module: HostModule) -> HostModule {
    module
        .with_export("create_decoder", |mem, args| {
            if args.len() != 8 {
                return Err(WadError::Module("create_decoder 需要 8 个参数".into()));
            }
            // 句柄区: 8 个出参指针 + 错误/状态字符串指针
            let handle = mem.malloc(40)?;
            for (i, &a) in args.iter().enumerate() {
                write_u32(mem, handle + 4 * i as u32, a as u32)?;
            }
            for (i, text) in [FAKE_ERROR, FAKE_STATE].iter().enumerate() {
                let ptr = mem.malloc(text.len() + 1)?;
                let mut bytes = text.as_bytes().to_vec();
                bytes.push(0);
                mem.write(ptr, &bytes)?;
                write_u32(mem, handle + 32 + 4 * i as u32, ptr)?;
            }
            Ok(handle as i32)
        })
        .with_export("decode_frame", |mem, args| {
            let handle = arg(args, 0)?;
            let data = mem.slice(arg(args, 1)?, arg(args, 2)? as usize)?.to_vec();
            let mut params = [0u32; 10];
            for (i, p) in params.iter_mut().enumerate() {
                *p = read_u32(mem, handle + 4 * i as u32)?;
            }

            let channels = data.first().copied().unwrap_or(0xFF);
            if channels == 0 || channels == 0xFF {
                write_u32(mem, params[6], params[8])?;
                write_u32(mem, params[7], params[9])?;
                return Ok(0);
            }

            let samples = data.len() - 1;
            let mut pcm = Vec::with_capacity(channels as usize * samples);
            for c in 0..channels {
                pcm.extend(data[1..].iter().map(|&b| f32::from(b) + f32::from(c) * 1000.0));
            }
            let out = mem.malloc(pcm.len() * 4)?;
            write_f32s(mem, out, &pcm)?;

            write_u32(mem, params[0], u32::from(channels))?;
            write_u32(mem, params[1], 44100)?;
            write_u32(mem, params[2], 16)?;
            write_u32(mem, params[3], samples as u32)?;
            write_u32(mem, params[4], out)?;
            write_u32(mem, params[5], pcm.len() as u32)?;
            Ok(1)
        })
        .with_export("destroy_decoder", |mem, args| {
            let handle = arg(args, 0)?;
            let error = read_u32(mem, handle + 32)?;
            let state = read_u32(mem, handle + 36)?;
            mem.free(error);
            mem.free(state);
            mem.free(handle);
            Ok(0)
        })
}
