//! 集成测试共享的辅助: 正向转义, 参考压缩器, 以宿主函数实现的伪 Opus 核心.

#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use flate2::Compression;
use flate2::write::DeflateEncoder;
use wad::codec::{
    BoxFuture, HostModule, LinearMemory, ModuleId, ModuleSource, WASM_MAGIC, WasmModule,
    WasmRuntime,
};
use wad::core::{WadError, WadResult};

/// 每个输入字节产生的采样数
pub const SAMPLES_PER_BYTE: usize = 4;

/// 初始化测试日志
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 原始 DEFLATE 压缩
pub fn deflate(data: &[u8], level: u32) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(level));
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// yEnc 风格转义, 每 `line_width` 个字符插入一次 CRLF
pub fn escape(bytes: &[u8], line_width: usize) -> String {
    let mut out = String::new();
    let mut column = 0;
    for &b in bytes {
        let value = b.wrapping_add(42);
        if matches!(value, 0 | 10 | 13 | 61) {
            out.push('=');
            out.push(char::from(value + 64));
        } else {
            out.push(char::from(value));
        }
        column += 1;
        if line_width > 0 && column >= line_width {
            out.push_str("\r\n");
            column = 0;
        }
    }
    out
}

/// 带 WebAssembly 魔数与版本号的伪镜像
pub fn wasm_image(len: usize) -> Vec<u8> {
    let mut image = WASM_MAGIC.to_vec();
    image.extend_from_slice(&1u32.to_le_bytes());
    image.extend((0..len.saturating_sub(8)).map(|i| (i * 31 % 251) as u8));
    image
}

/// 伪 Opus 输出: 左声道为输入字节重复, 右声道取反
pub fn expected_left(frame: &[u8]) -> Vec<f32> {
    (0..frame.len() * SAMPLES_PER_BYTE)
        .map(|i| f32::from(frame[i % frame.len()]))
        .collect()
}

fn arg(args: &[i32], i: usize) -> WadResult<u32> {
    args.get(i)
        .map(|&a| a as u32)
        .ok_or_else(|| WadError::Module(format!("缺少第 {} 个参数", i)))
}

/// 伪 Opus 解码核心
///
/// `delay` 非零时解码导出会阻塞对应时长, 用于观察并发请求的交错.
pub fn opus_module(delay: Duration) -> HostModule {
    HostModule::new(LinearMemory::default())
        .with_export("opus_frame_decoder_create", |mem, _| Ok(mem.malloc(8)? as i32))
        .with_export("opus_frame_decode_float_deinterleaved", move |mem, args| {
            let (input, len, out) = (arg(args, 1)?, arg(args, 2)? as usize, arg(args, 3)?);
            let frame = mem.slice(input, len)?.to_vec();
            if frame.is_empty() {
                return Ok(-1);
            }
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }

            let left = expected_left(&frame);
            let mut bytes: Vec<u8> = left.iter().flat_map(|v| v.to_le_bytes()).collect();
            bytes.extend(left.iter().flat_map(|v| (-v).to_le_bytes()));
            mem.write(out, &bytes)?;
            Ok(left.len() as i32)
        })
        .with_export("opus_frame_decoder_destroy", |mem, args| {
            mem.free(arg(args, 0)?);
            Ok(0)
        })
}

/// 把镜像交给伪 Opus 核心的运行时, 记录实例化次数
#[derive(Default)]
pub struct FakeRuntime {
    pub instantiations: Arc<AtomicUsize>,
}

impl WasmRuntime for FakeRuntime {
    fn instantiate(&self, image: Vec<u8>) -> WadResult<Arc<dyn WasmModule>> {
        if !image.starts_with(&WASM_MAGIC) {
            return Err(WadError::InvalidData("不是 WebAssembly 镜像".into()));
        }
        self.instantiations.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(opus_module(Duration::ZERO)))
    }
}

/// 直接提供伪 Opus 核心的模块来源
pub struct OpusSource {
    id: &'static str,
    delay: Duration,
    pub instantiations: AtomicUsize,
}

impl OpusSource {
    pub fn new(id: &'static str) -> Self {
        Self::with_delay(id, Duration::ZERO)
    }

    pub fn with_delay(id: &'static str, delay: Duration) -> Self {
        Self {
            id,
            delay,
            instantiations: AtomicUsize::new(0),
        }
    }

    pub fn count(&self) -> usize {
        self.instantiations.load(Ordering::SeqCst)
    }
}

impl ModuleSource for OpusSource {
    fn module_id(&self) -> ModuleId {
        ModuleId::from_static(self.id)
    }

    fn instantiate(&self) -> BoxFuture<'_, WadResult<Arc<dyn WasmModule>>> {
        Box::pin(async move {
            self.instantiations.fetch_add(1, Ordering::SeqCst);
            // 模拟编译耗时, 让并发调用有机会重叠
            tokio::time::sleep(Duration::from_millis(10)).await;
            let module: Arc<dyn WasmModule> = Arc::new(opus_module(self.delay));
            Ok(module)
        })
    }
}
