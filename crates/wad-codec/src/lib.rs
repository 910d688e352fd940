//! # wad-codec
//!
//! 解码器宿主层: 管理编译后的解码核心模块, 代理其线性内存, 并把解码输出整理为按声道分开的 PCM.
//!
//! - [`ModuleCache`]: 每个模块只编译一次, 并发初始化共享同一次编译
//! - [`DecoderCommon`]: 登记每次分配, 释放解码器时一次性归还
//! - [`AudioDecoder`]: Opus / MPEG / FLAC 封装的统一接口
//!
//! ## 使用示例
//!
//! ```rust
//! use wad_codec::{CodecId, DecoderRegistry};
//!
//! let registry = DecoderRegistry::with_builtin();
//! assert!(registry.contains(CodecId::Opus));
//! assert_eq!(registry.list_decoders().len(), 3);
//! ```

pub mod audio;
pub mod codec_id;
pub mod codec_parameters;
pub mod common;
pub mod decoder;
pub mod decoders;
pub mod memory;
pub mod module;
pub mod module_cache;
pub mod registry;

#[cfg(test)]
mod test_util;

// 重导出常用类型
pub use audio::{DecodedAudio, assemble_multi_channel, concat_f32, get_decoded_audio_concat};
pub use codec_id::CodecId;
pub use codec_parameters::{BufferLayout, DecoderOptions};
pub use common::{DecoderCommon, DecoderContext, DecoderCore, Isolation, init_common, init_decoder};
pub use decoder::AudioDecoder;
pub use memory::{HeapElement, HeapView, LinearMemory, read_c_string};
pub use module::{
    BoxFuture, EmbeddedModule, HostModule, ModuleId, ModuleSource, WasmModule, WasmRuntime,
    WASM_MAGIC, decode_embedded_image, is_wasm_image,
};
pub use module_cache::ModuleCache;
pub use registry::{DecoderFactory, DecoderRegistry};

/// 注册所有内置解码器
pub fn register_all(registry: &mut DecoderRegistry) {
    decoders::register_all_decoders(registry);
}
