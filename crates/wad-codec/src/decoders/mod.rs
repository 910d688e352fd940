//! 内置解码器封装.

pub mod flac;
pub mod mpeg;
pub mod opus;

pub use flac::FlacDecoder;
pub use mpeg::MpegDecoder;
pub use opus::OpusDecoder;

use crate::codec_id::CodecId;
use crate::registry::DecoderRegistry;

/// 注册所有内置解码器
pub fn register_all_decoders(registry: &mut DecoderRegistry) {
    registry.register_decoder(CodecId::Opus, "opus", OpusDecoder::create);
    registry.register_decoder(CodecId::Mpeg, "mpeg", MpegDecoder::create);
    registry.register_decoder(CodecId::Flac, "flac", FlacDecoder::create);
}
