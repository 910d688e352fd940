//! # WAD
//!
//! WebAssembly 音频解码器的宿主层.
//!
//! 解码核心以编译好的 WebAssembly 模块提供, WAD 负责其外围:
//! - **解压**: 内嵌模块负载的 yEnc 风格反转义与 DEFLATE 解压
//! - **资源代理**: 模块缓存, 线性内存分配登记, 输出整理为按声道分开的 PCM
//! - **Worker 通道**: 在独立线程中运行解码器, 并发请求按 id 复用单一管道
//!
//! # 快速开始
//!
//! ```rust
//! // 一个 stored 块: BFINAL=1, LEN=5, NLEN=!5
//! let block = [0x01, 0x05, 0x00, 0xFA, 0xFF, b'h', b'e', b'l', b'l', b'o'];
//! let mut sink = [0u8; 5];
//! let out = wad::core::inflate(&block, &mut sink).unwrap();
//! assert_eq!(out, b"hello");
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `wad-core` | 错误类型与解压引擎 |
//! | `wad-codec` | 资源代理与解码器封装 |
//! | `wad-worker` | Worker 通道 |

use std::sync::Arc;

/// 错误类型与解压引擎
pub use wad_core as core;

/// 资源代理与解码器封装
pub use wad_codec as codec;

/// Worker 通道
pub use wad_worker as worker;

/// 获取 WAD 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 进程级模块缓存
pub fn default_module_cache() -> Arc<wad_codec::ModuleCache> {
    wad_codec::ModuleCache::global()
}

/// 创建已注册所有内置解码器的注册表
pub fn default_decoder_registry() -> wad_codec::DecoderRegistry {
    let mut registry = wad_codec::DecoderRegistry::new();
    wad_codec::register_all(&mut registry);
    registry
}
