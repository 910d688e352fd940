//! # wad-core
//!
//! WAD 核心库, 提供统一错误类型与内嵌模块负载所需的 DEFLATE 解压引擎.
//!
//! 解压引擎只负责解压 (stored / 固定 Huffman / 动态 Huffman 三种块),
//! 外加一个把可打印 ASCII 转义串还原为压缩字节的 yEnc 风格反转义步骤.

pub mod bitreader;
pub mod error;
pub mod huffman;
pub mod inflate;
pub mod yenc;

// 重导出常用类型
pub use error::{WadError, WadResult};
pub use inflate::{inflate, inflate_to_vec};
pub use yenc::{inflate_yenc, unescape};
