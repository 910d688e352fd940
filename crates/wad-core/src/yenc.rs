//! yEnc 风格反转义.
//!
//! 内嵌模块的压缩字节经过一次可打印 ASCII 转义后作为字符串字面量存放:
//! - 每个字节先加 42 (模 256)
//! - 结果若会破坏字符串字面量 (`=`, CR, LF 等), 输出 `=` 后跟 `值 + 64`
//! - 长行按任意位置折行, 折行用的 CR/LF 本身不携带数据
//!
//! 这里只实现反方向. 输入按 UTF-16 码元逐个处理, 码元值按字节截断 (模 256).

use log::debug;

use crate::WadResult;
use crate::inflate::inflate;

/// 转义标记 `=`
const ESCAPE: i32 = 61;
const CR: i32 = 13;
const LF: i32 = 10;

/// 把转义字符串还原为压缩字节
///
/// 输出长度不超过输入的码元数.
///
/// # 示例
/// ```
/// // 'h' + 42 = 146, '=' 后的 'J' (74) 还原为 10 再减 42 得到 224
/// let bytes = wad_core::unescape("\u{92}=J");
/// assert_eq!(bytes, vec![b'h', 224]);
/// ```
pub fn unescape(source: &str) -> Vec<u8> {
    let mut output = Vec::with_capacity(source.len());
    let mut continued = false;

    for unit in source.encode_utf16() {
        let mut byte = i32::from(unit);

        if byte == CR || byte == LF {
            continue;
        }

        if byte == ESCAPE && !continued {
            continued = true;
            continue;
        }

        if continued {
            continued = false;
            byte -= 64;
        }

        let value = if byte > 0 && byte < 42 {
            byte + 214
        } else {
            byte - 42
        };
        output.push(value as u8);
    }

    output
}

/// 反转义后解压到预分配的缓冲区
///
/// 返回实际写入的前缀.
pub fn inflate_yenc<'d>(source: &str, dest: &'d mut [u8]) -> WadResult<&'d [u8]> {
    let compressed = unescape(source);
    debug!(
        "yEnc 反转义: {} 码元 -> {} 字节压缩数据",
        source.encode_utf16().count(),
        compressed.len(),
    );
    inflate(&compressed, dest)
}
