//! DEFLATE 解压 (RFC 1951).
//!
//! 支持 stored, 固定 Huffman 与动态 Huffman 三种块. 输出写入调用方预分配的缓冲区,
//! 缓冲区不会增长; 写满仍未结束视为数据错误.
//!
//! 任何格式错误 (非法块类型, stored 块长度校验失败, 越界回溯等) 都会立即终止整个解压调用,
//! 不返回部分结果.

use log::trace;

use crate::bitreader::BitReader;
use crate::huffman::{FIXED_DISTANCE_TREE, FIXED_LITERAL_TREE, Tree};
use crate::{WadError, WadResult};

/// 块结束符号
const END_OF_BLOCK: u16 = 256;

/// 码长字母表的传输顺序
const CODE_LENGTH_ORDER: [u8; 19] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

/// 附加位数与基值表
struct BitsBase {
    bits: [u8; 30],
    base: [u16; 30],
}

/// 构建附加位数与基值表: 前 `delta` 个码无附加位, 之后每 `delta` 个码附加位加 1
const fn build_bits_base(delta: usize, first: u16) -> BitsBase {
    let mut table = BitsBase {
        bits: [0; 30],
        base: [0; 30],
    };

    let mut i = 0;
    while i < 30 - delta {
        table.bits[i + delta] = (i / delta) as u8;
        i += 1;
    }

    let mut sum = first;
    i = 0;
    while i < 30 {
        table.base[i] = sum;
        sum += 1 << table.bits[i];
        i += 1;
    }
    table
}

/// 长度码表 (符号 257..=285)
///
/// 码 28 (符号 285) 特殊处理: 无附加位, 基值 258.
const LENGTH_TABLE: BitsBase = {
    let mut table = build_bits_base(4, 3);
    table.bits[28] = 0;
    table.base[28] = 258;
    table
};

/// 距离码表
const DISTANCE_TABLE: BitsBase = build_bits_base(2, 1);

/// 解压 DEFLATE 数据到预分配的缓冲区
///
/// 返回实际写入的前缀; 写满整个缓冲区时即为整个缓冲区.
///
/// # 示例
/// ```
/// // 单个 stored 块: BFINAL=1, BTYPE=00, LEN=5, NLEN=!5
/// let source = [0x01, 0x05, 0x00, 0xFA, 0xFF, b'h', b'e', b'l', b'l', b'o'];
/// let mut dest = [0u8; 5];
/// let out = wad_core::inflate(&source, &mut dest).unwrap();
/// assert_eq!(out, b"hello");
/// ```
pub fn inflate<'d>(source: &[u8], dest: &'d mut [u8]) -> WadResult<&'d [u8]> {
    let written = {
        let mut inflater = Inflater::new(source, dest);
        inflater.run()?;
        inflater.out.len
    };
    Ok(&dest[..written])
}

/// 解压 DEFLATE 数据到新分配的 `Vec`
///
/// `capacity` 为输出上限, 结果截断到实际写入的长度.
pub fn inflate_to_vec(source: &[u8], capacity: usize) -> WadResult<Vec<u8>> {
    let mut buf = vec![0u8; capacity];
    let written = inflate(source, &mut buf)?.len();
    buf.truncate(written);
    Ok(buf)
}

/// 输出缓冲区及其写入游标
struct Output<'d> {
    buf: &'d mut [u8],
    len: usize,
}

impl Output<'_> {
    fn push(&mut self, byte: u8) -> WadResult<()> {
        let slot = self
            .buf
            .get_mut(self.len)
            .ok_or_else(|| WadError::InvalidData("输出缓冲区已满".into()))?;
        *slot = byte;
        self.len += 1;
        Ok(())
    }

    fn extend(&mut self, bytes: &[u8]) -> WadResult<()> {
        let end = self.len + bytes.len();
        if end > self.buf.len() {
            return Err(WadError::InvalidData("输出缓冲区已满".into()));
        }
        self.buf[self.len..end].copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }

    /// 回溯复制 `length` 字节
    ///
    /// 距离可以小于长度, 此时源区域与正在写入的区域重叠, 必须逐字节复制.
    fn copy_match(&mut self, distance: usize, length: usize) -> WadResult<()> {
        if distance == 0 || distance > self.len {
            return Err(WadError::InvalidData(format!(
                "回溯距离 {} 超出已输出的 {} 字节",
                distance, self.len,
            )));
        }
        if self.len + length > self.buf.len() {
            return Err(WadError::InvalidData("输出缓冲区已满".into()));
        }

        let start = self.len - distance;
        for i in start..start + length {
            self.buf[self.len] = self.buf[i];
            self.len += 1;
        }
        Ok(())
    }
}

/// 单次解压调用的状态
struct Inflater<'s, 'd> {
    br: BitReader<'s>,
    out: Output<'d>,
    /// 动态字面量/长度树
    ltree: Tree,
    /// 动态距离树
    dtree: Tree,
}

impl<'s, 'd> Inflater<'s, 'd> {
    fn new(source: &'s [u8], dest: &'d mut [u8]) -> Self {
        Self {
            br: BitReader::new(source),
            out: Output { buf: dest, len: 0 },
            ltree: Tree::empty(),
            dtree: Tree::empty(),
        }
    }

    fn run(&mut self) -> WadResult<()> {
        loop {
            let bfinal = self.br.read_bit()?;
            let btype = self.br.read_bits(2, 0)?;
            trace!("inflate 块: bfinal={}, btype={}", bfinal, btype);

            match btype {
                0 => self.inflate_stored_block()?,
                1 => inflate_block_data(
                    &mut self.br,
                    &mut self.out,
                    &FIXED_LITERAL_TREE,
                    &FIXED_DISTANCE_TREE,
                )?,
                2 => {
                    decode_trees(&mut self.br, &mut self.ltree, &mut self.dtree)?;
                    inflate_block_data(&mut self.br, &mut self.out, &self.ltree, &self.dtree)?;
                }
                _ => {
                    return Err(WadError::InvalidData(format!("无效的块类型: {}", btype)));
                }
            }

            if bfinal == 1 {
                return Ok(());
            }
        }
    }

    fn inflate_stored_block(&mut self) -> WadResult<()> {
        self.br.align_to_byte();

        let length = self.br.read_u16_le()?;
        let inv_length = self.br.read_u16_le()?;
        if length != !inv_length {
            return Err(WadError::InvalidData(format!(
                "stored 块长度校验失败: len=0x{:04X}, nlen=0x{:04X}",
                length, inv_length,
            )));
        }

        let bytes = self.br.read_bytes(length as usize)?;
        self.out.extend(bytes)
    }
}

/// 从码流读取动态块的字面量/长度树与距离树
fn decode_trees(br: &mut BitReader<'_>, lt: &mut Tree, dt: &mut Tree) -> WadResult<()> {
    let hlit = br.read_bits(5, 257)? as usize;
    let hdist = br.read_bits(5, 1)? as usize;
    let hclen = br.read_bits(4, 4)? as usize;

    let mut lengths = [0u8; 288 + 32];
    for &symbol in CODE_LENGTH_ORDER.iter().take(hclen) {
        lengths[symbol as usize] = br.read_bits(3, 0)? as u8;
    }
    let code_tree = Tree::from_lengths(&lengths[..19])?;

    let total = hlit + hdist;
    let mut num = 0;
    while num < total {
        let symbol = code_tree.decode_symbol(br)?;
        let (value, repeat) = match symbol {
            0..=15 => (symbol as u8, 1),
            16 => {
                let prev = num
                    .checked_sub(1)
                    .map(|i| lengths[i])
                    .ok_or_else(|| WadError::InvalidData("码长重复缺少前值".into()))?;
                (prev, br.read_bits(2, 3)? as usize)
            }
            17 => (0, br.read_bits(3, 3)? as usize),
            18 => (0, br.read_bits(7, 11)? as usize),
            _ => {
                return Err(WadError::InvalidData(format!("无效的码长符号: {}", symbol)));
            }
        };

        if num + repeat > total {
            return Err(WadError::InvalidData("码长重复超出 HLIT + HDIST".into()));
        }
        lengths[num..num + repeat].fill(value);
        num += repeat;
    }

    lt.build(&lengths[..hlit])?;
    dt.build(&lengths[hlit..total])
}

/// 用给定的两棵树解码一个块的数据, 直到块结束符号
fn inflate_block_data(
    br: &mut BitReader<'_>,
    out: &mut Output<'_>,
    lt: &Tree,
    dt: &Tree,
) -> WadResult<()> {
    loop {
        let symbol = lt.decode_symbol(br)?;

        if symbol == END_OF_BLOCK {
            return Ok(());
        }

        if symbol < END_OF_BLOCK {
            out.push(symbol as u8)?;
            continue;
        }

        let code = (symbol - 257) as usize;
        if code >= LENGTH_TABLE.bits.len() {
            return Err(WadError::InvalidData(format!("无效的长度符号: {}", symbol)));
        }
        let length = br.read_bits(
            u32::from(LENGTH_TABLE.bits[code]),
            u32::from(LENGTH_TABLE.base[code]),
        )?;

        let dist_code = dt.decode_symbol(br)? as usize;
        if dist_code >= DISTANCE_TABLE.bits.len() {
            return Err(WadError::InvalidData(format!("无效的距离符号: {}", dist_code)));
        }
        let distance = br.read_bits(
            u32::from(DISTANCE_TABLE.bits[dist_code]),
            u32::from(DISTANCE_TABLE.base[dist_code]),
        )?;

        out.copy_match(distance as usize, length as usize)?;
    }
}
