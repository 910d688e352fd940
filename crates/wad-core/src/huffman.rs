//! 规范 Huffman 树.
//!
//! 树只由每个符号的码长决定: 先统计各码长的码字数量, 再用前缀和求出每个码长的起始槽位,
//! 最后在每个码长内按符号顺序依次分配槽位. 解码时逐位累加码值, 与各码长的码字数量比较,
//! 直到落入某个码长的区间.

use crate::bitreader::BitReader;
use crate::{WadError, WadResult};

/// 字面量/长度字母表的最大符号数
pub const MAX_SYMBOLS: usize = 288;

/// 最长码长
pub const MAX_CODE_LEN: usize = 15;

/// 规范 Huffman 树
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    /// 各码长的码字数量 (下标 0 恒为 0)
    counts: [u16; 16],
    /// 码字 -> 符号映射, 按码字顺序排列
    trans: [u16; MAX_SYMBOLS],
}

/// 固定 Huffman 块使用的字面量/长度树
///
/// 码长分布: 256-279 为 7 位, 0-143 与 280-287 为 8 位, 144-255 为 9 位.
pub static FIXED_LITERAL_TREE: Tree = build_fixed_literal_tree();

/// 固定 Huffman 块使用的距离树 (32 个符号全部 5 位)
pub static FIXED_DISTANCE_TREE: Tree = build_fixed_distance_tree();

const fn build_fixed_literal_tree() -> Tree {
    let mut tree = Tree::empty();
    tree.counts[7] = 24;
    tree.counts[8] = 152;
    tree.counts[9] = 112;

    let mut i = 0;
    while i < 24 {
        tree.trans[i] = 256 + i as u16;
        i += 1;
    }
    i = 0;
    while i < 144 {
        tree.trans[24 + i] = i as u16;
        i += 1;
    }
    i = 0;
    while i < 8 {
        tree.trans[24 + 144 + i] = 280 + i as u16;
        i += 1;
    }
    i = 0;
    while i < 112 {
        tree.trans[24 + 144 + 8 + i] = 144 + i as u16;
        i += 1;
    }
    tree
}

const fn build_fixed_distance_tree() -> Tree {
    let mut tree = Tree::empty();
    tree.counts[5] = 32;

    let mut i = 0;
    while i < 32 {
        tree.trans[i] = i as u16;
        i += 1;
    }
    tree
}

impl Tree {
    /// 创建空树 (不含任何码字)
    pub const fn empty() -> Self {
        Self {
            counts: [0; 16],
            trans: [0; MAX_SYMBOLS],
        }
    }

    /// 由码长数组构建树
    pub fn from_lengths(lengths: &[u8]) -> WadResult<Self> {
        let mut tree = Self::empty();
        tree.build(lengths)?;
        Ok(tree)
    }

    /// 用码长数组重建本树
    ///
    /// `lengths[i]` 为符号 `i` 的码长, 0 表示该符号不出现.
    pub fn build(&mut self, lengths: &[u8]) -> WadResult<()> {
        if lengths.len() > MAX_SYMBOLS {
            return Err(WadError::InvalidData(format!(
                "符号数 {} 超过上限 {}",
                lengths.len(),
                MAX_SYMBOLS,
            )));
        }

        self.counts = [0; 16];
        self.trans = [0; MAX_SYMBOLS];

        for &len in lengths {
            if len as usize > MAX_CODE_LEN {
                return Err(WadError::InvalidData(format!("无效的码长: {}", len)));
            }
            self.counts[len as usize] += 1;
        }
        self.counts[0] = 0;

        // 分布排序的起始槽位
        let mut offs = [0u16; 16];
        let mut sum = 0u16;
        for (len, off) in offs.iter_mut().enumerate() {
            *off = sum;
            sum += self.counts[len];
        }

        for (symbol, &len) in lengths.iter().enumerate() {
            if len != 0 {
                let slot = &mut offs[len as usize];
                self.trans[*slot as usize] = symbol as u16;
                *slot += 1;
            }
        }

        Ok(())
    }

    /// 各码长的码字数量
    pub fn counts(&self) -> &[u16; 16] {
        &self.counts
    }

    /// 码字 -> 符号映射表
    pub fn trans(&self) -> &[u16] {
        &self.trans
    }

    /// 从比特流中解码一个符号
    pub fn decode_symbol(&self, br: &mut BitReader<'_>) -> WadResult<u16> {
        br.refill();

        let mut tag = br.tag();
        let mut sum = 0i32;
        let mut cur = 0i32;
        let mut len = 0usize;

        // 码值落在当前码长区间之前持续读位
        loop {
            cur = 2 * cur + (tag & 1) as i32;
            tag >>= 1;
            len += 1;

            if len > MAX_CODE_LEN {
                return Err(WadError::InvalidData("Huffman 码字超过 15 位".into()));
            }

            let count = i32::from(self.counts[len]);
            sum += count;
            cur -= count;
            if cur < 0 {
                break;
            }
        }

        br.consume(len as u32)?;
        Ok(self.trans[(sum + cur) as usize])
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::empty()
    }
}
