//! DEFLATE 比特流读取器.
//!
//! 按小端位序读取 (LSB first), 这是 DEFLATE (RFC 1951) 使用的位序.
//!
//! 读取器维护一个位累加器: 多位读取前总是先把累加器补充到至少 24 个有效位,
//! 补充时可能越过源数据末尾 (越过部分按 0 读取). 真正被消耗的位一旦超过源数据长度,
//! 读取即失败, 保证损坏的码流不会无限循环.

use crate::{WadError, WadResult};

/// 多位读取前累加器需要保证的最少有效位数
const REFILL_THRESHOLD: u32 = 24;

/// 比特流读取器
///
/// # 示例
/// ```
/// use wad_core::bitreader::BitReader;
///
/// let data = [0b1011_0001, 0xFF];
/// let mut br = BitReader::new(&data);
/// assert_eq!(br.read_bit().unwrap(), 1);
/// assert_eq!(br.read_bits(3, 0).unwrap(), 0b000);
/// assert_eq!(br.read_bits(4, 0).unwrap(), 0b1011);
/// ```
pub struct BitReader<'a> {
    /// 源数据
    data: &'a [u8],
    /// 下一个装入累加器的源字节索引 (可能越过末尾)
    pos: usize,
    /// 位累加器, 低位先出
    tag: u32,
    /// 累加器中的有效位数
    bitcount: u32,
}

impl<'a> BitReader<'a> {
    /// 创建新的比特流读取器
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            tag: 0,
            bitcount: 0,
        }
    }

    /// 已消耗的总位数
    pub fn bits_consumed(&self) -> usize {
        self.pos * 8 - self.bitcount as usize
    }

    /// 源数据总位数
    pub fn bits_total(&self) -> usize {
        self.data.len() * 8
    }

    /// 读取 1 个位
    pub fn read_bit(&mut self) -> WadResult<u32> {
        if self.bitcount == 0 {
            self.tag = u32::from(self.next_byte());
            self.bitcount = 8;
        }

        let bit = self.tag & 1;
        self.tag >>= 1;
        self.bitcount -= 1;
        self.check_overrun()?;

        Ok(bit)
    }

    /// 读取 `num` 个位 (最多 16 位) 并加上 `base`
    ///
    /// `num == 0` 时不消耗任何位, 直接返回 `base`.
    pub fn read_bits(&mut self, num: u32, base: u32) -> WadResult<u32> {
        if num == 0 {
            return Ok(base);
        }
        if num > 16 {
            return Err(WadError::InvalidArgument(format!(
                "read_bits: num={} 超过 16 位",
                num,
            )));
        }

        self.refill();
        let val = self.tag & (0xFFFF >> (16 - num));
        self.consume(num)?;

        Ok(val + base)
    }

    /// 把累加器补充到至少 24 个有效位
    pub fn refill(&mut self) {
        while self.bitcount < REFILL_THRESHOLD {
            self.tag |= u32::from(self.next_byte()) << self.bitcount;
            self.bitcount += 8;
        }
    }

    /// 查看累加器当前内容 (不移动位置)
    ///
    /// 调用方需先 [`refill`](Self::refill), 之后至少 24 位有效.
    pub fn tag(&self) -> u32 {
        self.tag
    }

    /// 从累加器丢弃 `n` 个已查看的位
    pub fn consume(&mut self, n: u32) -> WadResult<()> {
        if n > self.bitcount {
            return Err(WadError::InvalidData(format!(
                "消耗 {} 位超过累加器中的 {} 位",
                n, self.bitcount,
            )));
        }
        self.tag = if n >= 32 { 0 } else { self.tag >> n };
        self.bitcount -= n;
        self.check_overrun()
    }

    /// 对齐到下一个字节边界
    ///
    /// 累加器中尚未消耗的整字节退回源数据, 当前字节剩余的不足 8 位被丢弃.
    pub fn align_to_byte(&mut self) {
        while self.bitcount >= 8 {
            self.pos -= 1;
            self.bitcount -= 8;
        }
        self.tag = 0;
        self.bitcount = 0;
    }

    /// 读取小端 16 位值
    ///
    /// 仅在字节对齐时可用.
    pub fn read_u16_le(&mut self) -> WadResult<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// 从当前位置读取原始字节切片
    ///
    /// 仅在字节对齐时可用.
    pub fn read_bytes(&mut self, n: usize) -> WadResult<&'a [u8]> {
        if self.bitcount != 0 {
            return Err(WadError::InvalidArgument("read_bytes 需要字节对齐".into()));
        }

        let end = self.pos.checked_add(n).ok_or(WadError::Eof)?;
        if end > self.data.len() {
            return Err(WadError::Eof);
        }

        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// 获取当前字节位置
    pub fn byte_position(&self) -> usize {
        self.pos
    }

    fn next_byte(&mut self) -> u8 {
        let byte = self.data.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        byte
    }

    fn check_overrun(&self) -> WadResult<()> {
        if self.bits_consumed() > self.bits_total() {
            return Err(WadError::Eof);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_按小端位序读取() {
        let data = [0b1011_0001, 0b0101_0101];
        let mut br = BitReader::new(&data);

        assert_eq!(br.read_bit().unwrap(), 1);
        assert_eq!(br.read_bit().unwrap(), 0);
        assert_eq!(br.read_bits(2, 0).unwrap(), 0b00);
        assert_eq!(br.read_bits(4, 0).unwrap(), 0b1011);
        assert_eq!(br.read_bits(8, 0).unwrap(), 0b0101_0101);
        assert_eq!(br.bits_consumed(), 16);
    }

    #[test]
    fn test_read_bits_加基值() {
        let data = [0b0000_0011];
        let mut br = BitReader::new(&data);
        assert_eq!(br.read_bits(2, 3).unwrap(), 6);
        assert_eq!(br.read_bits(0, 11).unwrap(), 11);
        assert_eq!(br.bits_consumed(), 2);
    }

    #[test]
    fn test_跨字节读取() {
        let data = [0xFF, 0x00, 0xAA];
        let mut br = BitReader::new(&data);
        assert_eq!(br.read_bits(4, 0).unwrap(), 0xF);
        assert_eq!(br.read_bits(12, 0).unwrap(), 0x00F);
        assert_eq!(br.read_bits(8, 0).unwrap(), 0xAA);
    }

    #[test]
    fn test_消耗超过末尾返回eof() {
        let data = [0x00];
        let mut br = BitReader::new(&data);
        br.read_bits(8, 0).unwrap();
        assert!(matches!(br.read_bits(1, 0), Err(WadError::Eof)));
    }

    #[test]
    fn test_对齐后退回未消耗字节() {
        let data = [0b0000_0101, 0x34, 0x12, 0x99];
        let mut br = BitReader::new(&data);
        assert_eq!(br.read_bits(3, 0).unwrap(), 0b101);
        // 累加器此时已预读了后续字节
        assert!(br.byte_position() > 1);

        br.align_to_byte();
        assert_eq!(br.byte_position(), 1);
        assert_eq!(br.read_u16_le().unwrap(), 0x1234);
        assert_eq!(br.read_bytes(1).unwrap(), &[0x99]);
    }

    #[test]
    fn test_整字节边界对齐不丢数据() {
        let data = [0xAB, 0xCD, 0xEF];
        let mut br = BitReader::new(&data);
        assert_eq!(br.read_bits(8, 0).unwrap(), 0xAB);
        br.align_to_byte();
        assert_eq!(br.read_bytes(2).unwrap(), &[0xCD, 0xEF]);
    }

    #[test]
    fn test_未对齐读取字节报错() {
        let data = [0x01, 0x02];
        let mut br = BitReader::new(&data);
        br.read_bit().unwrap();
        assert!(br.read_bytes(1).is_err());
    }
}
