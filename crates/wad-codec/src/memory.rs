//! 线性内存与类型化视图.
//!
//! `LinearMemory` 是一块按 64 KiB 页增长的连续字节空间, 自带首次适配分配器,
//! 可作为任意运行时绑定的宿主侧内存. 地址 0 所在的保留区永不分配, 因此 0 始终表示空指针.
//!
//! `HeapView<T>` 只保存 (指针, 元素个数), 每次访问都经由模块读写.
//! 内存增长后旧视图仍然有效, 不会出现悬垂的宿主引用.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};
use wad_core::{WadError, WadResult};

use crate::module::WasmModule;

/// WebAssembly 页大小
pub const PAGE_SIZE: usize = 64 * 1024;

/// 分配对齐
const ALIGN: usize = 8;

/// 堆起始地址, 之前的区域保留
const HEAP_BASE: usize = 1024;

/// 默认最大页数 (1 GiB)
const DEFAULT_MAX_PAGES: usize = 16 * 1024;

/// 线性内存
pub struct LinearMemory {
    /// 内存内容
    bytes: Vec<u8>,
    /// 最大页数
    max_pages: usize,
    /// 已分配块: 起始地址 -> 对齐后的大小
    allocated: BTreeMap<u32, usize>,
    /// 空闲块: 起始地址 -> 大小
    free_blocks: BTreeMap<u32, usize>,
    /// 尚未划分区域的起点
    top: usize,
}

impl LinearMemory {
    /// 创建指定初始页数与最大页数的线性内存
    pub fn new(initial_pages: usize, max_pages: usize) -> Self {
        let initial_pages = initial_pages.max(1).min(max_pages.max(1));
        Self {
            bytes: vec![0; initial_pages * PAGE_SIZE],
            max_pages: max_pages.max(initial_pages),
            allocated: BTreeMap::new(),
            free_blocks: BTreeMap::new(),
            top: HEAP_BASE,
        }
    }

    /// 当前字节大小
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// 当前页数
    pub fn pages(&self) -> usize {
        self.bytes.len() / PAGE_SIZE
    }

    /// 存活的分配数量
    pub fn allocation_count(&self) -> usize {
        self.allocated.len()
    }

    /// 指针是否为存活的分配
    pub fn is_allocated(&self, ptr: u32) -> bool {
        self.allocated.contains_key(&ptr)
    }

    /// 分配 `size` 字节, 返回起始地址
    ///
    /// 复用的块不清零, 与原生 malloc 一致.
    pub fn malloc(&mut self, size: usize) -> WadResult<u32> {
        let need = size
            .max(1)
            .checked_next_multiple_of(ALIGN)
            .ok_or_else(|| WadError::OutOfMemory(format!("分配 {} 字节溢出", size)))?;

        let fit = self
            .free_blocks
            .iter()
            .find(|&(_, &block)| block >= need)
            .map(|(&ptr, &block)| (ptr, block));

        let ptr = match fit {
            Some((ptr, block)) => {
                self.free_blocks.remove(&ptr);
                if block > need {
                    self.free_blocks.insert(ptr + need as u32, block - need);
                }
                ptr
            }
            None => {
                let start = self.top;
                let end = start
                    .checked_add(need)
                    .ok_or_else(|| WadError::OutOfMemory(format!("分配 {} 字节溢出", size)))?;
                self.grow_to(end)?;
                self.top = end;
                start as u32
            }
        };

        self.allocated.insert(ptr, need);
        Ok(ptr)
    }

    /// 释放一个分配; 未知指针返回 `false` 且不做任何事
    pub fn free(&mut self, ptr: u32) -> bool {
        let Some(mut size) = self.allocated.remove(&ptr) else {
            return false;
        };
        let mut start = ptr;

        // 与后一个空闲块合并
        let next = start + size as u32;
        if let Some(next_size) = self.free_blocks.remove(&next) {
            size += next_size;
        }

        // 与前一个空闲块合并
        if let Some((&prev, &prev_size)) = self.free_blocks.range(..start).next_back() {
            if prev as usize + prev_size == start as usize {
                self.free_blocks.remove(&prev);
                start = prev;
                size += prev_size;
            }
        }

        if start as usize + size == self.top {
            self.top = start as usize;
        } else {
            self.free_blocks.insert(start, size);
        }
        true
    }

    /// 读取 `dst.len()` 字节
    pub fn read(&self, ptr: u32, dst: &mut [u8]) -> WadResult<()> {
        let range = self.range(ptr, dst.len())?;
        dst.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    /// 写入 `src`
    pub fn write(&mut self, ptr: u32, src: &[u8]) -> WadResult<()> {
        let range = self.range(ptr, src.len())?;
        self.bytes[range].copy_from_slice(src);
        Ok(())
    }

    /// 借用一段内存
    pub fn slice(&self, ptr: u32, len: usize) -> WadResult<&[u8]> {
        let range = self.range(ptr, len)?;
        Ok(&self.bytes[range])
    }

    fn range(&self, ptr: u32, len: usize) -> WadResult<std::ops::Range<usize>> {
        let start = ptr as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.bytes.len() => Ok(start..end),
            _ => Err(WadError::Module(format!(
                "访问越界: ptr=0x{:08X}, len={}, 内存大小={}",
                ptr,
                len,
                self.bytes.len(),
            ))),
        }
    }

    fn grow_to(&mut self, end: usize) -> WadResult<()> {
        if end <= self.bytes.len() {
            return Ok(());
        }

        let pages = end.div_ceil(PAGE_SIZE);
        if pages > self.max_pages || end > u32::MAX as usize {
            return Err(WadError::OutOfMemory(format!(
                "需要 {} 页, 超过上限 {} 页",
                pages, self.max_pages,
            )));
        }

        debug!("线性内存增长: {} -> {} 页", self.pages(), pages);
        self.bytes.resize(pages * PAGE_SIZE, 0);
        Ok(())
    }
}

impl Default for LinearMemory {
    fn default() -> Self {
        Self::new(16, DEFAULT_MAX_PAGES)
    }
}

/// 可存放在线性内存中的元素类型 (小端)
pub trait HeapElement: Copy + Default + Send + Sync + 'static {
    /// 单个元素的字节数
    const BYTES: usize;

    /// 从字节解码, `src.len() == dst.len() * BYTES`
    fn decode_slice(src: &[u8], dst: &mut [Self]);

    /// 编码为字节, `dst.len() == src.len() * BYTES`
    fn encode_slice(src: &[Self], dst: &mut [u8]);
}

impl HeapElement for u8 {
    const BYTES: usize = 1;

    fn decode_slice(src: &[u8], dst: &mut [Self]) {
        dst.copy_from_slice(src);
    }

    fn encode_slice(src: &[Self], dst: &mut [u8]) {
        dst.copy_from_slice(src);
    }
}

impl HeapElement for u32 {
    const BYTES: usize = 4;

    fn decode_slice(src: &[u8], dst: &mut [Self]) {
        LittleEndian::read_u32_into(src, dst);
    }

    fn encode_slice(src: &[Self], dst: &mut [u8]) {
        LittleEndian::write_u32_into(src, dst);
    }
}

impl HeapElement for i32 {
    const BYTES: usize = 4;

    fn decode_slice(src: &[u8], dst: &mut [Self]) {
        LittleEndian::read_i32_into(src, dst);
    }

    fn encode_slice(src: &[Self], dst: &mut [u8]) {
        LittleEndian::write_i32_into(src, dst);
    }
}

impl HeapElement for f32 {
    const BYTES: usize = 4;

    fn decode_slice(src: &[u8], dst: &mut [Self]) {
        LittleEndian::read_f32_into(src, dst);
    }

    fn encode_slice(src: &[Self], dst: &mut [u8]) {
        LittleEndian::write_f32_into(src, dst);
    }
}

/// 线性内存上的类型化视图
#[derive(Debug)]
pub struct HeapView<T> {
    ptr: u32,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T> Clone for HeapView<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for HeapView<T> {}

impl<T: HeapElement> HeapView<T> {
    /// 以指针与元素个数构造视图
    pub fn new(ptr: u32, len: usize) -> Self {
        Self {
            ptr,
            len,
            _marker: PhantomData,
        }
    }

    /// 起始地址
    pub fn ptr(&self) -> u32 {
        self.ptr
    }

    /// 元素个数
    pub fn len(&self) -> usize {
        self.len
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 字节长度
    pub fn byte_len(&self) -> usize {
        self.len * T::BYTES
    }

    /// 截取子视图
    pub fn subview(&self, start: usize, len: usize) -> WadResult<Self> {
        self.check_range(start, len)?;
        Ok(Self::new(self.element_ptr(start)?, len))
    }

    /// 读取全部元素
    pub fn read(&self, module: &dyn WasmModule) -> WadResult<Vec<T>> {
        self.read_range(module, 0, self.len)
    }

    /// 读取 `[start, start + count)` 范围内的元素
    pub fn read_range(&self, module: &dyn WasmModule, start: usize, count: usize) -> WadResult<Vec<T>> {
        self.check_range(start, count)?;
        let mut bytes = vec![0u8; count * T::BYTES];
        module.read(self.element_ptr(start)?, &mut bytes)?;

        let mut values = vec![T::default(); count];
        T::decode_slice(&bytes, &mut values);
        Ok(values)
    }

    /// 从视图起点写入 `values`
    pub fn write(&self, module: &dyn WasmModule, values: &[T]) -> WadResult<()> {
        self.check_range(0, values.len())?;
        let mut bytes = vec![0u8; values.len() * T::BYTES];
        T::encode_slice(values, &mut bytes);
        module.write(self.ptr, &bytes)
    }

    /// 读取单个元素
    pub fn get(&self, module: &dyn WasmModule, index: usize) -> WadResult<T> {
        Ok(self.read_range(module, index, 1)?[0])
    }

    /// 写入单个元素
    pub fn set(&self, module: &dyn WasmModule, index: usize, value: T) -> WadResult<()> {
        self.check_range(index, 1)?;
        let mut bytes = vec![0u8; T::BYTES];
        T::encode_slice(&[value], &mut bytes);
        module.write(self.element_ptr(index)?, &bytes)
    }

    fn check_range(&self, start: usize, count: usize) -> WadResult<()> {
        match start.checked_add(count) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(WadError::InvalidArgument(format!(
                "视图越界: start={}, count={}, len={}",
                start, count, self.len,
            ))),
        }
    }

    fn element_ptr(&self, index: usize) -> WadResult<u32> {
        index
            .checked_mul(T::BYTES)
            .and_then(|offset| u32::try_from(offset).ok())
            .and_then(|offset| self.ptr.checked_add(offset))
            .ok_or_else(|| WadError::Module(format!("视图地址溢出: index={}", index)))
    }
}

/// 从线性内存读取以 NUL 结尾的字符串
///
/// 读到内存末尾仍未遇到 NUL 时截止.
pub fn read_c_string(module: &dyn WasmModule, ptr: u32) -> WadResult<String> {
    const CHUNK: usize = 64;
    let mut out = Vec::new();
    let mut addr = ptr;
    let mut chunk = [0u8; CHUNK];

    loop {
        // 整块读取失败时 (靠近内存末尾) 逐字节读取
        let read = match module.read(addr, &mut chunk) {
            Ok(()) => CHUNK,
            Err(_) => {
                let mut n = 0;
                while n < CHUNK && module.read(addr + n as u32, &mut chunk[n..n + 1]).is_ok() {
                    n += 1;
                }
                if n == 0 {
                    warn!("读取 C 字符串越界: ptr=0x{:08X}", ptr);
                    break;
                }
                n
            }
        };

        if let Some(nul) = chunk[..read].iter().position(|&b| b == 0) {
            out.extend_from_slice(&chunk[..nul]);
            break;
        }
        out.extend_from_slice(&chunk[..read]);
        if read < CHUNK {
            break;
        }
        addr = addr
            .checked_add(CHUNK as u32)
            .ok_or_else(|| WadError::Module("C 字符串地址溢出".into()))?;
    }

    Ok(String::from_utf8_lossy(&out).into_owned())
}
