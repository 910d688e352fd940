//! 解码器公共资源代理.
//!
//! 每个解码器实例持有一个 [`DecoderCommon`]: 它包装模块实例,
//! 记录经它分配的每一个指针, 以便在释放解码器时一次性归还. 释放操作幂等,
//! 解码器被丢弃时也会自动执行.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, trace};
use wad_core::{WadError, WadResult};

use crate::codec_parameters::BufferLayout;
use crate::memory::{HeapElement, HeapView, read_c_string};
use crate::module::{ModuleSource, WasmModule};
use crate::module_cache::ModuleCache;

/// 模块实例的隔离方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Isolation {
    /// 进程内共享: 同一模块只编译一次
    #[default]
    Shared,
    /// 独立执行上下文: 总是新建模块实例, 不使用缓存
    Worker,
}

/// 解码器构造上下文
#[derive(Clone)]
pub struct DecoderContext {
    cache: Arc<ModuleCache>,
    isolation: Isolation,
}

impl DecoderContext {
    /// 使用指定缓存的共享上下文
    pub fn new(cache: Arc<ModuleCache>) -> Self {
        Self {
            cache,
            isolation: Isolation::Shared,
        }
    }

    /// 独立执行上下文
    pub fn isolated() -> Self {
        Self {
            cache: Arc::new(ModuleCache::new()),
            isolation: Isolation::Worker,
        }
    }

    /// 隔离方式
    pub fn isolation(&self) -> Isolation {
        self.isolation
    }

    /// 模块缓存
    pub fn cache(&self) -> &Arc<ModuleCache> {
        &self.cache
    }

    /// 取得模块实例
    pub async fn load_module(&self, source: &dyn ModuleSource) -> WadResult<Arc<dyn WasmModule>> {
        match self.isolation {
            Isolation::Shared => self.cache.get_or_instantiate(source).await,
            Isolation::Worker => {
                debug!("独立上下文实例化模块 {}", source.module_id());
                source.instantiate().await
            }
        }
    }
}

impl Default for DecoderContext {
    fn default() -> Self {
        Self::new(ModuleCache::global())
    }
}

/// 资源代理
pub struct DecoderCommon {
    module: Arc<dyn WasmModule>,
    /// 经本代理分配且尚未释放的指针
    pointers: HashSet<u32>,
}

impl DecoderCommon {
    /// 包装模块实例
    pub fn new(module: Arc<dyn WasmModule>) -> Self {
        Self {
            module,
            pointers: HashSet::new(),
        }
    }

    /// 模块实例
    pub fn module(&self) -> &dyn WasmModule {
        self.module.as_ref()
    }

    /// 调用模块导出函数
    pub fn call(&self, export: &str, args: &[i32]) -> WadResult<i32> {
        self.module.call(export, args)
    }

    /// 分配 `len` 个元素的视图并登记指针
    pub fn allocate<T: HeapElement>(&mut self, len: usize) -> WadResult<HeapView<T>> {
        let bytes = len.checked_mul(T::BYTES).ok_or_else(|| {
            WadError::InvalidArgument(format!("分配 {} 个元素溢出", len))
        })?;
        let ptr = self.module.malloc(bytes)?;
        if ptr == 0 {
            return Err(WadError::OutOfMemory(format!("模块无法分配 {} 字节", bytes)));
        }

        trace!("分配 {} 字节 @ 0x{:08X}", bytes, ptr);
        self.pointers.insert(ptr);
        Ok(HeapView::new(ptr, len))
    }

    /// 分配并写入数据
    pub fn allocate_from<T: HeapElement>(&mut self, values: &[T]) -> WadResult<HeapView<T>> {
        let view = self.allocate::<T>(values.len())?;
        view.write(self.module(), values)?;
        Ok(view)
    }

    /// 提前释放单个视图
    ///
    /// 只释放经本代理分配的指针, 其他指针被忽略.
    pub fn free_view<T: HeapElement>(&mut self, view: HeapView<T>) {
        if self.pointers.remove(&view.ptr()) {
            self.module.free(view.ptr());
        }
    }

    /// 释放所有登记的指针
    ///
    /// 每个指针恰好释放一次, 重复调用无副作用.
    pub fn release(&mut self) {
        if self.pointers.is_empty() {
            return;
        }
        debug!("释放 {} 个指针", self.pointers.len());
        for ptr in self.pointers.drain() {
            self.module.free(ptr);
        }
    }

    /// 尚未释放的指针数量
    pub fn pointer_count(&self) -> usize {
        self.pointers.len()
    }

    /// 指针是否由本代理分配且尚未释放
    pub fn owns(&self, ptr: u32) -> bool {
        self.pointers.contains(&ptr)
    }

    /// 按声道切分平铺的输出缓冲区
    ///
    /// 输出按声道连续存放, 每个声道 `samples` 个采样, 第 `i` 个声道从 `i * samples` 开始.
    pub fn get_output_channels(
        &self,
        output: &HeapView<f32>,
        channels: usize,
        samples: usize,
    ) -> WadResult<Vec<Vec<f32>>> {
        let needed = channels.checked_mul(samples).ok_or_else(|| {
            WadError::InvalidArgument(format!("声道数 {} x 采样数 {} 溢出", channels, samples))
        })?;
        if needed > output.len() {
            return Err(WadError::InvalidData(format!(
                "输出缓冲区只有 {} 个采样, 需要 {} 个声道 x {} 个采样",
                output.len(),
                channels,
                samples,
            )));
        }

        (0..channels)
            .map(|channel| output.read_range(self.module(), channel * samples, samples))
            .collect()
    }

    /// 读取模块内存中的 C 字符串
    pub fn read_c_string(&self, ptr: u32) -> WadResult<String> {
        read_c_string(self.module(), ptr)
    }
}

impl Drop for DecoderCommon {
    fn drop(&mut self) {
        self.release();
    }
}

/// 初始化后的解码器核心: 资源代理加共享输入输出缓冲区
pub struct DecoderCore {
    /// 资源代理
    pub common: DecoderCommon,
    /// 输入缓冲区
    pub input: HeapView<u8>,
    /// 输出缓冲区 (按声道连续存放)
    pub output: HeapView<f32>,
    /// 缓冲区布局
    pub layout: BufferLayout,
}

impl DecoderCore {
    /// 把数据写入输入缓冲区
    pub fn write_input(&self, data: &[u8]) -> WadResult<()> {
        if data.len() > self.input.len() {
            return Err(WadError::InvalidArgument(format!(
                "输入 {} 字节超过输入缓冲区 {} 字节",
                data.len(),
                self.input.len(),
            )));
        }
        self.input.write(self.common.module(), data)
    }

    /// 按 `stride` 切分输出缓冲区, 每个声道取前 `samples` 个采样
    pub fn read_output(&self, stride: usize, samples: usize) -> WadResult<Vec<Vec<f32>>> {
        let module = self.common.module();
        (0..self.layout.output_channels)
            .map(|channel| self.output.read_range(module, channel * stride, samples))
            .collect()
    }
}

/// 取得模块实例并包装为资源代理
pub async fn init_common(ctx: &DecoderContext, source: &dyn ModuleSource) -> WadResult<DecoderCommon> {
    let module = ctx.load_module(source).await?;
    Ok(DecoderCommon::new(module))
}

/// 取得模块实例并按布局分配共享缓冲区
pub async fn init_decoder(
    ctx: &DecoderContext,
    source: &dyn ModuleSource,
    layout: BufferLayout,
) -> WadResult<DecoderCore> {
    let mut common = init_common(ctx, source).await?;
    let input = common.allocate::<u8>(layout.input_bytes)?;
    let output = common.allocate::<f32>(layout.output_len())?;
    debug!(
        "解码器初始化: 模块 {}, 输入 {} 字节, 输出 {} x {} 采样",
        source.module_id(),
        layout.input_bytes,
        layout.output_channels,
        layout.output_samples,
    );

    Ok(DecoderCore {
        common,
        input,
        output,
        layout,
    })
}
