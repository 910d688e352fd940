//! 编译后模块的抽象.
//!
//! 解码器核心以 WebAssembly 模块的形式提供, 宿主只通过少量原语与其交互:
//! 分配/释放线性内存, 读写线性内存, 按导出名调用函数. 具体由哪个运行时执行模块
//! 通过 [`WasmRuntime`] 注入, 本 crate 不绑定任何运行时.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};
use wad_core::{WadError, WadResult, inflate_yenc};

use crate::memory::LinearMemory;

/// 可发送的装箱 future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// WebAssembly 二进制魔数 `\0asm`
pub const WASM_MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6D];

/// 判断字节序列是否以 WebAssembly 魔数开头
pub fn is_wasm_image(bytes: &[u8]) -> bool {
    bytes.starts_with(&WASM_MAGIC)
}

/// 已实例化的模块
///
/// 指针均为线性内存中的 32 位偏移, 0 表示空指针.
pub trait WasmModule: Send + Sync {
    /// 在线性内存中分配 `size` 字节
    fn malloc(&self, size: usize) -> WadResult<u32>;

    /// 释放 `malloc` 返回的指针
    fn free(&self, ptr: u32);

    /// 从线性内存读取
    fn read(&self, ptr: u32, dst: &mut [u8]) -> WadResult<()>;

    /// 写入线性内存
    fn write(&self, ptr: u32, src: &[u8]) -> WadResult<()>;

    /// 调用导出函数
    fn call(&self, export: &str, args: &[i32]) -> WadResult<i32>;
}

/// 模块标识, 用作模块缓存的键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleId(Cow<'static, str>);

impl ModuleId {
    /// 由静态字符串构造
    pub const fn from_static(id: &'static str) -> Self {
        Self(Cow::Borrowed(id))
    }

    /// 由任意字符串构造
    pub fn new(id: impl Into<String>) -> Self {
        Self(Cow::Owned(id.into()))
    }

    /// 获取字符串形式
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 模块来源: 知道如何得到一个可用的模块实例
pub trait ModuleSource: Send + Sync {
    /// 缓存键; 同一个键在一个缓存中只编译一次
    fn module_id(&self) -> ModuleId;

    /// 编译并实例化模块
    fn instantiate(&self) -> BoxFuture<'_, WadResult<Arc<dyn WasmModule>>>;
}

/// 把模块二进制转为实例的运行时
pub trait WasmRuntime: Send + Sync {
    /// 编译并实例化二进制镜像
    fn instantiate(&self, image: Vec<u8>) -> WadResult<Arc<dyn WasmModule>>;
}

/// 以转义字符串内嵌的模块
///
/// 载荷经 DEFLATE 压缩后做 yEnc 风格转义, 还原时先反转义再解压.
pub struct EmbeddedModule<R> {
    /// 缓存键
    id: ModuleId,
    /// 转义后的压缩镜像
    payload: Cow<'static, str>,
    /// 解压后的镜像大小
    image_len: usize,
    /// 执行镜像的运行时
    runtime: R,
}

impl<R: WasmRuntime> EmbeddedModule<R> {
    /// 创建内嵌模块
    pub fn new(
        id: ModuleId,
        payload: impl Into<Cow<'static, str>>,
        image_len: usize,
        runtime: R,
    ) -> Self {
        Self {
            id,
            payload: payload.into(),
            image_len,
            runtime,
        }
    }

    /// 还原模块二进制镜像
    pub fn decode_image(&self) -> WadResult<Vec<u8>> {
        decode_embedded_image(&self.payload, self.image_len)
    }
}

impl<R: WasmRuntime> ModuleSource for EmbeddedModule<R> {
    fn module_id(&self) -> ModuleId {
        self.id.clone()
    }

    fn instantiate(&self) -> BoxFuture<'_, WadResult<Arc<dyn WasmModule>>> {
        Box::pin(async move {
            let image = self.decode_image()?;
            debug!("实例化模块 {}: {} 字节", self.id, image.len());
            self.runtime.instantiate(image)
        })
    }
}

/// 反转义并解压内嵌镜像, 校验 WebAssembly 魔数
pub fn decode_embedded_image(payload: &str, image_len: usize) -> WadResult<Vec<u8>> {
    let mut image = vec![0u8; image_len];
    let written = inflate_yenc(payload, &mut image)?.len();
    if written < image_len {
        warn!("内嵌镜像解压结果 {} 字节, 少于声明的 {} 字节", written, image_len);
        image.truncate(written);
    }

    if !is_wasm_image(&image) {
        return Err(WadError::InvalidData(
            "解压结果不是 WebAssembly 模块 (魔数不匹配)".into(),
        ));
    }
    Ok(image)
}

/// 宿主导出函数
pub type HostFunction = Box<dyn Fn(&mut LinearMemory, &[i32]) -> WadResult<i32> + Send + Sync>;

/// 由宿主函数实现导出的模块
///
/// 导出以 Rust 闭包注册, 直接操作同一块 [`LinearMemory`]. 用于以原生代码提供解码核心,
/// 或在没有 WebAssembly 运行时的环境下验证宿主侧逻辑.
pub struct HostModule {
    memory: Mutex<LinearMemory>,
    exports: HashMap<String, HostFunction>,
}

impl HostModule {
    /// 以给定线性内存创建模块 (尚无导出)
    pub fn new(memory: LinearMemory) -> Self {
        Self {
            memory: Mutex::new(memory),
            exports: HashMap::new(),
        }
    }

    /// 注册一个导出函数
    pub fn with_export<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&mut LinearMemory, &[i32]) -> WadResult<i32> + Send + Sync + 'static,
    {
        self.exports.insert(name.into(), Box::new(function));
        self
    }

    /// 是否存在指定导出
    pub fn has_export(&self, name: &str) -> bool {
        self.exports.contains_key(name)
    }

    /// 以只读方式访问线性内存
    pub fn with_memory<T>(&self, f: impl FnOnce(&LinearMemory) -> T) -> T {
        f(&self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LinearMemory> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WasmModule for HostModule {
    fn malloc(&self, size: usize) -> WadResult<u32> {
        self.lock().malloc(size)
    }

    fn free(&self, ptr: u32) {
        if !self.lock().free(ptr) {
            warn!("释放未知指针 0x{:08X}", ptr);
        }
    }

    fn read(&self, ptr: u32, dst: &mut [u8]) -> WadResult<()> {
        self.lock().read(ptr, dst)
    }

    fn write(&self, ptr: u32, src: &[u8]) -> WadResult<()> {
        self.lock().write(ptr, src)
    }

    fn call(&self, export: &str, args: &[i32]) -> WadResult<i32> {
        let function = self
            .exports
            .get(export)
            .ok_or_else(|| WadError::Module(format!("模块没有导出函数 {}", export)))?;
        function(&mut self.lock(), args)
    }
}
