//! 解码器注册表.
//!
//! 调用方与独立执行上下文两侧都从同一张声明式注册表构造解码器,
//! 工作线程只需要知道编解码器标识, 不依赖任何共享的可变状态.

use std::collections::HashMap;
use std::sync::Arc;

use wad_core::{WadError, WadResult};

use crate::codec_id::CodecId;
use crate::codec_parameters::DecoderOptions;
use crate::common::DecoderContext;
use crate::decoder::AudioDecoder;
use crate::module::ModuleSource;

/// 解码器工厂函数类型
pub type DecoderFactory =
    fn(DecoderContext, Arc<dyn ModuleSource>, &DecoderOptions) -> WadResult<Box<dyn AudioDecoder>>;

/// 解码器注册表
pub struct DecoderRegistry {
    decoders: HashMap<CodecId, Vec<DecoderEntry>>,
}

/// 解码器注册条目
struct DecoderEntry {
    /// 解码器名称
    name: String,
    /// 工厂函数
    factory: DecoderFactory,
}

impl DecoderRegistry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// 创建包含所有内置解码器的注册表
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        crate::decoders::register_all_decoders(&mut registry);
        registry
    }

    /// 注册一个解码器
    pub fn register_decoder(
        &mut self,
        codec_id: CodecId,
        name: impl Into<String>,
        factory: DecoderFactory,
    ) {
        self.decoders
            .entry(codec_id)
            .or_default()
            .push(DecoderEntry {
                name: name.into(),
                factory,
            });
    }

    /// 创建指定编解码器的解码器实例 (未初始化)
    pub fn create_decoder(
        &self,
        codec_id: CodecId,
        ctx: DecoderContext,
        source: Arc<dyn ModuleSource>,
        options: &DecoderOptions,
    ) -> WadResult<Box<dyn AudioDecoder>> {
        let entry = self
            .decoders
            .get(&codec_id)
            .and_then(|entries| entries.first())
            .ok_or_else(|| WadError::Unsupported(format!("未找到 {} 的解码器", codec_id)))?;
        (entry.factory)(ctx, source, options)
    }

    /// 是否注册了指定编解码器
    pub fn contains(&self, codec_id: CodecId) -> bool {
        self.decoders.contains_key(&codec_id)
    }

    /// 获取所有已注册的解码器名称
    pub fn list_decoders(&self) -> Vec<(CodecId, &str)> {
        let mut result = Vec::new();
        for (id, entries) in &self.decoders {
            for entry in entries {
                result.push((*id, entry.name.as_str()));
            }
        }
        result
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
