//! 编译后模块的缓存.
//!
//! 每个 [`ModuleId`] 对应一个 `OnceCell`. 条目在编译开始前就插入缓存,
//! 所以并发的初始化请求共享同一次编译, 而不会各自重复编译.
//! 编译失败时条目保持未初始化, 下一个请求会重新编译.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use log::debug;
use tokio::sync::OnceCell;
use wad_core::WadResult;

use crate::module::{ModuleId, ModuleSource, WasmModule};

type Slot = Arc<OnceCell<Arc<dyn WasmModule>>>;

/// 模块缓存
#[derive(Default)]
pub struct ModuleCache {
    entries: Mutex<HashMap<ModuleId, Slot>>,
}

static GLOBAL_CACHE: OnceLock<Arc<ModuleCache>> = OnceLock::new();

impl ModuleCache {
    /// 创建空缓存
    pub fn new() -> Self {
        Self::default()
    }

    /// 进程级共享缓存
    pub fn global() -> Arc<ModuleCache> {
        Arc::clone(GLOBAL_CACHE.get_or_init(|| Arc::new(ModuleCache::new())))
    }

    /// 取得模块实例, 必要时编译
    ///
    /// 同一模块的并发调用只触发一次 [`ModuleSource::instantiate`].
    pub async fn get_or_instantiate(
        &self,
        source: &dyn ModuleSource,
    ) -> WadResult<Arc<dyn WasmModule>> {
        let id = source.module_id();
        let slot = {
            let mut entries = self.lock();
            Arc::clone(entries.entry(id.clone()).or_default())
        };

        let module = slot
            .get_or_try_init(|| async {
                debug!("编译模块 {}", id);
                source.instantiate().await
            })
            .await?;
        Ok(Arc::clone(module))
    }

    /// 取得已编译完成的模块
    pub fn get(&self, id: &ModuleId) -> Option<Arc<dyn WasmModule>> {
        self.lock()
            .get(id)
            .and_then(|slot| slot.get().map(Arc::clone))
    }

    /// 指定模块是否已编译完成
    pub fn contains(&self, id: &ModuleId) -> bool {
        self.get(id).is_some()
    }

    /// 已编译完成的模块数量
    pub fn len(&self) -> usize {
        self.lock().values().filter(|slot| slot.initialized()).count()
    }

    /// 是否没有任何已编译的模块
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 清空缓存
    ///
    /// 已经取得模块实例的解码器不受影响.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ModuleId, Slot>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
