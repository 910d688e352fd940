//! 内嵌模块负载的解包与检查.
//!
//! 负载文件有两种形式:
//! - 文本: yEnc 风格转义后的压缩数据 (默认)
//! - 原始: 未转义的 DEFLATE 字节 (`--raw`)

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use log::{debug, info};
use serde::Serialize;
use wad_codec::{WASM_MAGIC, is_wasm_image};
use wad_core::{inflate_to_vec, unescape};

/// 读入内存的负载
#[derive(Debug)]
pub struct Payload {
    /// 转义文本的 UTF-16 码元数 (原始负载为 `None`)
    pub escaped_units: Option<usize>,
    /// 压缩数据
    pub compressed: Vec<u8>,
}

/// 负载检查结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadInfo {
    /// 输入文件
    pub input: PathBuf,
    /// 转义文本的码元数
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escaped_units: Option<usize>,
    /// 压缩数据字节数
    pub compressed_bytes: usize,
    /// 声明的解压大小
    pub declared_size: usize,
    /// 实际解压字节数
    pub inflated_bytes: usize,
    /// 是否为 WebAssembly 模块
    pub is_wasm: bool,
    /// WebAssembly 二进制版本
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wasm_version: Option<u32>,
}

impl PayloadInfo {
    fn new(input: &Path, payload: &Payload, declared_size: usize, image: &[u8]) -> Self {
        let is_wasm = is_wasm_image(image);
        let wasm_version = if is_wasm && image.len() >= 8 {
            Some(u32::from_le_bytes([image[4], image[5], image[6], image[7]]))
        } else {
            None
        };
        Self {
            input: input.to_path_buf(),
            escaped_units: payload.escaped_units,
            compressed_bytes: payload.compressed.len(),
            declared_size,
            inflated_bytes: image.len(),
            is_wasm,
            wasm_version,
        }
    }

    /// 人类可读的多行摘要
    pub fn summary(&self) -> String {
        let mut lines = vec![format!("输入: {}", self.input.display())];
        if let Some(units) = self.escaped_units {
            lines.push(format!("转义文本: {} 码元", units));
        }
        lines.push(format!("压缩数据: {} 字节", self.compressed_bytes));
        lines.push(format!(
            "解压结果: {} / {} 字节",
            self.inflated_bytes, self.declared_size
        ));
        lines.push(match self.wasm_version {
            Some(version) => format!("WebAssembly: 是 (版本 {})", version),
            None if self.is_wasm => "WebAssembly: 是".to_string(),
            None => "WebAssembly: 否".to_string(),
        });
        lines.join("\n")
    }
}

/// 读取负载文件
pub fn read_payload(path: &Path, raw: bool) -> anyhow::Result<Payload> {
    if raw {
        let compressed =
            fs::read(path).with_context(|| format!("读取 {} 失败", path.display()))?;
        return Ok(Payload {
            escaped_units: None,
            compressed,
        });
    }

    let text = fs::read_to_string(path)
        .with_context(|| format!("读取 {} 失败 (转义负载必须是 UTF-8 文本)", path.display()))?;
    let units = text.encode_utf16().count();
    let compressed = unescape(&text);
    debug!("反转义: {} 码元 -> {} 字节", units, compressed.len());

    Ok(Payload {
        escaped_units: Some(units),
        compressed,
    })
}

/// 解压到不超过 `size` 字节的镜像
pub fn inflate_payload(payload: &Payload, size: usize) -> anyhow::Result<Vec<u8>> {
    let image = inflate_to_vec(&payload.compressed, size).context("解压负载失败")?;
    if image.len() < size {
        debug!("解压结果 {} 字节, 少于声明的 {} 字节", image.len(), size);
    }
    Ok(image)
}

/// 检查负载
pub fn inspect(input: &Path, size: usize, raw: bool) -> anyhow::Result<PayloadInfo> {
    let payload = read_payload(input, raw)?;
    let image = inflate_payload(&payload, size)?;
    Ok(PayloadInfo::new(input, &payload, size, &image))
}

/// 解包负载并写出镜像
pub fn unpack(
    input: &Path,
    output: &Path,
    size: usize,
    raw: bool,
    verify: bool,
) -> anyhow::Result<PayloadInfo> {
    let payload = read_payload(input, raw)?;
    let image = inflate_payload(&payload, size)?;
    let info = PayloadInfo::new(input, &payload, size, &image);

    if verify && !info.is_wasm {
        bail!(
            "解压结果不是 WebAssembly 模块 (期望魔数 {:02X?}, 实际 {:02X?})",
            WASM_MAGIC,
            &image[..image.len().min(4)],
        );
    }

    fs::write(output, &image).with_context(|| format!("写入 {} 失败", output.display()))?;
    info!(
        "{} -> {}: {} 字节",
        input.display(),
        output.display(),
        image.len()
    );
    Ok(info)
}
