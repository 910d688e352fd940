//! 解码结果与多声道重组.
//!
//! 流式解码的每次调用各产出一组按声道分开的缓冲区. 重组时按声道转置,
//! 把同一声道在各次调用中的输出按调用顺序首尾相接, 声道顺序在各次调用间保持不变.

use serde::{Deserialize, Serialize};
use wad_core::{WadError, WadResult};

/// 解码结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedAudio {
    /// 各声道的 PCM 数据 (非交错)
    pub channel_data: Vec<Vec<f32>>,
    /// 每声道采样数
    pub samples_decoded: usize,
    /// 采样率 (Hz)
    pub sample_rate: u32,
    /// 源位深 (仅无损格式提供)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_depth: Option<u32>,
}

impl DecodedAudio {
    /// 创建解码结果
    pub fn new(channel_data: Vec<Vec<f32>>, samples_decoded: usize, sample_rate: u32) -> Self {
        Self {
            channel_data,
            samples_decoded,
            sample_rate,
            bit_depth: None,
        }
    }

    /// 附加位深
    pub fn with_bit_depth(mut self, bit_depth: u32) -> Self {
        self.bit_depth = Some(bit_depth);
        self
    }

    /// 声道数
    pub fn channels(&self) -> usize {
        self.channel_data.len()
    }

    /// 是否没有任何采样
    pub fn is_empty(&self) -> bool {
        self.samples_decoded == 0
    }
}

/// 把若干缓冲区顺序拷贝到一个长度为 `length` 的新缓冲区
///
/// 输入总长不足 `length` 时尾部补零, 超出则报错.
pub fn concat_f32(buffers: &[Vec<f32>], length: usize) -> WadResult<Vec<f32>> {
    let total: usize = buffers.iter().map(Vec::len).sum();
    if total > length {
        return Err(WadError::InvalidArgument(format!(
            "拼接总长 {} 超过目标长度 {}",
            total, length,
        )));
    }

    let mut out = vec![0.0f32; length];
    let mut offset = 0;
    for buf in buffers {
        out[offset..offset + buf.len()].copy_from_slice(buf);
        offset += buf.len();
    }
    Ok(out)
}

/// 按声道拼接: `channel_data[声道][调用]`
pub fn get_decoded_audio_concat(
    channel_data: &[Vec<Vec<f32>>],
    samples_decoded: usize,
    sample_rate: u32,
) -> WadResult<DecodedAudio> {
    let channels = channel_data
        .iter()
        .map(|buffers| concat_f32(buffers, samples_decoded))
        .collect::<WadResult<Vec<_>>>()?;
    Ok(DecodedAudio::new(channels, samples_decoded, sample_rate))
}

/// 重组多次解码调用的输出: `outputs[调用][声道]`
///
/// 结果恰好包含 `channel_count` 个声道, 每个声道长度为 `total_samples`.
/// 某次调用缺少的声道视为空.
pub fn assemble_multi_channel(
    outputs: Vec<Vec<Vec<f32>>>,
    channel_count: usize,
    total_samples: usize,
    sample_rate: u32,
) -> WadResult<DecodedAudio> {
    let mut channel_data: Vec<Vec<Vec<f32>>> = vec![Vec::with_capacity(outputs.len()); channel_count];

    for output in outputs {
        if output.len() > channel_count {
            return Err(WadError::InvalidArgument(format!(
                "单次输出有 {} 个声道, 超过声道数 {}",
                output.len(),
                channel_count,
            )));
        }
        for (channel, buf) in output.into_iter().enumerate() {
            channel_data[channel].push(buf);
        }
    }

    get_decoded_audio_concat(&channel_data, total_samples, sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_拼接按顺序并补零() {
        let out = concat_f32(&[vec![1.0, 2.0], vec![], vec![3.0]], 5).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0, 0.0, 0.0]);
    }

    #[test]
    fn test_拼接超长报错() {
        assert!(concat_f32(&[vec![1.0; 3], vec![1.0; 3]], 5).is_err());
    }

    #[test]
    fn test_多声道重组() {
        let outputs = vec![
            vec![vec![0.1, 0.2], vec![-0.1, -0.2]],
            vec![vec![], vec![]],
            vec![vec![0.3, 0.4, 0.5], vec![-0.3, -0.4, -0.5]],
        ];
        let audio = assemble_multi_channel(outputs, 2, 5, 44100).unwrap();

        assert_eq!(audio.channels(), 2);
        assert_eq!(audio.samples_decoded, 5);
        assert_eq!(audio.sample_rate, 44100);
        assert_eq!(audio.channel_data[0], vec![0.1, 0.2, 0.3, 0.4, 0.5]);
        assert_eq!(audio.channel_data[1], vec![-0.1, -0.2, -0.3, -0.4, -0.5]);
        assert_eq!(audio.bit_depth, None);
    }

    #[test]
    fn test_多声道重组保持声道数() {
        // 没有任何调用时仍输出指定数量的空声道
        let audio = assemble_multi_channel(Vec::new(), 2, 0, 48000).unwrap();
        assert_eq!(audio.channel_data, vec![Vec::<f32>::new(), Vec::new()]);

        let outputs = vec![vec![vec![1.0]; 3]; 4];
        let audio = assemble_multi_channel(outputs, 3, 4, 8000).unwrap();
        assert!(audio.channel_data.iter().all(|c| c == &vec![1.0; 4]));
    }

    #[test]
    fn test_声道过多报错() {
        let outputs = vec![vec![vec![1.0]; 3]];
        assert!(assemble_multi_channel(outputs, 2, 1, 8000).is_err());
    }

    #[test]
    fn test_序列化为驼峰() {
        let audio = DecodedAudio::new(vec![vec![0.5]], 1, 48000).with_bit_depth(16);
        let json = serde_json::to_value(&audio).unwrap();
        assert_eq!(json["samplesDecoded"], 1);
        assert_eq!(json["sampleRate"], 48000);
        assert_eq!(json["bitDepth"], 16);
        assert_eq!(json["channelData"][0][0], 0.5);

        let json = serde_json::to_value(DecodedAudio::default()).unwrap();
        assert!(json.get("bitDepth").is_none());
    }
}
