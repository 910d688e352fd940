//! Worker 侧: 在独立线程中持有解码器并逐条处理请求.
//!
//! 线程内运行单线程 tokio runtime, 解码器以 [`Isolation::Worker`] 上下文构造,
//! 总是独立实例化模块. 请求按到达顺序处理, 每条请求恰好产生一条响应.
//!
//! [`Isolation::Worker`]: wad_codec::Isolation::Worker

use std::sync::Arc;
use std::thread;

use log::{debug, error, info};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use wad_codec::{AudioDecoder, CodecId, DecoderContext, DecoderOptions, DecoderRegistry, ModuleSource};
use wad_core::{WadError, WadResult};

use crate::protocol::{Command, Request, Response, ResponseBody};

/// Worker 启动参数
///
/// 整体移入工作线程, 线程内据此构造解码器.
pub struct WorkerBootstrap {
    /// 编解码器
    pub codec_id: CodecId,
    /// 模块来源
    pub source: Arc<dyn ModuleSource>,
    /// 解码器选项
    pub options: DecoderOptions,
    /// 解码器注册表
    pub registry: Arc<DecoderRegistry>,
}

impl WorkerBootstrap {
    /// 使用内置注册表与默认选项
    pub fn new(codec_id: CodecId, source: Arc<dyn ModuleSource>) -> Self {
        Self {
            codec_id,
            source,
            options: DecoderOptions::default(),
            registry: Arc::new(DecoderRegistry::with_builtin()),
        }
    }

    /// 设置解码器选项
    pub fn with_options(mut self, options: DecoderOptions) -> Self {
        self.options = options;
        self
    }

    /// 设置解码器注册表
    pub fn with_registry(mut self, registry: Arc<DecoderRegistry>) -> Self {
        self.registry = registry;
        self
    }
}

/// 启动工作线程, 返回请求发送端与响应接收端
///
/// 请求发送端全部关闭后线程退出, 退出时解码器随之释放.
pub fn spawn_worker(
    bootstrap: WorkerBootstrap,
) -> WadResult<(UnboundedSender<Request>, UnboundedReceiver<Response>)> {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();
    let name = format!("wad-worker-{}", bootstrap.codec_id);

    thread::Builder::new().name(name.clone()).spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                error!("{}: 创建 runtime 失败: {}", name, e);
                return;
            }
        };
        runtime.block_on(run_worker(bootstrap, request_rx, response_tx));
        debug!("{} 退出", name);
    })?;

    Ok((request_tx, response_rx))
}

/// Worker 主循环
async fn run_worker(
    bootstrap: WorkerBootstrap,
    mut requests: UnboundedReceiver<Request>,
    responses: UnboundedSender<Response>,
) {
    let WorkerBootstrap {
        codec_id,
        source,
        options,
        registry,
    } = bootstrap;

    let mut decoder = registry
        .create_decoder(codec_id, DecoderContext::isolated(), source, &options)
        .map_err(|e| {
            error!("worker 构造 {} 解码器失败: {}", codec_id, e);
            e.to_string()
        });
    info!("{} worker 已启动", codec_id);

    while let Some(request) = requests.recv().await {
        let id = request.id;
        let is_free = request.command == Command::Free.as_str();

        let body = match decoder.as_mut() {
            Ok(decoder) => handle_request(decoder.as_mut(), request).await,
            Err(message) => ResponseBody::error(&WadError::Module(message.clone())),
        };

        if responses.send(Response { id, body }).is_err() {
            debug!("调用方已关闭, worker 退出");
            break;
        }
        if is_free {
            break;
        }
    }
}

async fn handle_request(decoder: &mut dyn AudioDecoder, request: Request) -> ResponseBody {
    let Request { command, data, .. } = request;
    let Some(command) = Command::parse(&command) else {
        error!("未知的 worker 命令: {}", command);
        return ResponseBody::error(&WadError::Unsupported(format!("未知命令: {}", command)));
    };

    match command {
        Command::Ready => decoder.ready().await.into(),
        Command::Reset => decoder.reset().await.into(),
        Command::Free => {
            decoder.free();
            ResponseBody::Ack {}
        }
        Command::Decode => data.into_bytes().and_then(|bytes| decoder.decode(&bytes)).into(),
        Command::DecodeFrame => data
            .into_bytes()
            .and_then(|frame| decoder.decode_frame(&frame))
            .into(),
        Command::DecodeFrames => data
            .into_frames()
            .and_then(|frames| decoder.decode_frames(&frames))
            .into(),
    }
}
