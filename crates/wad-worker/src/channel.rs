//! 调用方: 经单一消息管道把解码请求转发给 worker.
//!
//! 每条请求分配一个递增 id (从 `i64::MIN` 开始), 在等待表中登记一个 oneshot.
//! 分发任务收到响应后按 id 取出并唤醒对应的等待者, 因此并发请求可以乱序完成.
//! worker 消失时等待表被关闭并清空, 所有等待者立即得到 [`WadError::WorkerTerminated`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use wad_codec::DecodedAudio;
use wad_core::{WadError, WadResult};

use crate::protocol::{Command, Payload, Request, Response, ResponseBody};
use crate::worker::{WorkerBootstrap, spawn_worker};

/// 通道状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// 已创建, 尚未就绪
    Created,
    /// 解码器已就绪
    Ready,
    /// 已终止, 之后的任何操作都失败
    Terminated,
}

/// 等待表
#[derive(Default)]
struct PendingTable {
    waiters: HashMap<i64, oneshot::Sender<ResponseBody>>,
    /// 关闭后不再接受登记
    closed: bool,
}

impl PendingTable {
    fn close(&mut self) -> usize {
        self.closed = true;
        let dropped = self.waiters.len();
        self.waiters.clear();
        dropped
    }
}

/// 分发任务所在的 runtime
fn current_runtime() -> WadResult<Handle> {
    Handle::try_current()
        .map_err(|_| WadError::Unsupported("DecoderWorker 需要在 tokio runtime 中创建".into()))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Worker 解码器代理
///
/// 方法均为 `&self`, 可在多个任务中并发调用. 需要在 tokio runtime 中创建, 否则构造返回 `Unsupported`.
pub struct DecoderWorker {
    next_id: AtomicI64,
    requests: Mutex<Option<UnboundedSender<Request>>>,
    pending: Arc<Mutex<PendingTable>>,
    state: Mutex<WorkerState>,
}

impl DecoderWorker {
    /// 启动 worker 线程并建立通道
    pub fn spawn(bootstrap: WorkerBootstrap) -> WadResult<Self> {
        // 先确认处于 runtime 中, 避免启动无人接收响应的工作线程
        current_runtime()?;
        let codec_id = bootstrap.codec_id;
        let (requests, responses) = spawn_worker(bootstrap)?;
        debug!("{} worker 通道已建立", codec_id);
        Self::with_transport(requests, responses)
    }

    /// 在已有的请求/响应管道上建立通道
    pub fn with_transport(
        requests: UnboundedSender<Request>,
        responses: UnboundedReceiver<Response>,
    ) -> WadResult<Self> {
        let runtime = current_runtime()?;
        let pending = Arc::new(Mutex::new(PendingTable::default()));
        runtime.spawn(dispatch(responses, Arc::clone(&pending)));

        Ok(Self {
            next_id: AtomicI64::new(i64::MIN),
            requests: Mutex::new(Some(requests)),
            pending,
            state: Mutex::new(WorkerState::Created),
        })
    }

    /// 当前状态
    pub fn state(&self) -> WorkerState {
        *lock(&self.state)
    }

    /// 尚未收到响应的请求数
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).waiters.len()
    }

    /// 等待解码器就绪
    pub async fn ready(&self) -> WadResult<()> {
        self.request(Command::Ready, Payload::Empty).await?;
        let mut state = lock(&self.state);
        if *state == WorkerState::Created {
            *state = WorkerState::Ready;
        }
        Ok(())
    }

    /// 重置解码器
    pub async fn reset(&self) -> WadResult<()> {
        self.request(Command::Reset, Payload::Empty).await?;
        Ok(())
    }

    /// 整段解码, 数据所有权移交给 worker
    pub async fn decode(&self, data: Vec<u8>) -> WadResult<DecodedAudio> {
        Self::expect_decoded(self.request(Command::Decode, Payload::Bytes(data)).await?)
    }

    /// 解码单帧
    pub async fn decode_frame(&self, frame: Vec<u8>) -> WadResult<DecodedAudio> {
        Self::expect_decoded(self.request(Command::DecodeFrame, Payload::Bytes(frame)).await?)
    }

    /// 解码多帧
    pub async fn decode_frames(&self, frames: Vec<Vec<u8>>) -> WadResult<DecodedAudio> {
        Self::expect_decoded(
            self.request(Command::DecodeFrames, Payload::Frames(frames))
                .await?,
        )
    }

    /// 释放解码器并终止 worker
    ///
    /// 无论确认是否成功收到都会终止. 已终止时直接返回.
    pub async fn free(&self) -> WadResult<()> {
        if self.state() == WorkerState::Terminated {
            return Ok(());
        }
        let result = self.request(Command::Free, Payload::Empty).await;
        self.terminate();
        if let Err(e) = &result {
            warn!("worker 释放确认失败: {}", e);
        }
        result.map(|_| ())
    }

    /// 立即终止 worker, 未完成的请求得到 `WorkerTerminated`
    pub fn terminate(&self) {
        *lock(&self.state) = WorkerState::Terminated;
        // 关闭请求管道后 worker 主循环结束
        lock(&self.requests).take();
        let dropped = lock(&self.pending).close();
        if dropped > 0 {
            warn!("终止 worker, {} 个请求未完成", dropped);
        }
    }

    /// 发送请求并等待对应 id 的响应
    async fn request(&self, command: Command, data: Payload) -> WadResult<ResponseBody> {
        if self.state() == WorkerState::Terminated {
            return Err(WadError::WorkerTerminated);
        }
        let sender = lock(&self.requests)
            .clone()
            .ok_or(WadError::WorkerTerminated)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            if pending.closed {
                return Err(WadError::WorkerTerminated);
            }
            pending.waiters.insert(id, tx);
        }

        let request = Request {
            id,
            command: command.as_str().to_string(),
            data,
        };
        if sender.send(request).is_err() {
            lock(&self.pending).waiters.remove(&id);
            return Err(WadError::WorkerTerminated);
        }

        let body = rx.await.map_err(|_| WadError::WorkerTerminated)?;
        body.into_result()
    }

    fn expect_decoded(body: ResponseBody) -> WadResult<DecodedAudio> {
        match body {
            ResponseBody::Decoded(audio) => Ok(audio),
            other => Err(WadError::InvalidData(format!(
                "期望解码结果, 收到 {:?}",
                other
            ))),
        }
    }
}

impl Drop for DecoderWorker {
    fn drop(&mut self) {
        if self.state() != WorkerState::Terminated {
            self.terminate();
        }
    }
}

/// 分发任务: 按 id 唤醒等待者
async fn dispatch(mut responses: UnboundedReceiver<Response>, pending: Arc<Mutex<PendingTable>>) {
    while let Some(Response { id, body }) = responses.recv().await {
        let waiter = lock(&pending).waiters.remove(&id);
        match waiter {
            // 等待者可能已被取消
            Some(tx) => {
                let _ = tx.send(body);
            }
            None => warn!("丢弃未知 id 的响应: {}", id),
        }
    }

    let dropped = lock(&pending).close();
    if dropped > 0 {
        warn!("worker 已断开, {} 个请求以 WorkerTerminated 结束", dropped);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;

    /// 收集 `batch` 条请求后倒序应答, 每条回显 id 作为采样数
    fn reverse_responder(
        mut requests: mpsc::UnboundedReceiver<Request>,
        responses: mpsc::UnboundedSender<Response>,
        batch: usize,
    ) {
        tokio::spawn(async move {
            let mut received = Vec::new();
            while let Some(request) = requests.recv().await {
                received.push(request);
                if received.len() == batch {
                    for request in received.drain(..).rev() {
                        let audio = DecodedAudio::new(
                            vec![request.data.into_bytes().unwrap_or_default().iter().map(|&b| f32::from(b)).collect()],
                            (request.id - i64::MIN) as usize,
                            48000,
                        );
                        let _ = responses.send(Response {
                            id: request.id,
                            body: ResponseBody::Decoded(audio),
                        });
                    }
                }
            }
        });
    }

    #[tokio::test]
    async fn test_乱序响应按id匹配() {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        reverse_responder(request_rx, response_tx, 3);
        let worker = DecoderWorker::with_transport(request_tx, response_rx).unwrap();

        let (a, b, c) = tokio::join!(
            worker.decode_frame(vec![1]),
            worker.decode_frame(vec![2]),
            worker.decode_frame(vec![3]),
        );

        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
        assert_eq!(a.channel_data[0], vec![1.0]);
        assert_eq!(b.channel_data[0], vec![2.0]);
        assert_eq!(c.channel_data[0], vec![3.0]);

        // id 从 i64::MIN 开始且互不相同
        let mut ids = vec![a.samples_decoded, b.samples_decoded, c.samples_decoded];
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(worker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_未知id的响应被丢弃() {
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<Request>();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let worker = DecoderWorker::with_transport(request_tx, response_rx).unwrap();

        tokio::spawn(async move {
            while let Some(request) = request_rx.recv().await {
                let _ = response_tx.send(Response {
                    id: 42,
                    body: ResponseBody::Ack {},
                });
                let _ = response_tx.send(Response {
                    id: request.id,
                    body: ResponseBody::Ack {},
                });
            }
        });

        worker.ready().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Ready);
    }

    #[tokio::test]
    async fn test_worker消失时等待者不挂起() {
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<Request>();
        let (response_tx, response_rx) = mpsc::unbounded_channel::<Response>();
        let worker = DecoderWorker::with_transport(request_tx, response_rx).unwrap();

        tokio::spawn(async move {
            // 收到一条请求后不应答直接退出
            let _ = request_rx.recv().await;
            drop(response_tx);
        });

        let result = tokio::time::timeout(Duration::from_secs(5), worker.decode(vec![1, 2])).await;
        assert!(matches!(result, Ok(Err(WadError::WorkerTerminated))));
        assert!(matches!(worker.ready().await, Err(WadError::WorkerTerminated)));
    }

    #[tokio::test]
    async fn test_释放后终止() {
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<Request>();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let worker = DecoderWorker::with_transport(request_tx, response_rx).unwrap();

        tokio::spawn(async move {
            while let Some(request) = request_rx.recv().await {
                let body = if request.command == "free" {
                    ResponseBody::error(&WadError::Codec("释放失败".into()))
                } else {
                    ResponseBody::Ack {}
                };
                let _ = response_tx.send(Response { id: request.id, body });
            }
        });

        worker.ready().await.unwrap();
        // 确认失败也必须终止
        assert!(worker.free().await.is_err());
        assert_eq!(worker.state(), WorkerState::Terminated);
        assert!(worker.free().await.is_ok());
        assert!(matches!(
            worker.decode_frame(vec![1]).await,
            Err(WadError::WorkerTerminated)
        ));
    }

    #[tokio::test]
    async fn test_错误响应还原为错误() {
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<Request>();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let worker = DecoderWorker::with_transport(request_tx, response_rx).unwrap();

        tokio::spawn(async move {
            while let Some(request) = request_rx.recv().await {
                let body = ResponseBody::error(&WadError::NotInitialized);
                let _ = response_tx.send(Response { id: request.id, body });
            }
        });

        assert!(matches!(
            worker.decode_frame(vec![1]).await,
            Err(WadError::NotInitialized)
        ));
        assert_eq!(worker.state(), WorkerState::Created);
    }

    #[test]
    fn test_没有runtime时建立通道报错() {
        let (request_tx, _request_rx) = mpsc::unbounded_channel::<Request>();
        let (_response_tx, response_rx) = mpsc::unbounded_channel::<Response>();
        assert!(matches!(
            DecoderWorker::with_transport(request_tx, response_rx),
            Err(WadError::Unsupported(_))
        ));
    }
}
