//! 传输执行器：执行一次带可选 Range 的 HTTP GET，把进度作为事件流吐出
//!
//! 管理器和运行器只依赖 `TransportExecutor` 这个接口，测试里用脚本化的
//! mock 实现替换真实网络。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::core::error::DownloadError;

/// 进度事件的最小间隔
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// 一次传输的请求参数
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub url: String,
    pub file_path: String,
    pub user_agent: Option<String>,
    /// Range 起点；0 表示从头下载
    pub offset: u64,
}

/// 传输执行器吐出的事件流，以 Completed/Failed/Cancelled 结束
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Downloading { downloaded: u64, total: i64, speed_bps: u64 },
    Completed { length: u64 },
    Failed(String),
    Cancelled,
}

/// 黑盒传输接口：启动后通过 `events` 发事件，协作式响应 `cancel` 标志
#[async_trait]
pub trait TransportExecutor: Send + Sync {
    async fn execute(
        &self,
        req: TransferRequest,
        cancel: Arc<AtomicBool>,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), DownloadError>;
}

/// 基于 reqwest 的默认实现，流式写入目标文件
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout_secs: u64) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TransportExecutor for HttpTransport {
    async fn execute(
        &self,
        req: TransferRequest,
        cancel: Arc<AtomicBool>,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), DownloadError> {
        let mut builder = self.client.get(&req.url);
        if req.offset > 0 {
            builder = builder.header(reqwest::header::RANGE, format!("bytes={}-", req.offset));
        }
        if let Some(ua) = &req.user_agent {
            builder = builder.header(reqwest::header::USER_AGENT, ua.clone());
        }

        let resp = builder.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DownloadError::Server(format!("服务器错误: {}", status)));
        }

        // 服务器不认 Range 时会回 200 全量，此时只能从零重写
        let effective_offset = if req.offset > 0 && status == reqwest::StatusCode::PARTIAL_CONTENT {
            req.offset
        } else {
            0
        };
        if req.offset > 0 && effective_offset == 0 {
            log::warn!("服务器未响应 Range 请求，从头下载: {}", req.url);
        }

        let total = match resp.content_length() {
            Some(len) => (effective_offset + len) as i64,
            None => -1,
        };

        let mut file = if effective_offset > 0 {
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(&req.file_path)
                .await?
        } else {
            tokio::fs::File::create(&req.file_path).await?
        };

        let mut downloaded = effective_offset;
        let mut window_bytes = 0u64;
        let mut last_emit = Instant::now();
        // 先报一次初始进度，让订阅方尽快看到 Downloading
        let _ = events
            .send(TransportEvent::Downloading { downloaded, total, speed_bps: 0 })
            .await;

        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            if cancel.load(Ordering::SeqCst) {
                file.flush().await.ok();
                let _ = events.send(TransportEvent::Cancelled).await;
                return Ok(());
            }
            let bytes = chunk?;
            file.write_all(&bytes).await?;
            downloaded += bytes.len() as u64;
            window_bytes += bytes.len() as u64;

            let elapsed = last_emit.elapsed();
            if elapsed >= PROGRESS_INTERVAL {
                let speed_bps = (window_bytes as f64 / elapsed.as_secs_f64()) as u64;
                let _ = events
                    .send(TransportEvent::Downloading { downloaded, total, speed_bps })
                    .await;
                window_bytes = 0;
                last_emit = Instant::now();
            }
        }
        file.flush().await?;

        // 以磁盘上的真实长度为准，不信服务器宣称的大小
        let length = tokio::fs::metadata(&req.file_path)
            .await
            .map(|m| m.len())
            .unwrap_or(downloaded);
        let _ = events.send(TransportEvent::Completed { length }).await;
        Ok(())
    }
}
