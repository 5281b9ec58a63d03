//! 传输运行器：每个任务一个被 spawn 的工作单元
//!
//! 负责确定 Range 起点、驱动传输执行器，并把事件流 1:1 翻译成
//! 管理器消息。取消是协作式的：传输执行器在块之间观察取消标志，
//! 已写入的部分文件会被干净地 flush 和关闭。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use actix::Addr;
use tokio::sync::mpsc;

use crate::core::manager::{
    CompleteTask, DownloadManagerActor, FailTask, TransferCancelled, UpdateTask,
};
use crate::core::transport::{TransferRequest, TransportEvent, TransportExecutor};

/// 事件通道容量，传输端写满时会自然被背压
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// 解析目标文件路径
///
/// resume 时直接复用候选路径（续传要接着已有的半成品写）；
/// 非 resume 时在冲突的文件名上追加数字后缀，直到不冲突。
pub fn resolve_destination(dir: &str, file_name: &str, resume: bool) -> PathBuf {
    let candidate = Path::new(dir).join(file_name);
    if resume || !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((s, e)) if !s.is_empty() => (s.to_string(), format!(".{}", e)),
        _ => (file_name.to_string(), String::new()),
    };
    let mut n = 1u32;
    loop {
        let candidate = Path::new(dir).join(format!("{}_{}{}", stem, n, ext));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// 驱动一次完整的传输，直到事件流结束
///
/// resume 时 Range 起点取目标文件当前长度，否则从零开始。
/// 执行器返回的错误统一走 `FailTask`，由管理器决定是否因任务已
/// Paused/Cancelled 而吞掉。
pub async fn run_transfer(
    addr: Addr<DownloadManagerActor>,
    transport: Arc<dyn TransportExecutor>,
    url: String,
    file_path: String,
    user_agent: Option<String>,
    resume: bool,
    cancel: Arc<AtomicBool>,
) {
    let offset = if resume {
        tokio::fs::metadata(&file_path).await.map(|m| m.len()).unwrap_or(0)
    } else {
        0
    };
    let req = TransferRequest {
        url: url.clone(),
        file_path,
        user_agent,
        offset,
    };
    log::debug!("启动传输: {} (offset={})", url, offset);

    let (tx, mut rx) = mpsc::channel::<TransportEvent>(EVENT_CHANNEL_CAPACITY);
    let exec = transport.execute(req, cancel, tx);
    let pump = async {
        while let Some(event) = rx.recv().await {
            match event {
                TransportEvent::Downloading { downloaded, total, speed_bps } => {
                    addr.do_send(UpdateTask {
                        url: url.clone(),
                        downloaded_bytes: Some(downloaded),
                        total_bytes: Some(total),
                        speed_bps: Some(speed_bps),
                    });
                }
                TransportEvent::Completed { length } => {
                    addr.do_send(CompleteTask { url: url.clone(), final_size: length });
                }
                TransportEvent::Failed(message) => {
                    addr.do_send(FailTask { url: url.clone(), error: message });
                }
                TransportEvent::Cancelled => {
                    addr.do_send(TransferCancelled { url: url.clone() });
                }
            }
        }
    };

    let (result, _) = tokio::join!(exec, pump);
    if let Err(e) = result {
        if e.is_cancellation() {
            addr.do_send(TransferCancelled { url });
        } else {
            log::error!("传输失败: {} - {}", url, e);
            addr.do_send(FailTask { url, error: e.to_string() });
        }
    }
}
