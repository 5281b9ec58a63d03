//! ResumeDown: 可断点续传的下载编排器
//!
//! 核心是一个 actix actor 形态的任务注册表（`DownloadManagerActor`）：
//! 接收下载请求，把它们作为可取消、可暂停、可 Range 续传的 HTTP 传输
//! 执行，跟踪每个任务的进度与速度，强制并发上限，并持久化足够的
//! 元数据在进程重启后恢复。

pub mod cli;
pub mod config;
pub mod core;
pub mod utils;

pub use config::Config;
pub use core::{
    DownloadError, DownloadManagerActor, FileMetaStore, HttpTransport, MetaStore,
    TaskRecord, TaskState, TransportExecutor,
};
