use thiserror::Error;
use std::io;

/// 下载编排器的错误分类
///
/// 传输/文件系统错误最终都会被转换成任务记录上的 `Failed` 状态，
/// 不会作为 panic 或未处理异常冒泡到调用方。
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("网络错误: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO错误: {0}")]
    Io(#[from] io::Error),

    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    #[error("服务器错误: {0}")]
    Server(String),

    #[error("文件不存在: {0}")]
    FileMissing(String),

    #[error("下载被取消")]
    Cancelled,

    #[error("配置错误: {0}")]
    Config(String),

    #[error("未知错误: {0}")]
    Unknown(String),
}

impl DownloadError {
    /// 是否属于用户主动取消（不作为可见错误展示）
    pub fn is_cancellation(&self) -> bool {
        matches!(self, DownloadError::Cancelled)
    }
}

impl From<String> for DownloadError {
    fn from(error: String) -> Self {
        DownloadError::Unknown(error)
    }
}

impl From<&str> for DownloadError {
    fn from(error: &str) -> Self {
        DownloadError::Unknown(error.to_string())
    }
}

pub type DownloadResult<T> = Result<T, DownloadError>;
