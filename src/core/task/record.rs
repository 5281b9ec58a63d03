use serde::{Serialize, Deserialize};

use super::state::TaskState;

/// 完整度判断的容差下界（95%）
const COMPLETE_LOWER_RATIO: f64 = 0.95;
/// 完整度判断的容差上界（105%）
const COMPLETE_UPPER_RATIO: f64 = 1.05;
/// 总大小未知时，小于 1MB 视为不完整
const UNKNOWN_TOTAL_MIN_BYTES: u64 = 1024 * 1024;

/// ================== 任务记录 ==================
///
/// 一个下载任务的全部身份、进度和状态。正常任务 `id == url`；
/// 启动时从磁盘收养的历史任务使用 `file://<路径>` 作为合成身份。
///
/// 记录只允许由管理器（`DownloadManagerActor`）修改，外部拿到的都是克隆。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub url: String,
    pub file_name: String,
    pub file_path: String,
    /// 总字节数，-1 表示未知（服务器未报告 Content-Length 或历史任务）
    pub total_bytes: i64,
    /// 已下载字节数，Downloading/Paused 期间单调不减
    pub downloaded_bytes: u64,
    /// 百分比进度，[0,100]；总大小未知时为 -1
    pub progress: i32,
    /// 瞬时速度（B/s），只在 Downloading 时非零，不持久化
    pub speed_bps: u64,
    pub state: TaskState,
    /// 仅在 Failed 状态下有值
    pub error: Option<String>,
    // 重放元数据：resume/restart 时重建原始请求所需
    pub user_agent: Option<String>,
    pub content_disposition: Option<String>,
    pub mime_type: Option<String>,
    pub content_length: Option<String>,
}

impl TaskRecord {
    pub fn new(url: String, file_name: String, file_path: String) -> Self {
        Self {
            id: url.clone(),
            url,
            file_name,
            file_path,
            total_bytes: -1,
            downloaded_bytes: 0,
            progress: -1,
            speed_bps: 0,
            state: TaskState::Preparing,
            error: None,
            user_agent: None,
            content_disposition: None,
            mime_type: None,
            content_length: None,
        }
    }

    /// 收养磁盘上没有持久化元数据的文件为历史任务
    pub fn historical(file_name: String, file_path: String, file_len: u64) -> Self {
        let mut rec = Self::new(format!("file://{}", file_path), file_name, file_path);
        rec.total_bytes = -1;
        rec.downloaded_bytes = file_len;
        rec.progress = -1;
        rec.state = TaskState::Failed;
        rec
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// 按当前字节数重算进度
    pub fn recompute_progress(&mut self) {
        self.progress = compute_progress(self.downloaded_bytes, self.total_bytes);
    }

    /// 文件看起来是完整的：总大小已知且实际字节数落在 95%~105% 容差带内。
    ///
    /// 容差带用来吸收服务器与客户端统计口径的细微差异（例如传输编码），
    /// 调用方用它决定把 Failed/Cancelled 的任务展示为"已完成"还是"损坏"。
    pub fn looks_complete(&self) -> bool {
        if self.total_bytes <= 0 {
            return false;
        }
        let total = self.total_bytes as f64;
        let got = self.downloaded_bytes as f64;
        got >= total * COMPLETE_LOWER_RATIO && got <= total * COMPLETE_UPPER_RATIO
    }

    /// 文件看起来是不完整的：少于总大小的 95%；总大小未知时少于 1MB。
    pub fn looks_incomplete(&self) -> bool {
        if self.total_bytes <= 0 {
            return self.downloaded_bytes < UNKNOWN_TOTAL_MIN_BYTES;
        }
        (self.downloaded_bytes as f64) < self.total_bytes as f64 * COMPLETE_LOWER_RATIO
    }
}

/// 计算百分比进度，钳制到 [0,100]；总大小未知时返回 -1
pub fn compute_progress(downloaded: u64, total: i64) -> i32 {
    if total <= 0 {
        return -1;
    }
    let pct = (downloaded as f64 / total as f64 * 100.0) as i32;
    pct.clamp(0, 100)
}
