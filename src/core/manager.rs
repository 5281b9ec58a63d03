//! 任务注册表：下载任务生命周期的唯一权威
//!
//! `DownloadManagerActor` 独占任务表和运行句柄表，所有记录修改都经过
//! actor 邮箱串行化，单个任务的状态转移因此是全序的。关键状态转移会
//! 通过 `persist` 模块落盘，可见变化通过 watch 通道把完整任务列表
//! 快照（合并后的列表，不是增量）推给订阅者。

use actix::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

use crate::config::Config;
use crate::core::error::DownloadError;
use crate::core::governor;
use crate::core::persist::{self, MetaStore, PersistedTask};
use crate::core::runner;
use crate::core::task::{TaskRecord, TaskState};
use crate::core::transport::TransportExecutor;
use crate::utils::validator;

/// ================== 消息定义 ==================

/// 发起下载（resume_from_existing 时接着磁盘上的半成品续传）
pub struct StartDownload {
    pub url: String,
    pub user_agent: Option<String>,
    pub content_disposition: Option<String>,
    pub mime_type: Option<String>,
    pub content_length: Option<String>,
    pub resume_from_existing: bool,
}
impl Message for StartDownload { type Result = Result<TaskRecord, DownloadError>; }

impl StartDownload {
    pub fn simple(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user_agent: None,
            content_disposition: None,
            mime_type: None,
            content_length: None,
            resume_from_existing: true,
        }
    }
}

/// 运行器上报的进度增量；None 字段不修改
pub struct UpdateTask {
    pub url: String,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<i64>,
    pub speed_bps: Option<u64>,
}
impl Message for UpdateTask { type Result = (); }

/// 传输成功结束；final_size 是磁盘上观测到的最终长度
pub struct CompleteTask {
    pub url: String,
    pub final_size: u64,
}
impl Message for CompleteTask { type Result = (); }

/// 传输失败
pub struct FailTask {
    pub url: String,
    pub error: String,
}
impl Message for FailTask { type Result = (); }

/// 暂停任务
pub struct PauseTask { pub url: String }
impl Message for PauseTask { type Result = (); }

/// 取消任务
pub struct CancelTask { pub url: String }
impl Message for CancelTask { type Result = (); }

/// 运行器观察到传输被取消（区别于用户直接 CancelTask）
pub struct TransferCancelled { pub url: String }
impl Message for TransferCancelled { type Result = (); }

/// 从 Failed/Cancelled/Paused 续传；目标文件已不存在时报 FileMissing
pub struct ResumeTask { pub url: String }
impl Message for ResumeTask { type Result = Result<(), DownloadError>; }

/// 丢弃半成品从零重下
pub struct RestartTask { pub url: String }
impl Message for RestartTask { type Result = (); }

/// 移除一个已结束的任务
pub struct RemoveTask { pub url: String }
impl Message for RemoveTask { type Result = bool; }

/// 清空所有已结束（Completed/Failed/Cancelled）的任务
pub struct ClearTerminal;
impl Message for ClearTerminal { type Result = usize; }

/// 查询单个任务
pub struct QueryTask { pub url: String }
impl Message for QueryTask { type Result = Option<TaskRecord>; }

/// 查询全部任务
pub struct ListTasks;
impl Message for ListTasks { type Result = Vec<TaskRecord>; }

/// 查询活跃（Preparing/Downloading）任务
pub struct ListActive;
impl Message for ListActive { type Result = Vec<TaskRecord>; }

/// 订阅任务列表快照流
pub struct Subscribe;
impl Message for Subscribe { type Result = watch::Receiver<Vec<TaskRecord>>; }

/// ================== 管理器 Actor ==================

pub struct DownloadManagerActor {
    config: Config,
    tasks: HashMap<String, TaskRecord>,
    handles: HashMap<String, Arc<AtomicBool>>,
    store: Box<dyn MetaStore>,
    transport: Arc<dyn TransportExecutor>,
    snapshot_tx: watch::Sender<Vec<TaskRecord>>,
}

impl Actor for DownloadManagerActor {
    type Context = Context<Self>;
}

impl DownloadManagerActor {
    /// 创建管理器并执行启动恢复：扫描下载目录，把未跟踪的文件
    /// 从上次的持久化快照里还原，找不到快照的收养为历史任务。
    pub fn new(
        config: Config,
        transport: Arc<dyn TransportExecutor>,
        store: Box<dyn MetaStore>,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(Vec::new());
        let mut mgr = Self {
            config,
            tasks: HashMap::new(),
            handles: HashMap::new(),
            store,
            transport,
            snapshot_tx,
        };
        mgr.recover_from_disk();
        mgr
    }

    fn recover_from_disk(&mut self) {
        if let Err(e) = fs::create_dir_all(&self.config.download_dir) {
            log::error!("无法创建下载目录 {}: {}", self.config.download_dir, e);
            return;
        }
        let snapshot = self
            .store
            .get()
            .map(|blob| persist::decode(&blob))
            .unwrap_or_default();
        let by_path: HashMap<&str, &PersistedTask> =
            snapshot.iter().map(|p| (p.file_path.as_str(), p)).collect();

        let entries = match fs::read_dir(&self.config.download_dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::error!("无法扫描下载目录 {}: {}", self.config.download_dir, e);
                return;
            }
        };
        for entry in entries.flatten() {
            let meta = match entry.metadata() {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            let name = entry.file_name().to_string_lossy().to_string();
            if name == self.config.meta_file_name {
                continue;
            }
            let path = entry.path().to_string_lossy().to_string();
            let len = meta.len();
            // 瞬时计数一律以磁盘真实长度为准，不信快照
            let rec = match by_path.get(path.as_str()) {
                Some(p) => {
                    let url = if p.url.is_empty() {
                        format!("file://{}", path)
                    } else {
                        p.url.clone()
                    };
                    let mut rec = TaskRecord::new(url, name, path);
                    rec.total_bytes = p.total_bytes;
                    // 活跃状态跨进程没有意义，保守归一为 Failed，
                    // "看着其实是完整的"留给调用方用 looks_complete 判断
                    rec.state = if p.state.is_active() { TaskState::Failed } else { p.state };
                    rec.error = p.error.clone();
                    rec.user_agent = p.user_agent.clone();
                    rec.content_disposition = p.content_disposition.clone();
                    rec.mime_type = p.mime_type.clone();
                    rec.content_length = p.content_length.clone();
                    rec.downloaded_bytes = len;
                    rec.recompute_progress();
                    rec
                }
                None => TaskRecord::historical(name, path, len),
            };
            self.tasks.insert(rec.id.clone(), rec);
        }
        if !self.tasks.is_empty() {
            log::info!("启动恢复: 从磁盘接管 {} 个任务", self.tasks.len());
        }
        self.publish();
    }

    fn snapshot(&self) -> Vec<TaskRecord> {
        let mut list: Vec<TaskRecord> = self.tasks.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    fn publish(&self) {
        let _ = self.snapshot_tx.send(self.snapshot());
    }

    fn persist(&self) {
        let records: Vec<PersistedTask> = self
            .tasks
            .values()
            .map(|t| PersistedTask {
                file_path: t.file_path.clone(),
                url: t.url.clone(),
                total_bytes: t.total_bytes,
                state: t.state,
                error: t.error.clone(),
                user_agent: t.user_agent.clone(),
                content_disposition: t.content_disposition.clone(),
                mime_type: t.mime_type.clone(),
                content_length: t.content_length.clone(),
            })
            .collect();
        if let Err(e) = self.store.put(&persist::encode(&records)) {
            log::error!("持久化任务元数据失败: {}", e);
        }
    }

    /// 打取消标志并丢弃句柄，正在跑的传输会在下一个块边界停下
    fn cancel_handle(&mut self, url: &str) {
        if let Some(flag) = self.handles.remove(url) {
            flag.store(true, Ordering::SeqCst);
        }
    }

    /// 腾出一个槽位：活跃数达到上限时取消 id 字典序最小的活跃任务
    fn admit_one(&mut self) {
        while governor::count_active(&self.tasks) >= self.config.max_concurrent_downloads {
            let victim = match governor::eviction_candidate(&self.tasks) {
                Some(v) => v,
                None => break,
            };
            log::info!("并发已满({}), 驱逐任务: {}", self.config.max_concurrent_downloads, victim);
            self.cancel_handle(&victim);
            if let Some(rec) = self.tasks.get_mut(&victim) {
                rec.state = TaskState::Cancelled;
                rec.speed_bps = 0;
            }
            self.persist();
            self.publish();
        }
    }

    fn launch(&mut self, ctx: &mut Context<Self>, url: &str, resume: bool) {
        let rec = match self.tasks.get(url) {
            Some(rec) => rec,
            None => return,
        };
        let cancel = Arc::new(AtomicBool::new(false));
        self.handles.insert(url.to_string(), cancel.clone());
        actix::spawn(runner::run_transfer(
            ctx.address(),
            self.transport.clone(),
            rec.url.clone(),
            rec.file_path.clone(),
            rec.user_agent.clone(),
            resume,
            cancel,
        ));
    }

    fn disk_len(path: &str) -> u64 {
        fs::metadata(path).map(|m| m.len()).unwrap_or(0)
    }

    /// 内存计数可能落后于最后刷盘的字节，以磁盘长度重新对齐
    fn resync_from_disk(rec: &mut TaskRecord) {
        rec.downloaded_bytes = Self::disk_len(&rec.file_path);
        rec.recompute_progress();
    }
}

/// 应用非空的重放元数据，返回是否有字段真的变了
fn apply_replay_metadata(rec: &mut TaskRecord, msg: &StartDownload) -> bool {
    let mut changed = false;
    if msg.user_agent.is_some() && rec.user_agent != msg.user_agent {
        rec.user_agent = msg.user_agent.clone();
        changed = true;
    }
    if msg.content_disposition.is_some() && rec.content_disposition != msg.content_disposition {
        rec.content_disposition = msg.content_disposition.clone();
        changed = true;
    }
    if msg.mime_type.is_some() && rec.mime_type != msg.mime_type {
        rec.mime_type = msg.mime_type.clone();
        changed = true;
    }
    if msg.content_length.is_some() && rec.content_length != msg.content_length {
        rec.content_length = msg.content_length.clone();
        changed = true;
    }
    // Content-Length 提示可以提前补上未知的总大小
    if rec.total_bytes <= 0 {
        if let Some(hint) = msg.content_length.as_deref().and_then(|s| s.parse::<i64>().ok()) {
            if hint > 0 {
                rec.total_bytes = hint;
                rec.recompute_progress();
                changed = true;
            }
        }
    }
    changed
}

/// 从 URL（或 Content-Disposition）推断文件名
fn derive_file_name(url: &str, content_disposition: Option<&str>) -> String {
    if let Some(cd) = content_disposition {
        if let Some(idx) = cd.find("filename=") {
            let name = cd[idx + "filename=".len()..]
                .split(';')
                .next()
                .unwrap_or("")
                .trim()
                .trim_matches('"')
                .trim_matches('\'');
            if !name.is_empty() {
                return name.to_string();
            }
        }
    }
    if let Some(last_slash) = url.rfind('/') {
        let filename = url[last_slash + 1..].split('?').next().unwrap_or("");
        if !filename.is_empty() {
            return filename.to_string();
        }
    }
    format!("download_{}", chrono::Utc::now().timestamp())
}

/// ================== 消息处理 ==================

impl Handler<StartDownload> for DownloadManagerActor {
    type Result = Result<TaskRecord, DownloadError>;
    fn handle(&mut self, msg: StartDownload, ctx: &mut Self::Context) -> Self::Result {
        if !validator::is_valid_url(&msg.url) {
            return Err(DownloadError::InvalidUrl(msg.url));
        }

        // 同一 url 在途时幂等：原地补充元数据，绝不清零计数，也不重复启动
        if let Some(rec) = self.tasks.get_mut(&msg.url).filter(|r| r.is_active()) {
            let changed = apply_replay_metadata(rec, &msg);
            let out = rec.clone();
            if changed {
                self.persist();
                self.publish();
            }
            return Ok(out);
        }

        // Completed 是唯一的终态：resume 语义下重复 start 原样返回，
        // 不允许退回 Preparing 重新发起传输
        let resume = msg.resume_from_existing;
        if resume {
            if let Some(rec) = self.tasks.get(&msg.url) {
                if rec.state == TaskState::Completed {
                    return Ok(rec.clone());
                }
            }
        }

        self.admit_one();

        if let Some(rec) = self
            .tasks
            .get_mut(&msg.url)
            .filter(|r| resume && r.state != TaskState::Completed)
        {
            // 已知任务续传：复用原路径，计数和磁盘对齐
            rec.state = TaskState::Preparing;
            rec.error = None;
            rec.speed_bps = 0;
            apply_replay_metadata(rec, &msg);
            Self::resync_from_disk(rec);
        } else {
            let file_name = derive_file_name(&msg.url, msg.content_disposition.as_deref());
            let path = runner::resolve_destination(&self.config.download_dir, &file_name, resume);
            let mut rec = TaskRecord::new(
                msg.url.clone(),
                file_name,
                path.to_string_lossy().to_string(),
            );
            apply_replay_metadata(&mut rec, &msg);
            if resume {
                Self::resync_from_disk(&mut rec);
            }
            self.tasks.insert(msg.url.clone(), rec);
        }

        self.persist();
        self.publish();
        self.launch(ctx, &msg.url, resume);
        self.tasks
            .get(&msg.url)
            .cloned()
            .ok_or_else(|| DownloadError::Unknown(format!("任务注册失败: {}", msg.url)))
    }
}

impl Handler<UpdateTask> for DownloadManagerActor {
    type Result = ();
    fn handle(&mut self, msg: UpdateTask, _ctx: &mut Self::Context) {
        let rec = match self.tasks.get_mut(&msg.url) {
            Some(rec) => rec,
            None => return,
        };
        // 暂停/取消之后迟到的进度事件直接丢弃
        if !rec.is_active() {
            return;
        }
        let mut changed = false;
        if rec.state != TaskState::Downloading {
            rec.state = TaskState::Downloading;
            changed = true;
        }
        if let Some(d) = msg.downloaded_bytes {
            // 单调不减
            if d > rec.downloaded_bytes {
                rec.downloaded_bytes = d;
                changed = true;
            }
        }
        if let Some(t) = msg.total_bytes {
            if t > 0 && t != rec.total_bytes {
                rec.total_bytes = t;
                changed = true;
            }
        }
        if let Some(s) = msg.speed_bps {
            if s != rec.speed_bps {
                rec.speed_bps = s;
                changed = true;
            }
        }
        let old_progress = rec.progress;
        rec.recompute_progress();
        changed |= rec.progress != old_progress;

        // Downloading 状态下进度字段视为永远脏，保证订阅流持续流动；
        // 其它状态只有真变化才发布，避免空转刷屏
        if rec.state == TaskState::Downloading || changed {
            self.publish();
        }
    }
}

impl Handler<CompleteTask> for DownloadManagerActor {
    type Result = ();
    fn handle(&mut self, msg: CompleteTask, _ctx: &mut Self::Context) {
        self.handles.remove(&msg.url);
        let rec = match self.tasks.get_mut(&msg.url) {
            Some(rec) => rec,
            None => return,
        };
        if !rec.is_active() {
            return;
        }
        rec.state = TaskState::Completed;
        // 信磁盘上的最终长度，不信服务器当初宣称的大小
        rec.downloaded_bytes = msg.final_size;
        rec.total_bytes = msg.final_size as i64;
        rec.progress = 100;
        rec.speed_bps = 0;
        rec.error = None;
        log::info!("任务完成: {} ({} 字节)", msg.url, msg.final_size);
        self.persist();
        self.publish();
    }
}

impl Handler<FailTask> for DownloadManagerActor {
    type Result = ();
    fn handle(&mut self, msg: FailTask, _ctx: &mut Self::Context) {
        self.handles.remove(&msg.url);
        let rec = match self.tasks.get_mut(&msg.url) {
            Some(rec) => rec,
            None => return,
        };
        // 用户已经主动暂停/取消的任务，迟到的失败被吞掉
        if matches!(rec.state, TaskState::Paused | TaskState::Cancelled | TaskState::Completed) {
            log::debug!("忽略迟到的失败事件: {} - {}", msg.url, msg.error);
            return;
        }
        rec.state = TaskState::Failed;
        rec.error = Some(msg.error.clone());
        rec.speed_bps = 0;
        log::warn!("任务失败: {} - {}", msg.url, msg.error);
        self.persist();
        self.publish();
    }
}

impl Handler<PauseTask> for DownloadManagerActor {
    type Result = ();
    fn handle(&mut self, msg: PauseTask, _ctx: &mut Self::Context) {
        let rec = match self.tasks.get_mut(&msg.url) {
            Some(rec) => rec,
            None => return,
        };
        if !rec.is_active() {
            return;
        }
        // 必须先置 Paused 再取消句柄：反过来会让运行器的取消处理
        // 抢先把状态写成 Cancelled
        rec.state = TaskState::Paused;
        rec.speed_bps = 0;
        Self::resync_from_disk(rec);
        self.cancel_handle(&msg.url);
        self.publish();
    }
}

impl Handler<CancelTask> for DownloadManagerActor {
    type Result = ();
    fn handle(&mut self, msg: CancelTask, _ctx: &mut Self::Context) {
        self.cancel_handle(&msg.url);
        let rec = match self.tasks.get_mut(&msg.url) {
            Some(rec) => rec,
            None => return,
        };
        if matches!(rec.state, TaskState::Completed | TaskState::Cancelled) {
            return;
        }
        rec.state = TaskState::Cancelled;
        rec.speed_bps = 0;
        self.persist();
        self.publish();
    }
}

impl Handler<TransferCancelled> for DownloadManagerActor {
    type Result = ();
    fn handle(&mut self, msg: TransferCancelled, _ctx: &mut Self::Context) {
        self.handles.remove(&msg.url);
        let rec = match self.tasks.get_mut(&msg.url) {
            Some(rec) => rec,
            None => return,
        };
        // pause() 先行时保持 Paused，不允许被取消处理覆盖
        if matches!(
            rec.state,
            TaskState::Paused | TaskState::Cancelled | TaskState::Completed | TaskState::Failed
        ) {
            return;
        }
        rec.state = TaskState::Cancelled;
        rec.speed_bps = 0;
        self.persist();
        self.publish();
    }
}

impl Handler<ResumeTask> for DownloadManagerActor {
    type Result = Result<(), DownloadError>;
    fn handle(&mut self, msg: ResumeTask, ctx: &mut Self::Context) -> Self::Result {
        // 状态不允许的 resume 是 no-op；文件丢了则是环境错误，报给调用方
        let path = match self.tasks.get(&msg.url) {
            Some(rec) if rec.state.can_resume() => rec.file_path.clone(),
            _ => return Ok(()),
        };
        if !Path::new(&path).exists() {
            log::warn!("无法续传，文件已不存在: {}", path);
            return Err(DownloadError::FileMissing(path));
        }
        self.admit_one();
        if let Some(rec) = self.tasks.get_mut(&msg.url) {
            rec.state = TaskState::Preparing;
            rec.error = None;
            rec.speed_bps = 0;
            Self::resync_from_disk(rec);
        }
        self.persist();
        self.publish();
        self.launch(ctx, &msg.url, true);
        Ok(())
    }
}

impl Handler<RestartTask> for DownloadManagerActor {
    type Result = ();
    fn handle(&mut self, msg: RestartTask, ctx: &mut Self::Context) {
        let state = match self.tasks.get(&msg.url) {
            Some(rec) => rec.state,
            None => return,
        };
        if state == TaskState::Completed {
            return;
        }
        if state.is_active() {
            // 已占槽位，停掉旧传输后原地复用
            self.cancel_handle(&msg.url);
        } else {
            self.admit_one();
        }
        if let Some(rec) = self.tasks.get_mut(&msg.url) {
            if Path::new(&rec.file_path).exists() {
                if let Err(e) = fs::remove_file(&rec.file_path) {
                    log::warn!("删除半成品文件失败: {} - {}", rec.file_path, e);
                }
            }
            rec.downloaded_bytes = 0;
            rec.recompute_progress();
            rec.error = None;
            rec.speed_bps = 0;
            rec.state = TaskState::Preparing;
        }
        self.persist();
        self.publish();
        self.launch(ctx, &msg.url, false);
    }
}

impl Handler<RemoveTask> for DownloadManagerActor {
    type Result = bool;
    fn handle(&mut self, msg: RemoveTask, _ctx: &mut Self::Context) -> bool {
        let removable = self
            .tasks
            .get(&msg.url)
            .map(|rec| rec.is_terminal())
            .unwrap_or(false);
        if !removable {
            return false;
        }
        self.tasks.remove(&msg.url);
        self.handles.remove(&msg.url);
        self.persist();
        self.publish();
        true
    }
}

impl Handler<ClearTerminal> for DownloadManagerActor {
    type Result = usize;
    fn handle(&mut self, _msg: ClearTerminal, _ctx: &mut Self::Context) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, rec| !rec.is_terminal());
        let removed = before - self.tasks.len();
        if removed > 0 {
            self.persist();
            self.publish();
        }
        removed
    }
}

impl Handler<QueryTask> for DownloadManagerActor {
    type Result = MessageResult<QueryTask>;
    fn handle(&mut self, msg: QueryTask, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.tasks.get(&msg.url).cloned())
    }
}

impl Handler<ListTasks> for DownloadManagerActor {
    type Result = MessageResult<ListTasks>;
    fn handle(&mut self, _msg: ListTasks, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.snapshot())
    }
}

impl Handler<ListActive> for DownloadManagerActor {
    type Result = MessageResult<ListActive>;
    fn handle(&mut self, _msg: ListActive, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.snapshot().into_iter().filter(|r| r.is_active()).collect())
    }
}

impl Handler<Subscribe> for DownloadManagerActor {
    type Result = MessageResult<Subscribe>;
    fn handle(&mut self, _msg: Subscribe, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.snapshot_tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_file_name_from_url() {
        assert_eq!(
            derive_file_name("https://example.com/dir/a.zip", None),
            "a.zip"
        );
        assert_eq!(
            derive_file_name("https://example.com/dir/a.zip?token=1", None),
            "a.zip"
        );
    }

    #[test]
    fn test_derive_file_name_from_content_disposition() {
        assert_eq!(
            derive_file_name(
                "https://example.com/get",
                Some("attachment; filename=\"b.tar.gz\"; size=1")
            ),
            "b.tar.gz"
        );
        assert_eq!(
            derive_file_name("https://example.com/get", Some("attachment; filename=c.bin")),
            "c.bin"
        );
    }

    #[test]
    fn test_derive_file_name_fallback() {
        let name = derive_file_name("https://example.com/", None);
        assert!(name.starts_with("download_"));
    }

    #[test]
    fn test_apply_replay_metadata_total_hint() {
        let mut rec = TaskRecord::new(
            "https://example.com/a".to_string(),
            "a".to_string(),
            "/tmp/a".to_string(),
        );
        let msg = StartDownload {
            url: rec.url.clone(),
            user_agent: Some("UA".to_string()),
            content_disposition: None,
            mime_type: Some("application/zip".to_string()),
            content_length: Some("2048".to_string()),
            resume_from_existing: true,
        };
        assert!(apply_replay_metadata(&mut rec, &msg));
        assert_eq!(rec.total_bytes, 2048);
        assert_eq!(rec.user_agent.as_deref(), Some("UA"));
        // 再应用一遍没有变化
        assert!(!apply_replay_metadata(&mut rec, &msg));
    }
}
