//! Core: 任务注册表、状态机、并发闸门、传输运行器与持久化

pub mod error;
pub mod governor;
pub mod manager;
pub mod persist;
pub mod runner;
pub mod task;
pub mod transport;

// 只导出主流程和外部调用方实际用到的类型
pub use error::{DownloadError, DownloadResult};
pub use manager::{
    CancelTask, ClearTerminal, DownloadManagerActor, ListActive, ListTasks, PauseTask,
    QueryTask, RemoveTask, RestartTask, ResumeTask, StartDownload, Subscribe,
};
pub use persist::{FileMetaStore, MetaStore};
pub use task::{TaskRecord, TaskState};
pub use transport::{HttpTransport, TransportExecutor};
