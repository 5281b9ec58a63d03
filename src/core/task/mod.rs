//! `task` 模块包含单个下载任务的数据表示
//!
//! 主要包括：
//! - `record`: 任务记录 `TaskRecord`（身份 + 进度 + 重放元数据）
//! - `state`: 任务状态 `TaskState` 与状态机判定

pub mod record;
pub mod state;

// 导出核心组件，方便外部使用
pub use record::{TaskRecord, compute_progress};
pub use state::TaskState;
