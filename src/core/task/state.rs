use serde::{Serialize, Deserialize};

/// 下载任务状态
///
/// 状态机：`Preparing -> Downloading -> {Paused, Completed, Failed, Cancelled}`，
/// 其中 `Paused/Failed/Cancelled` 可以通过 resume/restart 回到 `Preparing`。
/// 只有 `Completed` 是终点，不可再转移。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Preparing,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// 持久化用的稳定名称
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Preparing => "Preparing",
            TaskState::Downloading => "Downloading",
            TaskState::Paused => "Paused",
            TaskState::Completed => "Completed",
            TaskState::Failed => "Failed",
            TaskState::Cancelled => "Cancelled",
        }
    }

    /// 从持久化字符串还原，无法识别时按 `Failed` 处理
    pub fn parse(s: &str) -> TaskState {
        match s {
            "Preparing" => TaskState::Preparing,
            "Downloading" => TaskState::Downloading,
            "Paused" => TaskState::Paused,
            "Completed" => TaskState::Completed,
            "Cancelled" => TaskState::Cancelled,
            _ => TaskState::Failed,
        }
    }

    /// 是否正在占用下载槽位
    pub fn is_active(&self) -> bool {
        matches!(self, TaskState::Preparing | TaskState::Downloading)
    }

    /// 是否已结束（Completed/Failed/Cancelled）
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed | TaskState::Cancelled)
    }

    /// 是否允许 resume 回到 Preparing
    pub fn can_resume(&self) -> bool {
        matches!(self, TaskState::Failed | TaskState::Cancelled | TaskState::Paused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_parse_roundtrip() {
        for s in [
            TaskState::Preparing,
            TaskState::Downloading,
            TaskState::Paused,
            TaskState::Completed,
            TaskState::Failed,
            TaskState::Cancelled,
        ] {
            assert_eq!(TaskState::parse(s.as_str()), s);
        }
    }

    #[test]
    fn test_state_parse_unknown_defaults_to_failed() {
        assert_eq!(TaskState::parse(""), TaskState::Failed);
        assert_eq!(TaskState::parse("Running"), TaskState::Failed);
    }

    #[test]
    fn test_state_classification() {
        assert!(TaskState::Preparing.is_active());
        assert!(TaskState::Downloading.is_active());
        assert!(!TaskState::Paused.is_active());

        assert!(TaskState::Completed.is_terminal());
        assert!(!TaskState::Paused.is_terminal());

        assert!(TaskState::Paused.can_resume());
        assert!(TaskState::Failed.can_resume());
        assert!(TaskState::Cancelled.can_resume());
        assert!(!TaskState::Completed.can_resume());
        assert!(!TaskState::Downloading.can_resume());
    }
}
