//! 并发闸门：限制同时活跃（Preparing/Downloading）的任务数
//!
//! 槽位占满时驱逐活跃任务里 id 字典序最小的那个。id 就是 URL 字符串，
//! 所以"最老"实际上是"字典序最小"——这是刻意保留的确定性策略，
//! 不要换成真正的 LRU。

use std::collections::HashMap;

use crate::core::task::TaskRecord;

/// 当前活跃任务数
pub fn count_active(tasks: &HashMap<String, TaskRecord>) -> usize {
    tasks.values().filter(|t| t.is_active()).count()
}

/// 需要腾槽位时挑选的牺牲者：活跃任务中 id 字典序最小的
pub fn eviction_candidate(tasks: &HashMap<String, TaskRecord>) -> Option<String> {
    tasks
        .values()
        .filter(|t| t.is_active())
        .map(|t| t.id.clone())
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::{TaskRecord, TaskState};

    fn record(url: &str, state: TaskState) -> TaskRecord {
        let mut rec = TaskRecord::new(
            url.to_string(),
            "f.bin".to_string(),
            format!("/tmp/{}.bin", url.len()),
        );
        rec.state = state;
        rec
    }

    fn map(records: Vec<TaskRecord>) -> HashMap<String, TaskRecord> {
        records.into_iter().map(|r| (r.id.clone(), r)).collect()
    }

    #[test]
    fn test_count_active() {
        let tasks = map(vec![
            record("https://a.com/1", TaskState::Preparing),
            record("https://b.com/2", TaskState::Downloading),
            record("https://c.com/3", TaskState::Paused),
            record("https://d.com/4", TaskState::Completed),
        ]);
        assert_eq!(count_active(&tasks), 2);
    }

    #[test]
    fn test_eviction_picks_lexicographically_smallest() {
        let tasks = map(vec![
            record("https://c.com/x", TaskState::Downloading),
            record("https://a.com/x", TaskState::Downloading),
            record("https://b.com/x", TaskState::Preparing),
        ]);
        assert_eq!(eviction_candidate(&tasks).as_deref(), Some("https://a.com/x"));
    }

    #[test]
    fn test_eviction_ignores_inactive() {
        let tasks = map(vec![
            record("https://a.com/x", TaskState::Paused),
            record("https://b.com/x", TaskState::Downloading),
        ]);
        assert_eq!(eviction_candidate(&tasks).as_deref(), Some("https://b.com/x"));
    }

    #[test]
    fn test_eviction_empty_when_idle() {
        let tasks = map(vec![record("https://a.com/x", TaskState::Failed)]);
        assert_eq!(eviction_candidate(&tasks), None);
    }
}
