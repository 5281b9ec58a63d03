//! 持久化：任务元数据的编解码与落盘
//!
//! 格式是一行一条记录、`|` 分隔的 9 个字段：
//!
//! `filePath|url|totalBytes|state|error|userAgent|contentDisposition|mimeType|contentLength`
//!
//! 可选字段空缺时序列化为空字符串。只持久化进程重启后恢复传输所需的
//! 元数据，`downloaded_bytes`/`progress`/`speed` 这类瞬时字段一律不落盘，
//! 恢复时总是以磁盘上文件的真实长度为准重算。

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::core::task::TaskState;

/// 每行的字段数
const FIELD_COUNT: usize = 9;

/// 一条持久化的任务元数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedTask {
    pub file_path: String,
    pub url: String,
    pub total_bytes: i64,
    pub state: TaskState,
    pub error: Option<String>,
    pub user_agent: Option<String>,
    pub content_disposition: Option<String>,
    pub mime_type: Option<String>,
    pub content_length: Option<String>,
}

/// 字段内不允许出现分隔符和换行，写入前替换掉
fn sanitize(field: &str) -> String {
    field.replace('|', "/").replace('\n', " ").replace('\r', " ")
}

fn opt(field: &Option<String>) -> String {
    field.as_deref().map(sanitize).unwrap_or_default()
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() { None } else { Some(s.to_string()) }
}

/// 把任务集合编码成一个字符串 blob
pub fn encode(records: &[PersistedTask]) -> String {
    let mut out = String::new();
    for rec in records {
        out.push_str(&format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}\n",
            sanitize(&rec.file_path),
            sanitize(&rec.url),
            rec.total_bytes,
            rec.state.as_str(),
            opt(&rec.error),
            opt(&rec.user_agent),
            opt(&rec.content_disposition),
            opt(&rec.mime_type),
            opt(&rec.content_length),
        ));
    }
    out
}

/// 从字符串 blob 解码任务集合
///
/// 容忍短行：缺失的尾部字段按 空字符串/-1/Failed 处理；
/// 没有文件路径的行直接跳过。
pub fn decode(blob: &str) -> Vec<PersistedTask> {
    let mut out = Vec::new();
    for line in blob.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields: Vec<&str> = line.split('|').collect();
        fields.resize(FIELD_COUNT, "");
        if fields[0].is_empty() {
            log::warn!("跳过缺少文件路径的持久化记录: {:?}", line);
            continue;
        }
        out.push(PersistedTask {
            file_path: fields[0].to_string(),
            url: fields[1].to_string(),
            total_bytes: fields[2].parse::<i64>().unwrap_or(-1),
            state: TaskState::parse(fields[3]),
            error: non_empty(fields[4]),
            user_agent: non_empty(fields[5]),
            content_disposition: non_empty(fields[6]),
            mime_type: non_empty(fields[7]),
            content_length: non_empty(fields[8]),
        });
    }
    out
}

/// ================== 持久化存储 ==================

/// 字符串 blob 的持久化接口，宿主只需要提供单 key 的读/写/删
pub trait MetaStore: Send {
    fn get(&self) -> Option<String>;
    fn put(&self, blob: &str) -> std::io::Result<()>;
    fn remove(&self);
}

/// 基于单个文件的默认实现
pub struct FileMetaStore {
    path: PathBuf,
}

impl FileMetaStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetaStore for FileMetaStore {
    fn get(&self) -> Option<String> {
        fs::read_to_string(&self.path).ok()
    }

    fn put(&self, blob: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut f = fs::File::create(&self.path)?;
        f.write_all(blob.as_bytes())
    }

    fn remove(&self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PersistedTask {
        PersistedTask {
            file_path: "/downloads/a.zip".to_string(),
            url: "https://example.com/a.zip".to_string(),
            total_bytes: 10_485_760,
            state: TaskState::Paused,
            error: None,
            user_agent: Some("Mozilla/5.0".to_string()),
            content_disposition: Some("attachment; filename=a.zip".to_string()),
            mime_type: Some("application/zip".to_string()),
            content_length: Some("10485760".to_string()),
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut failed = sample();
        failed.file_path = "/downloads/b.zip".to_string();
        failed.url = "https://example.com/b.zip".to_string();
        failed.state = TaskState::Failed;
        failed.error = Some("服务器错误: 503".to_string());
        failed.user_agent = None;
        failed.mime_type = None;

        let records = vec![sample(), failed];
        let blob = encode(&records);
        let decoded = decode(&blob);
        assert_eq!(decoded, records);
    }

    #[test]
    fn test_decode_short_lines() {
        // 只有前三个字段，后面的默认为 空/Failed
        let decoded = decode("/downloads/c.bin|https://example.com/c.bin|123\n");
        assert_eq!(decoded.len(), 1);
        let rec = &decoded[0];
        assert_eq!(rec.total_bytes, 123);
        assert_eq!(rec.state, TaskState::Failed);
        assert_eq!(rec.error, None);
        assert_eq!(rec.user_agent, None);
        assert_eq!(rec.content_length, None);
    }

    #[test]
    fn test_decode_bad_total_defaults_to_unknown() {
        let decoded = decode("/downloads/c.bin|https://example.com/c.bin|abc|Completed\n");
        assert_eq!(decoded[0].total_bytes, -1);
        assert_eq!(decoded[0].state, TaskState::Completed);
    }

    #[test]
    fn test_decode_skips_pathless_lines() {
        let decoded = decode("\n|https://example.com/x\n/downloads/d.bin|https://example.com/d\n");
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].file_path, "/downloads/d.bin");
    }

    #[test]
    fn test_encode_sanitizes_separator() {
        let mut rec = sample();
        rec.error = Some("错误|带分隔符\n和换行".to_string());
        rec.state = TaskState::Failed;
        let decoded = decode(&encode(&[rec]));
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].error.as_deref(), Some("错误/带分隔符 和换行"));
    }

    #[test]
    fn test_file_meta_store() {
        let path = std::env::temp_dir().join("resumedown_store_test.meta");
        let store = FileMetaStore::new(&path);
        store.remove();

        assert!(store.get().is_none());
        store.put("hello").expect("写入元数据失败");
        assert_eq!(store.get().as_deref(), Some("hello"));
        store.remove();
        assert!(store.get().is_none());
    }
}
