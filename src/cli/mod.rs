//! CLI: 命令行接口和参数解析模块
//!
//! - 基本下载：`resumedown <url>`
//! - 批量下载：`resumedown -f urls.txt`
//! - 指定配置：`resumedown -c config.toml <url>`
//! - 从零重下（忽略半成品）：`resumedown --no-resume <url>`

use clap::Parser;
use std::env;
use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::core::error::DownloadError;

/// 获取平台默认配置文件路径
pub fn default_config_path() -> String {
    #[cfg(target_os = "windows")]
    {
        let appdata = env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        format!("{}/resumedown/resumedown.conf", appdata)
    }
    #[cfg(target_os = "macos")]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/Library/Application Support/resumedown/resumedown.conf", home)
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/.config/resumedown/resumedown.conf", home)
    }
}

/// ResumeDown 命令行参数
#[derive(Parser, Debug, Clone)]
#[command(
    name = "resumedown",
    author = "panzhifu",
    version = env!("CARGO_PKG_VERSION"),
    about = "一个用 Rust 编写的可断点续传的下载编排器",
    long_about = "支持暂停/恢复、断点续传、并发上限和崩溃后恢复的下载编排器。\n\n示例：\n  resumedown https://example.com/file.zip\n  resumedown -f urls.txt\n  resumedown --no-resume https://example.com/file.zip\n"
)]
pub struct Args {
    /// 要下载的URL列表（可同时指定多个）
    #[arg(required = false, help = "要下载的URL列表，可以同时指定多个URL。")]
    pub urls: Vec<String>,

    /// 包含URL列表的文件路径
    #[arg(short, long, help = "包含URL列表的文件路径，每行一个URL。")]
    pub file: Option<String>,

    /// 配置文件路径，默认为平台推荐路径
    #[arg(short = 'c', long, default_value_t = default_config_path(), help = "配置文件路径。")]
    pub config: String,

    /// 指定下载目录
    #[arg(long, short = 'd', help = "指定下载目录，覆盖配置文件中的设置。")]
    pub download_dir: Option<String>,

    /// 最大并发下载数
    #[arg(long, short = 'n', help = "最大并发下载数，覆盖配置文件中的设置。")]
    pub max_concurrent: Option<usize>,

    /// 指定 User-Agent
    #[arg(long, short = 'u', help = "请求使用的 User-Agent，覆盖配置文件中的设置。")]
    pub user_agent: Option<String>,

    /// 忽略磁盘上的半成品，从零开始下载
    #[arg(long, help = "忽略磁盘上的半成品文件，从零开始下载。")]
    pub no_resume: bool,
}

impl Args {
    /// 解析命令行参数并加载配置
    pub fn parse_args() -> Result<(Self, Config), DownloadError> {
        let args = Args::parse();

        let mut config = if Path::new(&args.config).exists() {
            Config::load(&args.config)?
        } else {
            if let Some(parent) = Path::new(&args.config).parent() {
                fs::create_dir_all(parent)?;
            }
            let config = Config::default();
            config.save(&args.config)?;
            config
        };
        config.merge_from_args(&args);
        if args.no_resume {
            config.resume_by_default = false;
        }
        config.validate()?;
        Ok((args, config))
    }

    /// 汇总命令行与文件里的 URL 列表
    pub fn get_urls(&self) -> Result<Vec<String>, DownloadError> {
        let mut urls = self.urls.clone();
        if let Some(path) = &self.file {
            let content = fs::read_to_string(path)?;
            urls.extend(
                content
                    .lines()
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty() && !l.starts_with('#')),
            );
        }
        if urls.is_empty() {
            return Err(DownloadError::Config("没有指定要下载的URL".to_string()));
        }
        Ok(urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_urls_from_file() {
        let path = std::env::temp_dir().join("resumedown_urls_test.txt");
        fs::write(&path, "https://a.com/1\n\n# 注释\nhttps://b.com/2\n").expect("写URL文件失败");

        let args = Args {
            urls: vec!["https://c.com/3".to_string()],
            file: Some(path.to_string_lossy().to_string()),
            config: default_config_path(),
            download_dir: None,
            max_concurrent: None,
            user_agent: None,
            no_resume: false,
        };
        let urls = args.get_urls().expect("解析URL失败");
        assert_eq!(urls, vec!["https://c.com/3", "https://a.com/1", "https://b.com/2"]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_get_urls_empty_is_error() {
        let args = Args {
            urls: vec![],
            file: None,
            config: default_config_path(),
            download_dir: None,
            max_concurrent: None,
            user_agent: None,
            no_resume: false,
        };
        assert!(args.get_urls().is_err());
    }
}
