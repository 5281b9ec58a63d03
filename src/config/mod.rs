use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::error::DownloadError;
use crate::utils::validator;

/// 配置结构体
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// 默认下载目录
    pub download_dir: String,
    /// 最大并发下载数（活跃任务超过时驱逐 id 最小的）
    pub max_concurrent_downloads: usize,
    /// 网络连接超时时间（秒）
    pub timeout: u64,
    /// 默认 User-Agent
    pub user_agent: String,
    /// 任务元数据文件名（存放在下载目录下）
    pub meta_file_name: String,
    /// start 时默认接着半成品续传
    pub resume_by_default: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_dir: "./downloads".to_string(),
            max_concurrent_downloads: 3,
            timeout: 30,
            user_agent: "ResumeDown/0.1".to_string(),
            meta_file_name: "tasks.meta".to_string(),
            resume_by_default: true,
        }
    }
}

impl Config {
    /// 加载配置文件，不存在或格式错误时落回默认配置并写回
    pub fn load(path: &str) -> Result<Self, DownloadError> {
        if Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            match toml::from_str(&content) {
                Ok(config) => Ok(config),
                Err(e) => {
                    log::warn!("配置文件格式错误: {}，将使用默认配置", e);
                    let config = Config::default();
                    config.save(path)?;
                    Ok(config)
                }
            }
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// 保存带注释说明的配置文件
    pub fn save(&self, path: &str) -> Result<(), DownloadError> {
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)?;
        }
        let config_content = toml::to_string_pretty(self)
            .map_err(|e| DownloadError::Config(format!("无法序列化配置: {}", e)))?;
        let full_content = format!("{}\n{}", Config::template_header(), config_content);
        fs::write(path, full_content)?;
        Ok(())
    }

    fn template_header() -> &'static str {
        r#"# ResumeDown 配置文件
# ====================
#
# TOML 格式。命令行参数会覆盖这里的设置，优先级：命令行 > 配置文件 > 默认值。
#
# download_dir             默认下载目录
# max_concurrent_downloads 最大并发下载数，槽位占满时驱逐 id 最小的活跃任务
# timeout                  网络连接超时（秒）
# user_agent               默认 User-Agent
# meta_file_name           任务元数据文件名（存放在下载目录下）
# resume_by_default        start 时默认接着半成品续传
"#
    }

    /// 校验配置合法性
    pub fn validate(&self) -> Result<(), DownloadError> {
        validator::validate_download_dir(&self.download_dir)
            .map_err(|e| DownloadError::Config(e.to_string()))?;
        if self.max_concurrent_downloads == 0 {
            return Err(DownloadError::Config("并发下载数必须大于0".to_string()));
        }
        if self.timeout == 0 {
            return Err(DownloadError::Config("超时时间必须大于0".to_string()));
        }
        if self.meta_file_name.is_empty() {
            return Err(DownloadError::Config("元数据文件名不能为空".to_string()));
        }
        Ok(())
    }

    /// 合并命令行参数到配置（命令行优先）
    pub fn merge_from_args(&mut self, args: &crate::cli::Args) {
        if let Some(dir) = &args.download_dir {
            self.download_dir = dir.clone();
        }
        if let Some(n) = args.max_concurrent {
            self.max_concurrent_downloads = n;
        }
        if let Some(ua) = &args.user_agent {
            self.user_agent = ua.clone();
        }
    }

    /// 元数据文件的完整路径
    pub fn meta_file_path(&self) -> std::path::PathBuf {
        Path::new(&self.download_dir).join(&self.meta_file_name)
    }

    /// 获取配置摘要信息
    pub fn get_summary(&self) -> String {
        format!(
            "配置摘要:\n\
            - 下载目录: {}\n\
            - 并发数: {}\n\
            - 超时时间: {} 秒\n\
            - 默认续传: {}",
            self.download_dir,
            self.max_concurrent_downloads,
            self.timeout,
            if self.resume_by_default { "启用" } else { "禁用" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.max_concurrent_downloads, 3);
        assert_eq!(config.timeout, 30);
        assert!(config.resume_by_default);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.max_concurrent_downloads = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.download_dir = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_save_load() {
        let path = std::env::temp_dir().join("resumedown_config_test.toml");
        let path = path.to_string_lossy().to_string();
        let config = Config::default();

        config.save(&path).expect("保存配置失败");
        let loaded = Config::load(&path).expect("加载配置失败");

        assert_eq!(loaded.download_dir, config.download_dir);
        assert_eq!(loaded.max_concurrent_downloads, config.max_concurrent_downloads);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_config_meta_file_path() {
        let config = Config::default();
        assert!(config
            .meta_file_path()
            .to_string_lossy()
            .ends_with("tasks.meta"));
    }

    #[test]
    fn test_config_summary() {
        let summary = Config::default().get_summary();
        assert!(summary.contains("配置摘要"));
        assert!(summary.contains("下载目录"));
    }
}
