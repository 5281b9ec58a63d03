use anyhow::Result;
use url::Url;

/// 只接受 http/https 下载源
pub fn is_valid_url(input: &str) -> bool {
    match Url::parse(input) {
        Ok(u) => matches!(u.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

pub fn validate_urls(urls: &[String]) -> Result<()> {
    if urls.is_empty() {
        anyhow::bail!("URL列表不能为空");
    }
    for url in urls {
        if !is_valid_url(url) {
            anyhow::bail!("无效的URL: {}", url);
        }
    }
    Ok(())
}

pub fn validate_download_dir(dir: &str) -> Result<()> {
    if dir.is_empty() {
        anyhow::bail!("下载目录不能为空");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_validation() {
        assert!(is_valid_url("https://example.com/a.zip"));
        assert!(is_valid_url("http://example.com"));
        assert!(!is_valid_url("ftp://example.com/a.zip"));
        assert!(!is_valid_url("file:///downloads/a.zip"));
        assert!(!is_valid_url("invalid-url"));
    }

    #[test]
    fn test_urls_validation() {
        let valid = vec![
            "https://example.com/a".to_string(),
            "http://example.com/b".to_string(),
        ];
        assert!(validate_urls(&valid).is_ok());

        assert!(validate_urls(&[]).is_err());

        let invalid = vec!["not-a-url".to_string()];
        assert!(validate_urls(&invalid).is_err());
    }

    #[test]
    fn test_download_dir_validation() {
        assert!(validate_download_dir("./downloads").is_ok());
        assert!(validate_download_dir("").is_err());
    }
}
