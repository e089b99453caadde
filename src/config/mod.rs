// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,
    /// 文件系统配置
    #[serde(default)]
    pub filesystem: FilesystemConfig,
    /// 压缩/解压配置
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "default_host")]
    pub host: String,
    /// 监听端口
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS允许的源
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    /// 前端静态资源目录（可选）
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
    /// 上传请求体大小上限（字节，默认 512MB）
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    18890
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_max_upload_bytes() -> usize {
    512 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
            static_dir: None,
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

/// 文件系统配置
///
/// `hidden` / `only` 中的相对路径以 `base_path` 为根解析
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemConfig {
    /// 沙箱根目录，所有操作都不能越过该目录
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,
    /// 列表中始终隐藏的路径
    #[serde(default = "default_hidden")]
    pub hidden: Vec<String>,
    /// 允许列出的路径，`*` 表示不限制
    #[serde(default = "default_only")]
    pub only: Vec<String>,
}

fn default_base_path() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn default_hidden() -> Vec<String> {
    vec!["vendor".to_string(), "node_modules".to_string()]
}

fn default_only() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            hidden: default_hidden(),
            only: default_only(),
        }
    }
}

/// 压缩/解压配置
///
/// 压缩和解压是唯一可能长时间运行的操作，这里给出宽松但有限的上限
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// 单次压缩/解压的超时时间（秒）
    #[serde(default = "default_archive_timeout_secs")]
    pub timeout_secs: u64,
    /// 解压前校验的解压后总大小上限（字节）
    #[serde(default = "default_max_extract_bytes")]
    pub max_extract_bytes: u64,
    /// deflate 压缩等级（None 使用默认等级）
    #[serde(default)]
    pub compression_level: Option<i32>,
}

fn default_archive_timeout_secs() -> u64 {
    600
}

fn default_max_extract_bytes() -> u64 {
    1024 * 1024 * 1024 // 1GB
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_archive_timeout_secs(),
            max_extract_bytes: default_max_extract_bytes(),
            compression_level: None,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            filesystem: FilesystemConfig::default(),
            archive: ArchiveConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        config
            .validate()
            .context("配置文件中的沙箱根目录验证失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);

        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                let default_config = Self::default();

                if let Err(e) = default_config.save_to_file(path).await {
                    tracing::error!("保存默认配置失败: {}", e);
                }

                default_config
            }
        }
    }

    /// 校验配置
    ///
    /// 沙箱根目录必须是已存在的目录
    pub fn validate(&self) -> Result<()> {
        let base = &self.filesystem.base_path;
        if !base.is_dir() {
            anyhow::bail!("沙箱根目录不存在或不是目录: {:?}", base);
        }
        if self.archive.timeout_secs == 0 {
            anyhow::bail!("archive.timeout_secs 必须大于 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};

    #[tokio::test]
    async fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 18890);
        assert_eq!(config.filesystem.only, vec!["*".to_string()]);
        assert_eq!(config.archive.timeout_secs, 600);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();
        let base = TempDir::new().unwrap();

        let mut config = AppConfig::default();
        config.filesystem.base_path = base.path().to_path_buf();
        config.filesystem.hidden = vec!["secret".to_string()];
        config.save_to_file(path).await.unwrap();

        let loaded = AppConfig::load_from_file(path).await.unwrap();
        assert_eq!(loaded.server.port, config.server.port);
        assert_eq!(loaded.filesystem.base_path, base.path());
        assert_eq!(loaded.filesystem.hidden, vec!["secret".to_string()]);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let base = TempDir::new().unwrap();
        let content = format!(
            "[filesystem]\nbase_path = {:?}\n\n[archive]\ntimeout_secs = 30\n",
            base.path().to_str().unwrap()
        );

        let config: AppConfig = toml::from_str(&content).unwrap();
        assert_eq!(config.archive.timeout_secs, 30);
        assert_eq!(config.archive.max_extract_bytes, 1024 * 1024 * 1024);
        assert_eq!(config.filesystem.hidden, vec!["vendor", "node_modules"]);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.log.enabled);
    }

    #[test]
    fn test_validate_missing_base_path() {
        let mut config = AppConfig::default();
        config.filesystem.base_path = PathBuf::from("/definitely/not/here/file-manager");
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_or_default_writes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config").join("app.toml");
        let path_str = path.to_str().unwrap();

        let config = AppConfig::load_or_default(path_str).await;
        assert_eq!(config.server.port, 18890);
        assert!(path.exists());
    }
}
