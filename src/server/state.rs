// 应用状态

use crate::config::AppConfig;
use crate::filesystem::FilesystemService;
use std::sync::Arc;

/// 应用全局状态
///
/// 文件系统服务本身无状态，所有请求共享同一个实例
#[derive(Clone)]
pub struct AppState {
    /// 文件系统服务
    pub filesystem: Arc<FilesystemService>,
    /// 应用配置（启动后只读）
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// 根据配置创建应用状态，沙箱根目录无效时失败
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let filesystem = FilesystemService::from_config(&config)
            .map_err(|e| anyhow::anyhow!("初始化文件系统服务失败: {}", e))?;

        Ok(Self {
            filesystem: Arc::new(filesystem),
            config: Arc::new(config),
        })
    }
}
