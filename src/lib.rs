// File Manager Rust Library
// 沙箱文件管理服务核心库

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 沙箱文件系统模块（目录树、压缩包、文件内容）
pub mod filesystem;

// Web服务器模块
pub mod server;

// 导出常用类型
pub use config::AppConfig;
pub use filesystem::{FilesystemService, OperationResult, PathSandbox};
pub use server::AppState;
