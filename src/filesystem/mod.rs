// 沙箱文件系统模块
//
// 所有路径都约束在配置的根目录之内：目录树浏览、文件内容读写、
// 增删改、复制移动和 ZIP 压缩解压

mod archive;
mod catalog;
mod content;
mod guard;
mod service;
mod tree;
mod types;

pub use archive::{ArchiveJob, ArchiveKind, ArchiveService};
pub use catalog::{EntryCatalog, Filters};
pub use content::{detect_media_type, ContentAccessor, EMPTY_MEDIA_TYPE};
pub use guard::{BasePath, PathSandbox};
pub use service::FilesystemService;
pub use tree::TreeBuilder;
pub use types::*;
