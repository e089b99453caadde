// 文件管理模块数据类型定义

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// 文件系统错误码
/// 错误码范围：50001 - 50099
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsErrorCode {
    /// 路径越过沙箱根目录
    PathNotAllowed = 50001,
    /// 沙箱根目录本身不允许此操作
    RootProtected = 50002,
    /// 目标不存在
    NotFound = 50003,
    /// 不是目录
    NotADirectory = 50004,
    /// 不是文件
    NotAFile = 50005,
    /// 目标已存在
    AlreadyExists = 50006,
    /// 名称无效
    InvalidName = 50007,
    /// 目标位于源目录内部
    DestinationInsideSource = 50008,
    /// 底层文件系统调用失败
    IoFailure = 50009,
    /// 压缩包无法打开/写入/解压
    ArchiveFailure = 50010,
    /// 内容既不是文本也不是图片
    UnsupportedContent = 50011,
}

impl FsErrorCode {
    pub fn code(&self) -> i32 {
        *self as i32
    }

    /// 默认消息键（翻译由前端完成）
    pub fn message(&self) -> &'static str {
        match self {
            Self::PathNotAllowed => "access_denied",
            Self::RootProtected => "access_denied",
            Self::NotFound => "item_not_found_or_not_read",
            Self::NotADirectory => "not_a_directory",
            Self::NotAFile => "file_not_read",
            Self::AlreadyExists => "already_created",
            Self::InvalidName => "invalid_name",
            Self::DestinationInsideSource => "operation_failed",
            Self::IoFailure => "operation_failed",
            Self::ArchiveFailure => "archive_not_open",
            Self::UnsupportedContent => "file_not_read",
        }
    }

    /// 是否属于沙箱越权类错误
    pub fn is_sandbox_violation(&self) -> bool {
        matches!(self, Self::PathNotAllowed | Self::RootProtected)
    }
}

/// 文件系统错误
#[derive(Debug)]
pub struct FsError {
    pub code: FsErrorCode,
    pub message: String,
    pub path: Option<String>,
    /// 识别出的媒体类型（仅内容读取失败时携带）
    pub media_type: Option<String>,
}

impl FsError {
    pub fn new(code: FsErrorCode) -> Self {
        Self {
            message: code.message().to_string(),
            code,
            path: None,
            media_type: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    /// 包装底层 I/O 错误
    pub fn io(path: &Path, err: std::io::Error) -> Self {
        Self::new(FsErrorCode::IoFailure)
            .with_path(path.to_string_lossy())
            .with_message(err.to_string())
    }
}

impl std::fmt::Display for FsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref path) = self.path {
            write!(f, "[{}] {}: {}", self.code.code(), self.message, path)
        } else {
            write!(f, "[{}] {}", self.code.code(), self.message)
        }
    }
}

impl std::error::Error for FsError {}

pub type FsResult<T> = Result<T, FsError>;

/// 文件/目录条目
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// 沙箱内绝对路径
    pub path: String,
    /// 文件名
    pub name: String,
    /// 文件大小（目录为 0）
    pub size: u64,
    /// 修改时间（Unix 秒）
    pub last_modified: i64,
    pub is_directory: bool,
    #[serde(flatten)]
    pub kind: EntryKind,
}

/// 条目类型相关的字段
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum EntryKind {
    #[serde(rename_all = "camelCase")]
    Directory {
        /// 子条目；未展开时为空
        children: Vec<Entry>,
        /// 是否已展开，用于区分"未展开"和"展开后为空"
        expanded: bool,
    },
    #[serde(rename_all = "camelCase")]
    File {
        extension: String,
        mime_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        icon: Option<String>,
    },
}

impl Entry {
    pub fn is_dir(&self) -> bool {
        self.is_directory
    }

    pub fn children(&self) -> &[Entry] {
        match &self.kind {
            EntryKind::Directory { children, .. } => children,
            EntryKind::File { .. } => &[],
        }
    }

    pub fn is_expanded(&self) -> bool {
        matches!(self.kind, EntryKind::Directory { expanded: true, .. })
    }

    /// 挂载展开后的子条目（文件条目忽略）
    pub fn attach_children(&mut self, entries: Vec<Entry>) {
        if let EntryKind::Directory { children, expanded } = &mut self.kind {
            *children = entries;
            *expanded = true;
        }
    }
}

/// 本次请求需要展开的目录集合
///
/// 每个路径在一次构建中只会被消费一次
#[derive(Debug, Clone, Default)]
pub struct OpenSet {
    paths: HashSet<PathBuf>,
}

impl OpenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 若路径在集合中则移除并返回 true
    pub fn take(&mut self, path: &Path) -> bool {
        self.paths.remove(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FromIterator<PathBuf> for OpenSet {
    fn from_iter<I: IntoIterator<Item = PathBuf>>(iter: I) -> Self {
        Self {
            paths: iter.into_iter().collect(),
        }
    }
}

/// 文件内容
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileContent {
    /// 文本内容，或图片的 base64 data URI
    pub content: String,
    pub is_text: bool,
    pub is_image: bool,
    #[serde(rename = "type")]
    pub media_type: String,
}

/// 统一响应信封
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(flatten)]
    pub data: Option<T>,
}

impl<T> OperationResult<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            code: None,
            path: None,
            media_type: None,
            data: Some(data),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

impl<T> From<FsError> for OperationResult<T> {
    fn from(err: FsError) -> Self {
        Self {
            success: false,
            message: err.message,
            code: Some(err.code.code()),
            path: err.path,
            media_type: err.media_type,
            data: None,
        }
    }
}

/// 树数据（`listBase`）
#[derive(Debug, Clone, Serialize)]
pub struct TreeData {
    pub tree: Vec<Entry>,
}

/// 子条目数据（`listChildren`）
#[derive(Debug, Clone, Serialize)]
pub struct ChildrenData {
    pub entries: Vec<Entry>,
}

/// 变更操作成功后返回的刷新树
#[derive(Debug, Clone, Serialize)]
pub struct ItemsData {
    pub items: Vec<Entry>,
}

/// 创建文件成功后的数据
#[derive(Debug, Clone, Serialize)]
pub struct CreatedFileData {
    pub path: String,
    pub items: Vec<Entry>,
}

fn default_open() -> Vec<String> {
    Vec::new()
}

/// 树请求
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TreeRequest {
    #[serde(default = "default_open")]
    pub open: Vec<String>,
}

/// 单路径请求（children / content / delete）
#[derive(Debug, Clone, Deserialize)]
pub struct PathRequest {
    pub path: String,
    #[serde(default = "default_open")]
    pub open: Vec<String>,
}

/// 保存内容请求
#[derive(Debug, Clone, Deserialize)]
pub struct SaveContentRequest {
    pub path: String,
    pub content: String,
}

/// 创建文件/文件夹请求
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRequest {
    pub parent: String,
    pub name: String,
    #[serde(default = "default_open")]
    pub open: Vec<String>,
}

/// 复制/剪切请求
#[derive(Debug, Clone, Deserialize)]
pub struct TransferRequest {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_open")]
    pub open: Vec<String>,
}

/// 重命名请求（`name` 为新路径）
#[derive(Debug, Clone, Deserialize)]
pub struct RenameRequest {
    pub path: String,
    pub name: String,
    #[serde(default = "default_open")]
    pub open: Vec<String>,
}

/// 压缩请求（`name` 为压缩包路径）
#[derive(Debug, Clone, Deserialize)]
pub struct CompressRequest {
    pub path: String,
    pub name: String,
    #[serde(default = "default_open")]
    pub open: Vec<String>,
}

/// 解压请求
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractRequest {
    pub path: String,
    pub target: String,
    #[serde(default = "default_open")]
    pub open: Vec<String>,
}

/// 获取文件扩展名对应的图标建议
pub fn get_icon_for_extension(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    let icon = match ext.as_str() {
        // 图片
        "jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp" | "svg" | "ico" => "image",
        // 视频
        "mp4" | "mkv" | "avi" | "mov" | "wmv" | "flv" | "webm" => "video",
        // 音频
        "mp3" | "wav" | "flac" | "aac" | "ogg" | "wma" => "audio",
        // 文档
        "pdf" => "pdf",
        "doc" | "docx" => "word",
        "xls" | "xlsx" => "excel",
        "ppt" | "pptx" => "powerpoint",
        "txt" | "md" | "rtf" => "text",
        // 压缩包
        "zip" | "rar" | "7z" | "tar" | "gz" | "bz2" => "archive",
        // 代码
        "rs" | "js" | "ts" | "py" | "java" | "c" | "cpp" | "h" | "go" | "rb" | "php" => "code",
        "html" | "htm" | "css" | "scss" | "less" => "web",
        "json" | "xml" | "yaml" | "yml" | "toml" => "config",
        _ => return None,
    };
    Some(icon.to_string())
}
