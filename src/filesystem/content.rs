// 文件内容读写
//
// 文本原样返回，图片返回 base64 data URI，其余类型不回传内容

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use base64::Engine;

use super::types::{FileContent, FsError, FsErrorCode, FsResult};

/// 空文件的媒体类型
pub const EMPTY_MEDIA_TYPE: &str = "inode/x-empty";

/// 类型识别时读取的文件头长度
const SNIFF_LEN: u64 = 8192;

/// 文件内容访问
#[derive(Debug, Clone, Default)]
pub struct ContentAccessor;

impl ContentAccessor {
    pub fn new() -> Self {
        Self
    }

    /// 读取文件内容
    pub fn read(&self, path: &Path) -> FsResult<FileContent> {
        if !path.is_file() {
            return Err(FsError::new(FsErrorCode::NotAFile).with_path(path.to_string_lossy()));
        }

        let media_type = detect_media_type(path).map_err(|e| FsError::io(path, e))?;
        let is_text = media_type.starts_with("text/") || media_type == EMPTY_MEDIA_TYPE;
        let is_image = media_type.starts_with("image/");

        let content = if is_text {
            let bytes = fs::read(path).map_err(|e| FsError::io(path, e))?;
            String::from_utf8(bytes)
                .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
        } else if is_image {
            let bytes = fs::read(path).map_err(|e| FsError::io(path, e))?;
            format!(
                "data:{};base64,{}",
                media_type,
                base64::engine::general_purpose::STANDARD.encode(bytes)
            )
        } else {
            tracing::debug!("不支持预览的文件类型: {:?}, type={}", path, media_type);
            return Err(FsError::new(FsErrorCode::UnsupportedContent)
                .with_path(path.to_string_lossy())
                .with_media_type(media_type));
        };

        Ok(FileContent {
            content,
            is_text,
            is_image,
            media_type,
        })
    }

    /// 覆盖已有文件的内容
    ///
    /// 先写入同目录下的临时文件再替换，写入失败时原内容保持不变
    pub fn write(&self, path: &Path, content: &str) -> FsResult<()> {
        if !path.is_file() {
            return Err(FsError::new(FsErrorCode::NotAFile).with_path(path.to_string_lossy()));
        }

        // 符号链接写到其指向的文件
        let target = dunce::canonicalize(path).map_err(|e| FsError::io(path, e))?;
        let temp = temp_sibling(&target);

        let written = fs::write(&temp, content)
            .and_then(|_| {
                let permissions = fs::metadata(&target)?.permissions();
                fs::set_permissions(&temp, permissions)
            })
            .and_then(|_| fs::rename(&temp, &target));

        if let Err(e) = written {
            let _ = fs::remove_file(&temp);
            tracing::error!("保存文件失败: {:?}, 错误: {}", target, e);
            return Err(FsError::new(FsErrorCode::IoFailure)
                .with_message("content_not_saved")
                .with_path(path.to_string_lossy()));
        }

        Ok(())
    }
}

/// 同目录下的临时文件路径
pub(super) fn temp_sibling(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp_name = format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple());
    match target.parent() {
        Some(parent) => parent.join(temp_name),
        None => PathBuf::from(temp_name),
    }
}

/// 识别文件的媒体类型
///
/// 优先按文件头魔数识别；无法识别时，文本内容按扩展名细分，
/// 扩展名不是文本/图片类型的一律视为 `text/plain`
pub fn detect_media_type(path: &Path) -> std::io::Result<String> {
    let mut header = Vec::with_capacity(SNIFF_LEN as usize);
    File::open(path)?.take(SNIFF_LEN).read_to_end(&mut header)?;

    if header.is_empty() {
        return Ok(EMPTY_MEDIA_TYPE.to_string());
    }

    if let Some(kind) = infer::get(&header) {
        return Ok(kind.mime_type().to_string());
    }

    let guessed = mime_guess::from_path(path).first();
    if looks_like_text(&header) {
        return Ok(match guessed {
            Some(mime) if matches!(mime.type_().as_str(), "text" | "image") => {
                mime.essence_str().to_string()
            }
            _ => "text/plain".to_string(),
        });
    }

    Ok(guessed
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string()))
}

/// 文件头不含 NUL 且是合法 UTF-8（允许末尾被截断的多字节字符）
fn looks_like_text(header: &[u8]) -> bool {
    if header.contains(&0) {
        return false;
    }
    match std::str::from_utf8(header) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    }
}
