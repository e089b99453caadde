// 文件系统服务
//
// 对外提供文件管理的全部操作，每个操作都返回统一的响应信封，
// 底层错误在此转换为失败结果，不向调用方抛出

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::{AppConfig, ArchiveConfig};

use super::archive::ArchiveService;
use super::catalog::{EntryCatalog, Filters};
use super::content::ContentAccessor;
use super::guard::{BasePath, PathSandbox, SEPARATORS};
use super::tree::TreeBuilder;
use super::types::*;

/// 新建文件/目录的权限
#[cfg(unix)]
const CREATED_MODE: u32 = 0o755;

/// 文件系统服务
#[derive(Debug, Clone)]
pub struct FilesystemService {
    sandbox: PathSandbox,
    catalog: EntryCatalog,
    tree: TreeBuilder,
    content: ContentAccessor,
    archive: ArchiveService,
}

impl FilesystemService {
    pub fn new(base: BasePath, filters: Filters, archive: ArchiveConfig) -> Self {
        let sandbox = PathSandbox::new(base);
        let catalog = EntryCatalog::new(filters);
        Self {
            tree: TreeBuilder::new(sandbox.clone(), catalog.clone()),
            archive: ArchiveService::new(sandbox.clone(), archive),
            content: ContentAccessor::new(),
            catalog,
            sandbox,
        }
    }

    /// 根据配置创建服务（根目录必须存在）
    pub fn from_config(config: &AppConfig) -> FsResult<Self> {
        let base = BasePath::new(&config.filesystem.base_path)?;
        let filters = Filters::from_config(&base, &config.filesystem);
        tracing::info!("文件管理根目录: {:?}", base.as_path());
        Ok(Self::new(base, filters, config.archive.clone()))
    }

    pub fn sandbox(&self) -> &PathSandbox {
        &self.sandbox
    }

    // ========== 查询 ==========

    /// 根目录树，按 open 集合展开
    pub fn list_base(&self, open: &[String]) -> OperationResult<TreeData> {
        respond(
            self.tree
                .base_tree(open)
                .map(|tree| OperationResult::success("operation_success", TreeData { tree })),
        )
    }

    /// 目录的直接子条目
    pub fn list_children(&self, path: &str) -> OperationResult<ChildrenData> {
        respond((|| -> FsResult<_> {
            let dir = self.sandbox.resolve(path);
            self.sandbox.ensure_contained(&dir)?;
            let entries = self.catalog.list(&dir)?;
            Ok(OperationResult::success("operation_success", ChildrenData { entries }))
        })())
    }

    /// 读取文件内容
    pub fn read_file(&self, path: &str) -> OperationResult<FileContent> {
        respond((|| -> FsResult<_> {
            let file = self.sandbox.resolve(path);
            self.sandbox.ensure_contained(&file)?;
            let content = self.content.read(&file)?;
            Ok(OperationResult::success("operation_success", content))
        })())
    }

    // ========== 修改 ==========

    /// 保存已有文件的内容
    pub fn write_file(&self, path: &str, content: &str) -> OperationResult<()> {
        respond((|| -> FsResult<_> {
            let file = self.sandbox.resolve(path);
            self.sandbox.ensure_contained(&file)?;
            self.content.write(&file, content)?;
            tracing::info!("保存文件: {:?}", file);
            Ok(OperationResult::success("content_saved", ()).with_path(file.to_string_lossy()))
        })())
    }

    /// 新建空文件；名称中可以带子目录
    pub fn create_file(&self, parent: &str, name: &str, open: &[String]) -> OperationResult<CreatedFileData> {
        respond((|| -> FsResult<_> {
            let target = self.creation_target(parent, name, true)?;

            if let Some(dir) = target.parent() {
                fs::create_dir_all(dir).map_err(|e| not_created(&target, e))?;
            }
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&target)
                .map_err(|e| not_created(&target, e))?;
            set_created_mode(&target).map_err(|e| not_created(&target, e))?;

            tracing::info!("新建文件: {:?}", target);
            let path = target.to_string_lossy().to_string();
            Ok(OperationResult::success(
                "created",
                CreatedFileData {
                    path,
                    items: self.refreshed_items(open),
                },
            ))
        })())
    }

    /// 新建文件夹（含中间目录）
    pub fn create_folder(&self, parent: &str, name: &str, open: &[String]) -> OperationResult<ItemsData> {
        respond((|| -> FsResult<_> {
            let target = self.creation_target(parent, name, true)?;

            fs::create_dir_all(&target).map_err(|e| not_created(&target, e))?;
            set_created_mode(&target).map_err(|e| not_created(&target, e))?;

            tracing::info!("新建文件夹: {:?}", target);
            Ok(self.with_items("created", open).with_path(target.to_string_lossy()))
        })())
    }

    /// 复制文件或目录到 `to/name`
    pub fn copy(&self, from: &str, to: &str, name: &str, open: &[String]) -> OperationResult<ItemsData> {
        respond((|| -> FsResult<_> {
            let source = self.sandbox.resolve(from);
            self.sandbox.ensure_contained(&source)?;
            let dest = self.transfer_target(&source, to, name)?;

            let copied = if source.is_dir() {
                copy_dir_recursive(&source, &dest)
            } else {
                fs::copy(&source, &dest).map(|_| ())
            };
            copied.map_err(|e| {
                tracing::error!("复制失败: {:?} -> {:?}, 错误: {}", source, dest, e);
                FsError::new(FsErrorCode::IoFailure)
                    .with_message("not_copied")
                    .with_path(source.to_string_lossy())
            })?;

            tracing::info!("复制: {:?} -> {:?}", source, dest);
            Ok(self.with_items("copied", open).with_path(dest.to_string_lossy()))
        })())
    }

    /// 移动（剪切）文件或目录到 `to/name`
    pub fn move_item(&self, from: &str, to: &str, name: &str, open: &[String]) -> OperationResult<ItemsData> {
        respond((|| -> FsResult<_> {
            let source = self.sandbox.resolve(from);
            self.sandbox.ensure_removable(&source)?;
            let dest = self.transfer_target(&source, to, name)?;

            fs::rename(&source, &dest).map_err(|e| {
                tracing::error!("移动失败: {:?} -> {:?}, 错误: {}", source, dest, e);
                FsError::io(&source, e).with_message("operation_failed")
            })?;

            tracing::info!("移动: {:?} -> {:?}", source, dest);
            Ok(self.with_items("operation_success", open).with_path(dest.to_string_lossy()))
        })())
    }

    /// 重命名；`new_path` 为完整的新路径
    pub fn rename(&self, path: &str, new_path: &str, open: &[String]) -> OperationResult<ItemsData> {
        respond((|| -> FsResult<_> {
            let source = self.sandbox.resolve(path);
            self.sandbox.ensure_removable(&source)?;
            if source.symlink_metadata().is_err() {
                return Err(not_found(&source));
            }

            let dest = self.sandbox.resolve(new_path);
            self.sandbox.ensure_contained(&dest)?;
            if dest.symlink_metadata().is_ok() {
                return Err(already_exists(&dest));
            }
            if source.is_dir() {
                ensure_outside(&source, &dest)?;
            }

            fs::rename(&source, &dest).map_err(|e| {
                tracing::error!("重命名失败: {:?} -> {:?}, 错误: {}", source, dest, e);
                FsError::io(&source, e).with_message("rename_failed")
            })?;

            tracing::info!("重命名: {:?} -> {:?}", source, dest);
            Ok(self.with_items("rename_success", open).with_path(dest.to_string_lossy()))
        })())
    }

    /// 删除文件或目录树（根目录不可删除）
    pub fn delete(&self, path: &str, open: &[String]) -> OperationResult<ItemsData> {
        respond((|| -> FsResult<_> {
            let target = self.sandbox.resolve(path);
            self.sandbox.ensure_removable(&target)?;

            let metadata = target.symlink_metadata().map_err(|_| not_found(&target))?;
            let removed = if metadata.is_dir() {
                fs::remove_dir_all(&target)
            } else {
                fs::remove_file(&target)
            };
            removed.map_err(|e| {
                tracing::error!("删除失败: {:?}, 错误: {}", target, e);
                FsError::io(&target, e).with_message("delete_failed")
            })?;

            tracing::info!("删除: {:?}", target);
            Ok(self.with_items("delete_success", open).with_path(target.to_string_lossy()))
        })())
    }

    /// 压缩文件或目录；`name` 为压缩包路径
    pub fn compress(&self, path: &str, name: &str, open: &[String]) -> OperationResult<ItemsData> {
        respond((|| -> FsResult<_> {
            let source = self.sandbox.resolve(path);
            self.sandbox.ensure_contained(&source)?;
            let dest = self.sandbox.resolve(name);
            self.sandbox.ensure_contained(&dest)?;
            if dest.is_dir() {
                return Err(already_exists(&dest));
            }

            let job = self.archive.compress(&source, &dest)?;
            Ok(self.with_items(job.message(), open).with_path(dest.to_string_lossy()))
        })())
    }

    /// 解压到目标目录
    pub fn extract(&self, path: &str, target: &str, open: &[String]) -> OperationResult<ItemsData> {
        respond((|| -> FsResult<_> {
            let archive = self.sandbox.resolve(path);
            self.sandbox.ensure_contained(&archive)?;
            let target = self.sandbox.resolve(target);
            self.sandbox.ensure_creatable(&target)?;

            let job = self.archive.extract(&archive, &target)?;
            Ok(self.with_items(job.message(), open).with_path(target.to_string_lossy()))
        })())
    }

    /// 上传文件到目标目录，同名文件会被覆盖
    pub fn upload<R: Read>(
        &self,
        target: &str,
        original_name: &str,
        mut reader: R,
        open: &[String],
    ) -> OperationResult<ItemsData> {
        respond((|| -> FsResult<_> {
            let dir = self.sandbox.resolve(target);
            self.sandbox.ensure_contained(&dir)?;
            if !dir.is_dir() {
                return Err(FsError::new(FsErrorCode::NotADirectory)
                    .with_message("upload_failed")
                    .with_path(dir.to_string_lossy()));
            }

            // 只取客户端文件名的最后一段
            let base_name = original_name
                .rsplit(['/', '\\'])
                .next()
                .unwrap_or_default();
            let name = validate_name(base_name, false)
                .map_err(|e| e.with_message("file_error_loading"))?;
            let dest = dir.join(name);
            if dest.is_dir() {
                return Err(already_exists(&dest));
            }

            let temp = dir.join(format!(".upload.{}.tmp", uuid::Uuid::new_v4().simple()));
            let stored = File::create(&temp)
                .and_then(|mut file| io::copy(&mut reader, &mut file))
                .and_then(|_| fs::rename(&temp, &dest));
            if let Err(e) = stored {
                let _ = fs::remove_file(&temp);
                tracing::error!("上传失败: {:?}, 错误: {}", dest, e);
                return Err(FsError::io(&dest, e).with_message("upload_failed"));
            }

            tracing::info!("上传文件: {:?}", dest);
            Ok(self.with_items("upload_success", open).with_path(dest.to_string_lossy()))
        })())
    }

    // ========== 内部辅助 ==========

    /// 变更成功后按 open 集合重建目录树；失败时返回空列表
    fn refreshed_items(&self, open: &[String]) -> Vec<Entry> {
        self.tree.base_tree(open).unwrap_or_else(|e| {
            tracing::warn!("刷新目录树失败: {}", e);
            Vec::new()
        })
    }

    fn with_items(&self, message: &str, open: &[String]) -> OperationResult<ItemsData> {
        OperationResult::success(
            message,
            ItemsData {
                items: self.refreshed_items(open),
            },
        )
    }

    fn creation_target(&self, parent: &str, name: &str, nested: bool) -> FsResult<PathBuf> {
        let parent = self.sandbox.resolve(parent);
        let target = parent.join(validate_name(name, nested)?);
        self.sandbox.ensure_creatable(&target)?;
        if target.symlink_metadata().is_ok() {
            return Err(already_exists(&target));
        }
        Ok(target)
    }

    /// 复制/移动的目标路径：`to` 目录下的 `name`，`name` 为空时沿用源文件名
    fn transfer_target(&self, source: &Path, to: &str, name: &str) -> FsResult<PathBuf> {
        if source.symlink_metadata().is_err() {
            return Err(not_found(source));
        }

        let dir = self.sandbox.resolve(to);
        self.sandbox.ensure_contained(&dir)?;
        if !dir.is_dir() {
            return Err(FsError::new(FsErrorCode::NotADirectory).with_path(dir.to_string_lossy()));
        }

        let name = if name.trim().is_empty() {
            source
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        } else {
            name.to_string()
        };
        let dest = dir.join(validate_name(&name, false)?);

        if dest.symlink_metadata().is_ok() {
            return Err(already_exists(&dest));
        }
        if source.is_dir() {
            ensure_outside(source, &dest)?;
        }
        Ok(dest)
    }
}

fn respond<T>(result: FsResult<OperationResult<T>>) -> OperationResult<T> {
    result.unwrap_or_else(|e| {
        if e.code.is_sandbox_violation() {
            tracing::warn!("操作被拒绝: {}", e);
        } else {
            tracing::debug!("操作失败: {}", e);
        }
        OperationResult::from(e)
    })
}

/// 校验名称：非空，不含控制字符，各段不是 `.` / `..`
///
/// `nested` 为 true 时允许用分隔符表示子目录
fn validate_name(raw: &str, nested: bool) -> FsResult<PathBuf> {
    let invalid = || FsError::new(FsErrorCode::InvalidName).with_path(raw);

    let segments: Vec<&str> = raw
        .trim_matches(SEPARATORS)
        .split(SEPARATORS)
        .filter(|s| !s.is_empty())
        .collect();

    if segments.is_empty() || (!nested && segments.len() > 1) {
        return Err(invalid());
    }
    if segments
        .iter()
        .any(|s| *s == "." || *s == ".." || s.chars().any(char::is_control))
    {
        return Err(invalid());
    }

    Ok(segments.iter().collect())
}

/// 目录不能被复制/移动到自身内部
fn ensure_outside(source: &Path, dest: &Path) -> FsResult<()> {
    let source_canonical = dunce::canonicalize(source).map_err(|e| FsError::io(source, e))?;
    let dest_canonical = match (dest.parent(), dest.file_name()) {
        (Some(parent), Some(name)) => dunce::canonicalize(parent)
            .map(|p| p.join(name))
            .map_err(|e| FsError::io(parent, e))?,
        _ => dest.to_path_buf(),
    };

    if dest_canonical.starts_with(&source_canonical) {
        tracing::warn!("目标位于源目录内部: {:?} -> {:?}", source, dest);
        return Err(FsError::new(FsErrorCode::DestinationInsideSource).with_path(dest.to_string_lossy()));
    }
    Ok(())
}

/// 递归复制目录，不跟随符号链接
fn copy_dir_recursive(source: &Path, dest: &Path) -> io::Result<()> {
    for entry in WalkDir::new(source).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let target = dest.join(relative);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
        } else {
            tracing::debug!("复制时跳过符号链接: {:?}", entry.path());
        }
    }
    Ok(())
}

#[cfg(unix)]
fn set_created_mode(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(CREATED_MODE))
}

#[cfg(not(unix))]
fn set_created_mode(_path: &Path) -> io::Result<()> {
    Ok(())
}

fn not_found(path: &Path) -> FsError {
    FsError::new(FsErrorCode::NotFound).with_path(path.to_string_lossy())
}

fn already_exists(path: &Path) -> FsError {
    FsError::new(FsErrorCode::AlreadyExists).with_path(path.to_string_lossy())
}

fn not_created(path: &Path, err: io::Error) -> FsError {
    tracing::error!("创建失败: {:?}, 错误: {}", path, err);
    FsError::io(path, err).with_message("not_created")
}
