// 目录条目列表
//
// 列出目录的直接子条目，应用 only / hidden 过滤并排序

use std::cmp::Ordering;
use std::fs::{self, DirEntry};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};

use crate::config::FilesystemConfig;

use super::guard::{BasePath, SEPARATORS};
use super::types::*;

/// 允许列表中表示"不限制"的通配符
const ONLY_WILDCARD: &str = "*";

/// 列表过滤配置
///
/// 启动时构建一次，列表过程中只读
#[derive(Debug, Clone, Default)]
pub struct Filters {
    /// 始终隐藏的路径
    hidden: Vec<PathBuf>,
    /// 允许列表；None 表示不限制
    only: Option<Vec<PathBuf>>,
}

impl Filters {
    /// 从配置构建：相对路径以根目录为基准，去掉末尾分隔符
    pub fn from_config(base: &BasePath, config: &FilesystemConfig) -> Self {
        let normalize = |raw: &String| -> PathBuf {
            let trimmed = raw.trim_end_matches(SEPARATORS);
            let path = Path::new(trimmed);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                base.as_path().join(path)
            }
        };

        let hidden = config.hidden.iter().map(normalize).collect();
        let only = if config.only.is_empty() || config.only.iter().any(|p| p == ONLY_WILDCARD) {
            None
        } else {
            Some(config.only.iter().map(normalize).collect())
        };

        Self { hidden, only }
    }

    /// 目录本身是否位于某个允许路径之下（此时其子条目不再过滤）
    fn allows_whole_directory(&self, dir: &Path) -> bool {
        match &self.only {
            None => true,
            Some(only) => only.iter().any(|allowed| dir.starts_with(allowed)),
        }
    }
}

/// 目录条目列表服务
#[derive(Debug, Clone)]
pub struct EntryCatalog {
    filters: Filters,
}

impl EntryCatalog {
    pub fn new(filters: Filters) -> Self {
        Self { filters }
    }

    /// 列出目录的直接子条目
    ///
    /// 包含点文件；先应用 only，再应用 hidden；目录在前，各组内按名称
    /// （区分大小写）升序
    pub fn list(&self, dir: &Path) -> FsResult<Vec<Entry>> {
        if !dir.is_dir() {
            return Err(FsError::new(FsErrorCode::NotADirectory).with_path(dir.to_string_lossy()));
        }

        let read_dir = fs::read_dir(dir).map_err(|e| {
            tracing::error!("读取目录失败: {:?}, 错误: {}", dir, e);
            FsError::io(dir, e)
        })?;

        let entries: Vec<Entry> = read_dir
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| match to_entry(&entry) {
                Ok(item) => Some(item),
                Err(e) => {
                    tracing::debug!("跳过无法读取的条目: {:?}, 错误: {}", entry.path(), e);
                    None
                }
            })
            .collect();

        let mut entries = self.apply_only(dir, entries);
        entries = self.apply_hidden(entries);
        sort_entries(&mut entries);

        Ok(entries)
    }

    /// only 过滤：每个允许项最多匹配一次
    fn apply_only(&self, dir: &Path, entries: Vec<Entry>) -> Vec<Entry> {
        if self.filters.allows_whole_directory(dir) {
            return entries;
        }
        let mut remaining = self.filters.only.clone().unwrap_or_default();

        entries
            .into_iter()
            .filter(|entry| consume(&mut remaining, Path::new(&entry.path)))
            .collect()
    }

    /// hidden 过滤：每个隐藏项最多匹配一次
    fn apply_hidden(&self, entries: Vec<Entry>) -> Vec<Entry> {
        let mut remaining = self.filters.hidden.clone();

        entries
            .into_iter()
            .filter(|entry| !consume(&mut remaining, Path::new(&entry.path)))
            .collect()
    }
}

/// 若列表中有该路径，移除一个并返回 true
fn consume(list: &mut Vec<PathBuf>, path: &Path) -> bool {
    match list.iter().position(|p| p == path) {
        Some(index) => {
            list.remove(index);
            true
        }
        None => false,
    }
}

/// 目录在前，组内按名称升序（稳定排序）
fn sort_entries(entries: &mut [Entry]) {
    entries.sort_by(|a, b| match (a.is_directory, b.is_directory) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.name.cmp(&b.name),
    });
}

fn to_entry(entry: &DirEntry) -> std::io::Result<Entry> {
    let path = entry.path();
    // 跟随符号链接，与目录展开时的行为保持一致
    let metadata = fs::metadata(&path)?;
    let name = entry.file_name().to_string_lossy().to_string();
    Ok(build_entry(&path, name, &metadata))
}

fn build_entry(path: &Path, name: String, metadata: &fs::Metadata) -> Entry {
    let last_modified = metadata
        .modified()
        .map(system_time_to_unix)
        .unwrap_or_default();

    if metadata.is_dir() {
        Entry {
            path: path.to_string_lossy().to_string(),
            name,
            size: 0,
            last_modified,
            is_directory: true,
            kind: EntryKind::Directory {
                children: Vec::new(),
                expanded: false,
            },
        }
    } else {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Entry {
            path: path.to_string_lossy().to_string(),
            name,
            size: metadata.len(),
            last_modified,
            is_directory: false,
            kind: EntryKind::File {
                extension,
                mime_type,
                icon: get_icon_for_extension(path),
            },
        }
    }
}

fn system_time_to_unix(time: SystemTime) -> i64 {
    let datetime: DateTime<Utc> = time.into();
    datetime.timestamp()
}
