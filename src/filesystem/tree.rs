// 目录树构建
//
// 只展开调用方标记为 open 的目录，其余目录保持折叠

use std::path::Path;

use chrono::{DateTime, Utc};

use super::catalog::EntryCatalog;
use super::guard::PathSandbox;
use super::types::*;

/// 目录树构建器
#[derive(Debug, Clone)]
pub struct TreeBuilder {
    sandbox: PathSandbox,
    catalog: EntryCatalog,
}

impl TreeBuilder {
    pub fn new(sandbox: PathSandbox, catalog: EntryCatalog) -> Self {
        Self { sandbox, catalog }
    }

    /// 把客户端传来的 open 路径解析为沙箱内路径
    pub fn open_set<S: AsRef<str>>(&self, raw: &[S]) -> OpenSet {
        raw.iter()
            .map(|p| self.sandbox.resolve(p.as_ref()))
            .collect()
    }

    /// 展开根条目
    ///
    /// 子目录命中 open 集合时先从集合中移除再递归，保证同一路径在一次调用中
    /// 最多展开一次；递归深度受 open 集合大小约束
    pub fn build_tree(&self, mut root: Entry, open: &mut OpenSet) -> FsResult<Entry> {
        let children = self.catalog.list(Path::new(&root.path))?;
        root.attach_children(self.expand_children(children, open));
        Ok(root)
    }

    fn expand_children(&self, children: Vec<Entry>, open: &mut OpenSet) -> Vec<Entry> {
        children
            .into_iter()
            .map(|child| {
                if !child.is_dir() || !open.take(Path::new(&child.path)) {
                    return child;
                }

                let path = child.path.clone();
                match self.catalog.list(Path::new(&path)) {
                    Ok(grandchildren) => {
                        let mut child = child;
                        child.attach_children(self.expand_children(grandchildren, open));
                        child
                    }
                    Err(e) => {
                        // 展开失败时保持折叠，不影响其余部分
                        tracing::warn!("展开目录失败: {}, 错误: {}", path, e);
                        child
                    }
                }
            })
            .collect()
    }

    /// 以沙箱根目录为根构建目录树，返回单元素列表
    pub fn base_path_items(&self, open: &mut OpenSet) -> FsResult<Vec<Entry>> {
        let base = self.sandbox.base();
        let last_modified = std::fs::metadata(base.as_path())
            .and_then(|m| m.modified())
            .map(|t| DateTime::<Utc>::from(t).timestamp())
            .unwrap_or_default();

        let root = Entry {
            path: base.as_path().to_string_lossy().to_string(),
            name: base.name(),
            size: 0,
            last_modified,
            is_directory: true,
            kind: EntryKind::Directory {
                children: Vec::new(),
                expanded: false,
            },
        };

        Ok(vec![self.build_tree(root, open)?])
    }

    /// 按原始 open 列表构建根目录树
    pub fn base_tree<S: AsRef<str>>(&self, open: &[S]) -> FsResult<Vec<Entry>> {
        let mut open = self.open_set(open);
        self.base_path_items(&mut open)
    }
}
