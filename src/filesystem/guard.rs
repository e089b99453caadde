// 路径沙箱
//
// 把客户端传入的任意路径约束在沙箱根目录之内，防止路径穿越

use std::path::{Path, PathBuf};

use super::types::{FsError, FsErrorCode, FsResult};

/// 客户端路径的分隔符；Unix 上 `\` 是合法的文件名字符
#[cfg(windows)]
pub(super) const SEPARATORS: &[char] = &['/', '\\'];
#[cfg(not(windows))]
pub(super) const SEPARATORS: &[char] = &['/'];

/// 沙箱根目录（规范化后的绝对路径）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasePath {
    path: PathBuf,
}

impl BasePath {
    /// 规范化并校验根目录
    pub fn new(path: impl AsRef<Path>) -> FsResult<Self> {
        let raw = path.as_ref();
        let canonical = dunce::canonicalize(raw).map_err(|_| {
            FsError::new(FsErrorCode::NotFound).with_path(raw.to_string_lossy())
        })?;

        if !canonical.is_dir() {
            return Err(FsError::new(FsErrorCode::NotADirectory).with_path(raw.to_string_lossy()));
        }

        Ok(Self { path: canonical })
    }

    pub fn as_path(&self) -> &Path {
        &self.path
    }

    /// 根目录名称（根为 `/` 时返回 `/`）
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.to_string_lossy().to_string())
    }
}

/// 路径沙箱
#[derive(Debug, Clone)]
pub struct PathSandbox {
    base: BasePath,
}

impl PathSandbox {
    pub fn new(base: BasePath) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &BasePath {
        &self.base
    }

    /// 词法解析客户端路径
    ///
    /// 去掉已带上的根目录前缀、`..`、`.` 和重复分隔符，再拼回根目录。
    /// 结果总是以根目录开头，即使路径不存在。
    pub fn resolve(&self, raw: &str) -> PathBuf {
        let base = self.base.as_path();
        let base_str = base.to_string_lossy();
        let base_str = base_str.trim_end_matches(SEPARATORS);

        let relative = match raw.strip_prefix(base_str) {
            // 只在目录边界处剥离前缀：`/data2` 不属于 `/data`
            Some(rest) if base_str.is_empty() || rest.is_empty() || rest.starts_with(SEPARATORS) => {
                rest
            }
            _ => raw,
        };

        let mut resolved = base.to_path_buf();
        for segment in relative.split(SEPARATORS) {
            match segment {
                "" | "." | ".." => continue,
                s if s.contains('\0') => continue,
                s => resolved.push(s),
            }
        }
        resolved
    }

    /// 路径是否为根目录本身
    pub fn is_base(&self, path: &Path) -> bool {
        match dunce::canonicalize(path) {
            Ok(canonical) => canonical == self.base.as_path(),
            Err(_) => path == self.base.as_path(),
        }
    }

    /// 基于文件系统的包含检查（解析符号链接）
    ///
    /// 路径不存在时检查其父目录；父目录也无法规范化则视为不包含
    pub fn is_contained(&self, path: &Path) -> bool {
        match self.canonical_or_parent(path) {
            Some(canonical) => canonical.starts_with(self.base.as_path()),
            None => false,
        }
    }

    /// 破坏性操作前的检查：必须位于沙箱内
    pub fn ensure_contained(&self, path: &Path) -> FsResult<()> {
        if self.is_contained(path) {
            Ok(())
        } else {
            tracing::warn!("拒绝访问沙箱外路径: {:?}", path);
            Err(FsError::new(FsErrorCode::PathNotAllowed).with_path(path.to_string_lossy()))
        }
    }

    /// 删除/移动源路径的检查：位于沙箱内且不是根目录
    pub fn ensure_removable(&self, path: &Path) -> FsResult<()> {
        self.ensure_contained(path)?;
        if self.is_base(path) {
            tracing::warn!("拒绝对沙箱根目录执行破坏性操作: {:?}", path);
            return Err(FsError::new(FsErrorCode::RootProtected).with_path(path.to_string_lossy()));
        }
        Ok(())
    }

    /// 新建路径的检查
    ///
    /// 允许名称中带有尚不存在的中间目录：向上找到最近的已存在祖先，
    /// 该祖先必须位于沙箱内。`resolve` 已保证路径中没有 `..`。
    pub fn ensure_creatable(&self, path: &Path) -> FsResult<()> {
        let existing = path
            .ancestors()
            .find(|p| p.symlink_metadata().is_ok())
            .and_then(|p| dunce::canonicalize(p).ok());

        match existing {
            Some(canonical) if canonical.starts_with(self.base.as_path()) => Ok(()),
            _ => {
                tracing::warn!("拒绝在沙箱外创建: {:?}", path);
                Err(FsError::new(FsErrorCode::PathNotAllowed).with_path(path.to_string_lossy()))
            }
        }
    }

    fn canonical_or_parent(&self, path: &Path) -> Option<PathBuf> {
        if let Ok(canonical) = dunce::canonicalize(path) {
            return Some(canonical);
        }

        let file_name = path.file_name()?;
        let parent = dunce::canonicalize(path.parent()?).ok()?;
        Some(parent.join(file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs;
    use std::path::Component;
    use tempfile::TempDir;

    fn sandbox() -> (TempDir, PathSandbox) {
        let dir = TempDir::new().unwrap();
        let base = BasePath::new(dir.path()).unwrap();
        (dir, PathSandbox::new(base))
    }

    #[test]
    fn test_resolve_strips_traversal() {
        let (_dir, sandbox) = sandbox();
        let base = sandbox.base().as_path().to_path_buf();

        assert_eq!(sandbox.resolve("../../etc/passwd"), base.join("etc/passwd"));
        assert_eq!(sandbox.resolve("/etc//passwd"), base.join("etc/passwd"));
        assert_eq!(sandbox.resolve("a/./b/../c"), base.join("a/b/c"));
        assert_eq!(sandbox.resolve(""), base);
    }

    #[test]
    fn test_resolve_accepts_base_prefixed_input() {
        let (_dir, sandbox) = sandbox();
        let base = sandbox.base().as_path().to_path_buf();
        let prefixed = format!("{}/docs/readme.md", base.display());

        assert_eq!(sandbox.resolve(&prefixed), base.join("docs/readme.md"));
        assert_eq!(sandbox.resolve(&base.to_string_lossy()), base);
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_keeps_backslash_in_name() {
        let (_dir, sandbox) = sandbox();
        let base = sandbox.base().as_path().to_path_buf();
        fs::write(base.join("a\\b.txt"), "x").unwrap();

        let resolved = sandbox.resolve("a\\b.txt");
        assert_eq!(resolved, base.join("a\\b.txt"));
        assert!(resolved.is_file());
        assert_eq!(sandbox.resolve("docs/..\\x"), base.join("docs").join("..\\x"));
    }

    #[test]
    fn test_resolve_prefix_is_boundary_aware() {
        let (_dir, sandbox) = sandbox();
        let base = sandbox.base().as_path().to_path_buf();
        let sibling = format!("{}2/x", base.display());

        let resolved = sandbox.resolve(&sibling);
        assert!(resolved.starts_with(&base));
        assert_ne!(resolved, base.join("x"));
    }

    #[test]
    fn test_is_contained_rejects_sibling_with_common_prefix() {
        let parent = TempDir::new().unwrap();
        let base_dir = parent.path().join("data");
        let sibling = parent.path().join("data2");
        fs::create_dir(&base_dir).unwrap();
        fs::create_dir(&sibling).unwrap();
        fs::write(sibling.join("f.txt"), "x").unwrap();

        let sandbox = PathSandbox::new(BasePath::new(&base_dir).unwrap());
        assert!(!sandbox.is_contained(&sibling.join("f.txt")));
        assert!(!sandbox.is_contained(&sibling));
    }

    #[test]
    fn test_is_contained_existing_and_new_paths() {
        let (_dir, sandbox) = sandbox();
        let base = sandbox.base().as_path().to_path_buf();
        fs::create_dir(base.join("sub")).unwrap();

        assert!(sandbox.is_contained(&base.join("sub")));
        // 不存在的文件：检查父目录
        assert!(sandbox.is_contained(&base.join("sub/new.txt")));
        // 父目录也不存在
        assert!(!sandbox.is_contained(&base.join("missing/new.txt")));
        assert!(!sandbox.is_contained(Path::new("/")));
    }

    #[cfg(unix)]
    #[test]
    fn test_is_contained_follows_symlinks() {
        let outside = TempDir::new().unwrap();
        let (_dir, sandbox) = sandbox();
        let base = sandbox.base().as_path().to_path_buf();
        std::os::unix::fs::symlink(outside.path(), base.join("escape")).unwrap();

        let resolved = sandbox.resolve("escape");
        assert!(resolved.starts_with(&base));
        assert!(!sandbox.is_contained(&resolved));
        assert!(!sandbox.is_contained(&resolved.join("new.txt")));
    }

    #[test]
    fn test_ensure_removable_rejects_base() {
        let (_dir, sandbox) = sandbox();
        let base = sandbox.base().as_path().to_path_buf();
        fs::write(base.join("a.txt"), "a").unwrap();

        let err = sandbox.ensure_removable(&base).unwrap_err();
        assert_eq!(err.code, FsErrorCode::RootProtected);
        let err = sandbox.ensure_removable(&sandbox.resolve("/")).unwrap_err();
        assert_eq!(err.code, FsErrorCode::RootProtected);
        assert!(sandbox.ensure_removable(&base.join("a.txt")).is_ok());
    }

    #[test]
    fn test_ensure_creatable_nested() {
        let (_dir, sandbox) = sandbox();
        let base = sandbox.base().as_path().to_path_buf();

        assert!(sandbox.ensure_creatable(&base.join("x/y/z.txt")).is_ok());
        let err = sandbox
            .ensure_creatable(Path::new("/definitely-missing-root/x"))
            .unwrap_err();
        assert_eq!(err.code, FsErrorCode::PathNotAllowed);
    }

    #[test]
    fn test_base_path_missing() {
        let err = BasePath::new("/definitely/not/here/file-manager").unwrap_err();
        assert_eq!(err.code, FsErrorCode::NotFound);
    }

    proptest! {
        #[test]
        fn prop_resolve_always_inside_base(raw in "[a-z./\\\\]{0,40}") {
            let (_dir, sandbox) = sandbox();
            let resolved = sandbox.resolve(&raw);
            prop_assert!(resolved.starts_with(sandbox.base().as_path()));
            prop_assert!(!resolved
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::CurDir)));
        }

        #[test]
        fn prop_resolve_is_idempotent(raw in "(\\.\\./|/|[a-z]{1,5}/|\\./){0,8}[a-z]{0,6}") {
            let (_dir, sandbox) = sandbox();
            let once = sandbox.resolve(&raw);
            let twice = sandbox.resolve(&once.to_string_lossy());
            prop_assert_eq!(once, twice);
        }
    }
}
