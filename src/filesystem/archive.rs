// ZIP 压缩/解压服务
//
// 文件内容以流的方式写入/读出压缩包，不在内存中整体缓冲

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::config::ArchiveConfig;

use super::content::temp_sibling;
use super::guard::PathSandbox;
use super::types::{FsError, FsErrorCode, FsResult};

/// 超过此大小的文件需要 ZIP64
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

/// 压缩/解压任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Compress,
    Extract,
}

/// 一次压缩/解压的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveJob {
    pub kind: ArchiveKind,
    pub source: PathBuf,
    pub destination: PathBuf,
    /// 写入的文件数
    pub files: usize,
    /// 写入的目录数
    pub directories: usize,
    /// 未压缩的字节数
    pub bytes: u64,
}

impl ArchiveJob {
    fn new(kind: ArchiveKind, source: &Path, destination: &Path) -> Self {
        Self {
            kind,
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            files: 0,
            directories: 0,
            bytes: 0,
        }
    }

    /// 成功时的消息键
    pub fn message(&self) -> &'static str {
        match self.kind {
            ArchiveKind::Compress => "compressed_success",
            ArchiveKind::Extract => "unzip_success",
        }
    }
}

/// ZIP 压缩/解压服务
#[derive(Debug, Clone)]
pub struct ArchiveService {
    sandbox: PathSandbox,
    config: ArchiveConfig,
}

impl ArchiveService {
    pub fn new(sandbox: PathSandbox, config: ArchiveConfig) -> Self {
        Self { sandbox, config }
    }

    fn file_options(&self, large: bool) -> FileOptions {
        FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(self.config.compression_level)
            .large_file(large)
    }

    /// 压缩文件或目录
    ///
    /// 单个文件以文件名存放在压缩包根部；目录按先序遍历，子条目相对于
    /// 目录内部存放，每个目录写入显式的目录条目。目标已存在时追加。
    /// 先写入同目录下的临时文件，成功后再替换目标，失败时目标保持不变。
    pub fn compress(&self, source: &Path, destination: &Path) -> FsResult<ArchiveJob> {
        let source_meta = fs::metadata(source).map_err(|_| {
            FsError::new(FsErrorCode::NotFound)
                .with_message("file_not_found")
                .with_path(source.to_string_lossy())
        })?;
        let source = dunce::canonicalize(source).map_err(|e| FsError::io(source, e))?;
        let target = canonical_target(destination);

        // 压缩包不能把自己压缩进去
        if source == target {
            tracing::warn!("拒绝将压缩包压缩进自身: {:?}", destination);
            return Err(FsError::new(FsErrorCode::ArchiveFailure)
                .with_message("compressed_failed")
                .with_path(destination.to_string_lossy()));
        }

        let staging = temp_sibling(&target);
        let job = match self.write_archive(&source, source_meta.is_dir(), &target, &staging) {
            Ok(job) => job,
            Err(e) => {
                let _ = fs::remove_file(&staging);
                tracing::error!("压缩失败: {:?} -> {:?}, 错误: {}", source, destination, e);
                return Err(e);
            }
        };

        fs::rename(&staging, &target).map_err(|e| {
            let _ = fs::remove_file(&staging);
            tracing::error!("替换压缩包失败: {:?}, 错误: {}", destination, e);
            FsError::new(FsErrorCode::ArchiveFailure)
                .with_message("compressed_failed")
                .with_path(destination.to_string_lossy())
        })?;

        tracing::info!(
            "压缩完成: {:?} -> {:?}, 文件={}, 目录={}, 大小={}",
            source,
            destination,
            job.files,
            job.directories,
            job.bytes
        );
        Ok(ArchiveJob {
            destination: destination.to_path_buf(),
            ..job
        })
    }

    /// 把源写入临时文件 `staging`，写入器在返回前关闭
    fn write_archive(
        &self,
        source: &Path,
        is_dir: bool,
        target: &Path,
        staging: &Path,
    ) -> FsResult<ArchiveJob> {
        let mut zip = self.open_writer(target, staging)?;
        let mut job = ArchiveJob::new(ArchiveKind::Compress, source, target);

        if is_dir {
            self.add_directory(&mut zip, source, &[target, staging], &mut job)?;
        } else {
            let name = source
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            self.add_file(&mut zip, source, &name, &mut job)?;
        }

        zip.finish().map_err(|e| {
            tracing::error!("写入压缩包失败: {:?}, 错误: {}", target, e);
            FsError::new(FsErrorCode::ArchiveFailure)
                .with_message("compressed_failed")
                .with_path(target.to_string_lossy())
        })?;
        Ok(job)
    }

    /// 打开临时文件上的写入器；目标已存在时先复制再追加
    fn open_writer(&self, target: &Path, staging: &Path) -> FsResult<ZipWriter<File>> {
        let archive_not_open = |e: String| {
            tracing::error!("无法打开压缩包: {:?}, 错误: {}", target, e);
            FsError::new(FsErrorCode::ArchiveFailure)
                .with_message("archive_not_open")
                .with_path(target.to_string_lossy())
        };

        if target.exists() {
            fs::copy(target, staging).map_err(|e| archive_not_open(e.to_string()))?;
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(staging)
                .map_err(|e| archive_not_open(e.to_string()))?;
            ZipWriter::new_append(file).map_err(|e| archive_not_open(e.to_string()))
        } else {
            let file = File::create(staging).map_err(|e| archive_not_open(e.to_string()))?;
            Ok(ZipWriter::new(file))
        }
    }

    /// `skip` 中的路径（目标压缩包及其临时文件）不写入
    fn add_directory(
        &self,
        zip: &mut ZipWriter<File>,
        source: &Path,
        skip: &[&Path],
        job: &mut ArchiveJob,
    ) -> FsResult<()> {
        for entry in WalkDir::new(source)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| {
                FsError::new(FsErrorCode::IoFailure)
                    .with_message(e.to_string())
                    .with_path(source.to_string_lossy())
            })?;
            let path = entry.path();

            if skip.iter().any(|s| *s == path) {
                continue;
            }

            let Some(name) = archive_name(source, path) else {
                continue;
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                zip.add_directory(name, self.file_options(false))
                    .map_err(|e| archive_write_failed(path, e))?;
                job.directories += 1;
            } else if file_type.is_file() {
                self.add_file(zip, path, &name, job)?;
            } else {
                tracing::debug!("跳过非常规文件: {:?}", path);
            }
        }
        Ok(())
    }

    fn add_file(
        &self,
        zip: &mut ZipWriter<File>,
        path: &Path,
        name: &str,
        job: &mut ArchiveJob,
    ) -> FsResult<()> {
        let mut file = File::open(path).map_err(|e| FsError::io(path, e))?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);

        zip.start_file(name, self.file_options(size >= ZIP64_THRESHOLD))
            .map_err(|e| archive_write_failed(path, e))?;
        let copied = io::copy(&mut file, zip).map_err(|e| FsError::io(path, e))?;

        job.files += 1;
        job.bytes += copied;
        Ok(())
    }

    /// 解压到目标目录
    ///
    /// 打开失败、条目路径越界或总大小超限时不做任何修改
    pub fn extract(&self, archive_path: &Path, target: &Path) -> FsResult<ArchiveJob> {
        let unzip_failed = || {
            FsError::new(FsErrorCode::ArchiveFailure)
                .with_message("unzip_failed")
                .with_path(archive_path.to_string_lossy())
        };

        let file = File::open(archive_path).map_err(|e| {
            tracing::warn!("无法打开压缩包: {:?}, 错误: {}", archive_path, e);
            unzip_failed()
        })?;
        let mut archive = ZipArchive::new(file).map_err(|e| {
            tracing::warn!("无效的压缩包: {:?}, 错误: {}", archive_path, e);
            unzip_failed()
        })?;

        let entries = self.plan_extraction(&mut archive).map_err(|reason| {
            tracing::warn!("拒绝解压: {:?}, 原因: {}", archive_path, reason);
            unzip_failed()
        })?;

        // 目标目录中已有的符号链接可能指向沙箱外，写入前逐条检查
        for (_, relative) in &entries {
            self.sandbox.ensure_creatable(&target.join(relative))?;
        }

        fs::create_dir_all(target).map_err(|e| FsError::io(target, e))?;

        let mut job = ArchiveJob::new(ArchiveKind::Extract, archive_path, target);
        for (index, relative) in entries {
            let out_path = target.join(&relative);
            let mut entry = archive.by_index(index).map_err(|e| {
                tracing::error!("读取压缩包条目失败: {:?}, 错误: {}", archive_path, e);
                unzip_failed()
            })?;

            self.sandbox.ensure_creatable(&out_path)?;

            if entry.is_dir() {
                fs::create_dir_all(&out_path).map_err(|e| FsError::io(&out_path, e))?;
                job.directories += 1;
                continue;
            }

            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent).map_err(|e| FsError::io(parent, e))?;
            }

            let mut out = File::create(&out_path).map_err(|e| FsError::io(&out_path, e))?;
            job.bytes += io::copy(&mut entry, &mut out).map_err(|e| FsError::io(&out_path, e))?;
            job.files += 1;
        }

        tracing::info!(
            "解压完成: {:?} -> {:?}, 文件={}, 目录={}, 大小={}",
            archive_path,
            target,
            job.files,
            job.directories,
            job.bytes
        );
        Ok(job)
    }

    /// 校验所有条目：路径必须封闭在目标目录内，总大小不超过上限
    fn plan_extraction(&self, archive: &mut ZipArchive<File>) -> Result<Vec<(usize, PathBuf)>, String> {
        let mut planned = Vec::with_capacity(archive.len());
        let mut total: u64 = 0;

        for index in 0..archive.len() {
            let entry = archive.by_index_raw(index).map_err(|e| e.to_string())?;
            let relative = entry
                .enclosed_name()
                .map(Path::to_path_buf)
                .ok_or_else(|| format!("条目路径越界: {}", entry.name()))?;

            total = total.saturating_add(entry.size());
            if total > self.config.max_extract_bytes {
                return Err(format!(
                    "解压后大小超过上限 {} 字节",
                    self.config.max_extract_bytes
                ));
            }

            if !relative.as_os_str().is_empty() {
                planned.push((index, relative));
            }
        }
        Ok(planned)
    }
}

/// 压缩包内的条目名：相对于源目录，使用 `/` 分隔，目录以 `/` 结尾由 add_directory 处理
fn archive_name(source: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(source).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// 规范化后的目标路径；不存在时规范化其父目录
fn canonical_target(path: &Path) -> PathBuf {
    if let Ok(canonical) = dunce::canonicalize(path) {
        return canonical;
    }
    match (path.parent().and_then(|p| dunce::canonicalize(p).ok()), path.file_name()) {
        (Some(parent), Some(name)) => parent.join(name),
        _ => path.to_path_buf(),
    }
}

fn archive_write_failed(path: &Path, err: zip::result::ZipError) -> FsError {
    tracing::error!("写入压缩包条目失败: {:?}, 错误: {}", path, err);
    FsError::new(FsErrorCode::ArchiveFailure)
        .with_message("compressed_failed")
        .with_path(path.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::guard::BasePath;
    use std::collections::BTreeMap;
    use std::io::{Read, Write};
    use tempfile::TempDir;

    fn service() -> (TempDir, ArchiveService, PathBuf) {
        let dir = TempDir::new().unwrap();
        let base = BasePath::new(dir.path()).unwrap();
        let root = base.as_path().to_path_buf();
        let service = ArchiveService::new(PathSandbox::new(base), ArchiveConfig::default());
        (dir, service, root)
    }

    fn entry_names(path: &Path) -> Vec<String> {
        let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    /// 相对路径 -> 内容（目录为 None）
    fn snapshot(root: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
        WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .map(|e| e.unwrap())
            .map(|e| {
                let rel = archive_name(root, e.path()).unwrap();
                let content = if e.file_type().is_file() {
                    Some(fs::read(e.path()).unwrap())
                } else {
                    None
                };
                (rel, content)
            })
            .collect()
    }

    #[test]
    fn test_compress_single_file_at_root() {
        let (_dir, service, root) = service();
        fs::create_dir(root.join("docs")).unwrap();
        fs::write(root.join("docs/report.txt"), "quarterly").unwrap();

        let job = service
            .compress(&root.join("docs/report.txt"), &root.join("out.zip"))
            .unwrap();

        assert_eq!(job.files, 1);
        assert_eq!(job.message(), "compressed_success");
        assert_eq!(entry_names(&root.join("out.zip")), vec!["report.txt"]);
    }

    #[test]
    fn test_compress_directory_relative_names() {
        let (_dir, service, root) = service();
        let src = root.join("project");
        fs::create_dir_all(src.join("src/empty")).unwrap();
        fs::write(src.join("Cargo.toml"), "[package]").unwrap();
        fs::write(src.join("src/lib.rs"), "pub fn f() {}").unwrap();

        service.compress(&src, &root.join("project.zip")).unwrap();

        let names = entry_names(&root.join("project.zip"));
        assert_eq!(
            names,
            vec!["Cargo.toml", "src/", "src/empty/", "src/lib.rs"]
        );
        assert!(names.iter().all(|n| !n.starts_with("project")));
    }

    #[test]
    fn test_compress_skips_destination_inside_source() {
        let (_dir, service, root) = service();
        fs::write(root.join("a.txt"), "a").unwrap();

        service.compress(&root, &root.join("self.zip")).unwrap();

        assert_eq!(entry_names(&root.join("self.zip")), vec!["a.txt"]);
    }

    #[test]
    fn test_compress_missing_source() {
        let (_dir, service, root) = service();
        let err = service
            .compress(&root.join("missing"), &root.join("out.zip"))
            .unwrap_err();

        assert_eq!(err.code, FsErrorCode::NotFound);
        assert_eq!(err.message, "file_not_found");
        assert!(!root.join("out.zip").exists());
    }

    #[test]
    fn test_compress_appends_to_existing_archive() {
        let (_dir, service, root) = service();
        fs::write(root.join("one.txt"), "1").unwrap();
        fs::write(root.join("two.txt"), "2").unwrap();

        service.compress(&root.join("one.txt"), &root.join("out.zip")).unwrap();
        service.compress(&root.join("two.txt"), &root.join("out.zip")).unwrap();

        assert_eq!(entry_names(&root.join("out.zip")), vec!["one.txt", "two.txt"]);
    }

    #[test]
    fn test_round_trip_preserves_tree_and_content() {
        let (_dir, service, root) = service();
        let src = root.join("site");
        fs::create_dir_all(src.join("assets/img")).unwrap();
        fs::create_dir_all(src.join("drafts")).unwrap();
        fs::write(src.join("index.html"), "<h1>hi</h1>").unwrap();
        fs::write(src.join("assets/app.js"), "console.log(1)").unwrap();
        fs::write(src.join("assets/img/logo.bin"), [0u8, 1, 2, 255, 254]).unwrap();

        service.compress(&src, &root.join("site.zip")).unwrap();
        let job = service
            .extract(&root.join("site.zip"), &root.join("restored"))
            .unwrap();

        assert_eq!(job.files, 3);
        assert_eq!(snapshot(&src), snapshot(&root.join("restored")));
    }

    #[test]
    fn test_extract_corrupt_archive_leaves_target_untouched() {
        let (_dir, service, root) = service();
        fs::write(root.join("bad.zip"), "this is not a zip file").unwrap();

        let err = service
            .extract(&root.join("bad.zip"), &root.join("out"))
            .unwrap_err();

        assert_eq!(err.code, FsErrorCode::ArchiveFailure);
        assert_eq!(err.message, "unzip_failed");
        assert!(!root.join("out").exists());
    }

    #[test]
    fn test_extract_rejects_zip_slip() {
        let (_dir, service, root) = service();
        let archive_path = root.join("evil.zip");
        {
            let mut zip = ZipWriter::new(File::create(&archive_path).unwrap());
            zip.start_file("safe.txt", FileOptions::default()).unwrap();
            zip.write_all(b"ok").unwrap();
            zip.start_file("../../evil.txt", FileOptions::default()).unwrap();
            zip.write_all(b"bad").unwrap();
            zip.finish().unwrap();
        }

        let err = service.extract(&archive_path, &root.join("out")).unwrap_err();
        assert_eq!(err.message, "unzip_failed");
        assert!(!root.join("out").exists());
    }

    #[test]
    fn test_compress_archive_into_itself_is_rejected() {
        let (_dir, service, root) = service();
        let payload: Vec<u8> = (0..300_000u32).map(|i| (i * 7 % 253) as u8).collect();
        fs::write(root.join("data.bin"), &payload).unwrap();
        service.compress(&root.join("data.bin"), &root.join("x.zip")).unwrap();
        let before = fs::read(root.join("x.zip")).unwrap();

        let err = service
            .compress(&root.join("x.zip"), &root.join("x.zip"))
            .unwrap_err();

        assert_eq!(err.code, FsErrorCode::ArchiveFailure);
        assert_eq!(fs::read(root.join("x.zip")).unwrap(), before);
        assert_eq!(entry_names(&root.join("x.zip")), vec!["data.bin"]);
    }

    #[test]
    fn test_compress_failure_keeps_existing_destination() {
        let (_dir, service, root) = service();
        fs::write(root.join("a.txt"), "a").unwrap();
        fs::write(root.join("out.zip"), "not an archive").unwrap();

        let err = service
            .compress(&root.join("a.txt"), &root.join("out.zip"))
            .unwrap_err();

        assert_eq!(err.message, "archive_not_open");
        assert_eq!(fs::read_to_string(root.join("out.zip")).unwrap(), "not an archive");
        let leftovers: Vec<_> = fs::read_dir(&root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|n| n.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "残留临时文件: {:?}", leftovers);
    }

    #[cfg(unix)]
    #[test]
    fn test_compress_partial_failure_keeps_appended_archive() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, service, root) = service();
        fs::write(root.join("one.txt"), "1").unwrap();
        service.compress(&root.join("one.txt"), &root.join("out.zip")).unwrap();

        let src = root.join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("a.txt"), "a").unwrap();
        fs::write(src.join("b.txt"), "b").unwrap();
        fs::set_permissions(src.join("b.txt"), fs::Permissions::from_mode(0o000)).unwrap();
        // root 用户不受权限位限制
        if File::open(src.join("b.txt")).is_ok() {
            return;
        }

        assert!(service.compress(&src, &root.join("out.zip")).is_err());
        assert_eq!(entry_names(&root.join("out.zip")), vec!["one.txt"]);
    }

    #[test]
    fn test_compress_leaves_no_temp_files() {
        let (_dir, service, root) = service();
        fs::write(root.join("a.txt"), "a").unwrap();

        service.compress(&root, &root.join("all.zip")).unwrap();
        fs::create_dir(root.join("more")).unwrap();
        fs::write(root.join("more/b.txt"), "b").unwrap();
        service.compress(&root.join("more"), &root.join("all.zip")).unwrap();

        let mut names: Vec<_> = fs::read_dir(&root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "all.zip", "more"]);
        assert_eq!(entry_names(&root.join("all.zip")), vec!["a.txt", "b.txt"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_through_symlink_leaves_outside_untouched() {
        let outside = TempDir::new().unwrap();
        let (_dir, service, root) = service();
        std::os::unix::fs::symlink(outside.path(), root.join("esc")).unwrap();

        let archive_path = root.join("planted.zip");
        {
            let mut zip = ZipWriter::new(File::create(&archive_path).unwrap());
            zip.start_file("ok.txt", FileOptions::default()).unwrap();
            zip.write_all(b"ok").unwrap();
            zip.add_directory("esc/planted/", FileOptions::default()).unwrap();
            zip.start_file("esc/deep/x.txt", FileOptions::default()).unwrap();
            zip.write_all(b"x").unwrap();
            zip.finish().unwrap();
        }

        let err = service.extract(&archive_path, &root).unwrap_err();

        assert_eq!(err.code, FsErrorCode::PathNotAllowed);
        assert!(!outside.path().join("planted").exists());
        assert!(!outside.path().join("deep").exists());
        assert!(!root.join("ok.txt").exists());
    }

    #[test]
    fn test_extract_respects_size_ceiling() {
        let dir = TempDir::new().unwrap();
        let base = BasePath::new(dir.path()).unwrap();
        let root = base.as_path().to_path_buf();
        let config = ArchiveConfig {
            max_extract_bytes: 4,
            ..ArchiveConfig::default()
        };
        let service = ArchiveService::new(PathSandbox::new(base), config);
        fs::write(root.join("big.txt"), "0123456789").unwrap();
        service.compress(&root.join("big.txt"), &root.join("big.zip")).unwrap();

        let err = service.extract(&root.join("big.zip"), &root.join("out")).unwrap_err();
        assert_eq!(err.code, FsErrorCode::ArchiveFailure);
        assert!(!root.join("out").exists());
    }

    #[test]
    fn test_extract_streams_content() {
        let (_dir, service, root) = service();
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(root.join("data.bin"), &payload).unwrap();
        service.compress(&root.join("data.bin"), &root.join("data.zip")).unwrap();

        service.extract(&root.join("data.zip"), &root.join("x")).unwrap();

        let mut restored = Vec::new();
        File::open(root.join("x/data.bin"))
            .unwrap()
            .read_to_end(&mut restored)
            .unwrap();
        assert_eq!(restored, payload);
    }
}
