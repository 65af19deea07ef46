//! Safe File Tree
//!
//! Filesystem operations confined to one root directory.
//!
//! Path resolution happens in two steps. The caller path is first normalized
//! lexically: `..` that would climb above the root is rejected before any
//! filesystem access. The nearest existing ancestor is then canonicalized so
//! symlinks pointing outside the root are rejected too.
//!
//! Mutating operations take the per-path advisory lock. A symlink swapped in
//! between resolution and use is outside what that lock can prevent.

use super::search::{walk, SearchQuery};
use super::{display_relative, FileEntry, FileTreeConfig, ItemOutcome};
use crate::controlplane::locks::{path_key, ResourceLocks};
use crate::error::{Error, Result};
use crate::metrics::FileTreeMetrics;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

/// `EXDEV` on Linux and the BSDs
const CROSS_DEVICE_ERRNO: i32 = 18;

/// Read size for streamed downloads
const DOWNLOAD_CHUNK: usize = 64 * 1024;

/// An opened regular file and its contents as a chunk stream
pub struct FileDownload {
    pub entry: FileEntry,
    pub chunks: BoxStream<'static, std::io::Result<Vec<u8>>>,
}

impl std::fmt::Debug for FileDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileDownload")
            .field("entry", &self.entry)
            .finish_non_exhaustive()
    }
}

/// File tree confined to a canonical root directory
pub struct SafeFileTree {
    root: PathBuf,
    locks: ResourceLocks,
    metrics: Option<FileTreeMetrics>,
}

impl SafeFileTree {
    /// Create the root if needed and canonicalize it
    pub async fn open(config: FileTreeConfig) -> Result<Self> {
        fs::create_dir_all(&config.root).await?;
        let root = fs::canonicalize(&config.root).await?;
        info!("File tree rooted at {}", root.display());

        Ok(Self {
            root,
            locks: ResourceLocks::new(),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: FileTreeMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Share a lock table with other components
    pub fn with_locks(mut self, locks: ResourceLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record<T>(&self, operation: &str, result: &Result<T>) {
        if let Some(metrics) = &self.metrics {
            metrics.record(operation, result);
        }
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Lexically normalize a caller path into components below the root
    fn normalize(relative: &str) -> Result<PathBuf> {
        let traversal = || Error::PathTraversal {
            path: relative.to_string(),
        };

        let mut normalized = PathBuf::new();
        for component in Path::new(relative).components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(traversal());
                    }
                }
                Component::Normal(part) => normalized.push(part),
                Component::Prefix(_) => return Err(traversal()),
            }
        }
        Ok(normalized)
    }

    /// Canonicalize the deepest existing ancestor of `path` and re-append the
    /// missing tail, then check containment
    async fn contain(&self, relative: &str, path: PathBuf) -> Result<PathBuf> {
        let mut existing = path.as_path();
        let mut missing: Vec<OsString> = Vec::new();

        let canonical = loop {
            match fs::canonicalize(existing).await {
                Ok(canonical) => break canonical,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    let (Some(name), Some(parent)) = (existing.file_name(), existing.parent()) else {
                        return Err(Error::PathTraversal {
                            path: relative.to_string(),
                        });
                    };
                    missing.push(name.to_os_string());
                    existing = parent;
                }
                Err(e) => return Err(e.into()),
            }
        };

        let resolved = missing
            .into_iter()
            .rev()
            .fold(canonical, |acc, part| acc.join(part));
        if !resolved.starts_with(&self.root) {
            return Err(Error::PathTraversal {
                path: relative.to_string(),
            });
        }
        Ok(resolved)
    }

    /// Resolve a caller path to an absolute path under the root.
    ///
    /// A leading `/` means the tree root, not the host root.
    pub async fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let normalized = Self::normalize(relative)?;
        self.contain(relative, self.root.join(normalized)).await
    }

    /// Like [`resolve`](Self::resolve), but the final component is not
    /// followed, so operations act on a symlink itself rather than its target
    async fn resolve_entry(&self, relative: &str) -> Result<PathBuf> {
        let normalized = Self::normalize(relative)?;
        match (normalized.parent(), normalized.file_name()) {
            (Some(parent), Some(name)) => {
                let parent = self.contain(relative, self.root.join(parent)).await?;
                Ok(parent.join(name))
            }
            _ => Ok(self.root.clone()),
        }
    }

    async fn existing_metadata(path: &Path, relative: &str) -> Result<std::fs::Metadata> {
        fs::symlink_metadata(path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::NotFound {
                path: relative.to_string(),
            },
            _ => e.into(),
        })
    }

    fn entry(&self, path: &Path, metadata: &std::fs::Metadata) -> FileEntry {
        FileEntry::from_metadata(&self.root, path, metadata)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Metadata for one path
    pub async fn stat(&self, relative: &str) -> Result<FileEntry> {
        let path = self.resolve_entry(relative).await?;
        let metadata = Self::existing_metadata(&path, relative).await?;
        Ok(self.entry(&path, &metadata))
    }

    /// Direct children of a directory, ordered by name
    pub async fn list(&self, relative: &str) -> Result<Vec<FileEntry>> {
        let result = self.list_inner(relative).await;
        self.record("list", &result);
        result
    }

    async fn list_inner(&self, relative: &str) -> Result<Vec<FileEntry>> {
        let path = self.resolve(relative).await?;
        let metadata = Self::existing_metadata(&path, relative).await?;
        if !metadata.is_dir() {
            return Err(Error::NotADirectory {
                path: relative.to_string(),
            });
        }

        let mut entries = Vec::new();
        let mut reader = fs::read_dir(&path).await?;
        while let Some(child) = reader.next_entry().await? {
            let child_path = child.path();
            match fs::symlink_metadata(&child_path).await {
                Ok(metadata) => entries.push(self.entry(&child_path, &metadata)),
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        debug!("Listed {} entries under {}", entries.len(), display_relative(&self.root, &path));
        Ok(entries)
    }

    /// Lazy depth-first search below `relative` for files whose name contains
    /// `query`, optionally restricted to one extension
    pub async fn search(
        &self,
        relative: &str,
        query: &str,
        extension: Option<&str>,
    ) -> Result<impl Stream<Item = Result<FileEntry>> + Send + 'static> {
        let result = self.search_start(relative, query, extension).await;
        self.record("search", &result);

        let (start, query) = result?;
        Ok(walk(self.root.clone(), start, query))
    }

    async fn search_start(
        &self,
        relative: &str,
        query: &str,
        extension: Option<&str>,
    ) -> Result<(PathBuf, SearchQuery)> {
        let query = SearchQuery::new(query, extension)?;
        let start = self.resolve(relative).await?;
        let metadata = Self::existing_metadata(&start, relative).await?;
        if !metadata.is_dir() {
            return Err(Error::NotADirectory {
                path: relative.to_string(),
            });
        }
        Ok((start, query))
    }

    /// Open a regular file for streaming. Symlinks are followed but must
    /// stay inside the root.
    pub async fn download(&self, relative: &str) -> Result<FileDownload> {
        let result = self.download_inner(relative).await;
        self.record("download", &result);
        result
    }

    async fn download_inner(&self, relative: &str) -> Result<FileDownload> {
        let path = self.resolve(relative).await?;
        let metadata = fs::metadata(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::NotFound {
                path: relative.to_string(),
            },
            _ => e.into(),
        })?;
        if !metadata.is_file() {
            return Err(Error::NotAFile {
                path: relative.to_string(),
            });
        }

        let file = fs::File::open(&path).await?;
        debug!("Streaming {} ({} bytes)", display_relative(&self.root, &path), metadata.len());
        Ok(FileDownload {
            entry: self.entry(&path, &metadata),
            chunks: read_chunks(file).boxed(),
        })
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Create a directory and any missing parents. Succeeds if the directory
    /// already exists.
    pub async fn mkdir(&self, relative: &str) -> Result<FileEntry> {
        let result = self.mkdir_inner(relative).await;
        self.record("mkdir", &result);
        result
    }

    async fn mkdir_inner(&self, relative: &str) -> Result<FileEntry> {
        let path = self.resolve(relative).await?;
        let _guard = self.locks.acquire(path_key(&path)).await;

        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_dir() => return Ok(self.entry(&path, &metadata)),
            Ok(_) => {
                return Err(Error::AlreadyExists {
                    path: relative.to_string(),
                })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        fs::create_dir_all(&path).await?;
        info!("Created directory {}", display_relative(&self.root, &path));
        let metadata = fs::metadata(&path).await?;
        Ok(self.entry(&path, &metadata))
    }

    /// Delete a file, symlink or directory. A non-empty directory requires
    /// `recursive`; the flag is ignored for anything else.
    pub async fn delete(&self, relative: &str, recursive: bool) -> Result<()> {
        let result = self.delete_inner(relative, recursive).await;
        self.record("delete", &result);
        result
    }

    async fn delete_inner(&self, relative: &str, recursive: bool) -> Result<()> {
        let path = self.resolve_entry(relative).await?;
        if path == self.root {
            return Err(Error::Validation("the tree root cannot be deleted".into()));
        }
        let _guard = self.locks.acquire(path_key(&path)).await;

        let metadata = Self::existing_metadata(&path, relative).await?;
        if metadata.is_dir() {
            if recursive {
                fs::remove_dir_all(&path).await?;
            } else {
                let mut reader = fs::read_dir(&path).await?;
                if reader.next_entry().await?.is_some() {
                    return Err(Error::DirectoryNotEmpty {
                        path: relative.to_string(),
                    });
                }
                fs::remove_dir(&path).await?;
            }
        } else {
            fs::remove_file(&path).await?;
        }

        info!("Deleted {}", display_relative(&self.root, &path));
        Ok(())
    }

    /// Delete several paths; one failure does not stop the others
    pub async fn delete_many<S: AsRef<str>>(&self, paths: &[S], recursive: bool) -> Vec<ItemOutcome> {
        let mut outcomes = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let result = self.delete(path, recursive).await;
            outcomes.push(ItemOutcome::from_result(path, &result));
        }
        outcomes
    }

    /// Rename within one filesystem. Crossing a filesystem boundary fails
    /// with [`Error::CrossDevice`]; there is no copy-and-delete fallback.
    pub async fn move_entry(&self, source: &str, destination: &str) -> Result<FileEntry> {
        let result = self.move_inner(source, destination).await;
        self.record("move", &result);
        result
    }

    async fn move_inner(&self, source: &str, destination: &str) -> Result<FileEntry> {
        let from = self.resolve_entry(source).await?;
        let to = self.resolve_entry(destination).await?;
        if from == self.root || to == self.root {
            return Err(Error::Validation("the tree root cannot be moved or replaced".into()));
        }
        if to.starts_with(&from) {
            return Err(Error::Validation(format!(
                "cannot move {} into itself",
                source
            )));
        }
        let _guards = self.locks.acquire_many([path_key(&from), path_key(&to)]).await;

        Self::existing_metadata(&from, source).await?;
        Self::ensure_absent(&to, destination).await?;

        fs::rename(&from, &to).await.map_err(|e| {
            if e.raw_os_error() == Some(CROSS_DEVICE_ERRNO) {
                Error::CrossDevice {
                    source_path: source.to_string(),
                    destination: destination.to_string(),
                }
            } else {
                e.into()
            }
        })?;

        info!(
            "Moved {} to {}",
            display_relative(&self.root, &from),
            display_relative(&self.root, &to)
        );
        let metadata = fs::symlink_metadata(&to).await?;
        Ok(self.entry(&to, &metadata))
    }

    /// Copy a file, or a directory recursively. Symlinks inside a copied
    /// directory are skipped.
    pub async fn copy(&self, source: &str, destination: &str) -> Result<FileEntry> {
        let result = self.copy_inner(source, destination).await;
        self.record("copy", &result);
        result
    }

    async fn copy_inner(&self, source: &str, destination: &str) -> Result<FileEntry> {
        let from = self.resolve(source).await?;
        let to = self.resolve_entry(destination).await?;
        if to.starts_with(&from) {
            return Err(Error::Validation(format!(
                "cannot copy {} into itself",
                source
            )));
        }
        let _guard = self.locks.acquire(path_key(&to)).await;

        Self::existing_metadata(&from, source).await?;
        Self::ensure_absent(&to, destination).await?;

        let mut pending = vec![(from.clone(), to.clone())];
        let mut copied = 0u64;
        while let Some((src, dst)) = pending.pop() {
            let metadata = fs::symlink_metadata(&src).await?;
            if metadata.is_dir() {
                fs::create_dir(&dst).await?;
                let mut reader = fs::read_dir(&src).await?;
                while let Some(child) = reader.next_entry().await? {
                    pending.push((child.path(), dst.join(child.file_name())));
                }
            } else if metadata.is_file() {
                fs::copy(&src, &dst).await?;
                copied += 1;
            } else {
                debug!("Skipping {} while copying", src.display());
            }
        }

        info!(
            "Copied {} to {} ({} files)",
            display_relative(&self.root, &from),
            display_relative(&self.root, &to),
            copied
        );
        let metadata = fs::metadata(&to).await?;
        Ok(self.entry(&to, &metadata))
    }

    /// Write `contents` as `file_name` inside `directory`, creating the
    /// directory if needed and replacing an existing file
    pub async fn upload(&self, directory: &str, file_name: &str, contents: &[u8]) -> Result<FileEntry> {
        let result = self.upload_inner(directory, file_name, contents).await;
        self.record("upload", &result);
        result
    }

    async fn upload_inner(&self, directory: &str, file_name: &str, contents: &[u8]) -> Result<FileEntry> {
        let single_component = !file_name.is_empty()
            && file_name != "."
            && file_name != ".."
            && !file_name.contains(['/', '\\', '\0']);
        if !single_component {
            return Err(Error::Validation(format!(
                "'{}' is not a plain file name",
                file_name
            )));
        }

        let dir = self.resolve(directory).await?;
        let target = dir.join(file_name);
        let _guard = self.locks.acquire(path_key(&target)).await;

        match fs::metadata(&dir).await {
            Ok(metadata) if !metadata.is_dir() => {
                return Err(Error::NotADirectory {
                    path: directory.to_string(),
                })
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => fs::create_dir_all(&dir).await?,
            Err(e) => return Err(e.into()),
        }
        if let Ok(metadata) = fs::symlink_metadata(&target).await {
            if !metadata.is_file() {
                return Err(Error::AlreadyExists {
                    path: display_relative(&self.root, &target),
                });
            }
        }

        fs::write(&target, contents).await?;
        info!(
            "Uploaded {} ({} bytes)",
            display_relative(&self.root, &target),
            contents.len()
        );
        let metadata = fs::metadata(&target).await?;
        Ok(self.entry(&target, &metadata))
    }

    async fn ensure_absent(path: &Path, relative: &str) -> Result<()> {
        match fs::symlink_metadata(path).await {
            Ok(_) => Err(Error::AlreadyExists {
                path: relative.to_string(),
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn read_chunks(file: fs::File) -> impl Stream<Item = std::io::Result<Vec<u8>>> + Send + 'static {
    stream::unfold(Some(file), |file| async move {
        let mut file = file?;
        let mut buf = vec![0u8; DOWNLOAD_CHUNK];
        match file.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(buf), Some(file)))
            }
            Err(e) => Some((Err(e), None)),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use futures::StreamExt;
    use tempfile::TempDir;

    async fn tree() -> (TempDir, SafeFileTree) {
        let dir = TempDir::new().unwrap();
        let tree = SafeFileTree::open(FileTreeConfig {
            root: dir.path().join("uploads"),
        })
        .await
        .unwrap();
        (dir, tree)
    }

    #[test]
    fn test_normalize() {
        assert_eq!(SafeFileTree::normalize("/a/./b/../c").unwrap(), PathBuf::from("a/c"));
        assert_eq!(SafeFileTree::normalize("/").unwrap(), PathBuf::new());
        assert_matches!(SafeFileTree::normalize("a/../../b"), Err(Error::PathTraversal { .. }));
    }

    #[tokio::test]
    async fn test_resolve_keeps_paths_inside_root() {
        let (_dir, tree) = tree().await;
        let resolved = tree.resolve("/docs/new/file.txt").await.unwrap();
        assert!(resolved.starts_with(tree.root()));
        assert!(resolved.ends_with("docs/new/file.txt"));

        assert_matches!(tree.resolve("../../etc").await, Err(Error::PathTraversal { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_is_rejected() {
        let (dir, tree) = tree().await;
        let outside = dir.path().join("outside");
        std::fs::create_dir(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, tree.root().join("escape")).unwrap();

        assert_matches!(tree.list("/escape").await, Err(Error::PathTraversal { .. }));
        assert_matches!(tree.mkdir("/escape/sub").await, Err(Error::PathTraversal { .. }));
        assert!(!outside.join("sub").exists());

        // Removing the link itself is fine; the target stays
        tree.delete("/escape", false).await.unwrap();
        assert!(outside.exists());
    }

    #[tokio::test]
    async fn test_list_errors() {
        let (_dir, tree) = tree().await;
        std::fs::write(tree.root().join("a.txt"), "0123456789").unwrap();

        assert_matches!(tree.list("/missing").await, Err(Error::NotFound { .. }));
        assert_matches!(tree.list("/a.txt").await, Err(Error::NotADirectory { .. }));
    }

    #[tokio::test]
    async fn test_mkdir_over_file_fails() {
        let (_dir, tree) = tree().await;
        std::fs::write(tree.root().join("taken"), "x").unwrap();
        assert_matches!(tree.mkdir("/taken").await, Err(Error::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_delete_root_is_refused() {
        let (_dir, tree) = tree().await;
        assert_matches!(tree.delete("/", true).await, Err(Error::Validation(_)));
        assert!(tree.root().exists());
    }

    #[tokio::test]
    async fn test_delete_many_reports_each_path() {
        let (_dir, tree) = tree().await;
        std::fs::create_dir_all(tree.root().join("full/inner")).unwrap();
        std::fs::write(tree.root().join("a.txt"), "a").unwrap();

        let outcomes = tree
            .delete_many(&["/a.txt", "/full", "/missing", "/b/../../x"], false)
            .await;
        let codes: Vec<Option<&str>> = outcomes.iter().map(|o| o.error.as_deref()).collect();
        assert_eq!(
            codes,
            vec![None, Some("directory_not_empty"), Some("not_found"), Some("path_traversal")]
        );
        assert!(!tree.root().join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_move_and_copy() {
        let (_dir, tree) = tree().await;
        std::fs::create_dir_all(tree.root().join("src/nested")).unwrap();
        std::fs::write(tree.root().join("src/nested/file.bin"), [1u8, 2, 3]).unwrap();

        let copied = tree.copy("/src", "/backup").await.unwrap();
        assert!(copied.is_directory);
        assert_eq!(
            std::fs::read(tree.root().join("backup/nested/file.bin")).unwrap(),
            vec![1, 2, 3]
        );

        assert_matches!(tree.copy("/src", "/backup").await, Err(Error::AlreadyExists { .. }));
        assert_matches!(tree.copy("/src", "/src/inner").await, Err(Error::Validation(_)));

        let moved = tree.move_entry("/src", "/renamed").await.unwrap();
        assert_eq!(moved.relative_path, "/renamed");
        assert!(!tree.root().join("src").exists());
        assert_matches!(
            tree.move_entry("/missing", "/elsewhere").await,
            Err(Error::NotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_upload() {
        let (_dir, tree) = tree().await;
        let entry = tree.upload("/incoming", "report.pdf", b"%PDF").await.unwrap();
        assert_eq!(entry.relative_path, "/incoming/report.pdf");
        assert_eq!(entry.size_bytes, 4);

        assert_matches!(
            tree.upload("/incoming", "../evil", b"x").await,
            Err(Error::Validation(_))
        );
        assert_matches!(
            tree.upload("/../incoming", "ok.txt", b"x").await,
            Err(Error::PathTraversal { .. })
        );
    }

    #[tokio::test]
    async fn test_download_streams_whole_file() {
        let (_dir, tree) = tree().await;
        let contents: Vec<u8> = (0..DOWNLOAD_CHUNK * 2 + 17).map(|i| (i % 251) as u8).collect();
        std::fs::create_dir(tree.root().join("media")).unwrap();
        std::fs::write(tree.root().join("media/clip.bin"), &contents).unwrap();

        let download = tree.download("/media/clip.bin").await.unwrap();
        assert_eq!(download.entry.relative_path, "/media/clip.bin");
        assert_eq!(download.entry.size_bytes, contents.len() as u64);

        let chunks: Vec<Vec<u8>> = download
            .chunks
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), contents);
    }

    #[tokio::test]
    async fn test_download_rejects_directories_and_escapes() {
        let (dir, tree) = tree().await;
        std::fs::create_dir(tree.root().join("media")).unwrap();
        std::fs::write(dir.path().join("secret.txt"), "x").unwrap();

        assert_matches!(tree.download("/media").await, Err(Error::NotAFile { .. }));
        assert_matches!(tree.download("/").await, Err(Error::NotAFile { .. }));
        assert_matches!(tree.download("/missing.txt").await, Err(Error::NotFound { .. }));
        assert_matches!(
            tree.download("../secret.txt").await,
            Err(Error::PathTraversal { .. })
        );

        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(dir.path().join("secret.txt"), tree.root().join("link"))
                .unwrap();
            assert_matches!(tree.download("/link").await, Err(Error::PathTraversal { .. }));
        }
    }

    #[tokio::test]
    async fn test_search_from_subdirectory() {
        let (_dir, tree) = tree().await;
        std::fs::create_dir_all(tree.root().join("docs/2024")).unwrap();
        std::fs::write(tree.root().join("docs/2024/Invoice-7.pdf"), "x").unwrap();
        std::fs::write(tree.root().join("invoice-root.pdf"), "x").unwrap();

        let found: Vec<FileEntry> = tree
            .search("/docs", "invoice", Some("pdf"))
            .await
            .unwrap()
            .filter_map(|r| async move { r.ok() })
            .collect()
            .await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].relative_path, "/docs/2024/Invoice-7.pdf");

        assert!(tree.search("/", "", None).await.is_err());
    }

    #[tokio::test]
    async fn test_metrics_record_outcomes() {
        let registry = prometheus::Registry::new();
        let metrics = FileTreeMetrics::register(&registry).unwrap();
        let (_dir, tree) = tree().await;
        let tree = tree.with_metrics(metrics);

        tree.mkdir("/a").await.unwrap();
        let _ = tree.list("/nope").await;

        let families = registry.gather();
        let ops = families
            .iter()
            .find(|f| f.get_name() == "adaptive_storage_file_operations_total")
            .unwrap();
        assert_eq!(ops.get_metric().len(), 2);
    }
}
