//! Tree Search
//!
//! Lazy depth-first walk yielding files whose name contains a query,
//! case-insensitively. Each walk owns its own cursor, so a search can be
//! restarted at any time; dropping the stream stops the walk between entries.

use super::FileEntry;
use crate::error::{Error, Result};
use futures::stream::{self, Stream};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Validated search parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    needle: String,
    extension: Option<String>,
}

impl SearchQuery {
    /// `extension` may be given with or without the leading dot
    pub fn new(query: &str, extension: Option<&str>) -> Result<Self> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Err(Error::Validation("search query must not be empty".into()));
        }
        let extension = extension
            .map(|e| e.trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty());
        Ok(Self { needle, extension })
    }

    pub fn matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_lowercase()) else {
            return false;
        };
        if !name.contains(&self.needle) {
            return false;
        }
        match &self.extension {
            Some(wanted) => path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase() == *wanted)
                .unwrap_or(false),
            None => true,
        }
    }
}

struct Walk {
    root: PathBuf,
    query: SearchQuery,
    /// Paths still to visit; the top is visited next
    pending: Vec<PathBuf>,
}

async fn children(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    let mut reader = fs::read_dir(dir).await?;
    while let Some(entry) = reader.next_entry().await? {
        entries.push(entry.path());
    }
    entries.sort();
    Ok(entries)
}

/// Walk `start` (a resolved directory under `root`).
///
/// Unreadable entries are yielded as errors and the walk continues.
/// Symlinks are reported by name but never followed.
pub(crate) fn walk(
    root: PathBuf,
    start: PathBuf,
    query: SearchQuery,
) -> impl Stream<Item = Result<FileEntry>> + Send + 'static {
    let state = Walk {
        root,
        query,
        pending: vec![start],
    };

    stream::unfold(state, |mut state| async move {
        while let Some(path) = state.pending.pop() {
            let metadata = match fs::symlink_metadata(&path).await {
                Ok(metadata) => metadata,
                // Removed while we were walking
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Some((Err(e.into()), state)),
            };

            if metadata.is_dir() {
                match children(&path).await {
                    Ok(found) => state.pending.extend(found.into_iter().rev()),
                    Err(e) => return Some((Err(e), state)),
                }
            } else if state.query.matches(&path) {
                let entry = FileEntry::from_metadata(&state.root, &path, &metadata);
                return Some((Ok(entry), state));
            }
        }
        None
    })
}
