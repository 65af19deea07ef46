//! File Tree Module
//!
//! A directory tree confined to one configured root. Every caller path is
//! resolved and checked for containment before the filesystem is touched.

pub mod search;
pub mod tree;

pub use search::SearchQuery;
pub use tree::{FileDownload, SafeFileTree};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the file tree
#[derive(Debug, Clone)]
pub struct FileTreeConfig {
    /// Directory every relative path is resolved against; created if missing
    pub root: PathBuf,
}

impl Default for FileTreeConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/data/uploads"),
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// A file or directory under the tree root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    /// `/`-separated path from the root, starting with `/`
    pub relative_path: String,
    pub is_directory: bool,
    pub size_bytes: u64,
    pub modified_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

impl FileEntry {
    pub(crate) fn from_metadata(root: &Path, path: &Path, metadata: &std::fs::Metadata) -> Self {
        let is_directory = metadata.is_dir();
        Self {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            relative_path: display_relative(root, path),
            is_directory,
            size_bytes: if is_directory { 0 } else { metadata.len() },
            modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
            created_at: metadata.created().ok().map(DateTime::<Utc>::from),
        }
    }
}

/// Per-path result of a batch operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemOutcome {
    pub path: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ItemOutcome {
    pub fn from_result<T>(path: impl Into<String>, result: &crate::Result<T>) -> Self {
        match result {
            Ok(_) => Self {
                path: path.into(),
                success: true,
                error: None,
                message: None,
            },
            Err(e) => Self {
                path: path.into(),
                success: false,
                error: Some(e.code().to_string()),
                message: Some(e.to_string()),
            },
        }
    }
}

/// Render `path` relative to `root` as `/a/b`
pub(crate) fn display_relative(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    format!("/{}", parts.join("/"))
}
