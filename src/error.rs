//! Error types for the adaptive storage core
//!
//! Provides structured error types for architecture probing, command
//! building/execution, output parsing, and the path-safe file tree.

use thiserror::Error;

/// Unified error type for the storage core
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Architecture Probe Errors
    // =========================================================================
    #[error("Architecture probe failed: {0}")]
    Probe(String),

    #[error("Architecture profile requested before initialization")]
    NotInitialized,

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid device {device}: {reason}")]
    InvalidDevice { device: String, reason: String },

    #[error("Recursive rollback to {snapshot} would destroy newer snapshots: {}", .newer.join(", "))]
    RollbackHazard { snapshot: String, newer: Vec<String> },

    // =========================================================================
    // Not Found Errors
    // =========================================================================
    #[error("Path not found: {path}")]
    NotFound { path: String },

    #[error("Not a directory: {path}")]
    NotADirectory { path: String },

    #[error("Not a regular file: {path}")]
    NotAFile { path: String },

    #[error("Pool not found: {pool}")]
    PoolNotFound { pool: String },

    #[error("Dataset not found: {dataset}")]
    DatasetNotFound { dataset: String },

    #[error("Snapshot not found: {snapshot}")]
    SnapshotNotFound { snapshot: String },

    // =========================================================================
    // Conflict Errors
    // =========================================================================
    #[error("Path already exists: {path}")]
    AlreadyExists { path: String },

    #[error("Pool already exists: {pool}")]
    PoolExists { pool: String },

    #[error("Dataset already exists: {dataset}")]
    DatasetExists { dataset: String },

    #[error("Snapshot already exists: {snapshot}")]
    DuplicateSnapshot { snapshot: String },

    #[error("Directory not empty: {path}")]
    DirectoryNotEmpty { path: String },

    #[error("Cannot move {source_path} to {destination}: crosses filesystem boundary")]
    CrossDevice {
        source_path: String,
        destination: String,
    },

    // =========================================================================
    // Security Errors
    // =========================================================================
    #[error("Path escapes the file tree root: {path}")]
    PathTraversal { path: String },

    // =========================================================================
    // Command Execution Errors
    // =========================================================================
    #[error("Command `{command}` exited with code {exit_code}: {stderr}")]
    CommandExecution {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Command not available: {program}")]
    CommandUnavailable { program: String },

    #[error("Send stream for {source_snapshot} failed (exit code {exit_code}, broken pipe: {broken_pipe}): {stderr}")]
    SendStream {
        source_snapshot: String,
        exit_code: i32,
        stderr: String,
        broken_pipe: bool,
    },

    #[error("Receive into {target} rejected (exit code {exit_code}): {stderr}")]
    ReceiveRejected {
        target: String,
        exit_code: i32,
        stderr: String,
    },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("Cannot parse output of `{command}` line {line}: {reason}")]
    Parse {
        command: String,
        line: usize,
        reason: String,
    },

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad classification of an error, used by the request layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rejected before any external call
    Validation,
    /// Referenced pool/dataset/snapshot/path does not exist
    NotFound,
    /// Target already exists or is in a conflicting state
    Conflict,
    /// Path containment violation
    Security,
    /// Backend process failed
    Execution,
    /// Backend output did not match the expected schema
    Parse,
    /// Filesystem failure
    Io,
    /// Anything else
    Internal,
}

impl Error {
    /// Classify this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Validation(_)
            | Error::InvalidDevice { .. }
            | Error::RollbackHazard { .. }
            | Error::NotADirectory { .. }
            | Error::NotAFile { .. } => ErrorCategory::Validation,

            Error::NotFound { .. }
            | Error::PoolNotFound { .. }
            | Error::DatasetNotFound { .. }
            | Error::SnapshotNotFound { .. } => ErrorCategory::NotFound,

            Error::AlreadyExists { .. }
            | Error::PoolExists { .. }
            | Error::DatasetExists { .. }
            | Error::DuplicateSnapshot { .. }
            | Error::DirectoryNotEmpty { .. }
            | Error::CrossDevice { .. } => ErrorCategory::Conflict,

            Error::PathTraversal { .. } => ErrorCategory::Security,

            Error::CommandExecution { .. }
            | Error::CommandUnavailable { .. }
            | Error::SendStream { .. }
            | Error::ReceiveRejected { .. } => ErrorCategory::Execution,

            Error::Parse { .. } => ErrorCategory::Parse,

            Error::Io(_) => ErrorCategory::Io,

            Error::Internal(_)
            | Error::Configuration(_)
            | Error::Probe(_)
            | Error::NotInitialized => ErrorCategory::Internal,
        }
    }

    /// Short machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Error::Internal(_) => "internal_error",
            Error::Configuration(_) => "configuration_error",
            Error::Probe(_) => "probe_failed",
            Error::NotInitialized => "not_initialized",
            Error::Validation(_) => "validation_failed",
            Error::InvalidDevice { .. } => "invalid_device",
            Error::RollbackHazard { .. } => "rollback_hazard",
            Error::NotFound { .. } => "not_found",
            Error::NotADirectory { .. } => "not_a_directory",
            Error::NotAFile { .. } => "not_a_file",
            Error::PoolNotFound { .. } => "pool_not_found",
            Error::DatasetNotFound { .. } => "dataset_not_found",
            Error::SnapshotNotFound { .. } => "snapshot_not_found",
            Error::AlreadyExists { .. } => "already_exists",
            Error::PoolExists { .. } => "pool_exists",
            Error::DatasetExists { .. } => "dataset_exists",
            Error::DuplicateSnapshot { .. } => "duplicate_snapshot",
            Error::DirectoryNotEmpty { .. } => "directory_not_empty",
            Error::CrossDevice { .. } => "cross_device",
            Error::PathTraversal { .. } => "path_traversal",
            Error::CommandExecution { .. } => "command_failed",
            Error::CommandUnavailable { .. } => "command_unavailable",
            Error::SendStream { .. } => "send_failed",
            Error::ReceiveRejected { .. } => "receive_rejected",
            Error::Parse { .. } => "parse_error",
            Error::Io(_) => "io_error",
        }
    }

    /// Whether the failure was raised before any external command ran
    pub fn is_side_effect_free(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Validation | ErrorCategory::Security
        )
    }
}

/// Result type alias for the storage core
pub type Result<T> = std::result::Result<T, Error>;
