//! Adaptive Storage - Architecture-aware storage orchestration
//!
//! Manages ZFS, Btrfs and mdadm pools with tuning derived from the host CPU,
//! and exposes a file tree confined to one root directory.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      REST API (axum)                             │
//! ├───────────────────────────────────┬──────────────────────────────┤
//! │        Storage Orchestrator       │        Safe File Tree        │
//! │  ┌─────────────┐ ┌──────────────┐ │  ┌────────────────────────┐  │
//! │  │  Command    │ │  Resource    │ │  │  resolve / list / mkdir│  │
//! │  │  Builder    │ │  Locks       │ │  │  move / copy / search  │  │
//! │  └──────┬──────┘ └──────────────┘ │  └────────────────────────┘  │
//! │         │                         │                              │
//! │  ┌──────┴──────────────────────┐  │                              │
//! │  │ Tuning Policy ◄─ Profiler   │  │                              │
//! │  └─────────────────────────────┘  │                              │
//! ├───────────────────────────────────┴──────────────────────────────┤
//! │            Command Runner (zpool / zfs / btrfs / mdadm)          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: Orchestrator, backend command builders, REST API
//! - [`hardware`]: Architecture profiling and tuning policy
//! - [`files`]: Path-safe file tree
//! - [`domain`]: Records and ports
//! - [`metrics`]: Prometheus metrics
//! - [`error`]: Error types and handling

pub mod controlplane;
pub mod domain;
pub mod error;
pub mod files;
pub mod hardware;
pub mod metrics;

// Re-export commonly used types
pub use controlplane::{
    ApiServer, ApiServerConfig, BackendBinaries, OrchestratorConfig, PoolCreation, PoolRequest,
    RaidLevel, ReplicationJob, ReplicationReport, ReplicationRequest, ResourceLocks,
    RollbackOptions, RollbackOutcome, StorageOrchestrator, SystemCommandRunner,
};

pub use domain::{
    ActivityProgress, ActivityState, Backend, CommandOutput, CommandRunner, CommandRunnerRef,
    CommandSpec, CpuInspector, CpuInspectorRef, Dataset, PoolActivity, PoolHealth, Snapshot,
    StoragePool, SubvolumeSnapshot,
};

pub use error::{Error, ErrorCategory, Result};

pub use files::{FileDownload, FileEntry, FileTreeConfig, ItemOutcome, SafeFileTree};

pub use hardware::{
    policy, resource_limits, ArchitectureProfile, ArchitectureProfiler, ArchitectureReport,
    HwFeature, ResourceLimits, SystemCpuInspector, TuningParameterSet,
};

pub use metrics::{CommandMetrics, FileTreeMetrics};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
