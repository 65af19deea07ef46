//! Domain Records - Structured views over backend state
//!
//! None of these are persisted by the core; the storage backend is the
//! source of truth and every record is parsed fresh from its output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Backend
// =============================================================================

/// Storage backend managing a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Zfs,
    Btrfs,
    Mdadm,
}

impl Backend {
    pub const ALL: [Backend; 3] = [Backend::Zfs, Backend::Btrfs, Backend::Mdadm];
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Zfs => write!(f, "zfs"),
            Backend::Btrfs => write!(f, "btrfs"),
            Backend::Mdadm => write!(f, "mdadm"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "zfs" => Ok(Backend::Zfs),
            "btrfs" => Ok(Backend::Btrfs),
            "mdadm" | "md" => Ok(Backend::Mdadm),
            other => Err(crate::error::Error::Validation(format!(
                "unknown backend '{}', expected zfs, btrfs or mdadm",
                other
            ))),
        }
    }
}

// =============================================================================
// Pool Health
// =============================================================================

/// Pool health as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PoolHealth {
    Online,
    Degraded,
    Faulted,
    Unknown,
}

impl PoolHealth {
    /// Map backend state words onto the health enum
    pub fn from_backend_state(state: &str) -> Self {
        let state = state.trim().to_ascii_uppercase();
        match state.as_str() {
            "ONLINE" | "CLEAN" | "ACTIVE" => PoolHealth::Online,
            "DEGRADED" => PoolHealth::Degraded,
            "FAULTED" | "UNAVAIL" | "REMOVED" | "FAILED" | "INACTIVE" => PoolHealth::Faulted,
            // mdadm joins flags: "clean, FAILED", "active, degraded, recovering"
            s if s.contains("FAILED") || s.contains("INACTIVE") => PoolHealth::Faulted,
            s if s.contains("DEGRADED") => PoolHealth::Degraded,
            s if s.starts_with("CLEAN") || s.starts_with("ACTIVE") => PoolHealth::Online,
            _ => PoolHealth::Unknown,
        }
    }
}

impl std::fmt::Display for PoolHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolHealth::Online => write!(f, "ONLINE"),
            PoolHealth::Degraded => write!(f, "DEGRADED"),
            PoolHealth::Faulted => write!(f, "FAULTED"),
            PoolHealth::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// =============================================================================
// Pool / Dataset / Snapshot
// =============================================================================

/// A backend-managed storage pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoragePool {
    pub name: String,
    pub backend: Backend,
    pub size_bytes: u64,
    pub allocated_bytes: u64,
    pub free_bytes: u64,
    pub capacity_percent: u32,
    pub health: PoolHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedup_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fragmentation_percent: Option<u32>,
}

/// A dataset carved from a zfs pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub name: String,
    pub pool_name: String,
    pub used_bytes: u64,
    pub avail_bytes: u64,
    pub refer_bytes: u64,
    pub mountpoint: String,
    pub compression: String,
    /// `None` when no quota is set
    pub quota: Option<u64>,
}

/// A point-in-time snapshot of a dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// `dataset@label`
    pub qualified_name: String,
    pub creation_time: DateTime<Utc>,
    pub used_bytes: u64,
}

impl Snapshot {
    pub fn dataset(&self) -> &str {
        self.qualified_name
            .split_once('@')
            .map(|(dataset, _)| dataset)
            .unwrap_or(&self.qualified_name)
    }

    pub fn label(&self) -> &str {
        self.qualified_name
            .split_once('@')
            .map(|(_, label)| label)
            .unwrap_or("")
    }
}

/// A btrfs snapshot subvolume inside a pool's filesystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubvolumeSnapshot {
    pub pool: String,
    /// Subvolume ID assigned by btrfs
    pub id: u64,
    pub generation: u64,
    /// Path relative to the pool mountpoint
    pub path: String,
    /// `None` when btrfs reports no creation time
    pub created_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Background Activity
// =============================================================================

/// State of a scrub/balance/resync pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityState {
    Idle,
    Running,
    Paused,
    Finished,
    Canceled,
    Unknown,
}

/// Parsed progress of one background pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityProgress {
    pub state: ActivityState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent_done: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<u64>,
}

impl ActivityProgress {
    pub fn idle() -> Self {
        Self {
            state: ActivityState::Idle,
            percent_done: None,
            errors: None,
        }
    }
}

/// Live status of a pool's background work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolActivity {
    pub pool: String,
    pub backend: Backend,
    pub health: PoolHealth,
    pub scrub: ActivityProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<ActivityProgress>,
    /// Unparsed backend text, kept for operators
    pub raw: String,
}
