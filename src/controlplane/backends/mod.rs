//! Storage Backend Command Builders
//!
//! Per-backend command construction and output parsing:
//! - ZFS: pools, datasets, snapshots, replication
//! - Btrfs: labelled multi-device filesystems
//! - mdadm: software RAID arrays

pub mod btrfs;
pub mod mdadm;
pub mod parse;
pub mod validate;
pub mod zfs;

pub use btrfs::BtrfsCommands;
pub use mdadm::MdadmCommands;
pub use zfs::ZfsCommands;

use crate::domain::{Backend, CommandSpec};
use crate::error::{Error, Result};
use crate::hardware::tuning::TuningParameterSet;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// =============================================================================
// RAID Levels
// =============================================================================

/// Redundancy layout requested for a new pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaidLevel {
    Mirror,
    Raidz,
    Raidz2,
    Raid0,
    Raid1,
    Raid5,
    Raid6,
}

impl RaidLevel {
    /// Levels a backend accepts
    pub fn supported_by(backend: Backend) -> &'static [RaidLevel] {
        match backend {
            Backend::Zfs => &[RaidLevel::Mirror, RaidLevel::Raidz, RaidLevel::Raidz2],
            Backend::Btrfs | Backend::Mdadm => &[
                RaidLevel::Raid0,
                RaidLevel::Raid1,
                RaidLevel::Raid5,
                RaidLevel::Raid6,
            ],
        }
    }

    /// zfs vdev type keyword
    pub fn zfs_vdev(&self) -> Option<&'static str> {
        match self {
            RaidLevel::Mirror => Some("mirror"),
            RaidLevel::Raidz => Some("raidz"),
            RaidLevel::Raidz2 => Some("raidz2"),
            _ => None,
        }
    }

    /// btrfs data/metadata profile
    pub fn btrfs_profile(&self) -> Option<&'static str> {
        match self {
            RaidLevel::Raid0 => Some("raid0"),
            RaidLevel::Raid1 => Some("raid1"),
            RaidLevel::Raid5 => Some("raid5"),
            RaidLevel::Raid6 => Some("raid6"),
            _ => None,
        }
    }

    /// mdadm `--level` value
    pub fn md_level(&self) -> Option<u8> {
        match self {
            RaidLevel::Raid0 => Some(0),
            RaidLevel::Raid1 => Some(1),
            RaidLevel::Raid5 => Some(5),
            RaidLevel::Raid6 => Some(6),
            _ => None,
        }
    }
}

impl std::fmt::Display for RaidLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RaidLevel::Mirror => "mirror",
            RaidLevel::Raidz => "raidz",
            RaidLevel::Raidz2 => "raidz2",
            RaidLevel::Raid0 => "raid0",
            RaidLevel::Raid1 => "raid1",
            RaidLevel::Raid5 => "raid5",
            RaidLevel::Raid6 => "raid6",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for RaidLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mirror" => Ok(RaidLevel::Mirror),
            "raidz" | "raidz1" => Ok(RaidLevel::Raidz),
            "raidz2" => Ok(RaidLevel::Raidz2),
            "raid0" => Ok(RaidLevel::Raid0),
            "raid1" => Ok(RaidLevel::Raid1),
            "raid5" => Ok(RaidLevel::Raid5),
            "raid6" => Ok(RaidLevel::Raid6),
            other => Err(Error::Validation(format!("unknown raid level '{}'", other))),
        }
    }
}

// =============================================================================
// Pool Requests and Plans
// =============================================================================

/// Declarative pool creation intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolRequest {
    pub name: String,
    pub backend: Backend,
    pub devices: Vec<String>,
    pub raid_level: RaidLevel,
    /// Caller options; win over tuning parameters on key collision
    #[serde(default)]
    pub overrides: TuningParameterSet,
}

impl PoolRequest {
    pub fn new(
        name: impl Into<String>,
        backend: Backend,
        devices: Vec<String>,
        raid_level: RaidLevel,
    ) -> Self {
        Self {
            name: name.into(),
            backend,
            devices,
            raid_level,
            overrides: TuningParameterSet::default(),
        }
    }

    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(key, value);
        self
    }

    /// Name, devices and level/backend compatibility. Runs before anything
    /// touches the backend; per-level device minimums are left to the backend.
    pub fn validate(&self) -> Result<()> {
        validate::pool_name(&self.name)?;
        validate::devices(&self.devices)?;

        if !RaidLevel::supported_by(self.backend).contains(&self.raid_level) {
            let allowed: Vec<String> = RaidLevel::supported_by(self.backend)
                .iter()
                .map(ToString::to_string)
                .collect();
            return Err(Error::Validation(format!(
                "raid level {} is not supported by {} (expected one of {})",
                self.raid_level,
                self.backend,
                allowed.join(", ")
            )));
        }
        Ok(())
    }
}

/// An option dropped from the command line, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedOption {
    pub key: String,
    pub value: String,
    pub reason: String,
}

impl SkippedOption {
    pub fn new(key: impl Into<String>, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// A built pool creation command and how the options were placed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolPlan {
    pub command: CommandSpec,
    /// Options placed on the command line
    pub applied: TuningParameterSet,
    /// Kernel module parameters; reported, never emitted
    pub module_parameters: TuningParameterSet,
    pub skipped: Vec<SkippedOption>,
}

// =============================================================================
// Command Builder
// =============================================================================

/// Binary locations for every backend
#[derive(Debug, Clone)]
pub struct BackendBinaries {
    pub zpool: String,
    pub zfs: String,
    pub btrfs: String,
    pub mkfs_btrfs: String,
    pub mdadm: String,
}

impl Default for BackendBinaries {
    fn default() -> Self {
        Self {
            zpool: "zpool".to_string(),
            zfs: "zfs".to_string(),
            btrfs: "btrfs".to_string(),
            mkfs_btrfs: "mkfs.btrfs".to_string(),
            mdadm: "mdadm".to_string(),
        }
    }
}

/// Assembles structured argument vectors for every backend
#[derive(Debug, Clone, Default)]
pub struct CommandBuilder {
    pub zfs: ZfsCommands,
    pub btrfs: BtrfsCommands,
    pub mdadm: MdadmCommands,
}

impl CommandBuilder {
    pub fn new(binaries: BackendBinaries, btrfs_mount_root: impl Into<PathBuf>) -> Self {
        Self {
            zfs: ZfsCommands {
                zpool: binaries.zpool,
                zfs: binaries.zfs,
            },
            btrfs: BtrfsCommands {
                btrfs: binaries.btrfs,
                mkfs: binaries.mkfs_btrfs,
                mount_root: btrfs_mount_root.into(),
            },
            mdadm: MdadmCommands {
                mdadm: binaries.mdadm,
            },
        }
    }

    pub fn list_pools(&self, backend: Backend) -> CommandSpec {
        match backend {
            Backend::Zfs => self.zfs.list_pools(),
            Backend::Btrfs => self.btrfs.list_pools(),
            Backend::Mdadm => self.mdadm.list_pools(),
        }
    }

    /// Validate the request and build its creation command.
    ///
    /// zfs receives the tuning set merged with the caller overrides; the
    /// other backends have no use for zfs tuning and receive only overrides.
    pub fn create_pool(&self, request: &PoolRequest, tuning: &TuningParameterSet) -> Result<PoolPlan> {
        request.validate()?;
        match request.backend {
            Backend::Zfs => {
                let effective = tuning.merged_with(&request.overrides);
                self.zfs.create_pool(request, &effective)
            }
            Backend::Btrfs => self.btrfs.create_pool(request, &request.overrides),
            Backend::Mdadm => self.mdadm.create_pool(request, &request.overrides),
        }
    }

    /// `target` is the pool name, or the array device node for mdadm
    pub fn destroy_pool(&self, backend: Backend, target: &str) -> Result<CommandSpec> {
        match backend {
            Backend::Zfs => Ok(self.zfs.destroy_pool(target)),
            Backend::Mdadm => Ok(self.mdadm.stop(target)),
            Backend::Btrfs => Err(Error::Validation(
                "destroying btrfs filesystems is not supported".into(),
            )),
        }
    }

    /// `target` as for [`destroy_pool`](Self::destroy_pool)
    pub fn scrub(&self, backend: Backend, target: &str) -> CommandSpec {
        match backend {
            Backend::Zfs => self.zfs.scrub(target),
            Backend::Btrfs => self.btrfs.scrub(target),
            Backend::Mdadm => self.mdadm.check(target),
        }
    }

    pub fn balance(&self, backend: Backend, name: &str) -> Result<CommandSpec> {
        match backend {
            Backend::Btrfs => Ok(self.btrfs.balance(name)),
            other => Err(Error::Validation(format!("balance is not supported by {}", other))),
        }
    }
}
