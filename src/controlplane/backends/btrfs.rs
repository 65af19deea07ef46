//! Btrfs Backend
//!
//! A btrfs "pool" is a labelled multi-device filesystem mounted at
//! `<mount_root>/<label>`. Scrub, balance and subvolume snapshots operate on
//! the mountpoint; subvolume paths are given relative to it.

use crate::controlplane::backends::parse::{self, capacity_percent, integer_after, number_before, parse_error};
use crate::controlplane::backends::validate;
use crate::controlplane::backends::{PoolPlan, PoolRequest};
use crate::domain::{
    ActivityProgress, ActivityState, Backend, CommandSpec, PoolHealth, StoragePool, SubvolumeSnapshot,
};
use crate::error::{Error, Result};
use crate::hardware::tuning::TuningParameterSet;
use chrono::{NaiveDateTime, TimeZone, Utc};
use std::path::PathBuf;

/// mkfs options a caller may override
const MKFS_OVERRIDES: [&str; 2] = ["nodesize", "sectorsize"];

// =============================================================================
// Command Builder
// =============================================================================

/// Builds `btrfs` and `mkfs.btrfs` invocations
#[derive(Debug, Clone)]
pub struct BtrfsCommands {
    pub btrfs: String,
    pub mkfs: String,
    /// Directory under which each labelled filesystem is mounted
    pub mount_root: PathBuf,
}

impl Default for BtrfsCommands {
    fn default() -> Self {
        Self {
            btrfs: "btrfs".to_string(),
            mkfs: "mkfs.btrfs".to_string(),
            mount_root: PathBuf::from("/mnt"),
        }
    }
}

impl BtrfsCommands {
    pub fn mountpoint(&self, label: &str) -> String {
        self.mount_root.join(label).to_string_lossy().into_owned()
    }

    pub fn list_pools(&self) -> CommandSpec {
        CommandSpec::new(&self.btrfs).args(["filesystem", "show", "--raw"])
    }

    /// `mkfs.btrfs -f -L <name> -d <profile> -m <profile> [--nodesize N] <devices>`
    pub fn create_pool(&self, request: &PoolRequest, overrides: &TuningParameterSet) -> Result<PoolPlan> {
        let profile = request.raid_level.btrfs_profile().ok_or_else(|| {
            Error::Validation(format!("raid level {} is not a btrfs profile", request.raid_level))
        })?;

        let mut command = CommandSpec::new(&self.mkfs)
            .args(["-f", "-L"])
            .arg(&request.name)
            .args(["-d", profile, "-m", profile]);
        let mut plan = PoolPlan::default();

        for (key, value) in overrides.iter() {
            if !MKFS_OVERRIDES.iter().any(|allowed| *allowed == key) {
                return Err(Error::Validation(format!(
                    "option '{}' is not supported for btrfs (allowed: {})",
                    key,
                    MKFS_OVERRIDES.join(", ")
                )));
            }
            validate::property_value(key, value)?;
            command = command.arg(format!("--{}", key)).arg(value);
            plan.applied.insert(key, value);
        }

        plan.command = command.args(request.devices.iter().cloned());
        Ok(plan)
    }

    pub fn scrub(&self, label: &str) -> CommandSpec {
        CommandSpec::new(&self.btrfs)
            .args(["scrub", "start"])
            .arg(self.mountpoint(label))
    }

    pub fn balance(&self, label: &str) -> CommandSpec {
        CommandSpec::new(&self.btrfs)
            .args(["balance", "start", "--bg", "--full-balance"])
            .arg(self.mountpoint(label))
    }

    pub fn scrub_status(&self, label: &str) -> CommandSpec {
        CommandSpec::new(&self.btrfs)
            .args(["scrub", "status"])
            .arg(self.mountpoint(label))
    }

    /// Exits 1 while a balance is running; see [`balance_status_succeeded`]
    pub fn balance_status(&self, label: &str) -> CommandSpec {
        CommandSpec::new(&self.btrfs)
            .args(["balance", "status"])
            .arg(self.mountpoint(label))
    }

    /// `<mount>/<path>`, or the mountpoint itself for an empty or `/` path
    pub fn subvolume(&self, label: &str, path: &str) -> Result<String> {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            return Ok(self.mountpoint(label));
        }
        validate::subvolume_path(path)?;
        Ok(self.mount_root.join(label).join(path).to_string_lossy().into_owned())
    }

    /// `btrfs subvolume snapshot [-r] <mount>/<source> <mount>/<destination>`
    pub fn snapshot_subvolume(
        &self,
        label: &str,
        source: &str,
        destination: &str,
        readonly: bool,
    ) -> Result<CommandSpec> {
        validate::subvolume_path(destination)?;
        let mut command = CommandSpec::new(&self.btrfs).args(["subvolume", "snapshot"]);
        if readonly {
            command = command.arg("-r");
        }
        Ok(command
            .arg(self.subvolume(label, source)?)
            .arg(self.subvolume(label, destination)?))
    }

    /// Snapshot subvolumes only, with creation times
    pub fn list_subvolume_snapshots(&self, label: &str) -> CommandSpec {
        CommandSpec::new(&self.btrfs)
            .args(["subvolume", "list", "-s"])
            .arg(self.mountpoint(label))
    }

    pub fn delete_subvolume(&self, label: &str, path: &str) -> Result<CommandSpec> {
        validate::subvolume_path(path)?;
        Ok(CommandSpec::new(&self.btrfs)
            .args(["subvolume", "delete"])
            .arg(self.subvolume(label, path)?))
    }
}

/// `btrfs balance status` reports a running or paused balance with exit 1
pub fn balance_status_succeeded(exit_code: i32, stdout: &str) -> bool {
    exit_code == 0 || (exit_code == 1 && stdout.contains("Balance on"))
}

// =============================================================================
// Parsers
// =============================================================================

/// Parse `btrfs filesystem show --raw`.
///
/// Unlabelled filesystems cannot be addressed by pool name and are skipped.
pub fn parse_filesystem_show(command: &str, stdout: &str) -> Result<Vec<StoragePool>> {
    struct Block {
        label: Option<String>,
        size: u64,
        used: u64,
        missing: bool,
    }

    fn finish(block: Block, pools: &mut Vec<StoragePool>) {
        if let Some(name) = block.label {
            pools.push(StoragePool {
                name,
                backend: Backend::Btrfs,
                size_bytes: block.size,
                allocated_bytes: block.used,
                free_bytes: block.size.saturating_sub(block.used),
                capacity_percent: capacity_percent(block.used, block.size),
                health: if block.missing {
                    PoolHealth::Degraded
                } else {
                    PoolHealth::Online
                },
                dedup_ratio: None,
                fragmentation_percent: None,
            });
        }
    }

    let mut pools = Vec::new();
    let mut current: Option<Block> = None;

    for (n, line) in parse::records(stdout) {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("Label:") {
            if let Some(block) = current.take() {
                finish(block, &mut pools);
            }
            let (label, _uuid) = rest
                .split_once("uuid:")
                .ok_or_else(|| parse_error(command, n, "label line without uuid"))?;
            let label = label.trim();
            let label = if label == "none" {
                None
            } else {
                Some(label.trim_matches('\'').to_string())
            };
            current = Some(Block {
                label,
                size: 0,
                used: 0,
                missing: false,
            });
            continue;
        }

        let block = current
            .as_mut()
            .ok_or_else(|| parse_error(command, n, "device line outside a filesystem block"))?;

        if trimmed.starts_with("devid") {
            let f: Vec<&str> = trimmed.split_whitespace().collect();
            if f.len() != 8 || f[2] != "size" || f[4] != "used" || f[6] != "path" {
                return Err(parse_error(
                    command,
                    n,
                    format!("expected 'devid N size S used U path P', found {} fields", f.len()),
                ));
            }
            block.size += parse::parse_bytes(command, n, "size", f[3])?;
            block.used += parse::parse_bytes(command, n, "used", f[5])?;
        } else if trimmed.contains("devices missing") {
            block.missing = true;
        }
    }
    if let Some(block) = current.take() {
        finish(block, &mut pools);
    }

    Ok(pools)
}

fn field<'a>(stdout: &'a str, key: &str) -> Option<&'a str> {
    stdout.lines().find_map(|line| {
        let (k, v) = line.split_once(':')?;
        (k.trim().eq_ignore_ascii_case(key)).then(|| v.trim())
    })
}

/// Parse `btrfs scrub status <mount>`
pub fn parse_scrub_status(stdout: &str) -> ActivityProgress {
    if stdout.contains("no stats available") {
        return ActivityProgress::idle();
    }

    let state = match field(stdout, "Status").map(str::to_ascii_lowercase).as_deref() {
        Some("running") => ActivityState::Running,
        Some("finished") => ActivityState::Finished,
        Some("aborted") => ActivityState::Canceled,
        Some("interrupted") => ActivityState::Paused,
        _ if stdout.contains("scrub started") && stdout.contains("running for") => ActivityState::Running,
        _ => ActivityState::Unknown,
    };

    let percent_done = match state {
        ActivityState::Finished => Some(100.0),
        _ => field(stdout, "Bytes scrubbed").and_then(|v| number_before(v, "%)")),
    };

    let errors = field(stdout, "Error summary").map(|summary| {
        if summary.contains("no errors") {
            0
        } else {
            summary
                .split_whitespace()
                .filter_map(|kv| kv.split_once('=').and_then(|(_, v)| v.parse::<u64>().ok()))
                .sum()
        }
    });

    ActivityProgress {
        state,
        percent_done,
        errors,
    }
}

/// Parse `btrfs subvolume list -s <mount>`.
///
/// `ID 257 gen 10 cgen 10 top level 5 otime 2024-01-01 10:00:00 path snaps/daily`.
/// The path is the rest of the line and may contain spaces; `otime -` means
/// no creation time was recorded.
pub fn parse_subvolume_list(command: &str, pool: &str, stdout: &str) -> Result<Vec<SubvolumeSnapshot>> {
    let mut snapshots = Vec::new();

    for (n, line) in parse::records(stdout) {
        let (head, path) = line
            .split_once(" path ")
            .ok_or_else(|| parse_error(command, n, "subvolume line without path"))?;
        let tokens: Vec<&str> = head.split_whitespace().collect();
        let after = |key: &str| {
            tokens
                .iter()
                .position(|t| *t == key)
                .and_then(|i| tokens.get(i + 1).copied())
        };
        let number = |key: &str| -> Result<u64> {
            let value = after(key).ok_or_else(|| parse_error(command, n, format!("missing {}", key)))?;
            value
                .parse()
                .map_err(|_| parse_error(command, n, format!("{}: invalid number '{}'", key, value)))
        };

        let id = number("ID")?;
        let generation = number("gen")?;
        let created_at = match tokens.iter().position(|t| *t == "otime") {
            Some(i) => match (tokens.get(i + 1), tokens.get(i + 2)) {
                (Some(&"-"), _) | (None, _) => None,
                (Some(date), Some(time)) => {
                    let stamp = format!("{} {}", date, time);
                    let naive = NaiveDateTime::parse_from_str(&stamp, "%Y-%m-%d %H:%M:%S")
                        .map_err(|_| parse_error(command, n, format!("otime: invalid timestamp '{}'", stamp)))?;
                    Some(Utc.from_utc_datetime(&naive))
                }
                (Some(date), None) => {
                    return Err(parse_error(command, n, format!("otime: incomplete timestamp '{}'", date)))
                }
            },
            None => None,
        };

        snapshots.push(SubvolumeSnapshot {
            pool: pool.to_string(),
            id,
            generation,
            path: path.trim().trim_start_matches("<FS_TREE>/").to_string(),
            created_at,
        });
    }

    Ok(snapshots)
}

/// Parse `btrfs balance status <mount>`
pub fn parse_balance_status(stdout: &str) -> ActivityProgress {
    if stdout.contains("No balance found") {
        return ActivityProgress::idle();
    }

    let state = if stdout.contains("is running") {
        ActivityState::Running
    } else if stdout.contains("is paused") {
        ActivityState::Paused
    } else {
        ActivityState::Unknown
    };

    // "2 out of about 10 chunks balanced (3 considered),  80% left"
    let percent_done = number_before(stdout, "% left").map(|left| 100.0 - left);
    let percent_done = percent_done.or_else(|| {
        let line = stdout.lines().find(|l| l.contains("out of about"))?;
        let done: f64 = line.split_whitespace().next()?.parse().ok()?;
        let total = integer_after(line, "out of about")?;
        (total > 0).then(|| done * 100.0 / total as f64)
    });

    ActivityProgress {
        state,
        percent_done,
        errors: None,
    }
}
