//! ZFS Backend
//!
//! Command construction for `zpool`/`zfs` and parsers for their scripted
//! (`-H -p`) output. Every list command requests an explicit column set so
//! the positional schema below is stable across OpenZFS releases.

use crate::controlplane::backends::parse::{
    self, capacity_percent, integer_after, number_before, parse_error, records, split_fields,
};
use crate::controlplane::backends::validate;
use crate::controlplane::backends::{PoolPlan, PoolRequest, SkippedOption};
use crate::domain::{
    ActivityProgress, ActivityState, Backend, CommandSpec, Dataset, PoolHealth, Snapshot,
    StoragePool,
};
use crate::error::{Error, Result};
use crate::hardware::tuning::{scope_of, ParameterScope, TuningParameterSet, ENCRYPTION};
use chrono::DateTime;

pub const POOL_COLUMNS: &str = "name,size,allocated,free,capacity,health,dedupratio,fragmentation";
pub const DATASET_COLUMNS: &str = "name,used,avail,refer,mountpoint,compression,quota";
pub const SNAPSHOT_COLUMNS: &str = "name,creation,used";

// =============================================================================
// Command Builder
// =============================================================================

/// Builds `zpool` and `zfs` invocations
#[derive(Debug, Clone)]
pub struct ZfsCommands {
    /// `zpool` binary
    pub zpool: String,
    /// `zfs` binary
    pub zfs: String,
}

impl Default for ZfsCommands {
    fn default() -> Self {
        Self {
            zpool: "zpool".to_string(),
            zfs: "zfs".to_string(),
        }
    }
}

impl ZfsCommands {
    pub fn list_pools(&self) -> CommandSpec {
        CommandSpec::new(&self.zpool).args(["list", "-H", "-p", "-o", POOL_COLUMNS])
    }

    /// `zpool create [-o pool-prop]... [-O fs-prop]... <name> <vdev> <devices>`.
    ///
    /// Module-scoped parameters are reported, not emitted. Encryption is only
    /// emitted together with a `keyformat`.
    pub fn create_pool(&self, request: &PoolRequest, options: &TuningParameterSet) -> Result<PoolPlan> {
        let vdev = request.raid_level.zfs_vdev().ok_or_else(|| {
            Error::Validation(format!("raid level {} is not a zfs vdev type", request.raid_level))
        })?;

        let mut command = CommandSpec::new(&self.zpool).arg("create");
        let mut plan = PoolPlan::default();

        for (key, value) in options.iter() {
            validate::property_name(key)?;
            validate::property_value(key, value)?;
            match scope_of(key) {
                ParameterScope::Module => {
                    plan.module_parameters.insert(key, value);
                }
                ParameterScope::Pool => {
                    command = command.arg("-o").arg(format!("{}={}", key, value));
                    plan.applied.insert(key, value);
                }
                ParameterScope::Filesystem => {
                    if key == ENCRYPTION && !options.contains("keyformat") {
                        plan.skipped.push(SkippedOption::new(
                            key,
                            value,
                            "encryption requires a keyformat option",
                        ));
                        continue;
                    }
                    command = command.arg("-O").arg(format!("{}={}", key, value));
                    plan.applied.insert(key, value);
                }
            }
        }

        plan.command = command
            .arg(&request.name)
            .arg(vdev)
            .args(request.devices.iter().cloned());
        Ok(plan)
    }

    pub fn destroy_pool(&self, name: &str) -> CommandSpec {
        CommandSpec::new(&self.zpool).args(["destroy", name])
    }

    pub fn scrub(&self, name: &str) -> CommandSpec {
        CommandSpec::new(&self.zpool).args(["scrub", name])
    }

    pub fn status(&self, name: &str) -> CommandSpec {
        CommandSpec::new(&self.zpool).args(["status", name])
    }

    pub fn list_datasets(&self) -> CommandSpec {
        CommandSpec::new(&self.zfs).args([
            "list",
            "-H",
            "-p",
            "-t",
            "filesystem,volume",
            "-o",
            DATASET_COLUMNS,
        ])
    }

    /// `zfs create [-o prop=value]... <name>`
    pub fn create_dataset(&self, name: &str, properties: &TuningParameterSet) -> Result<CommandSpec> {
        let mut command = CommandSpec::new(&self.zfs).arg("create");
        for (key, value) in properties.iter() {
            validate::property_name(key)?;
            validate::property_value(key, value)?;
            command = command.arg("-o").arg(format!("{}={}", key, value));
        }
        Ok(command.arg(name))
    }

    /// Snapshots oldest first
    pub fn list_snapshots(&self) -> CommandSpec {
        CommandSpec::new(&self.zfs).args([
            "list",
            "-H",
            "-p",
            "-t",
            "snapshot",
            "-s",
            "creation",
            "-o",
            SNAPSHOT_COLUMNS,
        ])
    }

    pub fn snapshot(&self, qualified: &str) -> CommandSpec {
        CommandSpec::new(&self.zfs).args(["snapshot", qualified])
    }

    pub fn rollback(&self, qualified: &str, recursive: bool) -> CommandSpec {
        let command = CommandSpec::new(&self.zfs).arg("rollback");
        let command = if recursive { command.arg("-r") } else { command };
        command.arg(qualified)
    }

    pub fn clone_snapshot(&self, qualified: &str, target: &str) -> CommandSpec {
        CommandSpec::new(&self.zfs).args(["clone", qualified, target])
    }

    pub fn destroy_snapshot(&self, qualified: &str) -> CommandSpec {
        CommandSpec::new(&self.zfs).args(["destroy", qualified])
    }

    pub fn set_property(&self, target: &str, property: &str, value: &str) -> CommandSpec {
        CommandSpec::new(&self.zfs)
            .arg("set")
            .arg(format!("{}={}", property, value))
            .arg(target)
    }

    pub fn send(&self, snapshot: &str, incremental_base: Option<&str>) -> CommandSpec {
        let command = CommandSpec::new(&self.zfs).arg("send");
        let command = match incremental_base {
            Some(base) => command.args(["-i", base]),
            None => command,
        };
        command.arg(snapshot)
    }

    pub fn receive(&self, target: &str) -> CommandSpec {
        CommandSpec::new(&self.zfs).args(["receive", target])
    }
}

// =============================================================================
// Parsers
// =============================================================================

/// Records, minus the "no pools available" style notice printed for empty listings
fn listing(stdout: &str) -> impl Iterator<Item = (usize, &str)> {
    records(stdout).filter(|(_, line)| {
        let line = line.trim();
        !(line.starts_with("no ") && line.ends_with(" available"))
    })
}

/// Parse `zpool list -H -p -o name,size,allocated,free,capacity,health,dedupratio,fragmentation`
pub fn parse_pool_list(command: &str, stdout: &str) -> Result<Vec<StoragePool>> {
    listing(stdout)
        .map(|(n, line)| {
            let f = split_fields(command, n, line, '\t', 8)?;
            let size_bytes = parse::parse_bytes(command, n, "size", f[1])?;
            let allocated_bytes = parse::parse_bytes(command, n, "allocated", f[2])?;
            let capacity_percent = match f[4].trim() {
                "-" => capacity_percent(allocated_bytes, size_bytes),
                value => parse::parse_percent(command, n, "capacity", value)?,
            };
            Ok(StoragePool {
                name: f[0].to_string(),
                backend: Backend::Zfs,
                size_bytes,
                allocated_bytes,
                free_bytes: parse::parse_bytes(command, n, "free", f[3])?,
                capacity_percent,
                health: PoolHealth::from_backend_state(f[5]),
                dedup_ratio: parse::parse_ratio(command, n, "dedupratio", f[6])?,
                fragmentation_percent: parse::parse_optional_percent(command, n, "fragmentation", f[7])?,
            })
        })
        .collect()
}

/// Parse `zfs list -H -p -o name,used,avail,refer,mountpoint,compression,quota`
pub fn parse_dataset_list(command: &str, stdout: &str) -> Result<Vec<Dataset>> {
    listing(stdout)
        .map(|(n, line)| {
            let f = split_fields(command, n, line, '\t', 7)?;
            let name = f[0].to_string();
            let pool_name = name.split('/').next().unwrap_or_default().to_string();
            Ok(Dataset {
                used_bytes: parse::parse_bytes(command, n, "used", f[1])?,
                avail_bytes: parse::parse_bytes(command, n, "avail", f[2])?,
                refer_bytes: parse::parse_bytes(command, n, "refer", f[3])?,
                mountpoint: f[4].to_string(),
                compression: f[5].to_string(),
                quota: parse::parse_optional_bytes(command, n, "quota", f[6])?,
                name,
                pool_name,
            })
        })
        .collect()
}

/// Parse `zfs list -H -p -t snapshot -o name,creation,used`
pub fn parse_snapshot_list(command: &str, stdout: &str) -> Result<Vec<Snapshot>> {
    listing(stdout)
        .map(|(n, line)| {
            let f = split_fields(command, n, line, '\t', 3)?;
            if !f[0].contains('@') {
                return Err(parse_error(command, n, format!("'{}' is not a snapshot name", f[0])));
            }
            let seconds: i64 = f[1]
                .trim()
                .parse()
                .map_err(|_| parse_error(command, n, format!("creation: invalid timestamp '{}'", f[1])))?;
            let creation_time = DateTime::from_timestamp(seconds, 0)
                .ok_or_else(|| parse_error(command, n, format!("creation: out of range '{}'", seconds)))?;
            Ok(Snapshot {
                qualified_name: f[0].to_string(),
                creation_time,
                used_bytes: parse::parse_bytes(command, n, "used", f[2])?,
            })
        })
        .collect()
}

/// Parse `zpool status <pool>` into health and scrub progress
pub fn parse_status(command: &str, stdout: &str) -> Result<(PoolHealth, ActivityProgress)> {
    let mut health = None;
    let mut scan = String::new();
    let mut in_scan = false;

    for line in stdout.lines() {
        let trimmed = line.trim();
        if let Some((key, value)) = trimmed.split_once(':') {
            let key = key.trim();
            if !key.is_empty() && !key.contains(' ') && key.chars().all(|c| c.is_ascii_lowercase()) {
                in_scan = key == "scan";
                match key {
                    "state" => health = Some(PoolHealth::from_backend_state(value)),
                    "scan" => scan.push_str(value.trim()),
                    _ => {}
                }
                continue;
            }
        }
        if in_scan && !trimmed.is_empty() {
            scan.push(' ');
            scan.push_str(trimmed);
        }
    }

    let health = health.ok_or_else(|| parse_error(command, 0, "missing 'state:' line"))?;
    Ok((health, parse_scan(&scan)))
}

fn parse_scan(scan: &str) -> ActivityProgress {
    let state = if scan.is_empty() || scan.contains("none requested") {
        ActivityState::Idle
    } else if scan.contains("in progress") {
        ActivityState::Running
    } else if scan.contains("paused") {
        ActivityState::Paused
    } else if scan.contains("canceled") {
        ActivityState::Canceled
    } else if scan.contains("repaired") || scan.contains("resilvered") {
        ActivityState::Finished
    } else {
        ActivityState::Unknown
    };

    let percent_done = match state {
        ActivityState::Finished => Some(100.0),
        _ => number_before(scan, "% done"),
    };
    let errors = match state {
        ActivityState::Finished => integer_after(scan, " with "),
        _ => None,
    };

    ActivityProgress {
        state,
        percent_done,
        errors,
    }
}
