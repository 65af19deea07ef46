//! mdadm Backend
//!
//! Software RAID arrays. New arrays are created as `/dev/md/<name>`; existing
//! ones keep whatever node the scan reports (`/dev/md0` on many hosts). An
//! array is a raw block device, so it is reported as fully allocated.

use crate::controlplane::backends::parse::{self, number_before, parse_error};
use crate::controlplane::backends::validate;
use crate::controlplane::backends::{PoolPlan, PoolRequest};
use crate::domain::{ActivityProgress, ActivityState, Backend, CommandSpec, PoolHealth, StoragePool};
use crate::error::{Error, Result};
use crate::hardware::tuning::TuningParameterSet;

// =============================================================================
// Command Builder
// =============================================================================

/// Builds `mdadm` invocations
#[derive(Debug, Clone)]
pub struct MdadmCommands {
    pub mdadm: String,
}

impl Default for MdadmCommands {
    fn default() -> Self {
        Self {
            mdadm: "mdadm".to_string(),
        }
    }
}

/// Device node of a named array
pub fn array_device(name: &str) -> String {
    format!("/dev/md/{}", name)
}

impl MdadmCommands {
    pub fn list_pools(&self) -> CommandSpec {
        CommandSpec::new(&self.mdadm).args(["--detail", "--scan"])
    }

    /// `mdadm --create /dev/md/<name> --run --level=N --raid-devices=K [--opt=v]... <devices>`
    pub fn create_pool(&self, request: &PoolRequest, overrides: &TuningParameterSet) -> Result<PoolPlan> {
        let level = request.raid_level.md_level().ok_or_else(|| {
            Error::Validation(format!("raid level {} is not an mdadm level", request.raid_level))
        })?;

        let mut command = CommandSpec::new(&self.mdadm)
            .arg("--create")
            .arg(array_device(&request.name))
            .arg("--run")
            .arg(format!("--level={}", level))
            .arg(format!("--raid-devices={}", request.devices.len()));
        let mut plan = PoolPlan::default();

        for (key, value) in overrides.iter() {
            validate::property_name(key)?;
            validate::property_value(key, value)?;
            command = command.arg(format!("--{}={}", key.replace('_', "-"), value));
            plan.applied.insert(key, value);
        }

        plan.command = command.args(request.devices.iter().cloned());
        Ok(plan)
    }

    /// `device` is the node `--detail --scan` reported, which is not always
    /// `/dev/md/<name>`
    pub fn stop(&self, device: &str) -> CommandSpec {
        CommandSpec::new(&self.mdadm).args(["--stop", device])
    }

    /// Start a consistency check (the md equivalent of a scrub)
    pub fn check(&self, device: &str) -> CommandSpec {
        CommandSpec::new(&self.mdadm).args(["--action=check", device])
    }

    pub fn detail(&self, device: &str) -> CommandSpec {
        CommandSpec::new(&self.mdadm).args(["--detail", device])
    }
}

// =============================================================================
// Parsers
// =============================================================================

/// One `ARRAY` line from `mdadm --detail --scan`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedArray {
    pub name: String,
    pub device: String,
}

/// Parse `mdadm --detail --scan`
pub fn parse_scan(command: &str, stdout: &str) -> Result<Vec<ScannedArray>> {
    parse::records(stdout)
        .map(|(n, line)| {
            let mut tokens = line.split_whitespace();
            match (tokens.next(), tokens.next()) {
                (Some("ARRAY"), Some(device)) => {
                    let name = device
                        .strip_prefix("/dev/md/")
                        .or_else(|| device.strip_prefix("/dev/"))
                        .unwrap_or(device)
                        .to_string();
                    Ok(ScannedArray {
                        name,
                        device: device.to_string(),
                    })
                }
                _ => Err(parse_error(command, n, "expected 'ARRAY <device> ...'")),
            }
        })
        .collect()
}

/// Parsed `mdadm --detail <device>`
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayDetail {
    pub state: String,
    pub health: PoolHealth,
    pub size_bytes: u64,
    pub check: ActivityProgress,
}

impl ArrayDetail {
    pub fn into_pool(self, name: String) -> StoragePool {
        StoragePool {
            name,
            backend: Backend::Mdadm,
            size_bytes: self.size_bytes,
            allocated_bytes: self.size_bytes,
            free_bytes: 0,
            capacity_percent: 100,
            health: self.health,
            dedup_ratio: None,
            fragmentation_percent: None,
        }
    }
}

/// Parse `mdadm --detail <device>`
pub fn parse_detail(command: &str, stdout: &str) -> Result<ArrayDetail> {
    let mut state = None;
    let mut size_bytes = 0;
    let mut check = None;

    for (n, line) in parse::records(stdout) {
        let Some((key, value)) = line.split_once(" : ") else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "State" => state = Some(value.to_string()),
            "Array Size" => {
                // "10476544 (9.99 GiB 10.73 GB)", in KiB
                let kib = value.split_whitespace().next().unwrap_or_default();
                size_bytes = parse::parse_bytes(command, n, "Array Size", kib)?
                    .checked_mul(1024)
                    .ok_or_else(|| parse_error(command, n, format!("Array Size: {} KiB overflows", kib)))?;
            }
            "Check Status" => {
                check = Some(ActivityProgress {
                    state: ActivityState::Running,
                    percent_done: number_before(value, "% complete"),
                    errors: None,
                });
            }
            _ => {}
        }
    }

    let state = state.ok_or_else(|| parse_error(command, 0, "missing 'State :' line"))?;
    let health = PoolHealth::from_backend_state(&state);
    let check = check.unwrap_or_else(|| {
        if state.contains("checking") {
            ActivityProgress {
                state: ActivityState::Running,
                percent_done: None,
                errors: None,
            }
        } else {
            ActivityProgress::idle()
        }
    });

    Ok(ArrayDetail {
        state,
        health,
        size_bytes,
        check,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::RaidLevel;
    use assert_matches::assert_matches;

    const DETAIL: &str = "/dev/md/data:\n\
        \x20          Version : 1.2\n\
        \x20       Raid Level : raid1\n\
        \x20       Array Size : 10476544 (9.99 GiB 10.73 GB)\n\
        \x20     Raid Devices : 2\n\
        \x20            State : clean, checking\n\
        \x20     Check Status : 42% complete\n";

    #[test]
    fn test_create_pool_command() {
        let request = PoolRequest::new(
            "data",
            Backend::Mdadm,
            vec!["/dev/sdb".into(), "/dev/sdc".into(), "/dev/sdd".into()],
            RaidLevel::Raid5,
        );
        let overrides: TuningParameterSet = [("chunk", "512"), ("bitmap", "internal")].into_iter().collect();
        let plan = MdadmCommands::default().create_pool(&request, &overrides).unwrap();
        assert_eq!(
            plan.command.to_string(),
            "mdadm --create /dev/md/data --run --level=5 --raid-devices=3 --bitmap=internal --chunk=512 /dev/sdb /dev/sdc /dev/sdd"
        );
    }

    #[test]
    fn test_parse_scan() {
        let out = "ARRAY /dev/md/data metadata=1.2 name=host:data UUID=a:b:c:d\n\
                   ARRAY /dev/md0 metadata=1.2 UUID=e:f:g:h\n";
        let arrays = parse_scan("mdadm --detail --scan", out).unwrap();
        assert_eq!(arrays[0].name, "data");
        assert_eq!(arrays[1].name, "md0");
        assert_eq!(arrays[1].device, "/dev/md0");

        assert_matches!(
            parse_scan("mdadm --detail --scan", "mdadm: bogus\n"),
            Err(Error::Parse { line: 1, .. })
        );
    }

    #[test]
    fn test_parse_detail() {
        let detail = parse_detail("mdadm --detail", DETAIL).unwrap();
        assert_eq!(detail.health, PoolHealth::Online);
        assert_eq!(detail.size_bytes, 10476544 * 1024);
        assert_eq!(detail.check.state, ActivityState::Running);
        assert_eq!(detail.check.percent_done, Some(42.0));

        let pool = detail.into_pool("data".into());
        assert_eq!(pool.capacity_percent, 100);
    }

    #[test]
    fn test_parse_detail_rejects_oversized_array() {
        let out = "State : clean\nArray Size : 18014398509481984 (huge)\n";
        assert_matches!(
            parse_detail("mdadm --detail", out),
            Err(Error::Parse { line: 2, .. })
        );
    }

    #[test]
    fn test_parse_detail_failed_array_is_faulted() {
        let out = "State : clean, FAILED\nArray Size : 1024 (1.00 MiB)\n";
        assert_eq!(parse_detail("mdadm --detail", out).unwrap().health, PoolHealth::Faulted);
    }

    #[test]
    fn test_stop_and_check_use_scanned_device() {
        let mdadm = MdadmCommands::default();
        assert_eq!(mdadm.stop("/dev/md0").to_string(), "mdadm --stop /dev/md0");
        assert_eq!(mdadm.check("/dev/md0").to_string(), "mdadm --action=check /dev/md0");
    }

    #[test]
    fn test_parse_detail_health_follows_state() {
        let out = "State : clean, resyncing\nResync Status : 10% complete\n";
        let detail = parse_detail("mdadm --detail", out).unwrap();
        assert_eq!(detail.health, PoolHealth::Online);
        assert_eq!(detail.check, ActivityProgress::idle());

        let out = "State : active, degraded, recovering\nRebuild Status : 10% complete\n";
        assert_eq!(parse_detail("mdadm --detail", out).unwrap().health, PoolHealth::Degraded);
    }
}
