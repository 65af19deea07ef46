//! Input validation for backend identifiers
//!
//! Every name that ends up in an argument vector passes through here first.
//! Arguments are never shell-interpolated, but a name starting with `-` would
//! still be read as a flag by the backend CLI, so that is rejected too.

use crate::error::{Error, Result};
use std::collections::BTreeSet;

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-')
}

fn check_component(kind: &str, value: &str, component: &str) -> Result<()> {
    if component.is_empty() {
        return Err(Error::Validation(format!("{} '{}' has an empty component", kind, value)));
    }
    if component.starts_with('-') {
        return Err(Error::Validation(format!(
            "{} '{}' must not start with '-'",
            kind, value
        )));
    }
    if component == "." || component == ".." {
        return Err(Error::Validation(format!("{} '{}' is not a valid name", kind, value)));
    }
    if let Some(bad) = component.chars().find(|c| !is_name_char(*c)) {
        return Err(Error::Validation(format!(
            "{} '{}' contains invalid character {:?}",
            kind, value, bad
        )));
    }
    Ok(())
}

/// Pool names: one component
pub fn pool_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation("pool name must not be empty".into()));
    }
    check_component("pool name", name, name)
}

/// Dataset names: `pool[/child...]`
pub fn dataset_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation("dataset name must not be empty".into()));
    }
    for component in name.split('/') {
        check_component("dataset name", name, component)?;
    }
    Ok(())
}

/// Subvolume paths below a pool mountpoint: `dir[/child...]`, relative
pub fn subvolume_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::Validation("subvolume path must not be empty".into()));
    }
    for component in path.split('/') {
        check_component("subvolume path", path, component)?;
    }
    Ok(())
}

/// Snapshot labels may not contain `@`, `/` or whitespace
pub fn snapshot_label(label: &str) -> Result<()> {
    if label.is_empty() {
        return Err(Error::Validation("snapshot label must not be empty".into()));
    }
    if let Some(bad) = label
        .chars()
        .find(|c| *c == '@' || *c == '/' || c.is_whitespace())
    {
        return Err(Error::Validation(format!(
            "snapshot label '{}' must not contain {:?}",
            label, bad
        )));
    }
    check_component("snapshot label", label, label)
}

/// Split `dataset@label`, validating both halves
pub fn qualified_snapshot(name: &str) -> Result<(&str, &str)> {
    let (dataset, label) = name.split_once('@').ok_or_else(|| {
        Error::Validation(format!("'{}' is not a snapshot name (dataset@label)", name))
    })?;
    dataset_name(dataset)?;
    snapshot_label(label)?;
    Ok((dataset, label))
}

/// Property names (`compression`, `com.example:tag`, `chunk`)
pub fn property_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .next()
            .map_or(false, |c| c.is_ascii_lowercase())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | ':' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid property name '{}'", name)))
    }
}

/// Property values may not contain control characters or start with `-`
pub fn property_value(name: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.starts_with('-') || value.chars().any(char::is_control) {
        return Err(Error::Validation(format!(
            "invalid value '{}' for property '{}'",
            value, name
        )));
    }
    Ok(())
}

/// Device lists: non-empty, absolute `/dev/...` paths, no duplicates
pub fn devices(devices: &[String]) -> Result<()> {
    if devices.is_empty() {
        return Err(Error::InvalidDevice {
            device: String::new(),
            reason: "device list is empty".into(),
        });
    }

    let mut seen = BTreeSet::new();
    for device in devices {
        let rest = device.strip_prefix("/dev/").ok_or_else(|| Error::InvalidDevice {
            device: device.clone(),
            reason: "device must be an absolute /dev path".into(),
        })?;
        if rest.is_empty()
            || device.contains(char::is_whitespace)
            || device.contains(char::is_control)
            || rest.split('/').any(|c| c.is_empty() || c == "..")
        {
            return Err(Error::InvalidDevice {
                device: device.clone(),
                reason: "malformed device path".into(),
            });
        }
        if !seen.insert(device.as_str()) {
            return Err(Error::InvalidDevice {
                device: device.clone(),
                reason: "device listed more than once".into(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_pool_names() {
        assert!(pool_name("tank").is_ok());
        assert!(pool_name("data_01.fast").is_ok());
        assert!(pool_name("").is_err());
        assert!(pool_name("-f").is_err());
        assert!(pool_name("tank/child").is_err());
        assert!(pool_name("tank; rm -rf /").is_err());
    }

    #[test]
    fn test_dataset_names() {
        assert!(dataset_name("tank/data/photos").is_ok());
        assert!(dataset_name("tank//data").is_err());
        assert!(dataset_name("tank/data@snap").is_err());
        assert!(dataset_name("tank/../etc").is_err());
    }

    #[test]
    fn test_subvolume_paths() {
        assert!(subvolume_path("snaps/daily-2024.01.01").is_ok());
        assert!(subvolume_path("home").is_ok());
        assert_matches!(subvolume_path("/snaps"), Err(Error::Validation(_)));
        assert_matches!(subvolume_path("snaps/../../etc"), Err(Error::Validation(_)));
        assert_matches!(subvolume_path("snaps/-r"), Err(Error::Validation(_)));
        assert!(subvolume_path("").is_err());
    }

    #[test]
    fn test_snapshot_labels() {
        assert!(snapshot_label("daily-2024.01.01").is_ok());
        assert_matches!(snapshot_label("a@b"), Err(Error::Validation(_)));
        assert_matches!(snapshot_label("a/b"), Err(Error::Validation(_)));
        assert_matches!(snapshot_label("a b"), Err(Error::Validation(_)));
        assert_matches!(snapshot_label("a\tb"), Err(Error::Validation(_)));
        assert!(snapshot_label("").is_err());
    }

    #[test]
    fn test_qualified_snapshot() {
        assert_eq!(
            qualified_snapshot("tank/data@daily").unwrap(),
            ("tank/data", "daily")
        );
        assert!(qualified_snapshot("tank/data").is_err());
        assert!(qualified_snapshot("tank/data@a@b").is_err());
    }

    #[test]
    fn test_properties() {
        assert!(property_name("compression").is_ok());
        assert!(property_name("com.example:tag").is_ok());
        assert!(property_name("Compression").is_err());
        assert!(property_name("-o").is_err());
        assert!(property_value("quota", "10G").is_ok());
        assert!(property_value("quota", "-1").is_err());
        assert!(property_value("quota", "").is_err());
    }

    #[test]
    fn test_devices() {
        assert!(devices(&["/dev/sda".into(), "/dev/disk/by-id/ata-X".into()]).is_ok());
        assert_matches!(devices(&[]), Err(Error::InvalidDevice { .. }));
        assert_matches!(devices(&["sda".into()]), Err(Error::InvalidDevice { .. }));
        assert_matches!(
            devices(&["/dev/../etc/passwd".into()]),
            Err(Error::InvalidDevice { .. })
        );
        assert_matches!(
            devices(&["/dev/sda".into(), "/dev/sda".into()]),
            Err(Error::InvalidDevice { .. })
        );
    }
}
