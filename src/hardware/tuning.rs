//! Tuning Policy
//!
//! Pure mapping from an [`ArchitectureProfile`] to backend tuning parameters
//! and advisory resource ceilings. Nothing here is cached or persisted; the
//! orchestrator recomputes the set on every call.

use crate::hardware::features::HwFeature;
use crate::hardware::profiler::ArchitectureProfile;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Parameter Keys
// =============================================================================

pub const ASHIFT: &str = "ashift";
pub const PRIMARYCACHE: &str = "primarycache";
pub const COMPRESSION: &str = "compression";
pub const XATTR: &str = "xattr";
pub const ARC_MAX: &str = "arc_max";
pub const PREFETCH_DISABLE: &str = "prefetch_disable";
pub const TXG_TIMEOUT: &str = "txg_timeout";
pub const ENCRYPTION: &str = "encryption";

/// Keys every parameter set carries
pub const REQUIRED_KEYS: [&str; 7] = [
    ASHIFT,
    PRIMARYCACHE,
    COMPRESSION,
    XATTR,
    ARC_MAX,
    PREFETCH_DISABLE,
    TXG_TIMEOUT,
];

/// Where a tuning parameter is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterScope {
    /// Pool creation property (`zpool create -o`)
    Pool,
    /// Filesystem property (`-O` on pools, `-o` on datasets)
    Filesystem,
    /// Kernel module parameter, never placed on a command line
    Module,
}

/// Scope of a parameter key. Unknown keys are treated as filesystem
/// properties, which is where caller overrides normally land.
pub fn scope_of(key: &str) -> ParameterScope {
    match key {
        ASHIFT => ParameterScope::Pool,
        ARC_MAX | PREFETCH_DISABLE | TXG_TIMEOUT => ParameterScope::Module,
        _ => ParameterScope::Filesystem,
    }
}

// =============================================================================
// Tuning Parameter Set
// =============================================================================

/// Ordered name -> value mapping of tuning parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TuningParameterSet(BTreeMap<String, String>);

impl TuningParameterSet {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every required key is present
    pub fn is_total(&self) -> bool {
        REQUIRED_KEYS.iter().all(|k| self.contains(k))
    }

    /// Overlay caller overrides; the override wins on key collision
    pub fn merged_with(&self, overrides: &TuningParameterSet) -> Self {
        let mut merged = self.clone();
        for (key, value) in overrides.iter() {
            merged.insert(key, value);
        }
        merged
    }

    pub fn compression(&self) -> Option<&str> {
        self.get(COMPRESSION)
    }

    pub fn primarycache(&self) -> Option<&str> {
        self.get(PRIMARYCACHE)
    }

    pub fn encryption(&self) -> Option<&str> {
        self.get(ENCRYPTION)
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.0
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TuningParameterSet {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

// =============================================================================
// Resource Limits
// =============================================================================

/// Advisory resource ceilings for workloads on this host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    pub max_containers: u32,
    pub max_cpu_percent: u32,
    pub max_memory_percent: u32,
    pub swap_limit_mb: u32,
}

// =============================================================================
// Policy
// =============================================================================

/// Recommended parameter set for a profile.
///
/// ARM hosts get a memory-frugal profile (metadata-only cache, small ARC, no
/// prefetch); everything else gets the x86 column.
pub fn policy(profile: &ArchitectureProfile) -> TuningParameterSet {
    let mut params: TuningParameterSet = if profile.is_arm {
        [
            (ASHIFT, "12"),
            (PRIMARYCACHE, "metadata"),
            (COMPRESSION, "lz4"),
            (XATTR, "sa"),
            (ARC_MAX, "1G"),
            (PREFETCH_DISABLE, "1"),
            (TXG_TIMEOUT, "10"),
        ]
        .into_iter()
        .collect()
    } else {
        [
            (ASHIFT, "12"),
            (PRIMARYCACHE, "all"),
            (COMPRESSION, "zstd"),
            (XATTR, "sa"),
            (ARC_MAX, "8G"),
            (PREFETCH_DISABLE, "0"),
            (TXG_TIMEOUT, "5"),
        ]
        .into_iter()
        .collect()
    };

    if profile.has_feature(HwFeature::AesNi) {
        params.insert(ENCRYPTION, "aes-256-gcm");
    }
    // NEON-accelerated lz4 beats the base table choice
    if profile.has_feature(HwFeature::Neon) {
        params.insert(COMPRESSION, "lz4");
    }

    params
}

/// Advisory ceilings for a profile
pub fn resource_limits(profile: &ArchitectureProfile) -> ResourceLimits {
    if profile.is_arm {
        ResourceLimits {
            max_containers: 20,
            max_cpu_percent: 80,
            max_memory_percent: 75,
            swap_limit_mb: 2048,
        }
    } else {
        ResourceLimits {
            max_containers: 50,
            max_cpu_percent: 90,
            max_memory_percent: 85,
            swap_limit_mb: 4096,
        }
    }
}

// =============================================================================
// Architecture Report
// =============================================================================

/// Combined architecture/tuning view for the request layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchitectureReport {
    pub architecture: String,
    pub is_arm: bool,
    pub is_x86: bool,
    pub hardware_acceleration: Vec<HwFeature>,
    pub tuning_parameters: TuningParameterSet,
    pub resource_limits: ResourceLimits,
}

impl ArchitectureReport {
    pub fn from_profile(profile: &ArchitectureProfile) -> Self {
        Self {
            architecture: profile.arch_string.clone(),
            is_arm: profile.is_arm,
            is_x86: profile.is_x86,
            hardware_acceleration: profile.hw_features.iter().copied().collect(),
            tuning_parameters: policy(profile),
            resource_limits: resource_limits(profile),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arm_base_table() {
        let params = policy(&ArchitectureProfile::new("aarch64", []));
        assert!(params.is_total());
        assert_eq!(params.primarycache(), Some("metadata"));
        assert_eq!(params.compression(), Some("lz4"));
        assert_eq!(params.get(ARC_MAX), Some("1G"));
        assert_eq!(params.get(PREFETCH_DISABLE), Some("1"));
        assert_eq!(params.get(TXG_TIMEOUT), Some("10"));
        assert_eq!(params.encryption(), None);
    }

    #[test]
    fn test_x86_base_table() {
        let params = policy(&ArchitectureProfile::new("x86_64", []));
        assert!(params.is_total());
        assert_eq!(params.primarycache(), Some("all"));
        assert_eq!(params.compression(), Some("zstd"));
        assert_eq!(params.get(ARC_MAX), Some("8G"));
        assert_eq!(params.get(TXG_TIMEOUT), Some("5"));
    }

    #[test]
    fn test_overlays() {
        let params = policy(&ArchitectureProfile::new("x86_64", [HwFeature::AesNi]));
        assert_eq!(params.encryption(), Some("aes-256-gcm"));
        assert_eq!(params.compression(), Some("zstd"));

        // NEON forces lz4 even where the base table says otherwise
        let params = policy(&ArchitectureProfile::new("riscv64", [HwFeature::Neon]));
        assert_eq!(params.compression(), Some("lz4"));
        assert_eq!(params.primarycache(), Some("all"));
    }

    #[test]
    fn test_unknown_arch_is_total() {
        let params = policy(&ArchitectureProfile::new("riscv64", []));
        assert!(params.is_total());
    }

    #[test]
    fn test_merge_override_wins() {
        let base = policy(&ArchitectureProfile::new("x86_64", []));
        let overrides: TuningParameterSet = [("compression", "gzip-9"), ("atime", "off")]
            .into_iter()
            .collect();
        let merged = base.merged_with(&overrides);
        assert_eq!(merged.compression(), Some("gzip-9"));
        assert_eq!(merged.get("atime"), Some("off"));
        assert_eq!(merged.get(ASHIFT), Some("12"));
    }

    #[test]
    fn test_scopes() {
        assert_eq!(scope_of(ASHIFT), ParameterScope::Pool);
        assert_eq!(scope_of(ARC_MAX), ParameterScope::Module);
        assert_eq!(scope_of(COMPRESSION), ParameterScope::Filesystem);
        assert_eq!(scope_of("recordsize"), ParameterScope::Filesystem);
    }

    #[test]
    fn test_resource_limits() {
        let arm = resource_limits(&ArchitectureProfile::new("armv7l", []));
        assert_eq!(arm.max_containers, 20);
        assert_eq!((arm.max_cpu_percent, arm.max_memory_percent), (80, 75));

        let x86 = resource_limits(&ArchitectureProfile::new("x86_64", []));
        assert_eq!(x86.max_containers, 50);
        assert_eq!((x86.max_cpu_percent, x86.max_memory_percent), (90, 85));
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let report = ArchitectureReport::from_profile(&ArchitectureProfile::new(
            "x86_64",
            [HwFeature::AesNi, HwFeature::Avx],
        ));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["isX86"], true);
        assert_eq!(json["hardwareAcceleration"][0], "AES-NI");
        assert_eq!(json["tuningParameters"]["encryption"], "aes-256-gcm");
    }
}
