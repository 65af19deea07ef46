//! Architecture Profiler
//!
//! Probes the host CPU architecture and acceleration features once and
//! exposes the result as an immutable [`ArchitectureProfile`]. The profiler
//! is an explicitly constructed object handed to whoever needs it; there is
//! no process-global instance.

use crate::domain::ports::{CommandRunnerRef, CommandSpec, CpuInspector, CpuInspectorRef};
use crate::error::{Error, Result};
use crate::hardware::features::{features_from_cpuinfo, features_from_flags, HwFeature};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

// =============================================================================
// Architecture Profile
// =============================================================================

/// Immutable description of the host CPU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchitectureProfile {
    pub arch_string: String,
    pub is_arm: bool,
    pub is_x86: bool,
    pub hw_features: BTreeSet<HwFeature>,
}

impl ArchitectureProfile {
    /// Build a profile from an architecture string and a feature set
    pub fn new(arch: impl Into<String>, hw_features: impl IntoIterator<Item = HwFeature>) -> Self {
        let arch_string = arch.into().trim().to_string();
        let (is_arm, is_x86) = classify_arch(&arch_string);
        Self {
            arch_string,
            is_arm,
            is_x86,
            hw_features: hw_features.into_iter().collect(),
        }
    }

    pub fn has_feature(&self, feature: HwFeature) -> bool {
        self.hw_features.contains(&feature)
    }
}

/// Classify an architecture string into (is_arm, is_x86)
pub fn classify_arch(arch: &str) -> (bool, bool) {
    let arch = arch.to_ascii_lowercase();
    let is_arm = arch.contains("arm") || arch.contains("aarch64");
    let is_x86 = arch.contains("x86") || arch.contains("amd64");
    (is_arm, is_x86)
}

// =============================================================================
// Profiler
// =============================================================================

/// Lazily computes the architecture profile, at most once
pub struct ArchitectureProfiler {
    inspector: CpuInspectorRef,
    profile: OnceCell<ArchitectureProfile>,
}

impl ArchitectureProfiler {
    /// Create a profiler over the given inspector
    pub fn new(inspector: CpuInspectorRef) -> Self {
        Self {
            inspector,
            profile: OnceCell::new(),
        }
    }

    /// Probe the architecture. A second call after success is a no-op.
    pub async fn initialize(&self) -> Result<()> {
        self.profile
            .get_or_try_init(|| async {
                let arch = self.inspector.architecture().await.map_err(|e| {
                    Error::Probe(format!("architecture unavailable: {}", e))
                })?;
                if arch.trim().is_empty() {
                    return Err(Error::Probe("empty architecture string".into()));
                }

                let (is_arm, is_x86) = classify_arch(&arch);
                let features = self.probe_features(is_arm, is_x86).await;

                info!("Detected architecture: {}", arch.trim());
                info!("  ARM: {}, x86: {}", is_arm, is_x86);
                info!(
                    "  Acceleration: {}",
                    features
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                );

                Ok(ArchitectureProfile::new(arch, features))
            })
            .await?;
        Ok(())
    }

    /// The cached profile
    pub fn get_profile(&self) -> Result<&ArchitectureProfile> {
        self.profile.get().ok_or(Error::NotInitialized)
    }

    /// Re-probe CPU acceleration features.
    ///
    /// Independent of the cached profile; each probe that fails only drops
    /// the features it would have contributed.
    pub async fn get_hardware_acceleration(&self) -> Result<BTreeSet<HwFeature>> {
        let (is_arm, is_x86) = match self.profile.get() {
            Some(p) => (p.is_arm, p.is_x86),
            None => {
                let arch = self.inspector.architecture().await?;
                classify_arch(&arch)
            }
        };
        Ok(self.probe_features(is_arm, is_x86).await)
    }

    async fn probe_features(&self, is_arm: bool, is_x86: bool) -> BTreeSet<HwFeature> {
        let mut features = BTreeSet::new();

        match self.inspector.cpuinfo().await {
            Ok(text) => {
                features.extend(features_from_cpuinfo(&text, is_arm, is_x86));
                // cpuinfo carries the same flag line lscpu reports
                features.extend(features_from_flags(&text));
            }
            Err(e) => warn!("cpuinfo probe failed: {}", e),
        }

        match self.inspector.lscpu().await {
            Ok(text) => features.extend(features_from_flags(&text)),
            Err(e) => warn!("lscpu probe failed: {}", e),
        }

        debug!("Probed {} acceleration features", features.len());
        features
    }
}

// =============================================================================
// System Inspector
// =============================================================================

/// Inspects the local host via `uname`, `/proc/cpuinfo` and `lscpu`
pub struct SystemCpuInspector {
    runner: CommandRunnerRef,
    cpuinfo_path: PathBuf,
}

impl SystemCpuInspector {
    pub fn new(runner: CommandRunnerRef) -> Self {
        Self {
            runner,
            cpuinfo_path: PathBuf::from("/proc/cpuinfo"),
        }
    }

    /// Override the cpuinfo location (for testing)
    pub fn with_cpuinfo_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cpuinfo_path = path.into();
        self
    }
}

#[async_trait]
impl CpuInspector for SystemCpuInspector {
    async fn architecture(&self) -> Result<String> {
        let cmd = CommandSpec::new("uname").arg("-m");
        let stdout = self.runner.run(&cmd).await?.into_stdout(&cmd)?;
        Ok(stdout.trim().to_string())
    }

    async fn cpuinfo(&self) -> Result<String> {
        Ok(tokio::fs::read_to_string(&self.cpuinfo_path).await?)
    }

    async fn lscpu(&self) -> Result<String> {
        let cmd = CommandSpec::new("lscpu");
        self.runner.run(&cmd).await?.into_stdout(&cmd)
    }
}
