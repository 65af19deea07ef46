//! CPU Feature Detection
//!
//! Extracts hardware-acceleration features from `/proc/cpuinfo` and `lscpu`
//! text. Flags are matched as whole tokens from the flag lines only, so
//! model names and vendor strings cannot produce false positives.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Hardware acceleration features relevant to storage tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HwFeature {
    #[serde(rename = "NEON")]
    Neon,
    #[serde(rename = "AES-NI")]
    AesNi,
    #[serde(rename = "AVX")]
    Avx,
    #[serde(rename = "SSE4.2")]
    Sse42,
    #[serde(rename = "Virtualization")]
    Virtualization,
}

impl std::fmt::Display for HwFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HwFeature::Neon => write!(f, "NEON"),
            HwFeature::AesNi => write!(f, "AES-NI"),
            HwFeature::Avx => write!(f, "AVX"),
            HwFeature::Sse42 => write!(f, "SSE4.2"),
            HwFeature::Virtualization => write!(f, "Virtualization"),
        }
    }
}

impl std::str::FromStr for HwFeature {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NEON" => Ok(HwFeature::Neon),
            "AES-NI" | "AESNI" | "AES" => Ok(HwFeature::AesNi),
            "AVX" => Ok(HwFeature::Avx),
            "SSE4.2" | "SSE4_2" => Ok(HwFeature::Sse42),
            "VIRTUALIZATION" => Ok(HwFeature::Virtualization),
            other => Err(crate::error::Error::Validation(format!(
                "unknown hardware feature '{}'",
                other
            ))),
        }
    }
}

/// Collect flag tokens from the `flags` / `Features` / `Flags` lines
pub fn flag_tokens(text: &str) -> BTreeSet<String> {
    text.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            let key = key.trim().to_ascii_lowercase();
            (key == "flags" || key == "features").then_some(value)
        })
        .flat_map(|value| value.split_whitespace())
        .map(|flag| flag.to_ascii_lowercase())
        .collect()
}

/// Features derivable from `/proc/cpuinfo`, gated by architecture family
pub fn features_from_cpuinfo(cpuinfo: &str, is_arm: bool, is_x86: bool) -> BTreeSet<HwFeature> {
    let flags = flag_tokens(cpuinfo);
    let mut features = BTreeSet::new();

    // aarch64 kernels report Advanced SIMD as `asimd`; 32-bit ARM as `neon`
    if is_arm && (flags.contains("neon") || flags.contains("asimd")) {
        features.insert(HwFeature::Neon);
    }
    if is_x86 && flags.contains("aes") {
        features.insert(HwFeature::AesNi);
    }

    features
}

/// Architecture-independent features from `lscpu` (or cpuinfo) flag lines
pub fn features_from_flags(text: &str) -> BTreeSet<HwFeature> {
    let flags = flag_tokens(text);
    let mut features = BTreeSet::new();

    if flags.contains("vmx") || flags.contains("svm") {
        features.insert(HwFeature::Virtualization);
    }
    if flags.iter().any(|f| f.starts_with("avx")) {
        features.insert(HwFeature::Avx);
    }
    if flags.contains("sse4_2") {
        features.insert(HwFeature::Sse42);
    }

    features
}
