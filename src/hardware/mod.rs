//! Hardware Module
//!
//! Provides CPU architecture profiling, acceleration feature detection, and
//! the architecture-derived tuning policy.

pub mod features;
pub mod profiler;
pub mod tuning;

pub use features::*;
pub use profiler::*;
pub use tuning::{
    policy, resource_limits, scope_of, ArchitectureReport, ParameterScope, ResourceLimits,
    TuningParameterSet,
};
