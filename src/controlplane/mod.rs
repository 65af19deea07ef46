//! Storage Control Plane Module
//!
//! Translates storage intents into structured backend commands, executes
//! them, and parses the results. Also hosts the thin REST surface.

pub mod api;
pub mod backends;
pub mod executor;
pub mod locks;
pub mod orchestrator;

#[cfg(test)]
mod testing;

pub use api::*;
pub use backends::{BackendBinaries, CommandBuilder, PoolPlan, PoolRequest, RaidLevel, SkippedOption};
pub use executor::SystemCommandRunner;
pub use locks::{ResourceGuard, ResourceLocks};
pub use orchestrator::*;
