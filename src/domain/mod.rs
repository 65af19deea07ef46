//! Domain layer - Core records and port definitions
//!
//! This module defines the capabilities (ports) the core consumes and the
//! records it returns, following hexagonal architecture principles.

pub mod ports;
pub mod records;

pub use ports::*;
pub use records::*;
