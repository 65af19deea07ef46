//! API Module
//!
//! REST surface for pools, datasets, snapshots, replication and the file
//! tree.

pub mod rest;
pub mod server;

pub use rest::{status_for, ApiError, ApiErrorResponse, RestRouter};
pub use server::{ApiServer, ApiServerConfig};
