//! Prometheus Metrics
//!
//! Command execution and file-tree counters, registered on an injected
//! registry. The binary registers them on the default registry so the
//! metrics server's `prometheus::gather()` picks them up.

use crate::error::{Error, Result};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::time::Duration;

fn registration_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metric registration failed: {}", e))
}

/// Metrics for external command execution
#[derive(Clone)]
pub struct CommandMetrics {
    executed: IntCounterVec,
    duration: HistogramVec,
}

impl CommandMetrics {
    pub fn register(registry: &Registry) -> Result<Self> {
        let executed = IntCounterVec::new(
            Opts::new(
                "adaptive_storage_commands_total",
                "External commands executed, by program and outcome",
            ),
            &["program", "outcome"],
        )
        .map_err(registration_error)?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "adaptive_storage_command_duration_seconds",
                "Wall-clock duration of external commands",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
            &["program"],
        )
        .map_err(registration_error)?;

        registry
            .register(Box::new(executed.clone()))
            .map_err(registration_error)?;
        registry
            .register(Box::new(duration.clone()))
            .map_err(registration_error)?;

        Ok(Self { executed, duration })
    }

    /// Record one finished (or failed-to-start) command
    pub fn observe(&self, program: &str, outcome: &str, elapsed: Duration) {
        let program = program.rsplit('/').next().unwrap_or(program);
        self.executed.with_label_values(&[program, outcome]).inc();
        self.duration
            .with_label_values(&[program])
            .observe(elapsed.as_secs_f64());
    }
}

/// Metrics for file-tree operations
#[derive(Clone)]
pub struct FileTreeMetrics {
    operations: IntCounterVec,
}

impl FileTreeMetrics {
    pub fn register(registry: &Registry) -> Result<Self> {
        let operations = IntCounterVec::new(
            Opts::new(
                "adaptive_storage_file_operations_total",
                "File tree operations, by kind and outcome",
            ),
            &["operation", "outcome"],
        )
        .map_err(registration_error)?;
        registry
            .register(Box::new(operations.clone()))
            .map_err(registration_error)?;
        Ok(Self { operations })
    }

    pub fn record<T>(&self, operation: &str, result: &Result<T>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) => e.code(),
        };
        self.operations
            .with_label_values(&[operation, outcome])
            .inc();
    }
}
