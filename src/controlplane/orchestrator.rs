//! Storage Orchestrator
//!
//! Intent-level storage operations over zfs, btrfs and mdadm. Each operation
//! validates its inputs, takes the advisory lock for the resource it mutates,
//! runs the structured command(s) and parses the output into records.
//!
//! Existence checks read a fresh listing and then act; the backend remains
//! authoritative, so a concurrent writer outside this process can still win
//! the race and surface as the backend's own duplicate/not-found error.

use crate::controlplane::backends::{
    btrfs, mdadm, validate, zfs, BackendBinaries, CommandBuilder, PoolRequest, SkippedOption,
};
use crate::controlplane::locks::{dataset_key, pool_key, subvolume_key, ResourceGuard, ResourceLocks};
use crate::domain::ports::{CommandRunnerRef, CommandSpec, PipelineOutput};
use crate::domain::{Backend, Dataset, PoolActivity, Snapshot, StoragePool, SubvolumeSnapshot};
use crate::error::{Error, Result};
use crate::hardware::tuning::{
    policy, scope_of, ArchitectureReport, ParameterScope, TuningParameterSet, COMPRESSION,
    ENCRYPTION,
};
use crate::hardware::ArchitectureProfile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// =============================================================================
// Orchestrator Configuration
// =============================================================================

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Backends consulted for listings and lookups
    pub enabled_backends: Vec<Backend>,
    /// Backend binary locations
    pub binaries: BackendBinaries,
    /// Where labelled btrfs filesystems are mounted
    pub btrfs_mount_root: PathBuf,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enabled_backends: Backend::ALL.to_vec(),
            binaries: BackendBinaries::default(),
            btrfs_mount_root: PathBuf::from("/mnt"),
        }
    }
}

// =============================================================================
// Operation Results
// =============================================================================

/// Outcome of a pool creation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolCreation {
    pub name: String,
    pub backend: Backend,
    /// The executed command, for operators
    pub command: String,
    /// Options placed on the command line
    pub applied_options: TuningParameterSet,
    /// Kernel module parameters recommended for this host
    pub module_parameters: TuningParameterSet,
    pub skipped_options: Vec<SkippedOption>,
    /// Fresh listing record; absent if the backend does not list it yet
    pub pool: Option<StoragePool>,
}

/// Rollback behaviour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOptions {
    /// Roll back past newer snapshots, destroying them
    #[serde(default)]
    pub recursive: bool,
    /// Caller acknowledges the destruction of newer snapshots
    #[serde(default)]
    pub confirm_destroy_newer: bool,
}

/// Outcome of a rollback
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOutcome {
    pub snapshot: String,
    /// Snapshots destroyed by a recursive rollback
    pub destroyed: Vec<String>,
}

/// Replication intent: `send source [-i base] | receive target`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationRequest {
    /// Snapshot to send (`dataset@label`)
    pub source: String,
    /// Dataset to receive into
    pub target: String,
    /// Older snapshot of the same dataset for an incremental stream
    #[serde(default)]
    pub incremental_base: Option<String>,
}

/// Finished replication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationReport {
    pub source: String,
    pub target: String,
    pub incremental_base: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// A replication running in the background.
///
/// Dropping the job detaches it; the pipeline keeps running.
#[derive(Debug)]
pub struct ReplicationJob {
    pub source: String,
    pub target: String,
    handle: JoinHandle<Result<ReplicationReport>>,
}

impl ReplicationJob {
    /// Wait for the pipeline to finish
    pub async fn wait(self) -> Result<ReplicationReport> {
        self.handle
            .await
            .map_err(|e| Error::Internal(format!("replication task failed: {}", e)))?
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Map pipeline stage outcomes onto distinguishable errors.
///
/// A producer killed by SIGPIPE only failed because the consumer stopped
/// reading, so the consumer's rejection is reported.
pub fn classify_pipeline(source: &str, target: &str, output: PipelineOutput) -> Result<()> {
    let PipelineOutput { producer, consumer } = output;
    let broken_pipe = producer.exit_code == 141 || producer.stderr.to_lowercase().contains("broken pipe");

    match (producer.success(), consumer.success()) {
        (true, true) => Ok(()),
        (false, false) if broken_pipe => Err(Error::ReceiveRejected {
            target: target.to_string(),
            exit_code: consumer.exit_code,
            stderr: consumer.stderr,
        }),
        (false, _) => Err(Error::SendStream {
            source_snapshot: source.to_string(),
            exit_code: producer.exit_code,
            stderr: producer.stderr,
            broken_pipe,
        }),
        (true, false) => Err(Error::ReceiveRejected {
            target: target.to_string(),
            exit_code: consumer.exit_code,
            stderr: consumer.stderr,
        }),
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Translates storage intents into backend commands
pub struct StorageOrchestrator {
    config: OrchestratorConfig,
    commands: CommandBuilder,
    runner: CommandRunnerRef,
    profile: ArchitectureProfile,
    locks: ResourceLocks,
}

impl StorageOrchestrator {
    /// Create an orchestrator for an already-probed host profile
    pub fn new(
        config: OrchestratorConfig,
        runner: CommandRunnerRef,
        profile: ArchitectureProfile,
    ) -> Arc<Self> {
        let commands = CommandBuilder::new(config.binaries.clone(), config.btrfs_mount_root.clone());
        Arc::new(Self {
            config,
            commands,
            runner,
            profile,
            locks: ResourceLocks::new(),
        })
    }

    pub fn profile(&self) -> &ArchitectureProfile {
        &self.profile
    }

    /// Tuning for the current profile, recomputed per call
    pub fn tuning_parameters(&self) -> TuningParameterSet {
        policy(&self.profile)
    }

    pub fn architecture_report(&self) -> ArchitectureReport {
        ArchitectureReport::from_profile(&self.profile)
    }

    pub fn locks(&self) -> &ResourceLocks {
        &self.locks
    }

    async fn execute(&self, command: &CommandSpec) -> Result<String> {
        debug!("Running: {}", command);
        self.runner.run(command).await?.into_stdout(command)
    }

    // =========================================================================
    // Pools
    // =========================================================================

    /// Pools across all enabled backends. A backend whose tools are not
    /// installed is skipped.
    pub async fn list_pools(&self) -> Result<Vec<StoragePool>> {
        let mut pools = Vec::new();
        for backend in &self.config.enabled_backends {
            match self.list_backend_pools(*backend).await {
                Ok(found) => pools.extend(found),
                Err(Error::CommandUnavailable { program }) => {
                    warn!("Skipping {} pools: {} is not installed", backend, program);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(pools)
    }

    async fn list_backend_pools(&self, backend: Backend) -> Result<Vec<StoragePool>> {
        let command = self.commands.list_pools(backend);
        let stdout = self.execute(&command).await?;
        let label = command.to_string();

        match backend {
            Backend::Zfs => zfs::parse_pool_list(&label, &stdout),
            Backend::Btrfs => btrfs::parse_filesystem_show(&label, &stdout),
            Backend::Mdadm => {
                let mut pools = Vec::new();
                for array in mdadm::parse_scan(&label, &stdout)? {
                    let detail_cmd = self.commands.mdadm.detail(&array.device);
                    let detail = self.execute(&detail_cmd).await?;
                    let detail = mdadm::parse_detail(&detail_cmd.to_string(), &detail)?;
                    pools.push(detail.into_pool(array.name));
                }
                Ok(pools)
            }
        }
    }

    /// Look a pool up by name in a fresh listing
    pub async fn find_pool(&self, name: &str) -> Result<Option<StoragePool>> {
        Ok(self.list_pools().await?.into_iter().find(|p| p.name == name))
    }

    async fn require_pool(&self, name: &str) -> Result<StoragePool> {
        self.find_pool(name).await?.ok_or_else(|| Error::PoolNotFound {
            pool: name.to_string(),
        })
    }

    /// What the backend addresses a pool by: the scanned device node for
    /// mdadm arrays, the pool name otherwise
    async fn command_target(&self, pool: &StoragePool) -> Result<String> {
        if pool.backend != Backend::Mdadm {
            return Ok(pool.name.clone());
        }
        let command = self.commands.mdadm.list_pools();
        let stdout = self.execute(&command).await?;
        mdadm::parse_scan(&command.to_string(), &stdout)?
            .into_iter()
            .find(|array| array.name == pool.name)
            .map(|array| array.device)
            .ok_or_else(|| Error::PoolNotFound {
                pool: pool.name.clone(),
            })
    }

    /// Create a pool. The name must be absent from every enabled backend.
    pub async fn create_pool(&self, request: PoolRequest) -> Result<PoolCreation> {
        let tuning = self.tuning_parameters();
        let plan = self.commands.create_pool(&request, &tuning)?;
        let _guard = self.locks.acquire(pool_key(&request.name)).await;

        if self.find_pool(&request.name).await?.is_some() {
            return Err(Error::PoolExists {
                pool: request.name.clone(),
            });
        }

        info!(
            "Creating {} pool {} ({}, {} devices)",
            request.backend,
            request.name,
            request.raid_level,
            request.devices.len()
        );
        for skipped in &plan.skipped {
            warn!("Skipping option {}={}: {}", skipped.key, skipped.value, skipped.reason);
        }
        self.execute(&plan.command).await?;

        let pool = match self.list_backend_pools(request.backend).await {
            Ok(pools) => pools.into_iter().find(|p| p.name == request.name),
            Err(e) => {
                warn!("Pool {} created but listing failed: {}", request.name, e);
                None
            }
        };

        Ok(PoolCreation {
            name: request.name,
            backend: request.backend,
            command: plan.command.to_string(),
            applied_options: plan.applied,
            module_parameters: plan.module_parameters,
            skipped_options: plan.skipped,
            pool,
        })
    }

    /// Destroy (zfs) or stop (mdadm) a pool
    pub async fn destroy_pool(&self, name: &str) -> Result<()> {
        validate::pool_name(name)?;
        let _guard = self.locks.acquire(pool_key(name)).await;

        let pool = self.require_pool(name).await?;
        let target = self.command_target(&pool).await?;
        let command = self.commands.destroy_pool(pool.backend, &target)?;
        warn!("Destroying {} pool {}", pool.backend, name);
        self.execute(&command).await?;
        Ok(())
    }

    /// Start a scrub; returns once the backend accepted the request
    pub async fn scrub(&self, name: &str) -> Result<()> {
        validate::pool_name(name)?;
        let _guard = self.locks.acquire(pool_key(name)).await;

        let pool = self.require_pool(name).await?;
        let target = self.command_target(&pool).await?;
        self.execute(&self.commands.scrub(pool.backend, &target)).await?;
        info!("Scrub started on {} pool {}", pool.backend, name);
        Ok(())
    }

    /// Start a balance (btrfs only); returns once the backend accepted it
    pub async fn balance(&self, name: &str) -> Result<()> {
        validate::pool_name(name)?;
        let _guard = self.locks.acquire(pool_key(name)).await;

        let pool = self.require_pool(name).await?;
        let command = self.commands.balance(pool.backend, name)?;
        self.execute(&command).await?;
        info!("Balance started on {} pool {}", pool.backend, name);
        Ok(())
    }

    /// Live health and background-activity progress
    pub async fn status(&self, name: &str) -> Result<PoolActivity> {
        validate::pool_name(name)?;
        let pool = self.require_pool(name).await?;

        match pool.backend {
            Backend::Zfs => {
                let command = self.commands.zfs.status(name);
                let raw = self.execute(&command).await?;
                let (health, scrub) = zfs::parse_status(&command.to_string(), &raw)?;
                Ok(PoolActivity {
                    pool: pool.name,
                    backend: pool.backend,
                    health,
                    scrub,
                    balance: None,
                    raw,
                })
            }
            Backend::Btrfs => {
                let scrub_raw = self.execute(&self.commands.btrfs.scrub_status(name)).await?;

                let balance_cmd = self.commands.btrfs.balance_status(name);
                let output = self.runner.run(&balance_cmd).await?;
                if !btrfs::balance_status_succeeded(output.exit_code, &output.stdout) {
                    return Err(Error::CommandExecution {
                        command: balance_cmd.to_string(),
                        exit_code: output.exit_code,
                        stderr: output.stderr,
                    });
                }

                Ok(PoolActivity {
                    pool: pool.name,
                    backend: pool.backend,
                    health: pool.health,
                    scrub: btrfs::parse_scrub_status(&scrub_raw),
                    balance: Some(btrfs::parse_balance_status(&output.stdout)),
                    raw: format!("{}\n{}", scrub_raw.trim_end(), output.stdout.trim_end()),
                })
            }
            Backend::Mdadm => {
                let device = self.command_target(&pool).await?;
                let command = self.commands.mdadm.detail(&device);
                let raw = self.execute(&command).await?;
                let detail = mdadm::parse_detail(&command.to_string(), &raw)?;
                Ok(PoolActivity {
                    pool: pool.name,
                    backend: pool.backend,
                    health: detail.health,
                    scrub: detail.check,
                    balance: None,
                    raw,
                })
            }
        }
    }

    // =========================================================================
    // Datasets
    // =========================================================================

    pub async fn list_datasets(&self) -> Result<Vec<Dataset>> {
        let command = self.commands.zfs.list_datasets();
        let stdout = self.execute(&command).await?;
        zfs::parse_dataset_list(&command.to_string(), &stdout)
    }

    async fn find_dataset(&self, name: &str) -> Result<Option<Dataset>> {
        Ok(self.list_datasets().await?.into_iter().find(|d| d.name == name))
    }

    /// Create `<pool>/<name>` with the host's filesystem tuning.
    ///
    /// Explicit `compression` and `quota` win over tuning.
    pub async fn create_dataset(
        &self,
        pool: &str,
        name: &str,
        quota: Option<&str>,
        compression: Option<&str>,
    ) -> Result<Dataset> {
        validate::pool_name(pool)?;
        let qualified = format!("{}/{}", pool, name);
        validate::dataset_name(&qualified)?;
        let _guard = self.locks.acquire(dataset_key(&qualified)).await;

        let found = self.require_pool(pool).await?;
        if found.backend != Backend::Zfs {
            return Err(Error::Validation(format!(
                "pool {} is a {} pool; datasets require zfs",
                pool, found.backend
            )));
        }
        if self.find_dataset(&qualified).await?.is_some() {
            return Err(Error::DatasetExists { dataset: qualified });
        }

        let mut properties: TuningParameterSet = self
            .tuning_parameters()
            .iter()
            .filter(|(key, _)| scope_of(key) == ParameterScope::Filesystem && *key != ENCRYPTION)
            .collect();
        if let Some(compression) = compression {
            properties.insert(COMPRESSION, compression);
        }
        if let Some(quota) = quota {
            properties.insert("quota", quota);
        }

        let command = self.commands.zfs.create_dataset(&qualified, &properties)?;
        info!("Creating dataset {}", qualified);
        self.execute(&command).await?;

        self.find_dataset(&qualified)
            .await?
            .ok_or(Error::DatasetNotFound { dataset: qualified })
    }

    /// Set a property on a zfs dataset or pool root
    pub async fn set_property(&self, target: &str, property: &str, value: &str) -> Result<()> {
        validate::dataset_name(target)?;
        validate::property_name(property)?;
        validate::property_value(property, value)?;
        let _guard = self.locks.acquire(dataset_key(target)).await;

        if self.find_dataset(target).await?.is_none() {
            return Err(Error::DatasetNotFound {
                dataset: target.to_string(),
            });
        }
        info!("Setting {}={} on {}", property, value, target);
        self.execute(&self.commands.zfs.set_property(target, property, value))
            .await?;
        Ok(())
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Snapshots, oldest first, optionally restricted to one dataset
    pub async fn list_snapshots(&self, dataset: Option<&str>) -> Result<Vec<Snapshot>> {
        let command = self.commands.zfs.list_snapshots();
        let stdout = self.execute(&command).await?;
        let mut snapshots = zfs::parse_snapshot_list(&command.to_string(), &stdout)?;
        if let Some(dataset) = dataset {
            snapshots.retain(|s| s.dataset() == dataset);
        }
        snapshots.sort_by_key(|s| s.creation_time);
        Ok(snapshots)
    }

    async fn require_snapshot(&self, qualified: &str, dataset: &str) -> Result<Vec<Snapshot>> {
        let snapshots = self.list_snapshots(Some(dataset)).await?;
        if !snapshots.iter().any(|s| s.qualified_name == qualified) {
            return Err(Error::SnapshotNotFound {
                snapshot: qualified.to_string(),
            });
        }
        Ok(snapshots)
    }

    /// Take `dataset@label`
    pub async fn snapshot(&self, dataset: &str, label: &str) -> Result<Snapshot> {
        validate::snapshot_label(label)?;
        validate::dataset_name(dataset)?;
        let qualified = format!("{}@{}", dataset, label);
        let _guard = self.locks.acquire(dataset_key(dataset)).await;

        if self.find_dataset(dataset).await?.is_none() {
            return Err(Error::DatasetNotFound {
                dataset: dataset.to_string(),
            });
        }
        let existing = self.list_snapshots(Some(dataset)).await?;
        if existing.iter().any(|s| s.qualified_name == qualified) {
            return Err(Error::DuplicateSnapshot { snapshot: qualified });
        }

        info!("Creating snapshot {}", qualified);
        self.execute(&self.commands.zfs.snapshot(&qualified)).await?;

        self.list_snapshots(Some(dataset))
            .await?
            .into_iter()
            .find(|s| s.qualified_name == qualified)
            .ok_or(Error::SnapshotNotFound { snapshot: qualified })
    }

    /// Roll a dataset back to a snapshot.
    ///
    /// Newer snapshots are destroyed only with both `recursive` and
    /// `confirm_destroy_newer`; otherwise the would-be casualties are returned
    /// as a [`Error::RollbackHazard`] and nothing runs.
    pub async fn rollback(&self, snapshot: &str, options: RollbackOptions) -> Result<RollbackOutcome> {
        let (dataset, _) = validate::qualified_snapshot(snapshot)?;
        let _guard = self.locks.acquire(dataset_key(dataset)).await;

        let snapshots = self.require_snapshot(snapshot, dataset).await?;
        let newer: Vec<String> = snapshots
            .iter()
            .skip_while(|s| s.qualified_name != snapshot)
            .skip(1)
            .map(|s| s.qualified_name.clone())
            .collect();

        if !newer.is_empty() && !(options.recursive && options.confirm_destroy_newer) {
            return Err(Error::RollbackHazard {
                snapshot: snapshot.to_string(),
                newer,
            });
        }

        warn!(
            "Rolling {} back to {} (destroying {} newer snapshots)",
            dataset,
            snapshot,
            newer.len()
        );
        self.execute(&self.commands.zfs.rollback(snapshot, options.recursive))
            .await?;

        Ok(RollbackOutcome {
            snapshot: snapshot.to_string(),
            destroyed: newer,
        })
    }

    /// Clone a snapshot into a new dataset in the same pool
    pub async fn clone_snapshot(&self, snapshot: &str, target: &str) -> Result<Dataset> {
        let (dataset, _) = validate::qualified_snapshot(snapshot)?;
        validate::dataset_name(target)?;
        let source_pool = dataset.split('/').next().unwrap_or(dataset);
        let target_pool = target.split('/').next().unwrap_or(target);
        if source_pool != target_pool {
            return Err(Error::Validation(format!(
                "clone target {} must be in pool {}",
                target, source_pool
            )));
        }
        // The source lock keeps destroy_snapshot/rollback off the origin
        let _guards = self
            .locks
            .acquire_many([dataset_key(dataset), dataset_key(target)])
            .await;

        self.require_snapshot(snapshot, dataset).await?;
        if self.find_dataset(target).await?.is_some() {
            return Err(Error::DatasetExists {
                dataset: target.to_string(),
            });
        }

        info!("Cloning {} to {}", snapshot, target);
        self.execute(&self.commands.zfs.clone_snapshot(snapshot, target))
            .await?;

        self.find_dataset(target).await?.ok_or(Error::DatasetNotFound {
            dataset: target.to_string(),
        })
    }

    pub async fn destroy_snapshot(&self, snapshot: &str) -> Result<()> {
        let (dataset, _) = validate::qualified_snapshot(snapshot)?;
        let _guard = self.locks.acquire(dataset_key(dataset)).await;

        self.require_snapshot(snapshot, dataset).await?;
        warn!("Destroying snapshot {}", snapshot);
        self.execute(&self.commands.zfs.destroy_snapshot(snapshot))
            .await?;
        Ok(())
    }

    // =========================================================================
    // Btrfs Subvolume Snapshots
    // =========================================================================

    async fn require_btrfs_pool(&self, name: &str) -> Result<StoragePool> {
        let pool = self.require_pool(name).await?;
        if pool.backend != Backend::Btrfs {
            return Err(Error::Validation(format!(
                "subvolume snapshots are not supported by {}",
                pool.backend
            )));
        }
        Ok(pool)
    }

    async fn subvolume_snapshots(&self, pool: &str) -> Result<Vec<SubvolumeSnapshot>> {
        let command = self.commands.btrfs.list_subvolume_snapshots(pool);
        let stdout = self.execute(&command).await?;
        let mut snapshots = btrfs::parse_subvolume_list(&command.to_string(), pool, &stdout)?;
        snapshots.sort_by_key(|s| (s.created_at, s.id));
        Ok(snapshots)
    }

    /// Snapshot subvolumes of a btrfs pool, oldest first
    pub async fn list_subvolume_snapshots(&self, pool: &str) -> Result<Vec<SubvolumeSnapshot>> {
        validate::pool_name(pool)?;
        self.require_btrfs_pool(pool).await?;
        self.subvolume_snapshots(pool).await
    }

    /// Snapshot `source` (a subvolume path, or `/` for the top level) to
    /// `destination`, both relative to the pool mountpoint
    pub async fn create_subvolume_snapshot(
        &self,
        pool: &str,
        source: &str,
        destination: &str,
        readonly: bool,
    ) -> Result<SubvolumeSnapshot> {
        validate::pool_name(pool)?;
        let command = self
            .commands
            .btrfs
            .snapshot_subvolume(pool, source, destination, readonly)?;
        let _guards = self
            .locks
            .acquire_many([subvolume_key(pool, source), subvolume_key(pool, destination)])
            .await;

        self.require_btrfs_pool(pool).await?;
        let qualified = format!("{}:{}", pool, destination);
        if self
            .subvolume_snapshots(pool)
            .await?
            .iter()
            .any(|s| s.path == destination)
        {
            return Err(Error::DuplicateSnapshot { snapshot: qualified });
        }

        info!("Creating subvolume snapshot {} from {}", qualified, source);
        self.execute(&command).await?;

        self.subvolume_snapshots(pool)
            .await?
            .into_iter()
            .find(|s| s.path == destination)
            .ok_or(Error::SnapshotNotFound { snapshot: qualified })
    }

    pub async fn delete_subvolume_snapshot(&self, pool: &str, path: &str) -> Result<()> {
        validate::pool_name(pool)?;
        let command = self.commands.btrfs.delete_subvolume(pool, path)?;
        let _guard = self.locks.acquire(subvolume_key(pool, path)).await;

        self.require_btrfs_pool(pool).await?;
        if !self
            .subvolume_snapshots(pool)
            .await?
            .iter()
            .any(|s| s.path == path)
        {
            return Err(Error::SnapshotNotFound {
                snapshot: format!("{}:{}", pool, path),
            });
        }

        warn!("Deleting subvolume snapshot {}:{}", pool, path);
        self.execute(&command).await?;
        Ok(())
    }

    // =========================================================================
    // Replication
    // =========================================================================

    /// Start `send | receive` in the background.
    ///
    /// Validation, lookups and locking happen before this returns; the
    /// pipeline runs on its own task and holds the locks until it exits.
    pub async fn send_receive(&self, request: ReplicationRequest) -> Result<ReplicationJob> {
        let (source_dataset, _) = validate::qualified_snapshot(&request.source)?;
        validate::dataset_name(&request.target)?;
        if let Some(base) = &request.incremental_base {
            let (base_dataset, _) = validate::qualified_snapshot(base)?;
            if base_dataset != source_dataset {
                return Err(Error::Validation(format!(
                    "incremental base {} is not a snapshot of {}",
                    base, source_dataset
                )));
            }
        }
        if request.target == source_dataset {
            return Err(Error::Validation("cannot receive into the source dataset".into()));
        }

        let guards: Vec<ResourceGuard> = self
            .locks
            .acquire_many([dataset_key(source_dataset), dataset_key(&request.target)])
            .await;

        let snapshots = self.require_snapshot(&request.source, source_dataset).await?;
        if let Some(base) = &request.incremental_base {
            let base_pos = snapshots.iter().position(|s| &s.qualified_name == base);
            let source_pos = snapshots.iter().position(|s| s.qualified_name == request.source);
            match (base_pos, source_pos) {
                (None, _) => return Err(Error::SnapshotNotFound { snapshot: base.clone() }),
                (Some(b), Some(s)) if b >= s => {
                    return Err(Error::Validation(format!(
                        "incremental base {} is not older than {}",
                        base, request.source
                    )))
                }
                _ => {}
            }
        }

        let target_exists = self.find_dataset(&request.target).await?.is_some();
        match (&request.incremental_base, target_exists) {
            (None, true) => {
                return Err(Error::DatasetExists {
                    dataset: request.target.clone(),
                })
            }
            (Some(_), false) => {
                return Err(Error::DatasetNotFound {
                    dataset: request.target.clone(),
                })
            }
            _ => {}
        }

        let send = self
            .commands
            .zfs
            .send(&request.source, request.incremental_base.as_deref());
        let receive = self.commands.zfs.receive(&request.target);
        info!("Replicating {} to {}", request.source, request.target);

        let runner = self.runner.clone();
        let ReplicationRequest {
            source,
            target,
            incremental_base,
        } = request;
        let job_source = source.clone();
        let job_target = target.clone();

        let handle = tokio::spawn(async move {
            let _guards = guards;
            let output = runner.pipe(&send, &receive).await?;
            if let Err(e) = classify_pipeline(&source, &target, output) {
                warn!("Replication {} -> {} failed: {}", source, target, e);
                return Err(e);
            }
            info!("Replication {} -> {} complete", source, target);
            Ok(ReplicationReport {
                source,
                target,
                incremental_base,
                completed_at: Utc::now(),
            })
        });

        Ok(ReplicationJob {
            source: job_source,
            target: job_target,
            handle,
        })
    }
}
