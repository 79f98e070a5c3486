//! Capability traits for the scenario's external collaborators.
//!
//! Each collaborator is modeled as a synchronous request/response contract.
//! Production bindings would shell out to the cache CLI, fio, and the
//! platform power controller; tests and the harness substitute the
//! deterministic simulation from `wbt-sim`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use wbt_error::Result;
use wbt_types::{BlockCount, BlockDevice, ByteSize, CacheId, CacheMode, CleaningPolicy, CoreId};

/// Target of a statistics query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatTarget {
    Cache(CacheId),
    Core(CacheId, CoreId),
}

/// A started or loaded cache, as reported by the controller.
///
/// Valid only while the controlling session considers the cache live;
/// a reboot implicitly destroys it and it must be re-acquired via
/// [`CacheController::load_cache`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInstance {
    pub id: CacheId,
    pub device: BlockDevice,
    pub mode: CacheMode,
    pub policy: CleaningPolicy,
}

/// A cache-attached backing device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreInstance {
    pub id: CoreId,
    pub cache: CacheId,
    pub path: PathBuf,
}

/// Partitions raw disks into block devices.
pub trait Provisioner: Send + Sync {
    /// Create one partition per requested size on `disk`.
    ///
    /// Fails when the disk's remaining capacity is insufficient.
    fn create_partitions(&self, disk: &str, sizes: &[ByteSize]) -> Result<Vec<BlockDevice>>;
}

/// Cache-management command surface.
///
/// All operations are synchronous and either return a typed result or fail
/// with a controller-level diagnostic.
pub trait CacheController: Send + Sync {
    fn start_cache(&self, device: &BlockDevice, mode: CacheMode) -> Result<CacheInstance>;

    fn add_core(&self, cache: CacheId, device: &BlockDevice) -> Result<CoreInstance>;

    fn set_cleaning_policy(&self, cache: CacheId, policy: CleaningPolicy) -> Result<()>;

    /// Detach a core. With `flush = false` the core's dirty lines are left
    /// in the cache metadata — an intentional, supported operation, not an
    /// error.
    fn remove_core(&self, cache: CacheId, core: CoreId, flush: bool) -> Result<()>;

    /// Re-acquire a dormant cache from its device after a reboot.
    fn load_cache(&self, device: &BlockDevice) -> Result<CacheInstance>;

    /// Number of live caches visible to the controller.
    fn list_caches(&self) -> Result<usize>;

    /// Number of cores attached to `cache`.
    fn list_cores(&self, cache: CacheId) -> Result<usize>;

    /// Occupancy in 4 KiB lines. Only valid against a live instance.
    fn occupancy(&self, target: StatTarget) -> Result<BlockCount>;

    /// Dirty-line count. Only valid against a live instance.
    fn dirty_blocks(&self, target: StatTarget) -> Result<BlockCount>;
}

/// Workload access pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessPattern {
    RandWrite,
    SeqWrite,
}

/// Workload I/O engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoEngine {
    Libaio,
    Psync,
}

/// One load-generator job against a single target device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadJob {
    pub target: PathBuf,
    pub total: ByteSize,
    pub block_size: ByteSize,
    pub pattern: AccessPattern,
    pub engine: IoEngine,
    pub seed: u64,
}

/// Dispatches workload jobs concurrently (one job per target device) and
/// blocks until all of them complete.
pub trait LoadGenerator: Send + Sync {
    fn run(&self, jobs: &[WorkloadJob]) -> Result<()>;
}

/// Power-cycles the platform.
pub trait RebootCoordinator: Send + Sync {
    /// Reboot and block until the platform is reachable again, or fail once
    /// `grace` has elapsed without a response.
    fn reboot(&self, grace: Duration) -> Result<()>;
}

/// Device hotplug event handling.
pub trait HotplugControl: Send + Sync {
    /// Disable automatic hotplug handling. Idempotent; the setting does not
    /// persist across reboots, so this must be called after every boot.
    fn disable(&self) -> Result<()>;
}
