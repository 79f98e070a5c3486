#![forbid(unsafe_code)]
//! Deterministic in-memory platform simulation.
//!
//! [`SimPlatform`] implements every collaborator trait the clean-load
//! scenario consumes: disk provisioning, the cache-controller command
//! surface with write-back dirty accounting, a seeded load generator, the
//! reboot coordinator, and hotplug control. All state lives behind one
//! mutex so a single platform can be cloned into the five trait objects.
//!
//! The model keeps just enough cache-engine semantics for the scenario's
//! black-box contract: write-back mode marks touched lines dirty, the nop
//! cleaning policy never drains them, removing a core without flushing
//! retains its lines in the cache metadata, and a reboot makes live caches
//! dormant while their accounting survives until `load_cache` rediscovers
//! them. [`SimFaults`] injects the deviations the test matrix needs.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};
use wbt_error::{Result, ScenarioError};
use wbt_scenario::{
    AccessPattern, CacheController, CacheInstance, Collaborators, CoreInstance, HotplugControl,
    LoadGenerator, Provisioner, RebootCoordinator, StatTarget, WorkloadJob,
};
use wbt_types::{
    BlockCount, BlockDevice, ByteSize, CACHE_LINE_SIZE, CacheId, CacheMode, CleaningPolicy, CoreId,
};

/// Fault-injection knobs. All off by default (a fault-free platform).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimFaults {
    /// Background-flush every write despite the nop policy, so the dirty
    /// baseline never forms.
    pub clean_on_write: bool,
    /// Lines added to (or, negative, removed from) cache occupancy when the
    /// cache is loaded after reboot.
    pub occupancy_drift_on_load: i64,
    /// Same, for the dirty-line count.
    pub dirty_drift_on_load: i64,
    /// Reload reports the removed core as attached again.
    pub resurrect_removed_core: bool,
    /// The platform never comes back from reboot.
    pub fail_reboot: bool,
}

#[derive(Debug)]
struct DiskState {
    capacity: u64,
    allocated: u64,
    next_partition: u32,
}

#[derive(Debug)]
struct CoreState {
    id: CoreId,
    path: PathBuf,
    /// Distinct 4 KiB lines the core has in cache.
    touched: HashSet<u64>,
    /// Subset of `touched` not yet persisted to the backing device.
    dirty: HashSet<u64>,
    fingerprint: Option<String>,
}

#[derive(Debug)]
struct CacheState {
    id: CacheId,
    device: PathBuf,
    mode: CacheMode,
    policy: CleaningPolicy,
    cores: Vec<CoreState>,
    /// Cores detached without flushing; their lines stay in the metadata.
    removed: Vec<CoreState>,
    running: bool,
    occupancy_skew: i64,
    dirty_skew: i64,
}

impl CacheState {
    fn occupancy_lines(&self) -> u64 {
        let raw: u64 = self
            .cores
            .iter()
            .chain(self.removed.iter())
            .map(|c| c.touched.len() as u64)
            .sum();
        apply_skew(raw, self.occupancy_skew)
    }

    fn dirty_lines(&self) -> u64 {
        let raw: u64 = self
            .cores
            .iter()
            .chain(self.removed.iter())
            .map(|c| c.dirty.len() as u64)
            .sum();
        apply_skew(raw, self.dirty_skew)
    }
}

fn apply_skew(raw: u64, skew: i64) -> u64 {
    if skew >= 0 {
        raw.saturating_add(skew.unsigned_abs())
    } else {
        raw.saturating_sub(skew.unsigned_abs())
    }
}

#[derive(Debug, Default)]
struct PlatformState {
    disks: HashMap<String, DiskState>,
    /// Provisioned partitions by path, with their capacities.
    partitions: HashMap<PathBuf, u64>,
    caches: Vec<CacheState>,
    next_cache_id: u16,
    hotplug_enabled: bool,
    hotplug_disable_calls: u32,
    boot_count: u32,
}

/// One simulated test platform. Clone freely; clones share state.
#[derive(Clone)]
pub struct SimPlatform {
    state: Arc<Mutex<PlatformState>>,
    faults: SimFaults,
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SimPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self::with_faults(SimFaults::default())
    }

    #[must_use]
    pub fn with_faults(faults: SimFaults) -> Self {
        Self {
            state: Arc::new(Mutex::new(PlatformState {
                hotplug_enabled: true,
                next_cache_id: 1,
                boot_count: 1,
                ..PlatformState::default()
            })),
            faults,
        }
    }

    /// Register a raw disk the provisioner may partition.
    pub fn add_disk(&self, name: &str, capacity: ByteSize) {
        let mut state = self.state.lock();
        state.disks.insert(
            name.to_owned(),
            DiskState {
                capacity: capacity.get(),
                allocated: 0,
                next_partition: 1,
            },
        );
    }

    /// Bundle this platform into the five collaborator handles.
    #[must_use]
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            provisioner: Arc::new(self.clone()),
            controller: Arc::new(self.clone()),
            load: Arc::new(self.clone()),
            reboot: Arc::new(self.clone()),
            hotplug: Arc::new(self.clone()),
        }
    }

    // ── Test observation helpers ────────────────────────────────────────

    #[must_use]
    pub fn boot_count(&self) -> u32 {
        self.state.lock().boot_count
    }

    #[must_use]
    pub fn hotplug_enabled(&self) -> bool {
        self.state.lock().hotplug_enabled
    }

    #[must_use]
    pub fn hotplug_disable_calls(&self) -> u32 {
        self.state.lock().hotplug_disable_calls
    }

    /// Workload fingerprint recorded for the core at `path`, if any.
    #[must_use]
    pub fn core_fingerprint(&self, path: &Path) -> Option<String> {
        let state = self.state.lock();
        state
            .caches
            .iter()
            .flat_map(|cache| cache.cores.iter().chain(cache.removed.iter()))
            .find(|core| core.path == path)
            .and_then(|core| core.fingerprint.clone())
    }
}

fn controller_err(command: &str, detail: impl Into<String>) -> ScenarioError {
    ScenarioError::Controller {
        command: command.to_owned(),
        detail: detail.into(),
    }
}

impl Provisioner for SimPlatform {
    fn create_partitions(&self, disk: &str, sizes: &[ByteSize]) -> Result<Vec<BlockDevice>> {
        let mut state = self.state.lock();
        let disk_state =
            state
                .disks
                .get_mut(disk)
                .ok_or_else(|| ScenarioError::Provisioning {
                    detail: format!("unknown disk `{disk}`"),
                })?;

        let requested: u64 = sizes.iter().map(|s| s.get()).sum();
        let remaining = disk_state.capacity - disk_state.allocated;
        if requested > remaining {
            return Err(ScenarioError::Provisioning {
                detail: format!(
                    "insufficient capacity on disk `{disk}`: requested {requested} bytes, \
                     {remaining} available"
                ),
            });
        }

        let mut devices = Vec::with_capacity(sizes.len());
        for size in sizes {
            let path = PathBuf::from(format!("/dev/sim/{disk}p{}", disk_state.next_partition));
            disk_state.next_partition += 1;
            disk_state.allocated += size.get();
            devices.push(BlockDevice::new(path, *size));
        }
        for device in &devices {
            state
                .partitions
                .insert(device.path.clone(), device.capacity.get());
        }
        debug!(disk, partitions = devices.len(), "provisioned partitions");
        Ok(devices)
    }
}

impl CacheController for SimPlatform {
    fn start_cache(&self, device: &BlockDevice, mode: CacheMode) -> Result<CacheInstance> {
        let mut state = self.state.lock();
        if !state.partitions.contains_key(&device.path) {
            return Err(controller_err(
                "start-cache",
                format!("no such device: {}", device.path.display()),
            ));
        }
        if state.caches.iter().any(|c| c.device == device.path) {
            return Err(controller_err(
                "start-cache",
                format!("device already caches: {}", device.path.display()),
            ));
        }

        let id = CacheId(state.next_cache_id);
        state.next_cache_id += 1;
        state.caches.push(CacheState {
            id,
            device: device.path.clone(),
            mode,
            policy: CleaningPolicy::Alru,
            cores: Vec::new(),
            removed: Vec::new(),
            running: true,
            occupancy_skew: 0,
            dirty_skew: 0,
        });
        info!(cache = %id, mode = %mode, "cache started");
        Ok(CacheInstance {
            id,
            device: device.clone(),
            mode,
            policy: CleaningPolicy::Alru,
        })
    }

    fn add_core(&self, cache: CacheId, device: &BlockDevice) -> Result<CoreInstance> {
        let mut state = self.state.lock();
        if !state.partitions.contains_key(&device.path) {
            return Err(controller_err(
                "add-core",
                format!("no such device: {}", device.path.display()),
            ));
        }
        let cache_state = running_cache_mut(&mut state, cache, "add-core")?;
        if cache_state.cores.iter().any(|c| c.path == device.path) {
            return Err(controller_err(
                "add-core",
                format!("device already attached: {}", device.path.display()),
            ));
        }

        let id = CoreId(u16::try_from(cache_state.cores.len() + 1).unwrap_or(u16::MAX));
        cache_state.cores.push(CoreState {
            id,
            path: device.path.clone(),
            touched: HashSet::new(),
            dirty: HashSet::new(),
            fingerprint: None,
        });
        info!(cache = %cache, core = %id, "core attached");
        Ok(CoreInstance {
            id,
            cache,
            path: device.path.clone(),
        })
    }

    fn set_cleaning_policy(&self, cache: CacheId, policy: CleaningPolicy) -> Result<()> {
        let mut state = self.state.lock();
        let cache_state = running_cache_mut(&mut state, cache, "set-cleaning-policy")?;
        cache_state.policy = policy;
        if policy != CleaningPolicy::Nop {
            // An active cleaning policy drains dirty lines.
            for core in cache_state
                .cores
                .iter_mut()
                .chain(cache_state.removed.iter_mut())
            {
                core.dirty.clear();
            }
        }
        Ok(())
    }

    fn remove_core(&self, cache: CacheId, core: CoreId, flush: bool) -> Result<()> {
        let mut state = self.state.lock();
        let cache_state = running_cache_mut(&mut state, cache, "remove-core")?;
        let position = cache_state
            .cores
            .iter()
            .position(|c| c.id == core)
            .ok_or_else(|| controller_err("remove-core", format!("no such core: {core}")))?;

        let core_state = cache_state.cores.remove(position);
        if flush {
            // Flushed removal persists and evicts the core's lines.
            info!(cache = %cache, core = %core, "core removed with flush");
        } else {
            // Unflushed removal leaves the lines in the cache metadata.
            info!(cache = %cache, core = %core, "core removed without flush");
            cache_state.removed.push(core_state);
        }
        Ok(())
    }

    fn load_cache(&self, device: &BlockDevice) -> Result<CacheInstance> {
        let mut state = self.state.lock();
        let cache_state = state
            .caches
            .iter_mut()
            .find(|c| c.device == device.path)
            .ok_or_else(|| {
                controller_err(
                    "load-cache",
                    format!("no cache metadata on {}", device.path.display()),
                )
            })?;
        if cache_state.running {
            return Err(controller_err(
                "load-cache",
                format!("{} is already running", cache_state.id),
            ));
        }

        cache_state.running = true;
        cache_state.occupancy_skew += self.faults.occupancy_drift_on_load;
        cache_state.dirty_skew += self.faults.dirty_drift_on_load;
        if self.faults.resurrect_removed_core {
            if let Some(core) = cache_state.removed.pop() {
                cache_state.cores.push(core);
            }
        }
        info!(cache = %cache_state.id, cores = cache_state.cores.len(), "cache loaded");
        Ok(CacheInstance {
            id: cache_state.id,
            device: device.clone(),
            mode: cache_state.mode,
            policy: cache_state.policy,
        })
    }

    fn list_caches(&self) -> Result<usize> {
        Ok(self.state.lock().caches.iter().filter(|c| c.running).count())
    }

    fn list_cores(&self, cache: CacheId) -> Result<usize> {
        let state = self.state.lock();
        let cache_state = running_cache(&state, cache, "list-cores")?;
        Ok(cache_state.cores.len())
    }

    fn occupancy(&self, target: StatTarget) -> Result<BlockCount> {
        let state = self.state.lock();
        match target {
            StatTarget::Cache(cache) => {
                let cache_state = running_cache(&state, cache, "get-statistics")?;
                Ok(BlockCount(cache_state.occupancy_lines()))
            }
            StatTarget::Core(cache, core) => {
                let core_state = attached_core(&state, cache, core)?;
                Ok(BlockCount(core_state.touched.len() as u64))
            }
        }
    }

    fn dirty_blocks(&self, target: StatTarget) -> Result<BlockCount> {
        let state = self.state.lock();
        match target {
            StatTarget::Cache(cache) => {
                let cache_state = running_cache(&state, cache, "get-statistics")?;
                Ok(BlockCount(cache_state.dirty_lines()))
            }
            StatTarget::Core(cache, core) => {
                let core_state = attached_core(&state, cache, core)?;
                Ok(BlockCount(core_state.dirty.len() as u64))
            }
        }
    }
}

fn running_cache<'a>(
    state: &'a PlatformState,
    cache: CacheId,
    command: &str,
) -> Result<&'a CacheState> {
    let cache_state = state
        .caches
        .iter()
        .find(|c| c.id == cache)
        .ok_or_else(|| controller_err(command, format!("no such cache: {cache}")))?;
    if !cache_state.running {
        // Statistics and management commands are only valid against a live
        // instance; a dormant cache must be loaded first.
        return Err(controller_err(
            command,
            format!("{cache} is not running (load it first)"),
        ));
    }
    Ok(cache_state)
}

fn running_cache_mut<'a>(
    state: &'a mut PlatformState,
    cache: CacheId,
    command: &str,
) -> Result<&'a mut CacheState> {
    let cache_state = state
        .caches
        .iter_mut()
        .find(|c| c.id == cache)
        .ok_or_else(|| controller_err(command, format!("no such cache: {cache}")))?;
    if !cache_state.running {
        return Err(controller_err(
            command,
            format!("{cache} is not running (load it first)"),
        ));
    }
    Ok(cache_state)
}

fn attached_core<'a>(
    state: &'a PlatformState,
    cache: CacheId,
    core: CoreId,
) -> Result<&'a CoreState> {
    let cache_state = running_cache(state, cache, "get-statistics")?;
    cache_state
        .cores
        .iter()
        .find(|c| c.id == core)
        .ok_or_else(|| controller_err("get-statistics", format!("no such core: {core}")))
}

// ── Load generator ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct JobOutcome {
    target: PathBuf,
    lines: HashSet<u64>,
    fingerprint: String,
}

/// Simulate one workload job: the set of distinct 4 KiB lines a seeded
/// write pass over the target device touches, plus a content fingerprint
/// over the chosen offsets.
fn simulate_job(job: &WorkloadJob, device_bytes: u64) -> JobOutcome {
    let block = job.block_size.get().max(CACHE_LINE_SIZE);
    let slots = (device_bytes / block).max(1);
    let iterations = job.total.get() / job.block_size.get().max(1);
    let lines_per_slot = block / CACHE_LINE_SIZE;

    let mut rng = DeterministicRng::new(job.seed);
    let mut hasher = blake3::Hasher::new();
    let mut lines = HashSet::new();
    for iteration in 0..iterations {
        let slot = match job.pattern {
            AccessPattern::RandWrite => rng.next_u64() % slots,
            AccessPattern::SeqWrite => iteration % slots,
        };
        hasher.update(&slot.to_le_bytes());
        let first_line = slot * lines_per_slot;
        for line in first_line..first_line + lines_per_slot {
            lines.insert(line);
        }
    }

    JobOutcome {
        target: job.target.clone(),
        lines,
        fingerprint: hasher.finalize().to_hex().to_string(),
    }
}

impl LoadGenerator for SimPlatform {
    fn run(&self, jobs: &[WorkloadJob]) -> Result<()> {
        // Resolve every target up front so a bad job fails before any
        // thread is spawned.
        {
            let state = self.state.lock();
            for job in jobs {
                if !state.partitions.contains_key(&job.target) {
                    return Err(ScenarioError::Workload {
                        detail: format!("no such device: {}", job.target.display()),
                    });
                }
            }
        }

        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            let device_bytes = *self
                .state
                .lock()
                .partitions
                .get(&job.target)
                .ok_or_else(|| ScenarioError::Workload {
                    detail: format!("no such device: {}", job.target.display()),
                })?;
            let job = job.clone();
            handles.push(thread::spawn(move || simulate_job(&job, device_bytes)));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(handle.join().map_err(|_| ScenarioError::Workload {
                detail: "workload job panicked".to_owned(),
            })?);
        }

        let clean = self.faults.clean_on_write;
        let mut state = self.state.lock();
        for outcome in outcomes {
            apply_outcome(&mut state, &outcome, clean)?;
        }
        Ok(())
    }
}

fn apply_outcome(state: &mut PlatformState, outcome: &JobOutcome, clean: bool) -> Result<()> {
    for cache in &mut state.caches {
        if !cache.running {
            continue;
        }
        let write_back = cache.mode == CacheMode::WriteBack;
        let nop = cache.policy == CleaningPolicy::Nop;
        if let Some(core) = cache.cores.iter_mut().find(|c| c.path == outcome.target) {
            core.touched.extend(outcome.lines.iter().copied());
            if write_back && nop && !clean {
                core.dirty.extend(outcome.lines.iter().copied());
            }
            core.fingerprint = Some(outcome.fingerprint.clone());
            debug!(
                target = %outcome.target.display(),
                touched = core.touched.len(),
                dirty = core.dirty.len(),
                "workload applied"
            );
            return Ok(());
        }
    }
    Err(ScenarioError::Workload {
        detail: format!("{} is not attached to any running cache", outcome.target.display()),
    })
}

// ── Reboot + hotplug ────────────────────────────────────────────────────────

impl RebootCoordinator for SimPlatform {
    fn reboot(&self, grace: Duration) -> Result<()> {
        if self.faults.fail_reboot {
            return Err(ScenarioError::Reboot {
                detail: format!(
                    "platform did not respond within {}s grace period",
                    grace.as_secs()
                ),
            });
        }

        let mut state = self.state.lock();
        for cache in &mut state.caches {
            cache.running = false;
        }
        // Hotplug handling re-enables itself on boot.
        state.hotplug_enabled = true;
        state.boot_count += 1;
        info!(boot = state.boot_count, "platform rebooted");
        Ok(())
    }
}

impl HotplugControl for SimPlatform {
    fn disable(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.hotplug_enabled = false;
        state.hotplug_disable_calls += 1;
        Ok(())
    }
}

// ── Deterministic RNG ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    fn new(seed: u64) -> Self {
        Self {
            state: seed ^ 0x9E37_79B9_7F4A_7C15,
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }
}
