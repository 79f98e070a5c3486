//! The clean-load scenario orchestrator.
//!
//! Deterministic, fail-fast execution of the ten-step sequence: provision,
//! start cache + attach cores, disable cleaning, populate dirty data,
//! remove one core without flushing, snapshot, reboot, reload, snapshot,
//! compare. Infrastructure and precondition failures abort; structural and
//! statistical anomalies are soft findings that feed the final verdict.

use crate::log::{StepCtx, StepRecord};
use crate::traits::{
    AccessPattern, CacheController, CacheInstance, CoreInstance, HotplugControl, IoEngine,
    LoadGenerator, Provisioner, RebootCoordinator, StatTarget, WorkloadJob,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use wbt_error::{Result, ScenarioError};
use wbt_types::{
    ByteSize, CacheId, CacheMode, CleaningPolicy, SnapshotComparison, StatisticsSnapshot,
};

/// Shape of one scenario run.
///
/// The default shape: a 1 GiB cache partition, two 2 GiB core partitions,
/// and a 1 GiB random 4 KiB write per core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Disk the cache partition is carved from.
    pub cache_disk: String,
    /// Disk the core partitions are carved from.
    pub core_disk: String,
    pub cache_partition: ByteSize,
    pub core_partitions: Vec<ByteSize>,
    /// Total bytes written per core during the dirty-data phase.
    pub workload_per_core: ByteSize,
    pub workload_block_size: ByteSize,
    pub workload_seed: u64,
    /// How long the reboot coordinator may wait for the platform to return.
    pub reboot_grace_secs: u64,
    /// Optional directory for the JSON report and NDJSON step log.
    pub artifact_dir: Option<PathBuf>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            cache_disk: "cache".to_owned(),
            core_disk: "core".to_owned(),
            cache_partition: ByteSize::from_gib(1),
            core_partitions: vec![ByteSize::from_gib(2); 2],
            workload_per_core: ByteSize::from_gib(1),
            workload_block_size: ByteSize::from_kib(4),
            workload_seed: 0xD1B7_10AD_0000_0001,
            reboot_grace_secs: 180,
            artifact_dir: None,
        }
    }
}

impl ScenarioConfig {
    #[must_use]
    pub fn reboot_grace(&self) -> Duration {
        Duration::from_secs(self.reboot_grace_secs)
    }
}

/// The external services the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub provisioner: Arc<dyn Provisioner>,
    pub controller: Arc<dyn CacheController>,
    pub load: Arc<dyn LoadGenerator>,
    pub reboot: Arc<dyn RebootCoordinator>,
    pub hotplug: Arc<dyn HotplugControl>,
}

/// Final verdict plus structured step-level diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub scenario: String,
    /// True iff there were no structural findings and both metrics matched.
    pub passed: bool,
    pub snapshot_before: StatisticsSnapshot,
    pub snapshot_after: StatisticsSnapshot,
    pub comparison: SnapshotComparison,
    pub structural_findings: Vec<String>,
    pub steps: Vec<StepRecord>,
    pub duration_us: u64,
}

pub struct CleanLoadScenario {
    config: ScenarioConfig,
    collab: Collaborators,
}

const SCENARIO_NAME: &str = "clean_load";

impl CleanLoadScenario {
    #[must_use]
    pub fn new(config: ScenarioConfig, collab: Collaborators) -> Self {
        Self { config, collab }
    }

    #[must_use]
    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    /// Execute the scenario end to end.
    ///
    /// Returns `Err` on precondition or infrastructure failure (the run is
    /// aborted, no report). A completed run always yields a report; its
    /// `passed` flag is the explicit aggregation of the soft findings.
    pub fn run(&self) -> Result<ScenarioReport> {
        let run_started = Instant::now();
        let mut ctx = StepCtx::new(SCENARIO_NAME);
        let mut structural: Vec<String> = Vec::new();

        let cfg = &self.config;
        let controller = &self.collab.controller;

        // Step 1: one cache partition, two core partitions.
        let (cache_dev, core_devs) = ctx.step("prepare_devices", || {
            let cache_parts = self
                .collab
                .provisioner
                .create_partitions(&cfg.cache_disk, std::slice::from_ref(&cfg.cache_partition))?;
            let cache_dev = cache_parts.into_iter().next().ok_or_else(|| {
                ScenarioError::Provisioning {
                    detail: "no cache partition returned".to_owned(),
                }
            })?;
            let core_devs = self
                .collab
                .provisioner
                .create_partitions(&cfg.core_disk, &cfg.core_partitions)?;
            Ok((cache_dev, core_devs))
        })?;

        // Step 2: start in write-back mode, attach all cores, then disable
        // hotplug handling so re-enumeration events cannot interfere.
        let (cache, cores) = ctx.step("start_cache_and_add_cores", || {
            let cache = controller.start_cache(&cache_dev, CacheMode::WriteBack)?;
            let mut cores = Vec::with_capacity(core_devs.len());
            for dev in &core_devs {
                cores.push(controller.add_core(cache.id, dev)?);
            }
            self.collab.hotplug.disable()?;
            Ok((cache, cores))
        })?;

        // Step 3: no background flushing, so dirty data stays dirty.
        ctx.step("set_cleaning_policy", || {
            controller.set_cleaning_policy(cache.id, CleaningPolicy::Nop)
        })?;

        // Step 4: concurrent randwrite per core, then assert the dirty
        // baseline exists. Without it the scenario cannot validate anything.
        ctx.step("populate_dirty_data", || {
            self.collab.load.run(&self.workload_jobs(&cores))?;
            self.check_dirty_baseline(&cache, &cores)
        })?;

        // Step 5: detach the last core in iteration order, explicitly
        // without flushing. This is the fault injection under test.
        let removed = cores.last().ok_or_else(|| ScenarioError::Controller {
            command: "remove-core".to_owned(),
            detail: "scenario requires at least one core".to_owned(),
        })?;
        ctx.step("remove_core_without_flush", || {
            controller.remove_core(cache.id, removed.id, false)
        })?;

        // Step 6: snapshot A.
        let before = ctx.step("get_statistics_before", || {
            self.capture_snapshot(cache.id)
        })?;

        // Step 7: session state does not survive the reboot, so hotplug
        // handling must be disabled again afterwards.
        ctx.step("reboot_platform", || {
            self.collab.reboot.reboot(cfg.reboot_grace())?;
            self.collab.hotplug.disable()
        })?;

        // Step 8: reload, then check the structure the metadata
        // rediscovered. Count deviations are reported, not fatal: the
        // statistic checks still run.
        let loaded = ctx.step("load_cache", || controller.load_cache(&cache_dev))?;
        self.check_structure(&mut ctx, &mut structural, loaded.id)?;

        // Step 9: snapshot B.
        let after = ctx.step("get_statistics_after", || {
            self.capture_snapshot(loaded.id)
        })?;

        // Step 10: component-wise comparison is the scenario's verdict
        // signal, one record per metric.
        let comparison = self.check_statistics(&mut ctx, before, after);

        let passed = structural.is_empty() && comparison.all_matched();
        info!(
            scenario = SCENARIO_NAME,
            passed,
            structural = structural.len(),
            mismatches = comparison.mismatch_count(),
            "scenario finished"
        );

        let report = ScenarioReport {
            scenario: SCENARIO_NAME.to_owned(),
            passed,
            snapshot_before: before,
            snapshot_after: after,
            comparison,
            structural_findings: structural,
            steps: ctx.into_log().into_records(),
            duration_us: u64::try_from(run_started.elapsed().as_micros()).unwrap_or(u64::MAX),
        };

        if let Some(dir) = &cfg.artifact_dir {
            write_artifacts(dir, &report)?;
        }

        Ok(report)
    }

    fn workload_jobs(&self, cores: &[CoreInstance]) -> Vec<WorkloadJob> {
        cores
            .iter()
            .enumerate()
            .map(|(index, core)| WorkloadJob {
                target: core.path.clone(),
                total: self.config.workload_per_core,
                block_size: self.config.workload_block_size,
                pattern: AccessPattern::RandWrite,
                engine: IoEngine::Libaio,
                seed: self
                    .config
                    .workload_seed
                    .wrapping_add(u64::try_from(index).unwrap_or(0)),
            })
            .collect()
    }

    fn check_dirty_baseline(&self, cache: &CacheInstance, cores: &[CoreInstance]) -> Result<()> {
        let controller = &self.collab.controller;
        let cache_dirty = controller.dirty_blocks(StatTarget::Cache(cache.id))?;
        if cache_dirty.is_zero() {
            return Err(ScenarioError::Precondition {
                detail: "cache does not contain dirty data".to_owned(),
            });
        }
        for core in cores {
            let core_dirty = controller.dirty_blocks(StatTarget::Core(cache.id, core.id))?;
            if core_dirty.is_zero() {
                return Err(ScenarioError::Precondition {
                    detail: format!("{} does not contain dirty data", core.id),
                });
            }
        }
        Ok(())
    }

    fn capture_snapshot(&self, cache: CacheId) -> Result<StatisticsSnapshot> {
        let controller = &self.collab.controller;
        let occupancy = controller.occupancy(StatTarget::Cache(cache))?;
        let dirty = controller.dirty_blocks(StatTarget::Cache(cache))?;
        Ok(StatisticsSnapshot::new(occupancy, dirty))
    }

    fn check_structure(
        &self,
        ctx: &mut StepCtx,
        structural: &mut Vec<String>,
        cache: CacheId,
    ) -> Result<()> {
        let started = Instant::now();
        let controller = &self.collab.controller;
        let (caches, cores) = match controller
            .list_caches()
            .and_then(|caches| Ok((caches, controller.list_cores(cache)?)))
        {
            Ok(counts) => counts,
            Err(err) => {
                ctx.record_fatal(
                    "load_cache_topology",
                    &format!("[{}] {err}", err.kind().as_str()),
                    started,
                );
                return Err(err);
            }
        };
        // One of two cores was removed before the reboot, so the reloaded
        // metadata must enumerate exactly one cache and one core.
        let expected_cores = self.config.core_partitions.len().saturating_sub(1);

        let mut findings = Vec::new();
        if caches != 1 {
            findings.push(format!("wrong number of caches: expected 1, actual {caches}"));
        }
        if cores != expected_cores {
            findings.push(format!(
                "wrong number of cores: expected {expected_cores}, actual {cores}"
            ));
        }

        if findings.is_empty() {
            ctx.record_ok("load_cache_topology", "1 cache, expected core count", started);
        } else {
            for finding in &findings {
                ctx.record_soft("load_cache_topology", finding, started);
            }
            structural.extend(findings);
        }
        Ok(())
    }

    fn check_statistics(
        &self,
        ctx: &mut StepCtx,
        before: StatisticsSnapshot,
        after: StatisticsSnapshot,
    ) -> SnapshotComparison {
        let started = Instant::now();
        let comparison = StatisticsSnapshot::compare(before, after);

        if comparison.occupancy.is_match() {
            ctx.record_ok(
                "check_statistics",
                "cache occupancy unchanged after reboot",
                started,
            );
        } else {
            ctx.record_soft(
                "check_statistics",
                &format!(
                    "cache occupancy changed: before {}, after {}",
                    before.occupancy, after.occupancy
                ),
                started,
            );
        }

        if comparison.dirty_blocks.is_match() {
            ctx.record_ok(
                "check_statistics",
                "cache dirty statistics unchanged after reboot",
                started,
            );
        } else {
            ctx.record_soft(
                "check_statistics",
                &format!(
                    "cache dirty statistics changed: before {}, after {}",
                    before.dirty_blocks, after.dirty_blocks
                ),
                started,
            );
        }

        comparison
    }
}

fn write_artifacts(dir: &std::path::Path, report: &ScenarioReport) -> Result<()> {
    fs::create_dir_all(dir)?;
    let json = serde_json::to_string_pretty(report).map_err(|e| ScenarioError::Io(e.into()))?;
    fs::write(dir.join("report.json"), json)?;

    let mut ndjson = String::new();
    for record in &report.steps {
        let line = serde_json::to_string(record).map_err(|e| ScenarioError::Io(e.into()))?;
        ndjson.push_str(&line);
        ndjson.push('\n');
    }
    fs::write(dir.join("steps.ndjson"), ndjson)?;
    Ok(())
}
