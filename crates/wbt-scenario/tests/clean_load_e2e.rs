//! End-to-end runs of the clean-load scenario against the simulated
//! platform, covering the fault-free pass and every injected deviation.

use std::fs;
use wbt_error::{ErrorKind, ScenarioError};
use wbt_scenario::{CleanLoadScenario, ScenarioConfig, ScenarioReport, StepStatus};
use wbt_sim::{SimFaults, SimPlatform};
use wbt_types::ByteSize;

fn sim_with(faults: SimFaults) -> SimPlatform {
    let sim = SimPlatform::with_faults(faults);
    sim.add_disk("cache", ByteSize::from_gib(4));
    sim.add_disk("core", ByteSize::from_gib(8));
    sim
}

fn test_config() -> ScenarioConfig {
    // Reference shape, with a smaller workload so the suite stays fast.
    ScenarioConfig {
        workload_per_core: ByteSize::from_mib(64),
        ..ScenarioConfig::default()
    }
}

fn run_scenario(faults: SimFaults) -> (SimPlatform, wbt_error::Result<ScenarioReport>) {
    let sim = sim_with(faults);
    let scenario = CleanLoadScenario::new(test_config(), sim.collaborators());
    let report = scenario.run();
    (sim, report)
}

#[test]
fn fault_free_run_passes() {
    let (sim, report) = run_scenario(SimFaults::default());
    let report = report.expect("scenario completes");

    assert!(report.passed);
    assert!(report.structural_findings.is_empty());
    assert!(report.comparison.all_matched());
    assert_eq!(report.snapshot_before, report.snapshot_after);
    assert!(report.snapshot_before.dirty_blocks.0 > 0);
    assert!(report.snapshot_before.occupancy.0 > 0);

    // The platform was rebooted exactly once.
    assert_eq!(sim.boot_count(), 2);
    // Hotplug handling is disabled after setup and again after the reboot.
    assert_eq!(sim.hotplug_disable_calls(), 2);

    // Every step record came back ok.
    assert!(report.steps.iter().all(|r| r.status == StepStatus::Ok));
    let names: Vec<&str> = report.steps.iter().map(|r| r.step.as_str()).collect();
    assert_eq!(
        names,
        [
            "prepare_devices",
            "start_cache_and_add_cores",
            "set_cleaning_policy",
            "populate_dirty_data",
            "remove_core_without_flush",
            "get_statistics_before",
            "reboot_platform",
            "load_cache",
            "load_cache_topology",
            "get_statistics_after",
            "check_statistics",
            "check_statistics",
        ]
    );
}

#[test]
fn occupancy_drift_fails_only_the_occupancy_check() {
    let (_sim, report) = run_scenario(SimFaults {
        occupancy_drift_on_load: -17,
        ..SimFaults::default()
    });
    let report = report.expect("scenario completes");

    assert!(!report.passed);
    assert!(report.structural_findings.is_empty());
    assert_eq!(report.comparison.mismatch_count(), 1);
    assert!(!report.comparison.occupancy.is_match());
    assert!(report.comparison.dirty_blocks.is_match());

    let soft: Vec<_> = report
        .steps
        .iter()
        .filter(|r| r.status == StepStatus::SoftFailure)
        .collect();
    assert_eq!(soft.len(), 1);
    assert_eq!(soft[0].step, "check_statistics");
    assert!(soft[0].detail.contains("occupancy changed"));
}

#[test]
fn drift_on_both_metrics_is_reported_per_metric() {
    let (_sim, report) = run_scenario(SimFaults {
        occupancy_drift_on_load: 40,
        dirty_drift_on_load: -3,
        ..SimFaults::default()
    });
    let report = report.expect("scenario completes");

    assert!(!report.passed);
    assert_eq!(report.comparison.mismatch_count(), 2);
    let soft = report
        .steps
        .iter()
        .filter(|r| r.status == StepStatus::SoftFailure)
        .count();
    assert_eq!(soft, 2);
}

#[test]
fn missing_dirty_baseline_aborts_as_precondition_failure() {
    let (sim, report) = run_scenario(SimFaults {
        clean_on_write: true,
        ..SimFaults::default()
    });
    let err = report.expect_err("scenario aborts");

    assert!(matches!(err, ScenarioError::Precondition { .. }));
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert!(err.to_string().contains("dirty data"));
    // The run aborted before the reboot step.
    assert_eq!(sim.boot_count(), 1);
}

#[test]
fn resurrected_core_is_a_structural_finding_but_checks_still_run() {
    let (_sim, report) = run_scenario(SimFaults {
        resurrect_removed_core: true,
        ..SimFaults::default()
    });
    let report = report.expect("scenario completes");

    assert!(!report.passed);
    assert_eq!(report.structural_findings.len(), 1);
    assert!(report.structural_findings[0].contains("wrong number of cores"));
    // The cache-level totals were preserved, so the statistics comparison
    // still ran and still matched.
    assert!(report.comparison.all_matched());
    assert!(report
        .steps
        .iter()
        .any(|r| r.step == "check_statistics" && r.status == StepStatus::Ok));
}

#[test]
fn failed_reboot_aborts_with_infrastructure_error() {
    let (_sim, report) = run_scenario(SimFaults {
        fail_reboot: true,
        ..SimFaults::default()
    });
    let err = report.expect_err("scenario aborts");

    assert!(matches!(err, ScenarioError::Reboot { .. }));
    assert_eq!(err.kind(), ErrorKind::Infrastructure);
}

#[test]
fn artifacts_are_written_when_a_directory_is_configured() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sim = sim_with(SimFaults::default());
    let config = ScenarioConfig {
        artifact_dir: Some(dir.path().to_path_buf()),
        ..test_config()
    };
    let report = CleanLoadScenario::new(config, sim.collaborators())
        .run()
        .expect("scenario completes");

    let json = fs::read_to_string(dir.path().join("report.json")).expect("report.json");
    let parsed: ScenarioReport = serde_json::from_str(&json).expect("valid report");
    assert_eq!(parsed.passed, report.passed);
    assert_eq!(parsed.steps.len(), report.steps.len());

    let ndjson = fs::read_to_string(dir.path().join("steps.ndjson")).expect("steps.ndjson");
    assert_eq!(ndjson.lines().count(), report.steps.len());
    for line in ndjson.lines() {
        let _: wbt_scenario::StepRecord = serde_json::from_str(line).expect("valid record");
    }
}

#[test]
fn scenario_is_deterministic_across_identical_runs() {
    let (_sim_a, report_a) = run_scenario(SimFaults::default());
    let (_sim_b, report_b) = run_scenario(SimFaults::default());
    let report_a = report_a.expect("run a");
    let report_b = report_b.expect("run b");

    assert_eq!(report_a.snapshot_before, report_b.snapshot_before);
    assert_eq!(report_a.snapshot_after, report_b.snapshot_after);
}
