#![forbid(unsafe_code)]
//! Clean-load scenario orchestration.
//!
//! Validates that a write-back cache holding dirty (unflushed) data survives
//! a clean platform reboot: after reload, occupancy and dirty-block counts
//! must be exactly what they were before the reboot.
//!
//! The crate provides:
//! - capability traits for the external collaborators ([`Provisioner`],
//!   [`CacheController`], [`LoadGenerator`], [`RebootCoordinator`],
//!   [`HotplugControl`]) so fakes can be substituted without touching
//!   orchestration logic
//! - a step/result pipeline with a structured NDJSON step log
//! - [`CleanLoadScenario`], the ten-step orchestrator, and its
//!   [`ScenarioReport`] verdict

pub mod log;
pub mod scenario;
pub mod traits;

pub use log::{ScenarioLog, StepCtx, StepRecord, StepStatus};
pub use scenario::{CleanLoadScenario, Collaborators, ScenarioConfig, ScenarioReport};
pub use traits::{
    AccessPattern, CacheController, CacheInstance, CoreInstance, HotplugControl, IoEngine,
    LoadGenerator, Provisioner, RebootCoordinator, StatTarget, WorkloadJob,
};
