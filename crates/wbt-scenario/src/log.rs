//! Step/result pipeline and structured step log.
//!
//! Every scenario step produces a [`StepRecord`] with one of three
//! outcomes: `Ok`, `SoftFailure` (a finding that is reported but does not
//! stop the remaining checks), or `FatalFailure` (the run aborts). The log
//! serializes to newline-delimited JSON for post-mortem inspection.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{error, info, warn};
use wbt_error::{Result, ScenarioError};

/// Outcome of one scenario step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ok,
    SoftFailure,
    FatalFailure,
}

/// A single structured log entry for a scenario step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: String,
    pub status: StepStatus,
    pub detail: String,
    pub duration_us: u64,
}

/// Ordered collection of step records for one scenario run.
#[derive(Debug, Clone, Default)]
pub struct ScenarioLog {
    records: Vec<StepRecord>,
}

impl ScenarioLog {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: StepRecord) {
        self.records.push(record);
    }

    #[must_use]
    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    #[must_use]
    pub fn into_records(self) -> Vec<StepRecord> {
        self.records
    }

    #[must_use]
    pub fn has_soft_failures(&self) -> bool {
        self.records
            .iter()
            .any(|r| r.status == StepStatus::SoftFailure)
    }

    #[must_use]
    pub fn has_fatal_failures(&self) -> bool {
        self.records
            .iter()
            .any(|r| r.status == StepStatus::FatalFailure)
    }

    /// Serialize all records as a newline-delimited JSON string.
    pub fn to_ndjson(&self) -> Result<String> {
        let mut out = String::new();
        for record in &self.records {
            let line = serde_json::to_string(record).map_err(|e| ScenarioError::Io(e.into()))?;
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }

    /// Write the NDJSON log to a file.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_ndjson()?)?;
        Ok(())
    }
}

/// Explicit per-run context passed into each step: the scenario name and
/// the step log. No ambient or global state, so scenario instances can run
/// in parallel in-process.
#[derive(Debug)]
pub struct StepCtx {
    scenario: String,
    log: ScenarioLog,
}

impl StepCtx {
    #[must_use]
    pub fn new(scenario: &str) -> Self {
        Self {
            scenario: scenario.to_owned(),
            log: ScenarioLog::new(),
        }
    }

    #[must_use]
    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    #[must_use]
    pub fn log(&self) -> &ScenarioLog {
        &self.log
    }

    #[must_use]
    pub fn into_log(self) -> ScenarioLog {
        self.log
    }

    /// Run a fail-fast step: on `Ok` the step is recorded as passed, on
    /// `Err` a fatal record is written and the error propagates.
    pub fn step<T>(&mut self, name: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let started = Instant::now();
        info!(scenario = %self.scenario, step = name, "step start");
        match f() {
            Ok(value) => {
                self.record_ok(name, "ok", started);
                Ok(value)
            }
            Err(err) => {
                self.record_fatal(name, &format!("[{}] {err}", err.kind().as_str()), started);
                Err(err)
            }
        }
    }

    pub fn record_ok(&mut self, step: &str, detail: &str, started: Instant) {
        info!(scenario = %self.scenario, step, detail, "step ok");
        self.push(step, StepStatus::Ok, detail, started);
    }

    /// Record a finding that does not stop the remaining checks.
    pub fn record_soft(&mut self, step: &str, detail: &str, started: Instant) {
        warn!(scenario = %self.scenario, step, detail, "step soft failure");
        self.push(step, StepStatus::SoftFailure, detail, started);
    }

    pub fn record_fatal(&mut self, step: &str, detail: &str, started: Instant) {
        error!(scenario = %self.scenario, step, detail, "step fatal failure");
        self.push(step, StepStatus::FatalFailure, detail, started);
    }

    fn push(&mut self, step: &str, status: StepStatus, detail: &str, started: Instant) {
        self.log.push(StepRecord {
            step: step.to_owned(),
            status,
            detail: detail.to_owned(),
            duration_us: u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ndjson_has_one_line_per_record() {
        let mut ctx = StepCtx::new("test");
        let started = Instant::now();
        ctx.record_ok("provision", "ok", started);
        ctx.record_soft("load_cache", "wrong core count", started);

        let log = ctx.into_log();
        let ndjson = log.to_ndjson().expect("serialize");
        assert_eq!(ndjson.lines().count(), 2);
        assert!(ndjson.lines().nth(1).unwrap().contains("soft_failure"));
        assert!(log.has_soft_failures());
        assert!(!log.has_fatal_failures());
    }

    #[test]
    fn fatal_step_propagates_error_and_is_recorded() {
        let mut ctx = StepCtx::new("test");
        let result: Result<()> = ctx.step("reboot", || {
            Err(ScenarioError::Reboot {
                detail: "timed out".into(),
            })
        });
        assert!(result.is_err());
        assert!(ctx.log().has_fatal_failures());
        let record = &ctx.log().records()[0];
        assert_eq!(record.step, "reboot");
        assert!(record.detail.contains("[infrastructure]"));
    }

    #[test]
    fn ok_step_returns_value() {
        let mut ctx = StepCtx::new("test");
        let value = ctx.step("provision", || Ok(3_usize)).expect("step");
        assert_eq!(value, 3);
        assert_eq!(ctx.log().records()[0].status, StepStatus::Ok);
    }
}
