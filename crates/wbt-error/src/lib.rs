#![forbid(unsafe_code)]
//! Error types for the clean-load scenario.
//!
//! # Error Taxonomy
//!
//! The scenario distinguishes four failure classes, but only two of them
//! are Rust errors:
//!
//! | Class | Carrier | Effect |
//! |-------|---------|--------|
//! | Precondition failure | [`ScenarioError::Precondition`] | aborts the run |
//! | Infrastructure error | every other [`ScenarioError`] variant | aborts the run |
//! | Structural-state anomaly | soft finding in the scenario report | run continues |
//! | Statistical mismatch | soft finding in the scenario report | run continues |
//!
//! Structural anomalies (wrong cache/core count after reload) and
//! statistical mismatches (occupancy or dirty count changed across the
//! reboot) are the scenario's *findings*, not its errors: later checks must
//! still execute after one is observed, so they travel in the report and
//! the step log rather than through `Result`. `ScenarioError` is reserved
//! for conditions that make the rest of the run meaningless.
//!
//! No variant is retryable. The scenario is deterministic by design and
//! transient failures are surfaced, not masked.

use thiserror::Error;

/// Fatal error raised by a scenario step.
///
/// Every variant aborts the run immediately. [`ScenarioError::kind`] maps
/// each variant to its taxonomy class for reporting.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// The dirty baseline required by the scenario was not produced.
    ///
    /// Raised after the write phase when the cache or any core reports a
    /// zero dirty-block count. Indicates environment or workload
    /// misconfiguration, not a cache defect.
    #[error("precondition failed: {detail}")]
    Precondition { detail: String },

    /// Device provisioning failed (insufficient disk capacity, unknown disk).
    #[error("provisioning failed: {detail}")]
    Provisioning { detail: String },

    /// A cache-controller command returned a diagnostic failure.
    #[error("controller command `{command}` failed: {detail}")]
    Controller { command: String, detail: String },

    /// The load generator hit a device I/O error.
    #[error("workload failed: {detail}")]
    Workload { detail: String },

    /// The platform did not come back within the reboot grace period.
    #[error("reboot failed: {detail}")]
    Reboot { detail: String },

    /// Artifact or log I/O error (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScenarioError {
    /// Taxonomy class of this error.
    ///
    /// The match is exhaustive — adding a variant without classifying it is
    /// a compile error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Precondition { .. } => ErrorKind::Precondition,
            Self::Provisioning { .. }
            | Self::Controller { .. }
            | Self::Workload { .. }
            | Self::Reboot { .. }
            | Self::Io(_) => ErrorKind::Infrastructure,
        }
    }
}

/// Taxonomy class for [`ScenarioError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Precondition,
    Infrastructure,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Precondition => "precondition",
            Self::Infrastructure => "infrastructure",
        }
    }
}

/// Result alias using `ScenarioError`.
pub type Result<T> = std::result::Result<T, ScenarioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_classification_covers_all_variants() {
        let cases: Vec<(ScenarioError, ErrorKind)> = vec![
            (
                ScenarioError::Precondition {
                    detail: "no dirty data".into(),
                },
                ErrorKind::Precondition,
            ),
            (
                ScenarioError::Provisioning {
                    detail: "disk full".into(),
                },
                ErrorKind::Infrastructure,
            ),
            (
                ScenarioError::Controller {
                    command: "start-cache".into(),
                    detail: "exit 1".into(),
                },
                ErrorKind::Infrastructure,
            ),
            (
                ScenarioError::Workload {
                    detail: "EIO".into(),
                },
                ErrorKind::Infrastructure,
            ),
            (
                ScenarioError::Reboot {
                    detail: "timed out".into(),
                },
                ErrorKind::Infrastructure,
            ),
            (
                ScenarioError::Io(std::io::Error::other("test")),
                ErrorKind::Infrastructure,
            ),
        ];

        for (error, expected) in &cases {
            assert_eq!(error.kind(), *expected, "wrong kind for {error:?}");
        }
    }

    #[test]
    fn display_formatting() {
        let err = ScenarioError::Controller {
            command: "remove-core".into(),
            detail: "core is active".into(),
        };
        assert_eq!(
            err.to_string(),
            "controller command `remove-core` failed: core is active"
        );

        let pre = ScenarioError::Precondition {
            detail: "cache does not contain dirty data".into(),
        };
        assert_eq!(
            pre.to_string(),
            "precondition failed: cache does not contain dirty data"
        );

        assert_eq!(ErrorKind::Precondition.as_str(), "precondition");
        assert_eq!(ErrorKind::Infrastructure.as_str(), "infrastructure");
    }
}
