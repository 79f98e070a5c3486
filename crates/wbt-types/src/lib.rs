#![forbid(unsafe_code)]
//! Value types shared across the clean-load scenario crates.
//!
//! Everything here is a plain data carrier: identifiers assigned by the
//! cache controller, size quantities, the device handle produced by the
//! provisioner, and the statistics snapshot with its pure comparison.
//! Unit-carrying newtypes prevent mixing bytes with cache-line counts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Cache line size used for all statistics accounting, in bytes.
pub const CACHE_LINE_SIZE: u64 = 4096;

/// Count of 4 KiB cache lines.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct BlockCount(pub u64);

impl BlockCount {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Add a line count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, lines: u64) -> Option<Self> {
        self.0.checked_add(lines).map(Self)
    }

    #[must_use]
    pub fn saturating_sub(self, lines: u64) -> Self {
        Self(self.0.saturating_sub(lines))
    }
}

impl fmt::Display for BlockCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} blocks", self.0)
    }
}

/// Byte quantity (partition sizes, workload totals, I/O block sizes).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub fn from_kib(kib: u64) -> Self {
        Self(kib * 1024)
    }

    #[must_use]
    pub fn from_mib(mib: u64) -> Self {
        Self(mib * 1024 * 1024)
    }

    #[must_use]
    pub fn from_gib(gib: u64) -> Self {
        Self(gib * 1024 * 1024 * 1024)
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }

    /// Number of whole 4 KiB lines covered by this quantity (truncating).
    #[must_use]
    pub fn blocks_4k(self) -> BlockCount {
        BlockCount(self.0 / CACHE_LINE_SIZE)
    }

    /// Add a byte count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, bytes: u64) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const GIB: u64 = 1024 * 1024 * 1024;
        const MIB: u64 = 1024 * 1024;
        if self.0 >= GIB && self.0 % GIB == 0 {
            write!(f, "{} GiB", self.0 / GIB)
        } else if self.0 >= MIB && self.0 % MIB == 0 {
            write!(f, "{} MiB", self.0 / MIB)
        } else {
            write!(f, "{} B", self.0)
        }
    }
}

/// Controller-assigned cache identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheId(pub u16);

impl fmt::Display for CacheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cache{}", self.0)
    }
}

/// Controller-assigned core identifier, unique within its parent cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CoreId(pub u16);

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core{}", self.0)
    }
}

/// Cache operating mode.
///
/// The clean-load scenario only exercises `WriteBack`; the remaining modes
/// exist because the controller contract supports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    WriteThrough,
    WriteBack,
    WriteAround,
    PassThrough,
}

impl CacheMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WriteThrough => "wt",
            Self::WriteBack => "wb",
            Self::WriteAround => "wa",
            Self::PassThrough => "pt",
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Background cleaning policy. `Nop` disables automatic flushing of dirty
/// lines, which is what lets the scenario accumulate a dirty baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleaningPolicy {
    Nop,
    Alru,
    Acp,
}

impl CleaningPolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Alru => "alru",
            Self::Acp => "acp",
        }
    }
}

impl fmt::Display for CleaningPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provisioned block device (whole disk partition).
///
/// Created by the provisioner and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    pub path: PathBuf,
    pub capacity: ByteSize,
}

impl BlockDevice {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, capacity: ByteSize) -> Self {
        Self {
            path: path.into(),
            capacity,
        }
    }
}

/// Immutable record of cache statistics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub occupancy: BlockCount,
    pub dirty_blocks: BlockCount,
}

impl StatisticsSnapshot {
    #[must_use]
    pub fn new(occupancy: BlockCount, dirty_blocks: BlockCount) -> Self {
        Self {
            occupancy,
            dirty_blocks,
        }
    }

    /// Compare two snapshots component-wise.
    ///
    /// Pure function. Counts are integral, so equality is exact — there is
    /// no tolerance. Each metric is judged independently so a report can
    /// attribute a failure to the right one.
    #[must_use]
    pub fn compare(before: Self, after: Self) -> SnapshotComparison {
        SnapshotComparison {
            occupancy: MetricCheck::check(before.occupancy, after.occupancy),
            dirty_blocks: MetricCheck::check(before.dirty_blocks, after.dirty_blocks),
        }
    }
}

/// Outcome of comparing one metric across the reboot boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MetricCheck {
    Matched { value: BlockCount },
    Mismatched { before: BlockCount, after: BlockCount },
}

impl MetricCheck {
    fn check(before: BlockCount, after: BlockCount) -> Self {
        if before == after {
            Self::Matched { value: before }
        } else {
            Self::Mismatched { before, after }
        }
    }

    #[must_use]
    pub fn is_match(self) -> bool {
        matches!(self, Self::Matched { .. })
    }
}

/// Per-metric result of comparing the pre-reboot and post-reload snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotComparison {
    pub occupancy: MetricCheck,
    pub dirty_blocks: MetricCheck,
}

impl SnapshotComparison {
    #[must_use]
    pub fn all_matched(self) -> bool {
        self.occupancy.is_match() && self.dirty_blocks.is_match()
    }

    /// Number of metrics that differ (0, 1, or 2).
    #[must_use]
    pub fn mismatch_count(self) -> usize {
        usize::from(!self.occupancy.is_match()) + usize::from(!self.dirty_blocks.is_match())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_size_conversions() {
        assert_eq!(ByteSize::from_kib(4).get(), 4096);
        assert_eq!(ByteSize::from_mib(1).get(), 1024 * 1024);
        assert_eq!(ByteSize::from_gib(2).get(), 2 * 1024 * 1024 * 1024);
        assert_eq!(ByteSize::from_gib(1).blocks_4k(), BlockCount(262_144));
    }

    #[test]
    fn byte_size_display_picks_largest_exact_unit() {
        assert_eq!(ByteSize::from_gib(2).to_string(), "2 GiB");
        assert_eq!(ByteSize::from_mib(512).to_string(), "512 MiB");
        assert_eq!(ByteSize(4097).to_string(), "4097 B");
    }

    #[test]
    fn equal_snapshots_match_on_both_metrics() {
        let snap = StatisticsSnapshot::new(BlockCount(1000), BlockCount(400));
        let cmp = StatisticsSnapshot::compare(snap, snap);
        assert!(cmp.all_matched());
        assert_eq!(cmp.mismatch_count(), 0);
    }

    #[test]
    fn occupancy_mismatch_does_not_implicate_dirty() {
        let before = StatisticsSnapshot::new(BlockCount(1000), BlockCount(400));
        let after = StatisticsSnapshot::new(BlockCount(999), BlockCount(400));
        let cmp = StatisticsSnapshot::compare(before, after);
        assert!(!cmp.occupancy.is_match());
        assert!(cmp.dirty_blocks.is_match());
        assert_eq!(cmp.mismatch_count(), 1);
        assert_eq!(
            cmp.occupancy,
            MetricCheck::Mismatched {
                before: BlockCount(1000),
                after: BlockCount(999),
            }
        );
    }

    #[test]
    fn both_metrics_can_mismatch_independently() {
        let before = StatisticsSnapshot::new(BlockCount(1000), BlockCount(400));
        let after = StatisticsSnapshot::new(BlockCount(1), BlockCount(2));
        let cmp = StatisticsSnapshot::compare(before, after);
        assert_eq!(cmp.mismatch_count(), 2);
        assert!(!cmp.all_matched());
    }

    #[test]
    fn display_formatting() {
        assert_eq!(CacheId(1).to_string(), "cache1");
        assert_eq!(CoreId(2).to_string(), "core2");
        assert_eq!(CacheMode::WriteBack.to_string(), "wb");
        assert_eq!(CleaningPolicy::Nop.to_string(), "nop");
        assert_eq!(BlockCount(7).to_string(), "7 blocks");
    }
}
