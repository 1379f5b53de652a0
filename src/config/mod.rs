//! Tunables for the leveled compaction core and the anti-entropy repair
//! core.
//!
//! A single plain struct per core with a `Default` impl carrying
//! documented defaults, validated once at construction rather than
//! scattered through call sites.
//!
//! The `L[0]` candidate threshold and the `base_sst_size` 10x-per-level
//! scaling are conventional leveled-compaction defaults rather than
//! values pinned by any external source; this module is where that
//! choice is recorded and made overridable rather than hard-coded.

use std::time::Duration;
use thiserror::Error;

/// Errors from validating a [`CompactionConfig`] or [`RepairConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be > 0, got {value}")]
    MustBePositive { field: &'static str, value: i64 },
}

/// Tunables for the manifest and compaction task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactionConfig {
    /// `cap(i) = base_sst_size * 10^i`. The source exposes
    /// `sstable_size_in_mb` with a default of 5 MB; this crate's default is
    /// scaled up since it denotes `cap(0)`, not a single SSTable's target
    /// size — see `src/manifest/mod.rs::BASE_SST_SIZE`.
    pub base_sst_size: u64,

    /// `L[0]` is sweep-eligible once it holds at least this many SSTs.
    /// Kept configurable rather than hardcoded, since the right threshold
    /// depends on write rate and flush size.
    pub l0_threshold: usize,

    /// Hard byte cap on a single compaction output writer; once reached the
    /// writer closes on a key boundary and a fresh one opens.
    pub max_sstable_size_bytes: u64,

    /// Default `sstable_size_in_mb` fallback when the value is unparseable
    /// at configuration load time (§7 "Configuration" error policy).
    pub default_sstable_size_mb: u32,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            base_sst_size: 64 * 1024 * 1024,
            l0_threshold: 4,
            max_sstable_size_bytes: 256 * 1024 * 1024,
            default_sstable_size_mb: 5,
        }
    }
}

impl CompactionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_sst_size == 0 {
            return Err(ConfigError::MustBePositive {
                field: "base_sst_size",
                value: 0,
            });
        }
        if self.l0_threshold == 0 {
            return Err(ConfigError::MustBePositive {
                field: "l0_threshold",
                value: 0,
            });
        }
        if self.max_sstable_size_bytes == 0 {
            return Err(ConfigError::MustBePositive {
                field: "max_sstable_size_bytes",
                value: 0,
            });
        }
        Ok(())
    }
}

/// Tunables for repair sessions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepairConfig {
    /// Recommended Merkle tree depth — `2^depth` leaves per table per
    /// validation. The source does not pin an exact value; 15 matches the
    /// magnitude commonly used for per-range repair trees (enough leaves
    /// to localize disagreement without an unbounded tree).
    pub merkle_max_depth: usize,

    /// `gc_before = now_seconds - gc_grace_seconds`. Per-table in a real
    /// deployment; carried here as a session-wide default fallback.
    pub default_gc_grace_seconds: u64,

    /// `phi >= convict_threshold * this multiplier` convicts a session
    /// member per §5 "Failure-detector coupling".
    pub convict_threshold_multiplier: f64,

    /// Cap on concurrently running sessions (the "sessions pool" in §5).
    pub max_concurrent_sessions: usize,

    /// How long `Session::start` waits on the snapshot latch before giving
    /// up and failing the session.
    pub snapshot_latch_timeout: Duration,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            merkle_max_depth: 15,
            default_gc_grace_seconds: 10 * 24 * 3600,
            convict_threshold_multiplier: 2.0,
            max_concurrent_sessions: 4,
            snapshot_latch_timeout: Duration::from_secs(60),
        }
    }
}

impl RepairConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.merkle_max_depth == 0 {
            return Err(ConfigError::MustBePositive {
                field: "merkle_max_depth",
                value: 0,
            });
        }
        if self.max_concurrent_sessions == 0 {
            return Err(ConfigError::MustBePositive {
                field: "max_concurrent_sessions",
                value: 0,
            });
        }
        Ok(())
    }
}

/// Per-peer hint-dispatch throttle, per §5 "Shared mutable state": hint
/// storage/dispatch itself is out of scope, but the rate formula is a
/// standalone, testable utility.
///
/// `configured_throttle_kB / max(1, cluster_size - 1)`; zero means
/// unlimited.
pub fn per_peer_throttle_kb(configured_throttle_kb: u64, cluster_size: usize) -> u64 {
    if configured_throttle_kb == 0 {
        return 0;
    }
    let denom = cluster_size.saturating_sub(1).max(1) as u64;
    configured_throttle_kb / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configs_validate() {
        assert!(CompactionConfig::default().validate().is_ok());
        assert!(RepairConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_base_sst_size_rejected() {
        let mut c = CompactionConfig::default();
        c.base_sst_size = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn throttle_zero_is_unlimited() {
        assert_eq!(per_peer_throttle_kb(0, 10), 0);
    }

    #[test]
    fn throttle_divides_by_peer_count() {
        assert_eq!(per_peer_throttle_kb(900, 10), 100);
        // single-node cluster: denom floors at 1, not 0.
        assert_eq!(per_peer_throttle_kb(900, 1), 900);
    }
}
