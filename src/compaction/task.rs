//! [`CompactionTask`]: turns a [`Candidates`](crate::manifest::scheduler::Candidates)
//! selection into a merged, deduplicated, bounded-size set of output
//! SSTables and hands the result to [`Manifest::promote`].
//!
//! Open inputs, run a merge, dedup, write output(s), then a single atomic
//! manifest update — generalized to leveled target-level placement and a
//! size-bounded multi-output writer, since a single compaction's
//! survivors can exceed one SSTable's configured size cap.

use super::scanner::LeveledScanner;
use crate::config::CompactionConfig;
use crate::manifest::scheduler::Candidates;
use crate::manifest::{Manifest, ManifestError, ManifestSstEntry};
use crate::row::{dedup_rows, PointEntry, RangeTombstone};
use crate::sstable::{SSTableError, SstHandle, SstWriter};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CompactionError {
    #[error(transparent)]
    Sstable(#[from] SSTableError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("candidate set is empty, nothing to compact")]
    NoCandidates,
}

/// A fully resolved compaction input: the manifest's bookkeeping entry
/// plus the opened table it describes.
pub struct CompactionInput {
    pub entry: ManifestSstEntry,
    pub handle: Arc<dyn SstHandle>,
}

/// Estimated per-entry overhead (block/index/bloom/footer bookkeeping) used
/// only to decide where to cut an output SST; it does not need to be
/// precise, only monotonic in entry size.
const ENTRY_OVERHEAD_ESTIMATE: u64 = 48;

/// Runs one compaction: merges `inputs`, drops obsolete point tombstones
/// and range tombstones older than `gc_before`, and writes the survivors
/// out as one or more SSTables under `output_dir`, each capped at
/// `config.max_sstable_size_bytes`.
///
/// `inputs` must already be grouped the way [`LeveledScanner`] requires:
/// `L[0]` contributors each as their own single-entry group (since `L[0]`
/// tables may overlap each other), every other level's contributors as one
/// group sorted by `first_key` (levels `≥ 1` never overlap within
/// themselves).
pub struct CompactionTask<'a> {
    manifest: &'a Manifest,
    candidates: Candidates,
    level_groups: Vec<Vec<CompactionInput>>,
    output_dir: PathBuf,
    config: CompactionConfig,
    gc_before: u64,
}

impl<'a> CompactionTask<'a> {
    pub fn new(
        manifest: &'a Manifest,
        candidates: Candidates,
        level_groups: Vec<Vec<CompactionInput>>,
        output_dir: impl AsRef<Path>,
        config: CompactionConfig,
        gc_before: u64,
    ) -> Self {
        Self {
            manifest,
            candidates,
            level_groups,
            output_dir: output_dir.as_ref().to_path_buf(),
            config,
            gc_before,
        }
    }

    /// Runs the merge/dedup/write/promote pipeline. On any failure the
    /// manifest's claim on the input ids is released via
    /// [`Manifest::abort_compaction`] so the ids become selectable again;
    /// the caller is responsible for discarding any output files already
    /// written.
    pub fn run(self) -> Result<Vec<u64>, CompactionError> {
        if self.candidates.inputs.is_empty() {
            return Err(CompactionError::NoCandidates);
        }
        match self.run_inner() {
            Ok(ids) => Ok(ids),
            Err(e) => {
                self.manifest.abort_compaction(&self.candidates.inputs);
                Err(e)
            }
        }
    }

    fn run_inner(&self) -> Result<Vec<u64>, CompactionError> {
        let handle_groups: Vec<Vec<Arc<dyn SstHandle>>> = self
            .level_groups
            .iter()
            .map(|group| group.iter().map(|i| i.handle.clone()).collect())
            .collect();

        let scanner = LeveledScanner::new(handle_groups, None);
        let merged: Vec<_> = scanner.collect::<Result<Vec<_>, SSTableError>>()?;
        debug!(rows = merged.len(), "compaction merge produced rows");

        let (points, ranges) = dedup_rows(merged.into_iter());
        let (points, ranges) = self.drop_expired(points, ranges);

        let mut chunks = chunk_by_size(points, self.config.max_sstable_size_bytes);

        if chunks.is_empty() && ranges.is_empty() {
            // Every input row was garbage-collected: promote an empty
            // removal (no output SSTs).
            self.manifest.promote(self.candidates.inputs.clone(), Vec::new())?;
            return Ok(Vec::new());
        }
        if chunks.is_empty() {
            // No surviving point entries, but the range tombstones still
            // need a home: a single tombstone-only output.
            chunks.push(Vec::new());
        }

        let mut new_entries = Vec::with_capacity(chunks.len());
        let mut new_ids = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let id = self.manifest.allocate_sst_id()?;
            let path = self.output_dir.join(format!("{id}.sst"));
            // Every output chunk carries the full surviving range-tombstone
            // set: a tombstone may span several chunks' point-key ranges,
            // and redundantly storing it in more than one sibling output
            // at the same target level is harmless (the manifest only
            // requires non-overlap of point-key bounds across a level, and
            // repeated reads of the same tombstone are idempotent).
            let point_count = chunk.len();
            let range_count = ranges.len();
            SstWriter::new(&path).build(
                chunk.clone().into_iter(),
                point_count,
                ranges.clone().into_iter(),
                range_count,
            )?;

            let (first_key, last_key) = bounds(&chunk, &ranges)
                .ok_or_else(|| SSTableError::Internal("empty compaction output chunk".into()))?;
            let uncompressed_length = estimate_size(&chunk, &ranges);

            new_entries.push(ManifestSstEntry {
                id,
                path,
                level: -1, // Manifest::promote assigns the real target level.
                first_key,
                last_key,
                uncompressed_length,
            });
            new_ids.push(id);
        }

        self.manifest.promote(self.candidates.inputs.clone(), new_entries)?;
        info!(
            inputs = self.candidates.inputs.len(),
            outputs = new_ids.len(),
            "compaction complete"
        );
        Ok(new_ids)
    }

    /// Drops point deletions and range tombstones whose `timestamp` is
    /// older than `gc_before`. Per this crate's scope, that threshold is
    /// the entire eligibility test — it does not attempt to prove the
    /// deletion's shadow is no longer needed by any SST outside this
    /// compaction's inputs.
    fn drop_expired(
        &self,
        points: Vec<PointEntry>,
        ranges: Vec<RangeTombstone>,
    ) -> (Vec<PointEntry>, Vec<RangeTombstone>) {
        let points = points
            .into_iter()
            .filter(|p| p.value.is_some() || p.timestamp >= self.gc_before)
            .collect();
        let ranges = ranges
            .into_iter()
            .filter(|r| r.timestamp >= self.gc_before)
            .collect();
        (points, ranges)
    }
}

fn chunk_by_size(points: Vec<PointEntry>, max_bytes: u64) -> Vec<Vec<PointEntry>> {
    if points.is_empty() {
        return Vec::new();
    }
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut current_bytes: u64 = 0;
    for p in points {
        let size = entry_size(&p);
        if !current.is_empty() && current_bytes + size > max_bytes {
            chunks.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += size;
        current.push(p);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn entry_size(p: &PointEntry) -> u64 {
    p.key.key.len() as u64 + p.value.as_ref().map(|v| v.len()).unwrap_or(0) as u64
        + ENTRY_OVERHEAD_ESTIMATE
}

fn estimate_size(points: &[PointEntry], ranges: &[RangeTombstone]) -> u64 {
    points.iter().map(entry_size).sum::<u64>()
        + ranges.len() as u64 * ENTRY_OVERHEAD_ESTIMATE
}

fn bounds(
    points: &[PointEntry],
    ranges: &[RangeTombstone],
) -> Option<(crate::token::DecoratedKey, crate::token::DecoratedKey)> {
    let mut keys: Vec<&crate::token::DecoratedKey> = Vec::new();
    for p in points {
        keys.push(&p.key);
    }
    for r in ranges {
        keys.push(&r.start);
        keys.push(&r.end);
    }
    let first = keys.iter().min_by(|a, b| a.cmp(b))?;
    let last = keys.iter().max_by(|a, b| a.cmp(b))?;
    Some(((*first).clone(), (*last).clone()))
}

/// Groups a candidate's input ids into the per-level handle groups
/// [`CompactionTask`] expects, resolving each id's [`ManifestSstEntry`]
/// via `entries_by_level` and opening its file with `opener`.
pub fn resolve_inputs(
    candidates: &Candidates,
    entries_by_level: &HashMap<i32, Vec<ManifestSstEntry>>,
    mut opener: impl FnMut(&ManifestSstEntry) -> Result<Arc<dyn SstHandle>, SSTableError>,
) -> Result<Vec<Vec<CompactionInput>>, SSTableError> {
    let wanted: std::collections::HashSet<u64> = candidates.inputs.iter().copied().collect();
    let mut groups = Vec::new();
    let mut levels: Vec<i32> = entries_by_level.keys().copied().collect();
    levels.sort_unstable();
    for level in levels {
        let mut entries: Vec<&ManifestSstEntry> = entries_by_level[&level]
            .iter()
            .filter(|e| wanted.contains(&e.id))
            .collect();
        if entries.is_empty() {
            continue;
        }
        entries.sort_by(|a, b| a.first_key.cmp(&b.first_key));
        if level == 0 {
            // L0 tables may overlap each other: each gets its own
            // single-element group so the scanner never assumes two of
            // them are non-overlapping neighbors.
            for e in entries {
                groups.push(vec![CompactionInput {
                    entry: e.clone(),
                    handle: opener(e)?,
                }]);
            }
        } else {
            let mut group = Vec::with_capacity(entries.len());
            for e in entries {
                group.push(CompactionInput {
                    entry: e.clone(),
                    handle: opener(e)?,
                });
            }
            groups.push(group);
        }
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::PointEntry;
    use crate::token::{DecoratedKey, Token};

    fn dk(t: u128) -> DecoratedKey {
        DecoratedKey { token: Token(t), key: t.to_le_bytes().to_vec() }
    }

    fn pe(t: u128, len: usize) -> PointEntry {
        PointEntry::new(dk(t), vec![0u8; len], 1, 1)
    }

    #[test]
    fn chunk_by_size_splits_once_over_cap() {
        let points = vec![pe(1, 10), pe(2, 10), pe(3, 10)];
        let chunks = chunk_by_size(points, ENTRY_OVERHEAD_ESTIMATE + 10 + 5);
        assert_eq!(chunks.len(), 3, "each entry alone already exceeds the tiny cap's headroom");
    }

    #[test]
    fn chunk_by_size_keeps_small_entries_together() {
        let points = vec![pe(1, 1), pe(2, 1), pe(3, 1)];
        let chunks = chunk_by_size(points, 10_000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 3);
    }

    #[test]
    fn chunk_by_size_empty_input_yields_no_chunks() {
        assert!(chunk_by_size(Vec::new(), 1024).is_empty());
    }
}
