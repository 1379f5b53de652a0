//! # Manifest Component
//!
//! The **Manifest** is the central metadata authority for the leveled
//! compaction core. It tracks the engine's durable state, including:
//!
//! - active WAL segment ID,
//! - frozen (older) WAL segments,
//! - the per-level SST layout (`L[0..=K]`),
//! - latest durable global LSN,
//! - manifest version number.
//!
//! The manifest acts as a *miniature WAL-driven metadata database*.
//!
//! ## Data durability strategy
//!
//! Manifest metadata is persisted using a **WAL + periodic snapshot** model:
//!
//! 1. **Manifest WAL** (`manifest.wal`) records mutation operations:
//!    - switching active WAL,
//!    - promoting WALs to frozen,
//!    - adding/replacing/promoting SSTables,
//!    - updating LSN.
//!
//! 2. **Manifest snapshot** (`MANIFEST-000001`) is a compact encoded
//!    dump of the whole metadata structure. Checksum ensures corruption detection.
//!
//! 3. On startup:
//!    - If a valid snapshot exists → load snapshot, replay WAL.
//!    - If snapshot corrupted → return error.
//!
//! This ensures crash recovery is always correct and consistent.
//!
//! ## Thread safety
//!
//! - **WAL** is internally synchronized — no external lock is required.
//! - **ManifestData** is wrapped in a `Mutex` to coordinate concurrent metadata operations.
//!
//! The manifest itself is fully thread-safe and can be accessed from any engine thread.
//!
//! ## Levels
//!
//! Unlike a flat SST list, this manifest tracks an ordered sequence of
//! levels `L[0..=K]`. `L[0]` makes no non-overlap guarantee (new flush and
//! streamed SSTs land there); every `L[i], i ≥ 1` is kept pairwise
//! non-overlapping by the scheduler's candidate selection and the
//! compaction task's target-level rule.

pub mod scheduler;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use crate::encoding::{self, EncodingError};
use crate::token::DecoratedKey;
use crate::wal::{Wal, WalError};
use crc32fast::Hasher as Crc32;
use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};
use thiserror::Error;
use tracing::{error, info, warn};

const SNAPSHOT_TMP_SUFFIX: &str = ".tmp";
const SNAPSHOT_FILENAME: &str = "MANIFEST-000001";
/// Manifest WAL filename. This is a fixed, single-segment WAL file — it does
/// not rotate. Truncated to zero on each checkpoint.
const WAL_FILENAME: &str = "000000.log";

/// `L[0]` is treated specially by the candidate-selection policy: it makes
/// no non-overlap guarantee and its score is `|L[0]| / L0_THRESHOLD` rather
/// than a byte-size ratio.
pub const L0_THRESHOLD: usize = 4;

/// `cap(i) = BASE_SST_SIZE * 10^i`.
pub const BASE_SST_SIZE: u64 = 64 * 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by manifest operations.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Underlying WAL I/O failure.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Snapshot file is corrupted or checksum mismatched.
    #[error("Snapshot checksum mismatch")]
    SnapshotChecksumMismatch,

    /// An operation referenced an SST id the manifest does not know about.
    #[error("unknown SSTable id {0}")]
    UnknownSst(u64),

    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Manifest data structures
// ------------------------------------------------------------------------------------------------

/// In-memory representation of the manifest durable state.
///
/// This structure stores the persistent metadata describing
/// the layout of the leveled tree. Fields are private to enforce
/// invariants through the [`Manifest`] API.
#[derive(Debug, PartialEq, Clone)]
pub(crate) struct ManifestData {
    /// Monotonically increasing manifest version.
    version: u64,

    /// Last globally assigned LSN (Log Sequence Number).
    last_lsn: u64,

    /// Identifier of current active WAL segment.
    active_wal: u64,

    /// Identifiers of frozen WAL segments (older, ready for flush).
    frozen_wals: Vec<u64>,

    /// Per-level ordered SST id lists, `levels[i]` is `L[i]`.
    levels: Vec<LevelState>,

    /// All known SSTable entries, keyed by id. The source of truth for
    /// everything but level membership, which lives in `levels`.
    sstables: HashMap<u64, ManifestSstEntry>,

    /// Last-compaction timestamp per SST id, used for the LRU tie-break in
    /// candidate selection. A monotonically increasing logical clock, not
    /// wall-clock time — bumped once per `promote` call.
    last_compacted: HashMap<u64, u64>,

    /// Logical clock driving `last_compacted`.
    compaction_clock: u64,

    /// Next SSTable ID to allocate. Monotonically increasing.
    next_sst_id: u64,

    /// Runtime-only flag: true when in-memory state diverges from
    /// the last persisted snapshot. Not serialized.
    dirty: bool,
}

/// `L[i]`: the ordered set of SST ids assigned to level `i`.
///
/// For `i ≥ 1` the ids are kept sorted by `first_key`, which is both the
/// non-overlap invariant's natural order and what
/// [`LeveledScanner`](crate::compaction::scanner::LeveledScanner) needs to
/// open SSTs in `first_key` order.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct LevelState {
    pub ids: Vec<u64>,
}

/// Entry describing a single SSTable known to the manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestSstEntry {
    /// Globally unique SSTable ID.
    pub id: u64,

    /// Filesystem path to SSTable file.
    pub path: PathBuf,

    /// Level this SST currently belongs to. `-1` means "not yet placed";
    /// [`Manifest::add`] normalizes this to `0` on insert.
    pub level: i32,

    pub first_key: DecoratedKey,
    pub last_key: DecoratedKey,
    pub uncompressed_length: u64,
}

// ------------------------------------------------------------------------------------------------
// Encoding implementations
// ------------------------------------------------------------------------------------------------

impl encoding::Encode for ManifestSstEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.id, buf)?;
        encoding::Encode::encode_to(&self.path, buf)?;
        encoding::Encode::encode_to(&self.level, buf)?;
        encoding::Encode::encode_to(&self.first_key, buf)?;
        encoding::Encode::encode_to(&self.last_key, buf)?;
        encoding::Encode::encode_to(&self.uncompressed_length, buf)?;
        Ok(())
    }
}

impl encoding::Decode for ManifestSstEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (id, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (path, n) = PathBuf::decode_from(&buf[offset..])?;
        offset += n;
        let (level, n) = i32::decode_from(&buf[offset..])?;
        offset += n;
        let (first_key, n) = DecoratedKey::decode_from(&buf[offset..])?;
        offset += n;
        let (last_key, n) = DecoratedKey::decode_from(&buf[offset..])?;
        offset += n;
        let (uncompressed_length, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                id,
                path,
                level,
                first_key,
                last_key,
                uncompressed_length,
            },
            offset,
        ))
    }
}

impl encoding::Encode for LevelState {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::encode_vec(&self.ids, buf)
    }
}

impl encoding::Decode for LevelState {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (ids, n) = encoding::decode_vec::<u64>(buf)?;
        Ok((Self { ids }, n))
    }
}

impl encoding::Encode for ManifestData {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.version, buf)?;
        encoding::Encode::encode_to(&self.last_lsn, buf)?;
        encoding::Encode::encode_to(&self.active_wal, buf)?;
        encoding::encode_vec(&self.frozen_wals, buf)?;
        encoding::encode_vec(&self.levels, buf)?;
        let sstables: Vec<ManifestSstEntry> = {
            let mut v: Vec<_> = self.sstables.values().cloned().collect();
            v.sort_by_key(|e| e.id);
            v
        };
        encoding::encode_vec(&sstables, buf)?;
        let last_compacted: Vec<(u64, u64)> = {
            let mut v: Vec<_> = self.last_compacted.iter().map(|(k, v)| (*k, *v)).collect();
            v.sort_by_key(|(k, _)| *k);
            v
        };
        encoding::Encode::encode_to(&len_u32(last_compacted.len())?, buf)?;
        for (id, ts) in &last_compacted {
            encoding::Encode::encode_to(id, buf)?;
            encoding::Encode::encode_to(ts, buf)?;
        }
        encoding::Encode::encode_to(&self.compaction_clock, buf)?;
        encoding::Encode::encode_to(&self.next_sst_id, buf)?;
        // `dirty` is a runtime-only flag — always written as `false` for
        // wire compatibility, but never read back.
        encoding::Encode::encode_to(&false, buf)?;
        Ok(())
    }
}

fn len_u32(len: usize) -> Result<u32, EncodingError> {
    u32::try_from(len)
        .map_err(|_| EncodingError::LengthOverflow(format!("length {len} exceeds u32::MAX")))
}

impl encoding::Decode for ManifestData {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (version, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (last_lsn, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (active_wal, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (frozen_wals, n) = encoding::decode_vec::<u64>(&buf[offset..])?;
        offset += n;
        let (levels, n) = encoding::decode_vec::<LevelState>(&buf[offset..])?;
        offset += n;
        let (sst_vec, n) = encoding::decode_vec::<ManifestSstEntry>(&buf[offset..])?;
        offset += n;
        let sstables = sst_vec.into_iter().map(|e| (e.id, e)).collect();
        let (count, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let mut last_compacted = HashMap::new();
        for _ in 0..count {
            let (id, n) = u64::decode_from(&buf[offset..])?;
            offset += n;
            let (ts, n) = u64::decode_from(&buf[offset..])?;
            offset += n;
            last_compacted.insert(id, ts);
        }
        let (compaction_clock, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (next_sst_id, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        // `dirty` is present in the wire format for backward compatibility
        // but its value is discarded — always initialised to `false`.
        let (_dirty, n) = bool::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                version,
                last_lsn,
                active_wal,
                frozen_wals,
                levels,
                sstables,
                last_compacted,
                compaction_clock,
                next_sst_id,
                dirty: false,
            },
            offset,
        ))
    }
}

impl encoding::Encode for ManifestEvent {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            ManifestEvent::Version { version } => {
                encoding::Encode::encode_to(&0u32, buf)?;
                encoding::Encode::encode_to(version, buf)?;
            }
            ManifestEvent::SetActiveWal { wal } => {
                encoding::Encode::encode_to(&1u32, buf)?;
                encoding::Encode::encode_to(wal, buf)?;
            }
            ManifestEvent::AddFrozenWal { wal } => {
                encoding::Encode::encode_to(&2u32, buf)?;
                encoding::Encode::encode_to(wal, buf)?;
            }
            ManifestEvent::RemoveFrozenWal { wal } => {
                encoding::Encode::encode_to(&3u32, buf)?;
                encoding::Encode::encode_to(wal, buf)?;
            }
            ManifestEvent::Add { entry } => {
                encoding::Encode::encode_to(&4u32, buf)?;
                encoding::Encode::encode_to(entry, buf)?;
            }
            ManifestEvent::UpdateLsn { last_lsn } => {
                encoding::Encode::encode_to(&6u32, buf)?;
                encoding::Encode::encode_to(last_lsn, buf)?;
            }
            ManifestEvent::AllocateSstId { id } => {
                encoding::Encode::encode_to(&7u32, buf)?;
                encoding::Encode::encode_to(id, buf)?;
            }
            ManifestEvent::Replace { removed, added } => {
                encoding::Encode::encode_to(&8u32, buf)?;
                encoding::encode_vec(removed, buf)?;
                encoding::encode_vec(added, buf)?;
            }
            ManifestEvent::Promote {
                removed,
                added,
                target_level,
            } => {
                encoding::Encode::encode_to(&9u32, buf)?;
                encoding::encode_vec(removed, buf)?;
                encoding::encode_vec(added, buf)?;
                encoding::Encode::encode_to(target_level, buf)?;
            }
        }
        Ok(())
    }
}

impl encoding::Decode for ManifestEvent {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (tag, n) = u32::decode_from(buf)?;
        offset += n;
        match tag {
            0 => {
                let (version, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((ManifestEvent::Version { version }, offset))
            }
            1 => {
                let (wal, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((ManifestEvent::SetActiveWal { wal }, offset))
            }
            2 => {
                let (wal, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((ManifestEvent::AddFrozenWal { wal }, offset))
            }
            3 => {
                let (wal, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((ManifestEvent::RemoveFrozenWal { wal }, offset))
            }
            4 => {
                let (entry, n) = ManifestSstEntry::decode_from(&buf[offset..])?;
                offset += n;
                Ok((ManifestEvent::Add { entry }, offset))
            }
            6 => {
                let (last_lsn, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((ManifestEvent::UpdateLsn { last_lsn }, offset))
            }
            7 => {
                let (id, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((ManifestEvent::AllocateSstId { id }, offset))
            }
            8 => {
                let (removed, n) = encoding::decode_vec::<u64>(&buf[offset..])?;
                offset += n;
                let (added, n) = encoding::decode_vec::<ManifestSstEntry>(&buf[offset..])?;
                offset += n;
                Ok((ManifestEvent::Replace { removed, added }, offset))
            }
            9 => {
                let (removed, n) = encoding::decode_vec::<u64>(&buf[offset..])?;
                offset += n;
                let (added, n) = encoding::decode_vec::<ManifestSstEntry>(&buf[offset..])?;
                offset += n;
                let (target_level, n) = i32::decode_from(&buf[offset..])?;
                offset += n;
                Ok((
                    ManifestEvent::Promote {
                        removed,
                        added,
                        target_level,
                    },
                    offset,
                ))
            }
            _ => Err(EncodingError::InvalidTag {
                tag,
                type_name: "ManifestEvent",
            }),
        }
    }
}

impl encoding::Encode for ManifestSnapshot {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.version, buf)?;
        encoding::Encode::encode_to(&self.snapshot_lsn, buf)?;
        encoding::Encode::encode_to(&self.manifest_data, buf)?;
        encoding::Encode::encode_to(&self.checksum, buf)?;
        Ok(())
    }
}

impl encoding::Decode for ManifestSnapshot {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (version, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (snapshot_lsn, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (manifest_data, n) = ManifestData::decode_from(&buf[offset..])?;
        offset += n;
        let (checksum, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                version,
                snapshot_lsn,
                manifest_data,
                checksum,
            },
            offset,
        ))
    }
}

impl Default for ManifestData {
    fn default() -> Self {
        Self {
            version: 1,
            last_lsn: 0,
            active_wal: 0,
            frozen_wals: Vec::new(),
            levels: Vec::new(),
            sstables: HashMap::new(),
            last_compacted: HashMap::new(),
            compaction_clock: 0,
            next_sst_id: 1,
            dirty: false,
        }
    }
}

impl ManifestData {
    /// Inserts `entry` into its own `level`, keeping `L[i≥1]` sorted by
    /// `first_key` as the non-overlap invariant requires.
    fn place(&mut self, entry: ManifestSstEntry) {
        let level = entry.level.max(0) as usize;
        let id = entry.id;
        self.sstables.insert(id, entry);
        if self.levels.len() <= level {
            self.levels.resize(level + 1, LevelState::default());
        }
        // Disjoint field borrows: `levels` mutably, `sstables` immutably,
        // so the index-and-sort below doesn't fight the insert above.
        let Self {
            levels, sstables, ..
        } = self;
        let lvl = &mut levels[level];
        lvl.ids.push(id);
        if level >= 1 {
            lvl.ids.sort_by(|a, b| {
                let ka = sstables.get(a).map(|e| &e.first_key);
                let kb = sstables.get(b).map(|e| &e.first_key);
                ka.cmp(&kb)
            });
        }
    }

    fn remove_from_level(&mut self, id: u64) {
        if let Some(entry) = self.sstables.get(&id) {
            let level = entry.level.max(0) as usize;
            if let Some(lvl) = self.levels.get_mut(level) {
                lvl.ids.retain(|&x| x != id);
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Manifest record types
// ------------------------------------------------------------------------------------------------

/// Record stored in manifest WAL. Each variant describes
/// a single metadata mutation applied to ManifestData.
#[derive(Debug)]
pub enum ManifestEvent {
    /// Sets a new version of manifest
    Version { version: u64 },

    /// Sets a new WAL segment as active.
    SetActiveWal { wal: u64 },

    /// Adds a WAL segment to the frozen list.
    AddFrozenWal { wal: u64 },

    /// Removes a frozen WAL from manifest state.
    RemoveFrozenWal { wal: u64 },

    /// Adds a new SSTable entry into its own `level` (or `L[0]` if
    /// untagged). Does not trigger compaction.
    Add { entry: ManifestSstEntry },

    /// Updates the global last known LSN.
    UpdateLsn { last_lsn: u64 },

    /// Allocates the next SSTable ID (persists the counter increment).
    AllocateSstId { id: u64 },

    /// Atomic set exchange used for cleanup/scrub/sstable-upgrade: `added`
    /// keep the level of the corresponding `removed` member (never
    /// promotes).
    Replace {
        removed: Vec<u64>,
        added: Vec<ManifestSstEntry>,
    },

    /// Atomic compaction result: `removed` inputs are dropped, `added`
    /// outputs are placed at `target_level`.
    Promote {
        removed: Vec<u64>,
        added: Vec<ManifestSstEntry>,
        target_level: i32,
    },
}

/// Serialized snapshot stored in `MANIFEST-000001`.
///
/// Contains full manifest data and a checksum for corruption detection.
#[derive(Debug)]
struct ManifestSnapshot {
    /// Snapshot version number (matches manifest version).
    version: u64,

    /// The LSN at the time of snapshot creation.
    snapshot_lsn: u64,

    /// Full metadata (active WAL, frozen WALs, levels, SSTables, etc.).
    manifest_data: ManifestData,

    /// CRC32 checksum of the entire serialized payload.
    checksum: u32,
}

// ------------------------------------------------------------------------------------------------
// Manifest core
// ------------------------------------------------------------------------------------------------

/// Persistent metadata manager of the leveled compaction core.
///
/// Provides crash-safe metadata operations using a WAL-driven model.
/// Allows concurrent updates.
///
/// # Durability rules
///
/// For every metadata mutation:
/// - Append a record to manifest WAL.
/// - Update in-memory state.
/// - Optionally, WAL may be fsync'ed (policy-dependent).
///
/// Checkpoint compacts state into a snapshot and truncates WAL.
#[derive(Debug)]
pub struct Manifest {
    /// Path to engine root directory.
    path: PathBuf,

    /// Manifest WAL storing metadata operations.
    ///
    /// The WAL ensures crash recovery consistency and is internally thread-safe.
    wal: Wal<ManifestEvent>,

    /// In-memory manifest state protected by a mutex.
    ///
    /// Concurrent threads update metadata safely using this lock.
    data: Mutex<ManifestData>,

    /// SST ids currently claimed by an in-flight compaction task. Enforces
    /// that `compaction_candidates()` hands out non-overlapping work while
    /// a task is running, per the single-slot atomic current-task
    /// reference the scheduler contract calls for.
    claims: scheduler::ClaimSet,
}

impl Manifest {
    /// Opens the manifest from the given engine directory.
    ///
    /// # Behavior
    /// - Loads snapshot if present.
    /// - Replays manifest WAL to recover latest consistent state.
    /// - Initializes empty manifest if neither snapshot nor WAL exist.
    ///
    /// # Returns
    /// Loaded `Manifest` with fully reconstructed state.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        // 1. Load snapshot if present
        let snapshot_path = path.join(SNAPSHOT_FILENAME);
        let mut data = ManifestData::default();
        let mut snapshot_lsn: u64 = 0;

        if snapshot_path.exists() {
            match Self::read_snapshot(&snapshot_path) {
                Ok((snap, slsn)) => {
                    data = snap;
                    snapshot_lsn = slsn;
                    info!("Loaded manifest snapshot from {:?}", snapshot_path);
                }
                Err(e) => {
                    // Resilient recovery: ignore corrupt snapshot and replay WAL
                    // from scratch. The WAL is the ground truth and snapshots
                    // are an optimisation hint.
                    warn!(
                        "Failed to read manifest snapshot {:?}: {}; \
                         falling back to full WAL replay",
                        snapshot_path, e
                    );
                    data = ManifestData::default();
                    snapshot_lsn = 0;
                }
            }
        }

        // 2. Open manifest WAL file (create if missing)
        let wal_path = path.join(WAL_FILENAME);
        let wal = Wal::<ManifestEvent>::open(&wal_path, None)?;

        // 3. Replay WAL entries (only those after snapshot_lsn if snapshot exists)
        let mut manifest = Manifest {
            path,
            wal,
            data: Mutex::new(data),
            claims: scheduler::ClaimSet::default(),
        };

        manifest.replay_wal(snapshot_lsn)?;

        Ok(manifest)
    }

    // --------------------------------------------------------------------
    // Internal helpers
    // --------------------------------------------------------------------

    /// Acquires the manifest data lock, mapping a poisoned mutex to
    /// [`ManifestError::Internal`].
    fn lock_data(&self) -> Result<std::sync::MutexGuard<'_, ManifestData>, ManifestError> {
        self.data.lock().map_err(|_| {
            error!("Mutex poisoned");
            ManifestError::Internal("Mutex poisoned".into())
        })
    }

    // --------------------------------------------------------------------
    // Read accessors
    // --------------------------------------------------------------------

    /// Returns the active WAL segment ID.
    pub fn get_active_wal(&self) -> Result<u64, ManifestError> {
        Ok(self.lock_data()?.active_wal)
    }

    /// Returns the frozen WAL segment list.
    pub fn get_frozen_wals(&self) -> Result<Vec<u64>, ManifestError> {
        Ok(self.lock_data()?.frozen_wals.clone())
    }

    /// Returns the last persistent LSN.
    pub fn get_last_lsn(&self) -> Result<u64, ManifestError> {
        Ok(self.lock_data()?.last_lsn)
    }

    /// Returns `true` if in-memory state has diverged from the last snapshot.
    pub fn is_dirty(&self) -> Result<bool, ManifestError> {
        Ok(self.lock_data()?.dirty)
    }

    /// `level_size(i)`: total `uncompressed_length` of SSTs in `L[i]`.
    pub fn level_size(&self, i: usize) -> Result<u64, ManifestError> {
        let data = self.lock_data()?;
        let Some(lvl) = data.levels.get(i) else {
            return Ok(0);
        };
        Ok(lvl
            .ids
            .iter()
            .filter_map(|id| data.sstables.get(id))
            .map(|e| e.uncompressed_length)
            .sum())
    }

    /// `level_of(sst)`: the level an SST currently belongs to, or an error
    /// if the id is unknown to the manifest.
    pub fn level_of(&self, sst_id: u64) -> Result<i32, ManifestError> {
        let data = self.lock_data()?;
        data.sstables
            .get(&sst_id)
            .map(|e| e.level)
            .ok_or(ManifestError::UnknownSst(sst_id))
    }

    /// `level_count()`: number of non-empty levels.
    pub fn level_count(&self) -> Result<usize, ManifestError> {
        let data = self.lock_data()?;
        Ok(data.levels.iter().filter(|l| !l.ids.is_empty()).count())
    }

    /// All SSTs currently in `L[i]`.
    pub fn sstables_in_level(&self, i: usize) -> Result<Vec<ManifestSstEntry>, ManifestError> {
        let data = self.lock_data()?;
        let Some(lvl) = data.levels.get(i) else {
            return Ok(Vec::new());
        };
        Ok(lvl
            .ids
            .iter()
            .filter_map(|id| data.sstables.get(id).cloned())
            .collect())
    }

    /// Total count of known SSTables across all levels.
    pub fn sstable_count(&self) -> Result<usize, ManifestError> {
        Ok(self.lock_data()?.sstables.len())
    }

    /// `is_key_lookup_expensive`: `(|L[0] \ ignored|) + level_count() > 20`.
    pub fn is_key_lookup_expensive(&self, ignored: &[u64]) -> Result<bool, ManifestError> {
        let data = self.lock_data()?;
        let l0_unignored = data
            .levels
            .first()
            .map(|l| l.ids.iter().filter(|id| !ignored.contains(id)).count())
            .unwrap_or(0);
        let level_count = data.levels.iter().filter(|l| !l.ids.is_empty()).count();
        Ok(l0_unignored + level_count > 20)
    }

    // --------------------------------------------------------------------
    // Mutation methods
    // --------------------------------------------------------------------
    //
    // All mutation methods take `&self` rather than `&mut self`.
    // Interior mutability is provided by the `Mutex<ManifestData>` and the
    // internally-synchronised WAL. This allows concurrent metadata updates
    // without requiring exclusive ownership. `checkpoint()` is the only
    // method that requires `&mut self` because it truncates the WAL and
    // must not race with concurrent mutations.

    /// Updates the active WAL segment.
    pub fn set_active_wal(&self, wal_id: u64) -> Result<(), ManifestError> {
        let rec = ManifestEvent::SetActiveWal { wal: wal_id };
        self.wal.append(&rec)?;
        self.apply_record(&rec)?;
        Ok(())
    }

    /// Adds a WAL segment to frozen list.
    pub fn add_frozen_wal(&self, wal_id: u64) -> Result<(), ManifestError> {
        let rec = ManifestEvent::AddFrozenWal { wal: wal_id };
        self.wal.append(&rec)?;
        self.apply_record(&rec)?;
        Ok(())
    }

    /// Removes a frozen WAL.
    pub fn remove_frozen_wal(&self, wal_id: u64) -> Result<(), ManifestError> {
        let rec = ManifestEvent::RemoveFrozenWal { wal: wal_id };
        self.wal.append(&rec)?;
        self.apply_record(&rec)?;
        Ok(())
    }

    /// `add(sst)`: inserts into `L[0]` (or at `sst.level` if already
    /// tagged). Does not trigger compaction directly.
    pub fn add(&self, mut entry: ManifestSstEntry) -> Result<(), ManifestError> {
        if entry.level < 0 {
            entry.level = 0;
        }
        let rec = ManifestEvent::Add {
            entry: entry.clone(),
        };
        self.wal.append(&rec)?;
        self.apply_record(&rec)?;
        Ok(())
    }

    /// `replace(removed, added)`: atomic set exchange used for
    /// cleanup/scrub/sstable-upgrade — never promotes. `added` members
    /// keep the level of the corresponding `removed` member, or `L[0]` if
    /// ambiguous (count mismatch).
    pub fn replace(
        &self,
        removed: Vec<u64>,
        mut added: Vec<ManifestSstEntry>,
    ) -> Result<(), ManifestError> {
        {
            let data = self.lock_data()?;
            if removed.len() == added.len() {
                for (rid, entry) in removed.iter().zip(added.iter_mut()) {
                    entry.level = data.sstables.get(rid).map(|e| e.level).unwrap_or(0);
                }
            } else {
                for entry in added.iter_mut() {
                    entry.level = 0;
                }
            }
        }
        let rec = ManifestEvent::Replace { removed, added };
        self.wal.append(&rec)?;
        self.apply_record(&rec)?;
        Ok(())
    }

    /// `promote(removed, added)`: used after a normal compaction. `added`
    /// members are placed at `target_level = max(level(removed)) + 1` for
    /// any compaction that consumed input from `L[i], i ≥ 1`; a pure `L[0]`
    /// compaction produces `L[1]` output.
    ///
    /// Releases the claim on every id in `removed` on success.
    pub fn promote(
        &self,
        removed: Vec<u64>,
        mut added: Vec<ManifestSstEntry>,
    ) -> Result<(), ManifestError> {
        let target_level = {
            let data = self.lock_data()?;
            let max_input_level = removed
                .iter()
                .filter_map(|id| data.sstables.get(id))
                .map(|e| e.level.max(0))
                .max()
                .unwrap_or(-1);
            max_input_level + 1
        };
        for entry in added.iter_mut() {
            entry.level = target_level;
        }
        let rec = ManifestEvent::Promote {
            removed: removed.clone(),
            added,
            target_level,
        };
        self.wal.append(&rec)?;
        self.apply_record(&rec)?;
        self.claims.release(&removed);
        Ok(())
    }

    /// Failure path: a compaction task aborts. Inputs stay in place,
    /// partial outputs are the caller's to discard, the claim on `inputs`
    /// is released so the ids become selectable again.
    pub fn abort_compaction(&self, inputs: &[u64]) {
        self.claims.release(inputs);
    }

    /// Atomically allocates the next SSTable ID.
    pub fn allocate_sst_id(&self) -> Result<u64, ManifestError> {
        let mut data = self.lock_data()?;
        let id = data.next_sst_id;
        let rec = ManifestEvent::AllocateSstId { id };
        self.wal.append(&rec)?;
        data.next_sst_id = id + 1;
        data.dirty = true;
        Ok(id)
    }

    /// Returns the next SSTable ID without allocating it.
    pub fn peek_next_sst_id(&self) -> Result<u64, ManifestError> {
        Ok(self.lock_data()?.next_sst_id)
    }

    /// Updates last durable LSN.
    pub fn update_lsn(&self, last_lsn: u64) -> Result<(), ManifestError> {
        let rec = ManifestEvent::UpdateLsn { last_lsn };
        self.wal.append(&rec)?;
        self.apply_record(&rec)?;
        Ok(())
    }

    /// `compaction_candidates()`: see the scoring/selection policy
    /// implemented in [`scheduler`]. Claims the returned ids so repeated
    /// calls while a task is in flight do not hand out overlapping work;
    /// the caller must eventually call [`Manifest::promote`] or
    /// [`Manifest::abort_compaction`] to release the claim.
    pub fn compaction_candidates(&self) -> Result<scheduler::Candidates, ManifestError> {
        // `data` stays locked across both the selection and the claim so
        // the two steps are one atomic critical section: a second caller
        // blocked on `lock_data()` cannot observe the ids as unclaimed
        // until this caller has already claimed them.
        let data = self.lock_data()?;
        let picked = scheduler::select(&data, &self.claims);
        if let Some(c) = &picked {
            self.claims.claim(&c.inputs);
        }
        drop(data);
        Ok(picked.unwrap_or_default())
    }

    /// Creates a manifest snapshot.
    ///
    /// # Behavior
    /// - Serializes ManifestData and writes it to `MANIFEST-000001`.
    /// - Computes a checksum for corruption detection.
    /// - Resets/truncates manifest WAL to reduce recovery cost.
    ///
    /// # Exclusive access
    /// Requires `&mut self` to ensure no concurrent mutations race with the
    /// WAL truncation step.
    pub fn checkpoint(&mut self) -> Result<(), ManifestError> {
        let snapshot = {
            let data = self.lock_data()?.clone();

            ManifestSnapshot {
                version: data.version,
                snapshot_lsn: data.last_lsn,
                manifest_data: data,
                checksum: 0,
            }
        };

        let mut snapshot_bytes = encoding::encode_to_vec(&snapshot)?;

        let mut hasher = Crc32::new();
        hasher.update(&snapshot_bytes);
        let checksum = hasher.finalize();

        let len = snapshot_bytes.len();
        snapshot_bytes[len - 4..].copy_from_slice(&checksum.to_le_bytes());

        let tmp_name = format!("{}{}", SNAPSHOT_FILENAME, SNAPSHOT_TMP_SUFFIX);
        let tmp_path = self.path.join(&tmp_name);
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            f.write_all(&snapshot_bytes)?;
            f.sync_all()?;
        }

        let final_path = self.path.join(SNAPSHOT_FILENAME);
        fs::rename(&tmp_path, &final_path)?;

        Self::fsync_dir(&self.path)?;

        info!("Manifest snapshot written to {:?}", final_path);

        self.wal.truncate()?;

        self.lock_data()?.dirty = false;

        Ok(())
    }

    fn fsync_dir(dir: &Path) -> Result<(), ManifestError> {
        let dir_file = File::open(dir)?;
        dir_file.sync_all()?;
        Ok(())
    }

    fn read_snapshot(p: &Path) -> Result<(ManifestData, u64), ManifestError> {
        let mut f = File::open(p)?;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf)?;

        let (snap, _) = encoding::decode_from_slice::<ManifestSnapshot>(buf.as_slice())?;

        let verify = ManifestSnapshot {
            checksum: 0,
            version: snap.version,
            snapshot_lsn: snap.snapshot_lsn,
            manifest_data: snap.manifest_data.clone(),
        };
        let verify_bytes = encoding::encode_to_vec(&verify)?;

        let mut hasher = Crc32::new();
        hasher.update(&verify_bytes);
        let computed_checksum = hasher.finalize();

        if snap.checksum != computed_checksum {
            return Err(ManifestError::SnapshotChecksumMismatch);
        }

        Ok((snap.manifest_data, snap.snapshot_lsn))
    }

    fn replay_wal(&mut self, snapshot_lsn: u64) -> Result<(), ManifestError> {
        let iter = match self.wal.replay_iter() {
            Ok(i) => i,
            Err(e) => {
                return Err(ManifestError::Wal(e));
            }
        };

        let mut count: u64 = 0;
        for item in iter {
            match item {
                Ok(rec) => {
                    self.apply_record(&rec)?;
                    count += 1;
                }
                Err(e) => {
                    warn!("Manifest WAL replay stopped due to WAL error: {}", e);
                    break;
                }
            }
        }

        let current_lsn = self.lock_data()?.last_lsn;
        if snapshot_lsn > 0 && current_lsn < snapshot_lsn {
            warn!(
                "Manifest LSN after WAL replay ({}) is less than snapshot LSN ({}); \
                 possible WAL truncation or data loss",
                current_lsn, snapshot_lsn
            );
        }

        info!(
            "Manifest WAL replay: {} entries applied (snapshot_lsn={})",
            count, snapshot_lsn
        );

        Ok(())
    }

    fn apply_record(&self, rec: &ManifestEvent) -> Result<(), ManifestError> {
        let mut data = self.lock_data()?;

        match rec {
            ManifestEvent::Version { version } => {
                data.version = *version;
                data.dirty = true;
            }

            ManifestEvent::SetActiveWal { wal } => {
                data.active_wal = *wal;
                data.frozen_wals.retain(|w| w != wal);
                data.dirty = true;
            }

            ManifestEvent::AddFrozenWal { wal } => {
                if !data.frozen_wals.contains(wal) {
                    data.frozen_wals.push(*wal);
                }
                data.dirty = true;
            }

            ManifestEvent::RemoveFrozenWal { wal } => {
                data.frozen_wals.retain(|w| w != wal);
                data.dirty = true;
            }

            ManifestEvent::Add { entry } => {
                if !data.sstables.contains_key(&entry.id) {
                    if entry.id >= data.next_sst_id {
                        data.next_sst_id = entry.id + 1;
                    }
                    data.place(entry.clone());
                }
                data.dirty = true;
            }

            ManifestEvent::UpdateLsn { last_lsn } => {
                if *last_lsn > data.last_lsn {
                    data.last_lsn = *last_lsn;
                }
                data.dirty = true;
            }

            ManifestEvent::AllocateSstId { id } => {
                if *id >= data.next_sst_id {
                    data.next_sst_id = *id + 1;
                }
                data.dirty = true;
            }

            ManifestEvent::Replace { removed, added } => {
                for id in removed {
                    data.remove_from_level(*id);
                    data.sstables.remove(id);
                    data.last_compacted.remove(id);
                }
                for entry in added {
                    if entry.id >= data.next_sst_id {
                        data.next_sst_id = entry.id + 1;
                    }
                    data.place(entry.clone());
                }
                data.dirty = true;
            }

            ManifestEvent::Promote {
                removed,
                added,
                target_level,
            } => {
                data.compaction_clock += 1;
                let ts = data.compaction_clock;
                for id in removed {
                    data.remove_from_level(*id);
                    data.sstables.remove(id);
                    data.last_compacted.remove(id);
                }
                for entry in added {
                    if entry.id >= data.next_sst_id {
                        data.next_sst_id = entry.id + 1;
                    }
                    let mut e = entry.clone();
                    e.level = *target_level;
                    let id = e.id;
                    data.place(e);
                    data.last_compacted.insert(id, ts);
                }
                data.dirty = true;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{DecoratedKey, Token};
    use tempfile::tempdir;

    fn dk(t: u128, k: &str) -> DecoratedKey {
        DecoratedKey {
            token: Token(t),
            key: k.as_bytes().to_vec(),
        }
    }

    fn entry(id: u64, level: i32, lo: u128, hi: u128, len: u64) -> ManifestSstEntry {
        ManifestSstEntry {
            id,
            path: PathBuf::from(format!("{id}.sst")),
            level,
            first_key: dk(lo, "a"),
            last_key: dk(hi, "z"),
            uncompressed_length: len,
        }
    }

    #[test]
    fn add_places_untagged_entry_in_l0() {
        let dir = tempdir().unwrap();
        let m = Manifest::open(dir.path()).unwrap();
        m.add(entry(1, -1, 1, 10, 100)).unwrap();
        assert_eq!(m.level_of(1).unwrap(), 0);
        assert_eq!(m.level_size(0).unwrap(), 100);
    }

    #[test]
    fn promote_targets_max_input_level_plus_one() {
        let dir = tempdir().unwrap();
        let m = Manifest::open(dir.path()).unwrap();
        m.add(entry(1, 2, 1, 10, 100)).unwrap();
        m.add(entry(2, 0, 1, 10, 50)).unwrap();
        m.promote(vec![1, 2], vec![entry(3, -1, 1, 10, 150)])
            .unwrap();
        assert_eq!(m.level_of(3).unwrap(), 3);
        assert!(m.level_of(1).is_err());
    }

    #[test]
    fn replace_never_promotes() {
        let dir = tempdir().unwrap();
        let m = Manifest::open(dir.path()).unwrap();
        m.add(entry(1, 3, 1, 10, 100)).unwrap();
        m.replace(vec![1], vec![entry(2, -1, 1, 10, 90)]).unwrap();
        assert_eq!(m.level_of(2).unwrap(), 3);
    }

    #[test]
    fn compaction_candidates_claim_excludes_repeat_selection() {
        let dir = tempdir().unwrap();
        let m = Manifest::open(dir.path()).unwrap();
        for i in 0..(L0_THRESHOLD as u64 + 1) {
            m.add(entry(i, -1, i as u128, i as u128 + 1, 10)).unwrap();
        }
        let first = m.compaction_candidates().unwrap();
        assert!(!first.inputs.is_empty());
        let second = m.compaction_candidates().unwrap();
        assert!(
            second.inputs.is_empty(),
            "claimed ids must not be handed out again until released"
        );
        m.abort_compaction(&first.inputs);
        let third = m.compaction_candidates().unwrap();
        assert_eq!(third.inputs.len(), first.inputs.len());
    }

    #[test]
    fn snapshot_round_trips_levels_and_entries() {
        let dir = tempdir().unwrap();
        let mut m = Manifest::open(dir.path()).unwrap();
        m.add(entry(1, 0, 1, 10, 100)).unwrap();
        m.add(entry(2, 1, 20, 30, 200)).unwrap();
        m.checkpoint().unwrap();
        drop(m);

        let reopened = Manifest::open(dir.path()).unwrap();
        assert_eq!(reopened.level_of(1).unwrap(), 0);
        assert_eq!(reopened.level_of(2).unwrap(), 1);
        assert_eq!(reopened.level_size(1).unwrap(), 200);
    }

    #[test]
    fn is_key_lookup_expensive_counts_unignored_l0_plus_levels() {
        let dir = tempdir().unwrap();
        let m = Manifest::open(dir.path()).unwrap();
        assert!(!m.is_key_lookup_expensive(&[]).unwrap());
    }
}
