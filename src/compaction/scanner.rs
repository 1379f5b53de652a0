//! [`LeveledScanner`]: a single merged view over a set of SSTs grouped by
//! level.
//!
//! Grounded on [`row::MergeIterator`](crate::row::MergeIterator)'s
//! heap-of-cursors shape, adapted two ways: each merge source is a whole
//! *level* rather than a single table (a non-overlapping level's SSTs are
//! visited strictly in `first_key` order, one open at a time — the
//! "open-one-close-previous" lifecycle), and opening a table is fallible
//! I/O, so this scanner yields `Result<Row, SSTableError>` rather than a
//! bare `Row`.

use crate::row::Row;
use crate::sstable::{RowScanner, SSTableError, SstHandle};
use crate::token::Range;
use crate::token::Token;
use std::sync::Arc;

/// Sequential cursor over one level's SSTs: at most one [`RowScanner`] is
/// open at a time, closed the instant it is exhausted and before the next
/// one is opened.
struct LevelCursor<'a> {
    handles: Vec<Arc<dyn SstHandle + 'a>>,
    next_idx: usize,
    scanner: Option<RowScanner<'a>>,
    range: Option<Range<Token>>,
    peeked: Option<Row>,
    closed_bytes: u64,
    open_handle_bytes: u64,
}

impl<'a> LevelCursor<'a> {
    fn new(handles: Vec<Arc<dyn SstHandle + 'a>>, range: Option<Range<Token>>) -> Self {
        Self {
            handles,
            next_idx: 0,
            scanner: None,
            range,
            peeked: None,
            closed_bytes: 0,
            open_handle_bytes: 0,
        }
    }

    /// Pulls the next row out of the currently open SST, opening
    /// subsequent ones (and closing the one before) as each runs dry.
    fn pull(&mut self) -> Result<Option<Row>, SSTableError> {
        loop {
            if let Some(s) = self.scanner.as_mut() {
                if let Some(row) = s.next() {
                    return Ok(Some(row));
                }
                self.scanner = None; // exhausted: close before opening the next
                self.closed_bytes += self.open_handle_bytes;
                self.open_handle_bytes = 0;
            }
            if self.next_idx >= self.handles.len() {
                return Ok(None);
            }
            let handle = self.handles[self.next_idx].clone();
            self.next_idx += 1;
            self.open_handle_bytes = handle.uncompressed_length();
            self.scanner = Some(handle.open_scanner(self.range.as_ref())?);
        }
    }

    fn peek(&mut self) -> Result<Option<&Row>, SSTableError> {
        if self.peeked.is_none() {
            self.peeked = self.pull()?;
        }
        Ok(self.peeked.as_ref())
    }

    fn take(&mut self) -> Row {
        self.peeked.take().expect("take() called without a successful peek()")
    }

    /// Bytes accounted for so far: every fully closed handle's full
    /// length, plus the whole length of whichever handle is currently
    /// open (`RowScanner` exposes no finer-grained position than that).
    fn current_position(&self) -> u64 {
        self.closed_bytes + self.open_handle_bytes
    }

    fn length(&self) -> u64 {
        self.handles.iter().map(|h| h.uncompressed_length()).sum()
    }
}

/// Merges one [`LevelCursor`] per level into a single `(key ASC, LSN
/// DESC)`-ordered stream, the view a compaction task (or a full-table
/// debug scan) reads from.
///
/// Levels are independent inputs: nothing requires they be non-overlapping
/// with each other, only that each level's own handles are supplied in
/// ascending `first_key` order (true of any level `≥ 0` per the manifest's
/// invariant, and of a sorted `L[0]` sweep).
pub struct LeveledScanner<'a> {
    levels: Vec<LevelCursor<'a>>,
}

impl<'a> LeveledScanner<'a> {
    /// `levels[i]` is the ordered set of SSTs belonging to one source
    /// level; `range` optionally restricts every underlying scan to a
    /// token sub-range.
    pub fn new(levels: Vec<Vec<Arc<dyn SstHandle + 'a>>>, range: Option<Range<Token>>) -> Self {
        Self {
            levels: levels
                .into_iter()
                .map(|handles| LevelCursor::new(handles, range))
                .collect(),
        }
    }

    /// Bytes consumed across every level so far: each level's closed
    /// handles at their full length, plus its currently open handle's
    /// full length (progress is only known at per-SST granularity).
    pub fn current_position(&self) -> u64 {
        self.levels.iter().map(|c| c.current_position()).sum()
    }

    /// Total bytes this scanner will read across every level's handles.
    pub fn length(&self) -> u64 {
        self.levels.iter().map(|c| c.length()).sum()
    }
}

impl<'a> Iterator for LeveledScanner<'a> {
    type Item = Result<Row, SSTableError>;

    fn next(&mut self) -> Option<Self::Item> {
        for cursor in self.levels.iter_mut() {
            if let Err(e) = cursor.peek() {
                return Some(Err(e));
            }
        }
        let mut winner: Option<usize> = None;
        for (i, cursor) in self.levels.iter().enumerate() {
            let Some(row) = cursor.peeked.as_ref() else {
                continue;
            };
            winner = match winner {
                None => Some(i),
                Some(w) => {
                    let current_best = self.levels[w].peeked.as_ref().expect("checked above");
                    if row < current_best { Some(i) } else { Some(w) }
                }
            };
        }
        let idx = winner?;
        Some(Ok(self.levels[idx].take()))
    }
}
