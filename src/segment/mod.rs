//! # Segment Module
//!
//! One append-only file on disk plus an in-memory index mapping each key to
//! the byte offset of that key's **latest** record within this file.
//!
//! ## Design Invariants
//!
//! - The index only ever points at valid record starts; decoding at a
//!   stored offset yields a record carrying that key.
//! - Within one segment the index maps a key to the offset of its *last*
//!   write; superseded records stay on disk as unreferenced garbage until a
//!   merge rewrites the segment away.
//! - A segment file is immutable once it is no longer the active segment.
//!   Only the writer task appends, and only to the active segment.
//!
//! ## Resource policy
//!
//! The active segment's append handle is owned by the writer task for the
//! whole of that segment's tenure. Everything else opens the file on
//! demand and closes it on return — [`Segment::read_value_at`] costs an
//! open/seek/read per call in exchange for bounded file-descriptor usage,
//! and concurrent readers are fully independent.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use thiserror::Error;
use tracing::trace;

use crate::record::{Record, RecordError};

/// Shared prefix of every segment file name; the decimal ordinal follows it
/// with no separator, e.g. `current-data0`, `current-data17`.
pub const SEGMENT_PREFIX: &str = "current-data";

/// File name for the segment with the given ordinal.
pub fn file_name(ordinal: u64) -> String {
    format!("{SEGMENT_PREFIX}{ordinal}")
}

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by segment operations.
#[derive(Debug, Error)]
pub enum SegmentError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Record decode or integrity failure.
    #[error("record error: {0}")]
    Record(#[from] RecordError),

    /// Internal invariant violation (poisoned lock, dangling offset).
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Segment Core
// ------------------------------------------------------------------------------------------------

/// An append-only segment file and its key→offset index.
///
/// The index lives under the segment's own `RwLock`, held only for the
/// instant of a lookup or insert; file I/O never happens under it.
#[derive(Debug)]
pub struct Segment {
    /// Full path of the segment file.
    path: PathBuf,

    /// Ordinal embedded in the file name. Monotone per store, never reused
    /// within a process lifetime.
    ordinal: u64,

    /// Offset of each key's latest record within this file.
    index: RwLock<HashMap<Vec<u8>, u64>>,
}

impl Segment {
    /// Describes the segment with the given ordinal without touching disk.
    /// Used during recovery, where the file already exists.
    pub fn new(dir: &Path, ordinal: u64) -> Self {
        Self {
            path: dir.join(file_name(ordinal)),
            ordinal,
            index: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a fresh, empty segment file and returns it together with
    /// its append handle. Fails if the file already exists — ordinals are
    /// never reused, so a collision means the store's bookkeeping is off.
    pub fn create(dir: &Path, ordinal: u64) -> Result<(Self, File), SegmentError> {
        let segment = Self::new(dir, ordinal);

        let mut opts = OpenOptions::new();
        opts.create_new(true).read(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        let file = opts.open(&segment.path)?;

        trace!(ordinal, path = %segment.path.display(), "created segment file");
        Ok((segment, file))
    }

    /// Reopens an existing segment file for appending. Used on recovery to
    /// resume writing into the newest segment.
    pub fn append_handle(&self) -> Result<File, SegmentError> {
        Ok(OpenOptions::new().append(true).open(&self.path)?)
    }

    /// Ordinal embedded in this segment's file name.
    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }

    /// Full path of the segment file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current byte size of the segment file.
    pub fn file_size(&self) -> Result<u64, SegmentError> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Reads and verifies the single record starting at `offset`, returning
    /// its value. Opens the file for the duration of this call only.
    pub fn read_value_at(&self, offset: u64) -> Result<Vec<u8>, SegmentError> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(file);

        match Record::read_from(&mut reader)? {
            Some((record, _)) => Ok(record.value),
            // The index pointed past the end of the file.
            None => Err(RecordError::UnexpectedEof.into()),
        }
    }

    /// Looks up the offset of `key`'s latest record in this segment.
    pub fn index_get(&self, key: &[u8]) -> Result<Option<u64>, SegmentError> {
        let index = self
            .index
            .read()
            .map_err(|_| SegmentError::Internal("index lock poisoned".into()))?;
        Ok(index.get(key).copied())
    }

    /// Records `offset` as the latest position of `key`, replacing any
    /// earlier entry.
    pub fn index_put(&self, key: Vec<u8>, offset: u64) -> Result<(), SegmentError> {
        let mut index = self
            .index
            .write()
            .map_err(|_| SegmentError::Internal("index lock poisoned".into()))?;
        index.insert(key, offset);
        Ok(())
    }

    /// Number of distinct keys indexed in this segment.
    pub fn index_len(&self) -> Result<usize, SegmentError> {
        let index = self
            .index
            .read()
            .map_err(|_| SegmentError::Internal("index lock poisoned".into()))?;
        Ok(index.len())
    }

    /// Snapshot of every `(key, offset)` pair in the index. Cloned under a
    /// short read lock so the merger never holds it across file I/O.
    pub fn index_entries(&self) -> Result<Vec<(Vec<u8>, u64)>, SegmentError> {
        let index = self
            .index
            .read()
            .map_err(|_| SegmentError::Internal("index lock poisoned".into()))?;
        Ok(index.iter().map(|(k, v)| (k.clone(), *v)).collect())
    }

    /// Rebuilds the index by sequentially decoding the whole file, keeping
    /// the last offset seen per key. Returns the number of bytes consumed,
    /// which for a well-formed file equals its size.
    ///
    /// A clean EOF terminates replay; any other decode failure — including
    /// an integrity mismatch — propagates, since corruption must never be
    /// silently skipped.
    pub fn replay(&self) -> Result<u64, SegmentError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let mut offset = 0u64;
        let mut records = 0usize;
        while let Some((record, consumed)) = Record::read_from(&mut reader)? {
            self.index_put(record.key, offset)?;
            offset += consumed;
            records += 1;
        }

        trace!(ordinal = self.ordinal, records, bytes = offset, "replayed segment");
        Ok(offset)
    }
}
