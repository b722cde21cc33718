//! # Store Module
//!
//! The public face of the datastore: a persistent, embeddable key-value
//! store backed by an append-only log segmented into bounded files.
//!
//! ## Design Overview
//!
//! The store owns an ordered list of [`Segment`]s — oldest first, the
//! single **active** segment last. Writes are forwarded to a dedicated
//! writer task over a bounded queue and appended to the active segment;
//! when an append would push the active file past the configured bound the
//! writer rolls over to a fresh segment. Once the segment count reaches the
//! merge threshold a background task compacts the frozen prefix into one
//! segment holding only the latest record per key.
//!
//! Reads are served on the caller's thread: the segment list is scanned
//! newest-to-oldest and the first segment whose index knows the key
//! answers with a single bounded read from its file.
//!
//! ## Concurrency Model
//!
//! - The segment list lives under one `RwLock`. It is write-locked only
//!   for the instant of a rollover or merge commit; [`Db::get`] holds the
//!   read lock across its whole scan, which is what keeps segment files
//!   open-able until a merge commit can actually retire them.
//! - Each segment guards its own index with a short-lived `RwLock`.
//! - All mutations of the active segment happen on the single writer
//!   thread, so no lock is held across append I/O.
//!
//! ## Guarantees
//!
//! - **Read-your-writes:** a `get` issued after a `put` returned observes
//!   that value or a newer one.
//! - **FIFO writes:** puts complete in queue order; concurrent puts of the
//!   same key durably resolve to the one that entered the queue last.
//! - **Crash recovery:** on open, every segment file in the directory is
//!   replayed to rebuild its index; corruption aborts the open rather than
//!   being silently skipped.
//! - **Merges never lose writes:** for every key, the value visible after
//!   a merge is at least as new as the value visible before it.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{error, info};

use crate::merge::MergeState;
use crate::segment::{SEGMENT_PREFIX, Segment, SegmentError};
use crate::writer::{WriteRequest, WriterTask};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by store operations.
///
/// A missing key is **not** an error — [`Db::get`] reports it as
/// `Ok(None)`. Integrity failures surface as
/// [`SegmentError::Record`](crate::record::RecordError) wrapped in
/// [`DbError::Segment`].
#[derive(Debug, Error)]
pub enum DbError {
    /// Error originating from a segment (I/O, decode, integrity).
    #[error("segment error: {0}")]
    Segment(#[from] SegmentError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Rejected configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Operation on a store that has been closed.
    #[error("store is closed")]
    Closed,

    /// Internal invariant violation (poisoned lock, unexpected state).
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for a [`Db`] instance, passed to [`Db::open`].
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Rollover bound for the active segment, in bytes. An append that
    /// would push the file past this bound first rolls over to a fresh
    /// segment; a single record larger than the bound still gets written,
    /// alone, so segments exceed the bound by at most one record.
    pub segment_size: u64,

    /// Segment count at which a rollover schedules a background merge.
    pub merge_threshold: usize,

    /// Capacity of the bounded write-request queue feeding the writer
    /// task. Callers block once the queue is full.
    pub write_queue_depth: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            segment_size: 4 * 1024 * 1024,
            merge_threshold: 3,
            write_queue_depth: 64,
        }
    }
}

impl DbConfig {
    /// Rejects configurations the store cannot operate under.
    fn validate(&self) -> Result<(), DbError> {
        if self.segment_size == 0 {
            return Err(DbError::Config("segment_size must be non-zero".into()));
        }
        if self.merge_threshold < 2 {
            return Err(DbError::Config(
                "merge_threshold must be at least 2 (one frozen segment plus the active one)"
                    .into(),
            ));
        }
        if self.write_queue_depth == 0 {
            return Err(DbError::Config("write_queue_depth must be non-zero".into()));
        }
        Ok(())
    }
}

/// Snapshot of store statistics returned by [`Db::stats`].
#[derive(Debug, Clone)]
pub struct DbStats {
    /// Number of live segments, the active one included.
    pub segment_count: usize,

    /// Byte size of the active segment file.
    pub active_segment_bytes: u64,

    /// Sum of all live segment file sizes in bytes.
    pub total_bytes: u64,
}

// ------------------------------------------------------------------------------------------------
// Shared state
// ------------------------------------------------------------------------------------------------

/// State shared between the store handle, the writer task, and the merger.
///
/// Guarded by a single `RwLock`; see the module documentation for who
/// holds it when.
pub(crate) struct DbInner {
    /// Live segments, oldest at index 0, the active segment last. Never
    /// empty after open.
    pub(crate) segments: Vec<Arc<Segment>>,

    /// Next segment ordinal to allocate. Monotone, never reused within a
    /// process lifetime.
    pub(crate) next_ordinal: u64,

    /// Directory holding every segment file.
    pub(crate) dir: PathBuf,

    /// Whether a background merge is in flight. At most one runs at a
    /// time; triggers while this is set are no-ops.
    pub(crate) merge_running: bool,
}

// ------------------------------------------------------------------------------------------------
// Db
// ------------------------------------------------------------------------------------------------

/// The datastore handle.
///
/// Thread-safe: share it across threads behind an `Arc`. Reads proceed
/// concurrently with writes and merges; writes are serialized through the
/// writer task in submission order.
pub struct Db {
    /// Segment list and allocation state.
    shared: Arc<RwLock<DbInner>>,

    /// Join point for the in-flight background merge, if any.
    merge: Arc<MergeState>,

    /// Submission side of the writer queue; dropped on close to stop the
    /// writer task.
    write_tx: Mutex<Option<SyncSender<WriteRequest>>>,

    /// Writer thread handle, joined on close.
    writer_handle: Mutex<Option<JoinHandle<()>>>,

    /// Set once [`Db::close`] has run; makes close idempotent.
    closed: AtomicBool,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db").finish_non_exhaustive()
    }
}

impl Db {
    /// Opens (or creates) a store rooted at the given directory.
    ///
    /// Pre-existing segment files are replayed in ordinal order to rebuild
    /// their indexes; the newest becomes the active segment. An empty
    /// directory gets a fresh segment with ordinal 0. The writer task is
    /// started before this returns.
    ///
    /// Any decode or integrity failure during replay aborts the open.
    pub fn open(dir: impl AsRef<Path>, config: DbConfig) -> Result<Self, DbError> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut ordinals = scan_segment_ordinals(&dir)?;
        ordinals.sort_unstable();

        let mut segments: Vec<Arc<Segment>> = Vec::with_capacity(ordinals.len().max(1));
        let mut active_offset = 0u64;
        for &ordinal in &ordinals {
            let segment = Segment::new(&dir, ordinal);
            // The last assignment is the active segment's size.
            active_offset = segment.replay()?;
            segments.push(Arc::new(segment));
        }

        let (active, out, out_offset, next_ordinal) = match segments.last() {
            Some(active) => {
                let out = active.append_handle()?;
                let next_ordinal = active.ordinal() + 1;
                (Arc::clone(active), out, active_offset, next_ordinal)
            }
            None => {
                let (segment, out) = Segment::create(&dir, 0)?;
                let segment = Arc::new(segment);
                segments.push(Arc::clone(&segment));
                (segment, out, 0, 1)
            }
        };

        info!(
            dir = %dir.display(),
            segments = segments.len(),
            active_ordinal = active.ordinal(),
            "opened store"
        );

        let shared = Arc::new(RwLock::new(DbInner {
            segments,
            next_ordinal,
            dir,
            merge_running: false,
        }));
        let merge = Arc::new(MergeState::new());

        let (write_tx, write_rx) = mpsc::sync_channel(config.write_queue_depth);
        let task = WriterTask::new(
            Arc::clone(&shared),
            Arc::clone(&merge),
            write_rx,
            out,
            out_offset,
            active,
            config.segment_size,
            config.merge_threshold,
        );
        let writer_handle = thread::Builder::new()
            .name("stratadb-writer".into())
            .spawn(move || task.run())?;

        Ok(Self {
            shared,
            merge,
            write_tx: Mutex::new(Some(write_tx)),
            writer_handle: Mutex::new(Some(writer_handle)),
            closed: AtomicBool::new(false),
        })
    }

    /// Looks up the latest value written for `key`.
    ///
    /// Scans segments newest-to-oldest; the first index hit answers.
    /// Returns `Ok(None)` when no live segment knows the key. Observes
    /// every `put` that completed before this call was issued.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DbError> {
        let inner = self.read_shared()?;
        for segment in inner.segments.iter().rev() {
            if let Some(offset) = segment.index_get(key)? {
                return Ok(Some(segment.read_value_at(offset)?));
            }
        }
        Ok(None)
    }

    /// Writes a key-value pair, blocking until the writer task has
    /// appended and indexed it.
    ///
    /// Completions are delivered in queue order, so once this returns any
    /// subsequent [`Db::get`] observes this value or a newer one.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), DbError> {
        let tx = {
            let guard = self
                .write_tx
                .lock()
                .map_err(|_| DbError::Internal("writer queue lock poisoned".into()))?;
            match guard.as_ref() {
                Some(tx) => tx.clone(),
                None => return Err(DbError::Closed),
            }
        };

        let (done_tx, done_rx) = mpsc::sync_channel(1);
        let request = WriteRequest {
            key: key.to_vec(),
            value: value.to_vec(),
            done: done_tx,
        };
        tx.send(request).map_err(|_| DbError::Closed)?;

        match done_rx.recv() {
            Ok(result) => result,
            // The writer exited before answering; the store is going down.
            Err(_) => Err(DbError::Closed),
        }
    }

    /// Byte size of the active segment file.
    pub fn size(&self) -> Result<u64, DbError> {
        let inner = self.read_shared()?;
        let active = inner
            .segments
            .last()
            .ok_or_else(|| DbError::Internal("segment list is empty".into()))?;
        Ok(active.file_size()?)
    }

    /// Returns a snapshot of store statistics.
    pub fn stats(&self) -> Result<DbStats, DbError> {
        let inner = self.read_shared()?;
        let mut total_bytes = 0u64;
        let mut active_segment_bytes = 0u64;
        for segment in &inner.segments {
            let bytes = segment.file_size()?;
            total_bytes += bytes;
            active_segment_bytes = bytes;
        }
        Ok(DbStats {
            segment_count: inner.segments.len(),
            active_segment_bytes,
            total_bytes,
        })
    }

    /// Blocks until the background merge currently in flight, if any, has
    /// completed. Returns immediately when none is running.
    pub fn wait_for_merge(&self) {
        self.merge.wait();
    }

    /// Shuts the store down: stops the writer task (queued writes are
    /// drained first), then waits for any in-flight merge.
    ///
    /// Idempotent — a second call is a no-op. [`Db::put`] after close
    /// returns [`DbError::Closed`].
    pub fn close(&self) -> Result<(), DbError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Dropping the sender ends the writer loop once the queue drains.
        self.write_tx
            .lock()
            .map_err(|_| DbError::Internal("writer queue lock poisoned".into()))?
            .take();
        let writer = self
            .writer_handle
            .lock()
            .map_err(|_| DbError::Internal("writer handle lock poisoned".into()))?
            .take();
        if let Some(handle) = writer {
            let _ = handle.join();
        }

        // The writer is the only merge scheduler, so after it exits this
        // catches the last possible merge.
        self.merge.wait();

        info!("closed store");
        Ok(())
    }

    fn read_shared(&self) -> Result<RwLockReadGuard<'_, DbInner>, DbError> {
        self.shared
            .read()
            .map_err(|_| DbError::Internal("store lock poisoned".into()))
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(error = %e, "failed to close store on drop");
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Collects the ordinals of every segment file in `dir`. Files that do not
/// match the `current-data<N>` pattern are ignored.
fn scan_segment_ordinals(dir: &Path) -> Result<Vec<u64>, DbError> {
    let mut ordinals = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(rest) = name.strip_prefix(SEGMENT_PREFIX)
            && let Ok(ordinal) = rest.parse::<u64>()
        {
            ordinals.push(ordinal);
        }
    }
    Ok(ordinals)
}
