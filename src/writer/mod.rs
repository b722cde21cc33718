//! # Writer Task
//!
//! The single serialized consumer of the write-request queue. Every
//! mutation of the active segment — append, index update, rollover, merge
//! scheduling — happens on this one thread, which linearizes writes
//! without holding a lock across file I/O and gives rollover a natural
//! sequencing point.
//!
//! ## Per-request steps
//!
//! 1. Encode the record.
//! 2. Stat the active file and reconcile it with the tracked offset.
//! 3. Roll over first if the append would exceed the segment bound and the
//!    active segment is non-empty.
//! 4. Append, then index the key at the pre-append offset.
//! 5. Signal completion to the caller.
//!
//! Completions are delivered strictly in queue order. When every sender is
//! gone the loop drains what is queued, syncs the active file, and exits.

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::fs::File;
use std::io::Write;
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{Arc, RwLock};

use tracing::{info, trace, warn};

use crate::db::{DbError, DbInner};
use crate::merge::{self, MergeState};
use crate::record::Record;
use crate::segment::Segment;

/// One queued write. Consumed exactly once by the writer task, which
/// signals the outcome over `done`.
pub(crate) struct WriteRequest {
    pub(crate) key: Vec<u8>,
    pub(crate) value: Vec<u8>,
    pub(crate) done: SyncSender<Result<(), DbError>>,
}

/// State owned by the writer thread. The append handle and offset of the
/// active segment live here exclusively; nothing else writes them.
pub(crate) struct WriterTask {
    shared: Arc<RwLock<DbInner>>,
    merge: Arc<MergeState>,
    requests: Receiver<WriteRequest>,

    /// Append handle of the active segment.
    out: File,

    /// Current write offset, equal to the active file's size.
    out_offset: u64,

    /// The active segment, always the last element of the shared list.
    active: Arc<Segment>,

    segment_size: u64,
    merge_threshold: usize,
}

impl WriterTask {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        shared: Arc<RwLock<DbInner>>,
        merge: Arc<MergeState>,
        requests: Receiver<WriteRequest>,
        out: File,
        out_offset: u64,
        active: Arc<Segment>,
        segment_size: u64,
        merge_threshold: usize,
    ) -> Self {
        Self {
            shared,
            merge,
            requests,
            out,
            out_offset,
            active,
            segment_size,
            merge_threshold,
        }
    }

    /// Consumes requests until every sender is dropped, then syncs the
    /// active file and exits.
    pub(crate) fn run(mut self) {
        while let Ok(request) = self.requests.recv() {
            let WriteRequest { key, value, done } = request;
            let result = self.append(key, value);
            if let Err(ref e) = result {
                warn!(error = %e, "write failed");
            }
            // The caller may have given up waiting; that is its business.
            let _ = done.send(result);
        }

        if let Err(e) = self.out.sync_all() {
            warn!(error = %e, "failed to sync active segment on shutdown");
        }
        trace!("writer task stopped");
    }

    fn append(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), DbError> {
        let record = Record::new(key, value);
        let encoded = record.encode();

        // The file itself decides the rollover, and the tracked offset
        // must agree with it.
        let disk_size = self.out.metadata()?.len();
        if disk_size != self.out_offset {
            debug_assert_eq!(
                disk_size, self.out_offset,
                "active offset drifted from file size"
            );
            warn!(
                disk_size,
                tracked = self.out_offset,
                "active offset drifted from file size, adopting file size"
            );
            self.out_offset = disk_size;
        }

        // Records are never split. An oversized record on an empty active
        // segment is appended as-is rather than rolling forever, so a
        // segment exceeds the bound by at most one record.
        if self.out_offset > 0 && self.out_offset + encoded.len() as u64 > self.segment_size {
            self.roll_over()?;
        }

        let offset = self.out_offset;
        self.out.write_all(&encoded)?;

        let Record { key, .. } = record;
        self.active.index_put(key, offset)?;
        self.out_offset += encoded.len() as u64;

        trace!(offset, bytes = encoded.len(), "appended record");
        Ok(())
    }

    /// Freezes the active segment and swaps in a fresh one, scheduling a
    /// merge when the segment count reaches the threshold.
    fn roll_over(&mut self) -> Result<(), DbError> {
        self.out.sync_all()?;

        let mut inner = self
            .shared
            .write()
            .map_err(|_| DbError::Internal("store lock poisoned".into()))?;

        // Reserving the merge output ordinal ahead of the new active
        // segment keeps ordinal order equal to age order on disk, which
        // recovery depends on.
        let schedule_merge =
            inner.segments.len() + 1 >= self.merge_threshold && !inner.merge_running;
        let merge_ordinal = if schedule_merge {
            let ordinal = inner.next_ordinal;
            inner.next_ordinal += 1;
            Some(ordinal)
        } else {
            None
        };

        let ordinal = inner.next_ordinal;
        inner.next_ordinal += 1;
        let (segment, out) = Segment::create(&inner.dir, ordinal)?;
        let segment = Arc::new(segment);
        inner.segments.push(Arc::clone(&segment));

        info!(
            ordinal,
            segments = inner.segments.len(),
            "rolled over to a new active segment"
        );

        self.active = segment;
        self.out = out;
        self.out_offset = 0;

        if let Some(merge_ordinal) = merge_ordinal {
            inner.merge_running = true;
            // Everything but the just-created active segment is frozen.
            let sources: Vec<Arc<Segment>> =
                inner.segments[..inner.segments.len() - 1].to_vec();
            let dir = inner.dir.clone();
            drop(inner);

            if let Err(e) = merge::spawn(
                Arc::clone(&self.merge),
                Arc::clone(&self.shared),
                sources,
                merge_ordinal,
                dir,
            ) {
                warn!(error = %e, "failed to spawn merge task");
                if let Ok(mut inner) = self.shared.write() {
                    inner.merge_running = false;
                }
            }
        }

        Ok(())
    }
}
