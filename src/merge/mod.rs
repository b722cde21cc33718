//! # Merge Module
//!
//! Background compaction of the frozen segment prefix. The merger rewrites
//! every segment except the active one into a single new segment holding
//! only the latest record per key, then atomically swaps the segment list
//! and unlinks the files it consumed.
//!
//! ## Algorithm
//!
//! Sources are walked **newest to oldest**; the first record seen for a
//! key is its latest, so later (older) occurrences are skipped via a seen
//! set. Survivors are re-encoded with freshly computed hashes, so
//! integrity protection survives the rewrite.
//!
//! ## Guarantees
//!
//! - **Latest write wins:** for every key present in any source segment,
//!   the merged segment holds exactly its newest pre-merge value. Anything
//!   written to the active segment meanwhile sits *after* the merged
//!   segment in the list, so the newest-first read order still prefers it.
//! - **Readers never stall or miss:** the commit takes the store write
//!   lock, and readers hold the read lock across their whole scan, so
//!   source files are only unlinked once no reader can still be pointing
//!   at them.
//! - **Failure is contained:** an I/O error aborts the merge, removes the
//!   partial output best-effort, and leaves the live store untouched; a
//!   later rollover past the threshold simply tries again.
//!
//! At most one merge runs at a time. The `merge_running` flag in the
//! shared state is set by the scheduling rollover and cleared here,
//! whether the merge committed or aborted.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use tracing::{info, warn};

use crate::db::{DbError, DbInner};
use crate::record::Record;
use crate::segment::{self, Segment};

// ------------------------------------------------------------------------------------------------
// MergeState
// ------------------------------------------------------------------------------------------------

/// Join point for the background merge thread. Owned by the store handle
/// so `close` (and tests) can wait for an in-flight merge.
pub(crate) struct MergeState {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl MergeState {
    pub(crate) fn new() -> Self {
        Self {
            handle: Mutex::new(None),
        }
    }

    /// Blocks until the merge currently in flight, if any, has finished.
    pub(crate) fn wait(&self) {
        let handle = match self.handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Spawning
// ------------------------------------------------------------------------------------------------

/// Starts a merge of `sources` into a new segment with the given ordinal.
///
/// The caller (the writer's rollover) has already set `merge_running` and
/// reserved `ordinal`; on a spawn failure the caller rolls the flag back.
pub(crate) fn spawn(
    state: Arc<MergeState>,
    shared: Arc<RwLock<DbInner>>,
    sources: Vec<Arc<Segment>>,
    ordinal: u64,
    dir: PathBuf,
) -> io::Result<()> {
    let thread_shared = Arc::clone(&shared);
    let handle = thread::Builder::new()
        .name("stratadb-merge".into())
        .spawn(move || {
            match compact(&thread_shared, &sources, ordinal, &dir) {
                Ok(records) => info!(ordinal, records, "merge committed"),
                Err(e) => {
                    warn!(
                        ordinal,
                        error = %e,
                        "merge aborted, store continues with unmerged segments"
                    );
                    let _ = fs::remove_file(dir.join(segment::file_name(ordinal)));
                }
            }

            match thread_shared.write() {
                Ok(mut inner) => inner.merge_running = false,
                Err(_) => warn!("store lock poisoned while clearing merge flag"),
            }
        })?;

    match state.handle.lock() {
        Ok(mut guard) => {
            // A previous handle can only be a merge that already finished;
            // join it so handles do not pile up.
            if let Some(previous) = guard.replace(handle) {
                let _ = previous.join();
            }
        }
        Err(_) => warn!("merge handle lock poisoned"),
    }
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Compaction
// ------------------------------------------------------------------------------------------------

/// Rewrites `sources` into one segment and commits it into the shared
/// segment list. Returns the number of records written.
fn compact(
    shared: &Arc<RwLock<DbInner>>,
    sources: &[Arc<Segment>],
    ordinal: u64,
    dir: &Path,
) -> Result<usize, DbError> {
    let (merged, mut out) = Segment::create(dir, ordinal)?;

    // Newest source first: the first value seen for a key is its latest.
    let mut seen: HashSet<Vec<u8>> = HashSet::new();
    let mut offset = 0u64;
    let mut written = 0usize;
    for source in sources.iter().rev() {
        for (key, source_offset) in source.index_entries()? {
            if !seen.insert(key.clone()) {
                continue;
            }

            let value = source.read_value_at(source_offset)?;
            let record = Record::new(key, value);
            let encoded = record.encode();
            out.write_all(&encoded)?;

            let Record { key, .. } = record;
            merged.index_put(key, offset)?;
            offset += encoded.len() as u64;
            written += 1;
        }
    }
    out.sync_all()?;
    drop(out);

    let merged = Arc::new(merged);
    {
        let mut inner = shared
            .write()
            .map_err(|_| DbError::Internal("store lock poisoned".into()))?;

        // Replace exactly the segments this merge consumed. Segments that
        // appeared after the snapshot (the active one included) are newer
        // than anything in the merged output and stay behind it in the
        // list.
        let consumed: HashSet<u64> = sources.iter().map(|s| s.ordinal()).collect();
        let mut segments = Vec::with_capacity(inner.segments.len() + 1 - consumed.len());
        segments.push(Arc::clone(&merged));
        segments.extend(
            inner
                .segments
                .iter()
                .filter(|s| !consumed.contains(&s.ordinal()))
                .cloned(),
        );
        inner.segments = segments;
    }

    // Unlink the replaced files only after the swap: readers hold the
    // store read lock across their scan, so none can still reach them.
    for source in sources {
        if let Err(e) = fs::remove_file(source.path()) {
            warn!(
                ordinal = source.ordinal(),
                error = %e,
                "failed to remove merged segment file"
            );
        }
    }

    Ok(written)
}
