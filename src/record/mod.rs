//! # Record Codec
//!
//! Encoding and decoding of a single key/value record as it appears on disk.
//! Every record carries a trailing SHA-1 digest of its value, verified on
//! every streamed decode, so bit rot and torn writes are detected at read
//! time rather than silently served.
//!
//! # On-disk layout
//!
//! All length fields are little-endian `u32`.
//!
//! ```text
//! [TOTAL_LE][KLEN_LE][KEY_BYTES][VLEN_LE][VALUE_BYTES][SHA1(VALUE)]
//!  4 bytes   4 bytes  klen       4 bytes  vlen         20 bytes
//! ```
//!
//! `TOTAL` counts the whole frame including itself:
//! `TOTAL = 12 + klen + vlen + 20`.
//!
//! # Guarantees
//!
//! - **Integrity:** [`Record::read_from`] recomputes SHA-1 over the decoded
//!   value and fails with [`RecordError::HashMismatch`] if it differs from
//!   the stored digest.
//! - **Bounded allocation:** a declared `TOTAL` outside
//!   `[MIN_RECORD_LEN, MAX_RECORD_LEN]` is rejected before any buffer is
//!   allocated.
//! - **EOF discipline:** end-of-stream at a record boundary yields
//!   `Ok(None)`; end-of-stream *inside* a record is
//!   [`RecordError::UnexpectedEof`]. Replay loops rely on this distinction
//!   to terminate cleanly while never skipping a torn tail.
//!
//! Zero-length keys and values are representable; rejecting them is a
//! caller policy, not a codec concern.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::io::{self, Read};

use sha1::{Digest, Sha1};
use thiserror::Error;

/// Size of one little-endian `u32` length field.
pub const LEN_FIELD: usize = std::mem::size_of::<u32>();

/// Length of the trailing SHA-1 digest, in bytes.
pub const HASH_LEN: usize = 20;

/// Fixed framing overhead: the `TOTAL`, key-length, and value-length fields.
pub const HEADER_LEN: usize = 3 * LEN_FIELD;

/// Smallest well-formed record: empty key, empty value.
pub const MIN_RECORD_LEN: u64 = (HEADER_LEN + HASH_LEN) as u64;

/// Largest record the codec will read back (64 MiB). A corrupted length
/// field must not be allowed to drive a multi-gigabyte allocation.
pub const MAX_RECORD_LEN: u64 = 64 * 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by record encoding and decoding.
#[derive(Debug, Error)]
pub enum RecordError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Declared record length outside `[MIN_RECORD_LEN, MAX_RECORD_LEN]`.
    #[error("record length {0} outside valid range")]
    InvalidLength(u64),

    /// Internal field lengths disagree with the declared total.
    #[error("record is malformed: {0}")]
    Malformed(&'static str),

    /// End-of-stream in the middle of a record frame.
    #[error("unexpected end of file inside a record")]
    UnexpectedEof,

    /// Stored SHA-1 digest does not match the decoded value.
    #[error("value hash mismatch")]
    HashMismatch,
}

// ------------------------------------------------------------------------------------------------
// Record
// ------------------------------------------------------------------------------------------------

/// One key/value pair together with the SHA-1 digest of its value.
///
/// Constructed in memory on every write, serialized into the active
/// segment, and reconstructed on reads, replay, and merges. The digest is
/// computed eagerly by [`Record::new`] so an encoded record is always
/// internally consistent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Key bytes. May be empty.
    pub key: Vec<u8>,

    /// Value bytes. May be empty.
    pub value: Vec<u8>,

    /// SHA-1 digest of `value`.
    pub hash: [u8; HASH_LEN],
}

/// Computes the SHA-1 digest of a value.
pub fn value_hash(value: &[u8]) -> [u8; HASH_LEN] {
    Sha1::digest(value).into()
}

impl Record {
    /// Creates a record, computing the value digest.
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        let hash = value_hash(&value);
        Self { key, value, hash }
    }

    /// Size of this record once encoded, in bytes.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.key.len() + self.value.len() + HASH_LEN
    }

    /// Serializes the record into the on-disk frame described in the
    /// [module documentation](self).
    pub fn encode(&self) -> Vec<u8> {
        let total = self.encoded_len();
        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(&(total as u32).to_le_bytes());
        buf.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&(self.value.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.value);
        buf.extend_from_slice(&self.hash);
        buf
    }

    /// Deserializes a record from a complete frame, `TOTAL` field included.
    ///
    /// Field lengths are validated against the buffer, but the value digest
    /// is **not** recomputed here — callers decoding from untrusted bytes
    /// must follow up with [`Record::verify`]. [`Record::read_from`] does
    /// both.
    pub fn decode(buf: &[u8]) -> Result<Self, RecordError> {
        if buf.len() < HEADER_LEN + HASH_LEN {
            return Err(RecordError::Malformed("frame shorter than fixed overhead"));
        }

        let total = read_u32(buf, 0) as usize;
        if total != buf.len() {
            return Err(RecordError::Malformed("total field disagrees with frame length"));
        }

        let klen = read_u32(buf, LEN_FIELD) as usize;
        let key_end = 2 * LEN_FIELD + klen;
        if key_end + LEN_FIELD + HASH_LEN > buf.len() {
            return Err(RecordError::Malformed("key length exceeds frame"));
        }
        let key = buf[2 * LEN_FIELD..key_end].to_vec();

        let vlen = read_u32(buf, key_end) as usize;
        let value_start = key_end + LEN_FIELD;
        let value_end = value_start + vlen;
        if value_end + HASH_LEN != buf.len() {
            return Err(RecordError::Malformed("value length disagrees with total"));
        }
        let value = buf[value_start..value_end].to_vec();

        let mut hash = [0u8; HASH_LEN];
        hash.copy_from_slice(&buf[value_end..]);

        Ok(Self { key, value, hash })
    }

    /// Recomputes the value digest and compares it to the stored one.
    pub fn verify(&self) -> Result<(), RecordError> {
        if value_hash(&self.value) != self.hash {
            return Err(RecordError::HashMismatch);
        }
        Ok(())
    }

    /// Reads and verifies exactly one record from a byte stream.
    ///
    /// Returns `Ok(Some((record, consumed)))` on success so callers can
    /// advance a running offset, or `Ok(None)` on a clean end-of-stream at
    /// a record boundary. Any bytes short of a whole record are reported as
    /// [`RecordError::UnexpectedEof`].
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Option<(Self, u64)>, RecordError> {
        // Read the TOTAL field byte-wise: zero bytes available means a
        // clean boundary, a partial field means a torn frame.
        let mut len_buf = [0u8; LEN_FIELD];
        let mut filled = 0;
        while filled < LEN_FIELD {
            let n = match reader.read(&mut len_buf[filled..]) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(RecordError::Io(e)),
            };
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(RecordError::UnexpectedEof);
            }
            filled += n;
        }

        let total = u32::from_le_bytes(len_buf) as u64;
        if !(MIN_RECORD_LEN..=MAX_RECORD_LEN).contains(&total) {
            return Err(RecordError::InvalidLength(total));
        }

        let mut buf = vec![0u8; total as usize];
        buf[..LEN_FIELD].copy_from_slice(&len_buf);
        reader.read_exact(&mut buf[LEN_FIELD..]).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                RecordError::UnexpectedEof
            } else {
                RecordError::Io(e)
            }
        })?;

        let record = Self::decode(&buf)?;
        record.verify()?;
        Ok(Some((record, total)))
    }
}

/// Reads a little-endian `u32` at `at`. Callers bounds-check first.
fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}
