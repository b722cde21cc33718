//! # StrataDB
//!
//! An embeddable, persistent, single-node key-value store built on an
//! **append-only log segmented into bounded files**. Designed for simple,
//! durable writes with latest-value reads and background compaction.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                         Db                             │
//! │                                                        │
//! │  put ──► bounded queue ──► Writer task                 │
//! │                              │ append / rollover       │
//! │                              ▼                         │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐                 │
//! │  │ segment │  │ segment │  │ active  │   (oldest →     │
//! │  │  (old)  │  │ (frozen)│  │ segment │    newest)      │
//! │  └────┬────┘  └────┬────┘  └────┬────┘                 │
//! │       │            │            │                      │
//! │  get ◄┴────────────┴────────────┘  newest-first scan   │
//! │       │                                                │
//! │  ┌────┴───────────────────────────────────────────┐    │
//! │  │  Merger (background, collapses frozen prefix)  │    │
//! │  └────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`db`] | Store handle — open, get, put, size, stats, close |
//! | [`record`] | On-disk record codec with SHA-1 integrity checking |
//! | [`segment`] | One append-only file plus its in-memory key→offset index |
//! | [`writer`] | The single serialized writer task |
//! | [`merge`] | Background merge of frozen segments, latest value per key |
//!
//! ## Key Features
//!
//! - **Append-only segments** — writes only ever append; a segment is
//!   frozen forever once the active segment rolls over.
//! - **Per-segment hash indexes** — every get is one index hit plus one
//!   bounded file read; no global index to rebuild on compaction.
//! - **Single-writer concurrency** — all mutations are serialized through
//!   one writer task; readers never block writers and vice versa.
//! - **SHA-1 record integrity** — every record carries a digest of its
//!   value, verified on reads, recovery, and merges.
//! - **Crash recovery** — on open, segment files are replayed in ordinal
//!   order to rebuild their indexes; corruption aborts the open.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stratadb::{Db, DbConfig};
//!
//! let db = Db::open("/tmp/stratadb-demo", DbConfig::default()).unwrap();
//!
//! db.put(b"hello", b"world").unwrap();
//! assert_eq!(db.get(b"hello").unwrap(), Some(b"world".to_vec()));
//! assert_eq!(db.get(b"missing").unwrap(), None);
//!
//! println!("active segment: {} bytes", db.size().unwrap());
//! db.close().unwrap();
//! ```

pub mod db;
pub mod merge;
pub mod record;
pub mod segment;
pub mod writer;

pub use db::{Db, DbConfig, DbError, DbStats};
pub use record::{Record, RecordError};
pub use segment::{Segment, SegmentError};
