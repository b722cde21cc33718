use crate::db::{Db, DbConfig};
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// 8 KiB segments — large enough that small tests never roll over.
pub fn single_segment_config() -> DbConfig {
    init_tracing();
    DbConfig {
        segment_size: 8192,
        ..DbConfig::default()
    }
}

/// 100-byte segments — a couple of records per segment, so rollover and
/// merging fire constantly.
pub fn tiny_segment_config() -> DbConfig {
    init_tracing();
    DbConfig {
        segment_size: 100,
        ..DbConfig::default()
    }
}

/// Reopen a store at the same path with the standard test config.
pub fn reopen(path: &Path) -> Db {
    Db::open(path, single_segment_config()).expect("reopen")
}

/// Drives background merging to quiescence.
///
/// Merges are only scheduled at rollover, so a merge that was still in
/// flight when the last rollover happened can leave more than two
/// segments behind. This waits out the in-flight merge and, if needed,
/// forces another rollover with filler writes until the frozen prefix has
/// been collapsed into a single merged segment.
pub fn settle_merges(db: &Db) {
    for round in 0..64 {
        db.wait_for_merge();
        let stats = db.stats().expect("stats");
        if stats.segment_count <= 2 {
            return;
        }
        db.put(format!("settle-{round:02}").as_bytes(), b"x")
            .expect("filler put");
    }
    panic!("merging did not converge");
}
