//! Recovery tests — reopen round-trips, replay ordering across merges,
//! and corruption handling.

#[cfg(test)]
mod tests {
    use crate::db::{Db, DbError};
    use crate::db::tests::helpers::*;
    use crate::record::RecordError;
    use crate::segment::SegmentError;
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};
    use tempfile::TempDir;

    #[test]
    fn reopen_returns_latest_values() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(tmp.path(), single_segment_config()).unwrap();

        let pairs: &[(&[u8], &[u8])] = &[
            (b"k1", b"v1"),
            (b"k2", b"v2"),
            (b"k3", b"v3"),
            (b"k2", b"v2.1"),
        ];
        for (key, value) in pairs {
            db.put(key, value).unwrap();
        }
        db.close().unwrap();

        let db = reopen(tmp.path());
        assert_eq!(db.get(b"k1").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(db.get(b"k2").unwrap(), Some(b"v2.1".to_vec()));
        assert_eq!(db.get(b"k3").unwrap(), Some(b"v3".to_vec()));
        assert_eq!(db.get(b"nope").unwrap(), None);
        db.close().unwrap();
    }

    #[test]
    fn reopen_after_rollover_and_merge() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(tmp.path(), tiny_segment_config()).unwrap();

        let writes: &[(&[u8], &[u8])] = &[
            (b"key1", b"value1"),
            (b"key2", b"value2"),
            (b"key3", b"value3.53"),
            (b"key2", b"value2.1"),
            (b"key4", b"value4"),
            (b"key5", b"value5"),
            (b"key6", b"value6"),
            (b"key3", b"value3"),
        ];
        for (key, value) in writes {
            db.put(key, value).unwrap();
        }
        settle_merges(&db);
        db.close().unwrap();

        // The merged segment carries a higher ordinal than older data but
        // a lower one than the active segment; replay order must still
        // equal age order.
        let db = Db::open(tmp.path(), tiny_segment_config()).unwrap();
        assert_eq!(db.get(b"key1").unwrap(), Some(b"value1".to_vec()));
        assert_eq!(db.get(b"key2").unwrap(), Some(b"value2.1".to_vec()));
        assert_eq!(db.get(b"key3").unwrap(), Some(b"value3".to_vec()));
        assert_eq!(db.get(b"key4").unwrap(), Some(b"value4".to_vec()));
        assert_eq!(db.get(b"key5").unwrap(), Some(b"value5".to_vec()));
        assert_eq!(db.get(b"key6").unwrap(), Some(b"value6".to_vec()));

        // Ordinal allocation resumed past every existing file.
        db.put(b"after-reopen", b"works").unwrap();
        assert_eq!(db.get(b"after-reopen").unwrap(), Some(b"works".to_vec()));
        db.close().unwrap();
    }

    #[test]
    fn reopen_twice_is_stable() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(tmp.path(), single_segment_config()).unwrap();
        db.put(b"k", b"v").unwrap();
        db.close().unwrap();

        let db = reopen(tmp.path());
        db.put(b"k2", b"v2").unwrap();
        db.close().unwrap();

        let db = reopen(tmp.path());
        assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(db.get(b"k2").unwrap(), Some(b"v2".to_vec()));
        db.close().unwrap();
    }

    #[test]
    fn unrelated_files_are_ignored() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("README"), b"not a segment").unwrap();
        std::fs::write(tmp.path().join("current-metadata"), b"close, but no").unwrap();

        let db = Db::open(tmp.path(), single_segment_config()).unwrap();
        db.put(b"k", b"v").unwrap();
        assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(db.stats().unwrap().segment_count, 1);
        db.close().unwrap();
    }

    /// # Scenario
    /// The newest segment file ends with a torn record, as after a crash
    /// mid-append.
    ///
    /// # Expected behavior
    /// `Db::open` fails with the decode error instead of silently
    /// truncating or skipping data.
    #[test]
    fn open_fails_on_torn_tail() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(tmp.path(), single_segment_config()).unwrap();
        db.put(b"k1", b"v1").unwrap();
        db.close().unwrap();

        let mut file = OpenOptions::new()
            .append(true)
            .open(tmp.path().join("current-data0"))
            .unwrap();
        // A plausible length field with nothing behind it.
        file.write_all(&64u32.to_le_bytes()).unwrap();
        file.sync_all().unwrap();

        let err = Db::open(tmp.path(), single_segment_config()).unwrap_err();
        assert!(matches!(
            err,
            DbError::Segment(SegmentError::Record(RecordError::UnexpectedEof))
        ));
    }

    /// # Scenario
    /// A value byte was corrupted on disk while the store was closed.
    ///
    /// # Expected behavior
    /// Recovery recomputes SHA-1 for every record and aborts the open with
    /// a hash mismatch.
    #[test]
    fn open_fails_on_corrupted_value() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(tmp.path(), single_segment_config()).unwrap();
        db.put(b"key", b"value").unwrap();
        db.close().unwrap();

        let mut file = OpenOptions::new()
            .write(true)
            .open(tmp.path().join("current-data0"))
            .unwrap();
        // Value bytes of the first record start at 4 + 4 + 3 + 4 = 15.
        file.seek(SeekFrom::Start(16)).unwrap();
        file.write_all(&[0xFF]).unwrap();
        file.sync_all().unwrap();

        let err = Db::open(tmp.path(), single_segment_config()).unwrap_err();
        assert!(matches!(
            err,
            DbError::Segment(SegmentError::Record(RecordError::HashMismatch))
        ));
    }

    /// # Scenario
    /// A record is tampered with while the store is open; its index entry
    /// already points at the record.
    ///
    /// # Expected behavior
    /// The next `get` of that key recomputes the digest and reports the
    /// integrity failure to the caller.
    #[test]
    fn get_surfaces_corruption_introduced_after_open() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(tmp.path(), single_segment_config()).unwrap();
        db.put(b"key", b"value").unwrap();

        let mut file = OpenOptions::new()
            .write(true)
            .open(tmp.path().join("current-data0"))
            .unwrap();
        file.seek(SeekFrom::Start(16)).unwrap();
        file.write_all(&[0xFF]).unwrap();
        file.sync_all().unwrap();

        let err = db.get(b"key").unwrap_err();
        assert!(matches!(
            err,
            DbError::Segment(SegmentError::Record(RecordError::HashMismatch))
        ));
        db.close().unwrap();
    }
}
