//! Rollover and segmentation tests — growth, multiple files, reads across
//! segment boundaries.

#[cfg(test)]
mod tests {
    use crate::db::Db;
    use crate::db::tests::helpers::*;
    use crate::segment::SEGMENT_PREFIX;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn segment_files(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(SEGMENT_PREFIX))
            .collect()
    }

    #[test]
    fn size_grows_after_puts() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(tmp.path(), single_segment_config()).unwrap();

        let size_at_open = db.size().unwrap();
        assert_eq!(size_at_open, 0);

        for (key, value) in [(b"k1", b"v1"), (b"k2", b"v2"), (b"k3", b"v3")] {
            db.put(key, value).unwrap();
        }

        assert!(db.size().unwrap() > size_at_open);
        db.close().unwrap();
    }

    #[test]
    fn small_bound_splits_data_across_files() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(tmp.path(), tiny_segment_config()).unwrap();

        let pairs: &[(&[u8], &[u8])] = &[
            (b"key1", b"value-one"),
            (b"key2", b"value-two"),
            (b"key3", b"value-three"),
            (b"key4", b"value-four"),
            (b"key5", b"value-five"),
        ];
        for (key, value) in pairs {
            db.put(key, value).unwrap();
        }

        assert!(
            segment_files(tmp.path()).len() >= 2,
            "expected multiple segment files"
        );
        for (key, value) in pairs {
            assert_eq!(db.get(key).unwrap(), Some(value.to_vec()));
        }

        // Overwrites keep working across the segment boundary.
        db.put(b"key2", b"value-six").unwrap();
        assert_eq!(db.get(b"key2").unwrap(), Some(b"value-six".to_vec()));
        db.close().unwrap();
    }

    #[test]
    fn latest_write_wins_across_rollover() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(tmp.path(), tiny_segment_config()).unwrap();

        db.put(b"k", b"old").unwrap();
        // Push the active segment over the bound a few times.
        for i in 0..6 {
            db.put(format!("fill-{i}").as_bytes(), b"padding bytes").unwrap();
        }
        db.put(b"k", b"new").unwrap();

        assert_eq!(db.get(b"k").unwrap(), Some(b"new".to_vec()));
        let stats = db.stats().unwrap();
        assert!(stats.segment_count >= 2);
        db.close().unwrap();
    }

    #[test]
    fn stats_reports_active_and_total_bytes() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(tmp.path(), single_segment_config()).unwrap();

        db.put(b"a", b"1").unwrap();
        db.put(b"b", b"2").unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.segment_count, 1);
        assert_eq!(stats.active_segment_bytes, stats.total_bytes);
        assert_eq!(stats.active_segment_bytes, db.size().unwrap());
        assert!(stats.total_bytes > 0);
        db.close().unwrap();
    }
}
