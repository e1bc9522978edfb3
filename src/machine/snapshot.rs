use crate::api::{StateMachineError, TermIndex};
use crate::proto::Container2BcsIdMap;
use prost::Message;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const SNAPSHOT_PREFIX: &str = "snapshot";

/// On-disk home of the container -> BCSID index.
///
/// One file per snapshot, named `snapshot.<term>_<index>`; the newest
/// snapshot is the one with the highest index. Files are written with an
/// explicit flush + fsync before the snapshot is considered taken.
pub(crate) struct SnapshotStorage {
    logger: slog::Logger,
    dir: PathBuf,
}

impl SnapshotStorage {
    pub(crate) fn open(logger: slog::Logger, dir: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(SnapshotStorage { logger, dir })
    }

    pub(crate) fn snapshot_path(&self, term_index: TermIndex) -> PathBuf {
        self.dir.join(format!(
            "{}.{}_{}",
            SNAPSHOT_PREFIX, term_index.term, term_index.index
        ))
    }

    /// The newest snapshot in the directory, if any. Files that don't parse
    /// as snapshot names are ignored.
    pub(crate) fn latest_snapshot(&self) -> io::Result<Option<(TermIndex, PathBuf)>> {
        let mut latest: Option<(TermIndex, PathBuf)> = None;
        for dir_entry in fs::read_dir(&self.dir)? {
            let dir_entry = dir_entry?;
            let file_name = dir_entry.file_name();
            let Some(term_index) = parse_snapshot_name(&file_name.to_string_lossy()) else {
                continue;
            };
            let newer = match &latest {
                Some((current, _)) => term_index.index > current.index,
                None => true,
            };
            if newer {
                latest = Some((term_index, dir_entry.path()));
            }
        }
        Ok(latest)
    }

    pub(crate) fn save(
        &self,
        term_index: TermIndex,
        container2bcsid: &HashMap<i64, i64>,
    ) -> Result<PathBuf, StateMachineError> {
        let proto = Container2BcsIdMap {
            container2bcsid: container2bcsid.clone(),
        };
        let encoded = proto.encode_to_vec();

        let path = self.snapshot_path(term_index);
        let mut file = File::create(&path)?;
        file.write_all(&encoded)?;
        file.flush()?;
        // The snapshot only counts once it is on stable storage.
        file.sync_all()?;

        slog::info!(
            self.logger,
            "Wrote snapshot at {} with {} containers to {:?}",
            term_index,
            container2bcsid.len(),
            path
        );
        Ok(path)
    }

    pub(crate) fn load(&self, path: &Path) -> Result<HashMap<i64, i64>, StateMachineError> {
        let encoded = fs::read(path)?;
        let proto = Container2BcsIdMap::decode(encoded.as_slice())?;
        Ok(proto.container2bcsid)
    }
}

fn parse_snapshot_name(name: &str) -> Option<TermIndex> {
    let coords = name.strip_prefix(SNAPSHOT_PREFIX)?.strip_prefix('.')?;
    let (term, index) = coords.split_once('_')?;
    Some(TermIndex::new(term.parse().ok()?, index.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn storage(dir: &tempfile::TempDir) -> SnapshotStorage {
        SnapshotStorage::open(test_logger(), dir.path().to_path_buf()).unwrap()
    }

    #[test]
    fn save_then_load_returns_the_same_map() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);

        let mut map = HashMap::new();
        map.insert(7, 2);
        map.insert(11, 45);
        map.insert(13, 1);

        let path = storage.save(TermIndex::new(3, 99), &map).unwrap();
        let loaded = storage.load(&path).unwrap();
        assert_eq!(loaded, map);
    }

    #[test]
    fn empty_directory_has_no_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);
        assert_eq!(storage.latest_snapshot().unwrap(), None);
    }

    #[test]
    fn latest_snapshot_picks_highest_index() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);
        let map = HashMap::new();

        storage.save(TermIndex::new(1, 10), &map).unwrap();
        storage.save(TermIndex::new(2, 30), &map).unwrap();
        storage.save(TermIndex::new(2, 20), &map).unwrap();

        let (term_index, _path) = storage.latest_snapshot().unwrap().unwrap();
        assert_eq!(term_index, TermIndex::new(2, 30));
    }

    #[test]
    fn unrelated_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);
        fs::write(dir.path().join("snapshot.garbage"), b"junk").unwrap();
        fs::write(dir.path().join("notes.txt"), b"junk").unwrap();

        assert_eq!(storage.latest_snapshot().unwrap(), None);
    }

    #[test]
    fn parses_its_own_names() {
        assert_eq!(parse_snapshot_name("snapshot.3_99"), Some(TermIndex::new(3, 99)));
        assert_eq!(parse_snapshot_name("snapshot.3-99"), None);
        assert_eq!(parse_snapshot_name("checkpoint.3_99"), None);
    }
}
