//! # Raw Record Store
//!
//! JSON records addressed by entity id below `source-data/gh`. Sub-resources
//! (comments, reviews, commits, team members) nest one level deeper under their
//! parent's id. A write only touches the disk when the serialized content hash
//! differs from what is already stored; the outcome tells the downloader whether
//! a page produced anything new.

use std::collections::BTreeSet;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::paths::{ensure_dir, remove_dir};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Pulls,
    Comments,
    Reviews,
    Commits,
    Teams,
    TeamMembers,
}

impl RecordKind {
    pub fn dir_name(&self) -> &'static str {
        match self {
            RecordKind::Pulls => "pulls",
            RecordKind::Comments => "comments",
            RecordKind::Reviews => "reviews",
            RecordKind::Commits => "commits",
            RecordKind::Teams => "teams",
            RecordKind::TeamMembers => "team_members",
        }
    }

    /// Whether records of this kind live below a parent directory.
    pub fn is_nested(&self) -> bool {
        matches!(
            self,
            RecordKind::Comments | RecordKind::Reviews | RecordKind::Commits | RecordKind::TeamMembers
        )
    }

    fn depth(&self) -> usize {
        if self.is_nested() {
            2
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
    Unchanged,
}

impl WriteOutcome {
    pub fn is_changed(&self) -> bool {
        !matches!(self, WriteOutcome::Unchanged)
    }
}

/// Hex SHA-256 of a byte string.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Hash of a file's bytes, `None` if the file does not exist.
pub fn file_hash(path: &Path) -> Result<Option<String>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(content_hash(&bytes))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(path, e)),
    }
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read(path).map_err(|e| Error::io(path, e))?;
    serde_json::from_slice(&content).map_err(|e| Error::json(path, e))
}

/// Like [`read_json`], but a missing file yields `None`.
pub fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    read_json(path).map(Some)
}

pub fn to_json_bytes<T: Serialize>(value: &T, what: &'static str) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|source| Error::Serialize { what, source })
}

/// Writes pretty JSON, creating parent directories as needed.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = to_json_bytes(value, "json file")?;
    write_bytes(path, &bytes)
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    fs::write(path, bytes).map_err(|e| Error::io(path, e))
}

/// File store of raw remote entities for one repository.
#[derive(Debug, Clone)]
pub struct RawStore {
    base: PathBuf,
}

impl RawStore {
    /// `source_data_dir` is `repos/<name>/source-data`.
    pub fn new(source_data_dir: impl AsRef<Path>) -> Self {
        Self {
            base: source_data_dir.as_ref().join("gh"),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    pub fn kind_dir(&self, kind: RecordKind) -> PathBuf {
        self.base.join(kind.dir_name())
    }

    pub fn record_path(&self, kind: RecordKind, parent: Option<&str>, id: &str) -> PathBuf {
        let mut path = self.kind_dir(kind);
        if let Some(parent) = parent {
            path.push(parent);
        }
        path.push(format!("{id}.json"));
        path
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.base.join("meta.json")
    }

    /// Persists `record` unless an identical serialization is already stored.
    pub fn write<T: Serialize>(
        &self,
        kind: RecordKind,
        parent: Option<&str>,
        id: &str,
        record: &T,
    ) -> Result<WriteOutcome> {
        let path = self.record_path(kind, parent, id);
        let bytes = to_json_bytes(record, kind.dir_name())?;

        let outcome = match file_hash(&path)? {
            Some(existing) if existing == content_hash(&bytes) => return Ok(WriteOutcome::Unchanged),
            Some(_) => WriteOutcome::Updated,
            None => WriteOutcome::Created,
        };
        write_bytes(&path, &bytes)?;
        Ok(outcome)
    }

    pub fn exists(&self, kind: RecordKind, parent: Option<&str>, id: &str) -> bool {
        self.record_path(kind, parent, id).exists()
    }

    /// Lazily reads every record of `kind` in file-name order. Each call starts a
    /// fresh walk.
    pub fn records<T: DeserializeOwned>(&self, kind: RecordKind) -> Records<T> {
        let dir = self.kind_dir(kind);
        let walker = dir.is_dir().then(|| {
            WalkDir::new(&dir)
                .min_depth(kind.depth())
                .max_depth(kind.depth())
                .sort_by_file_name()
                .into_iter()
        });
        Records {
            walker,
            _marker: PhantomData,
        }
    }

    /// Ids (file stems) of every stored record of `kind`.
    pub fn ids(&self, kind: RecordKind) -> Result<BTreeSet<String>> {
        Ok(self
            .json_files(kind)?
            .iter()
            .filter_map(|path| file_stem(path))
            .collect())
    }

    /// Parent ids that hold at least one record of a nested `kind`.
    pub fn parents(&self, kind: RecordKind) -> Result<BTreeSet<String>> {
        Ok(self
            .json_files(kind)?
            .iter()
            .filter_map(|path| path.parent().and_then(|parent| parent.file_name()))
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }

    pub fn count(&self, kind: RecordKind) -> Result<usize> {
        Ok(self.json_files(kind)?.len())
    }

    /// Removes every record of `kind`.
    pub fn clear(&self, kind: RecordKind) -> Result<()> {
        remove_dir(&self.kind_dir(kind))
    }

    fn json_files(&self, kind: RecordKind) -> Result<Vec<PathBuf>> {
        let dir = self.kind_dir(kind);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(&dir)
            .min_depth(kind.depth())
            .max_depth(kind.depth())
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| walk_error(&dir, e))?;
            if is_json_file(entry.path()) {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }
}

fn is_json_file(path: &Path) -> bool {
    path.is_file() && path.extension().map_or(false, |ext| ext == "json")
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem().map(|stem| stem.to_string_lossy().into_owned())
}

fn walk_error(dir: &Path, err: walkdir::Error) -> Error {
    let path = err.path().unwrap_or(dir).to_path_buf();
    let source = err
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "filesystem loop"));
    Error::io(path, source)
}

/// Iterator of `(record, source path)` pairs produced by [`RawStore::records`].
pub struct Records<T> {
    walker: Option<walkdir::IntoIter>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Iterator for Records<T> {
    type Item = Result<(T, PathBuf)>;

    fn next(&mut self) -> Option<Self::Item> {
        let walker = self.walker.as_mut()?;
        loop {
            let entry = match walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                    return Some(Err(walk_error(&path, e)));
                }
            };
            if !is_json_file(entry.path()) {
                continue;
            }
            let path = entry.into_path();
            return Some(read_json(&path).map(|record| (record, path)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: u64,
        title: String,
    }

    fn item(id: u64, title: &str) -> Item {
        Item {
            id,
            title: title.to_string(),
        }
    }

    #[test]
    fn test_write_detects_changes() {
        let temp_dir = TempDir::new().unwrap();
        let store = RawStore::new(temp_dir.path());

        let first = store.write(RecordKind::Pulls, None, "1", &item(1, "a")).unwrap();
        assert_eq!(first, WriteOutcome::Created);

        let same = store.write(RecordKind::Pulls, None, "1", &item(1, "a")).unwrap();
        assert_eq!(same, WriteOutcome::Unchanged);
        assert!(!same.is_changed());

        let edited = store.write(RecordKind::Pulls, None, "1", &item(1, "b")).unwrap();
        assert_eq!(edited, WriteOutcome::Updated);
    }

    #[test]
    fn test_records_are_sorted_and_restartable() {
        let temp_dir = TempDir::new().unwrap();
        let store = RawStore::new(temp_dir.path());
        for id in [3, 1, 2] {
            store
                .write(RecordKind::Pulls, None, &id.to_string(), &item(id, "x"))
                .unwrap();
        }

        let ids: Vec<u64> = store
            .records::<Item>(RecordKind::Pulls)
            .map(|r| r.unwrap().0.id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);

        // A second walk sees the same records.
        assert_eq!(store.records::<Item>(RecordKind::Pulls).count(), 3);
    }

    #[test]
    fn test_nested_records() {
        let temp_dir = TempDir::new().unwrap();
        let store = RawStore::new(temp_dir.path());
        store
            .write(RecordKind::Reviews, Some("7"), "100", &item(100, "r"))
            .unwrap();
        store
            .write(RecordKind::Reviews, Some("9"), "101", &item(101, "r"))
            .unwrap();

        let (record, path) = store
            .records::<Item>(RecordKind::Reviews)
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(record.id, 100);
        assert!(path.ends_with("reviews/7/100.json"));

        let parents: Vec<_> = store.parents(RecordKind::Reviews).unwrap().into_iter().collect();
        assert_eq!(parents, vec!["7".to_string(), "9".to_string()]);
        assert_eq!(store.count(RecordKind::Reviews).unwrap(), 2);
    }

    #[test]
    fn test_missing_kind_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = RawStore::new(temp_dir.path());
        assert_eq!(store.records::<Item>(RecordKind::Commits).count(), 0);
        assert!(store.ids(RecordKind::Commits).unwrap().is_empty());
        store.clear(RecordKind::Teams).unwrap();
    }

    #[test]
    fn test_unparsable_record_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let store = RawStore::new(temp_dir.path());
        let path = store.record_path(RecordKind::Pulls, None, "1");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{not json").unwrap();

        let result = store.records::<Item>(RecordKind::Pulls).next().unwrap();
        assert!(matches!(result, Err(Error::Json { .. })));
    }
}
