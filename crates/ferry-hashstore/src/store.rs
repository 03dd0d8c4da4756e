use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest as _, Sha256};

use crate::error::{HashStoreError, Result};

/// SHA-256 of a record's canonical JSON.
pub type Digest = [u8; 32];

/// Hashes `record` independently of field order.
///
/// The record is first converted to a `serde_json::Value`, whose maps keep
/// keys sorted, so `{"a":1,"b":2}` and `{"b":2,"a":1}` share a digest.
pub fn digest<T: Serialize + ?Sized>(record: &T) -> Result<Digest> {
    let canonical = serde_json::to_string(&serde_json::to_value(record)?)?;
    let hash = Sha256::digest(canonical.as_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&hash);
    Ok(out)
}

/// A set of digests backed by a newline-delimited hex file.
///
/// Changes stay in memory until [`save`](HashStore::save).
#[derive(Debug)]
pub struct HashStore {
    path: PathBuf,
    digests: HashSet<Digest>,
    dirty: bool,
}

impl HashStore {
    /// Loads the store at `path`. A missing file is an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
            Err(source) => return Err(HashStoreError::Read { path, source }),
        };

        let mut digests = HashSet::new();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let digest = parse(line).ok_or_else(|| HashStoreError::Corrupt {
                path: path.clone(),
                line: number + 1,
            })?;
            digests.insert(digest);
        }
        tracing::debug!(path = %path.display(), digests = digests.len(), "hash store loaded");

        Ok(Self {
            path,
            digests,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path { &self.path }

    pub fn len(&self) -> usize { self.digests.len() }

    pub fn is_empty(&self) -> bool { self.digests.is_empty() }

    /// Unsaved changes exist.
    pub fn is_dirty(&self) -> bool { self.dirty }

    pub fn contains<T: Serialize + ?Sized>(&self, record: &T) -> Result<bool> {
        Ok(self.digests.contains(&digest(record)?))
    }

    /// Adds `record`; returns whether it was new.
    pub fn insert<T: Serialize + ?Sized>(&mut self, record: &T) -> Result<bool> {
        let inserted = self.digests.insert(digest(record)?);
        self.dirty |= inserted;
        Ok(inserted)
    }

    /// Keeps the records not seen before and remembers them.
    ///
    /// Duplicates within `records` are dropped after their first occurrence.
    pub fn retain_new<T: Serialize>(&mut self, records: Vec<T>) -> Result<Vec<T>> {
        let mut fresh = Vec::with_capacity(records.len());
        for record in records {
            if self.insert(&record)? {
                fresh.push(record);
            }
        }
        Ok(fresh)
    }

    /// Writes the store if anything changed since it was opened or last saved.
    ///
    /// The file is replaced atomically: a reader sees either the old or the
    /// new contents.
    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let mut lines: Vec<String> = self.digests.iter().map(hex::encode).collect();
        lines.sort_unstable();

        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let write_err = |source| HashStoreError::Write {
            path: self.path.clone(),
            source,
        };

        let mut file = tempfile::NamedTempFile::new_in(parent).map_err(write_err)?;
        for line in &lines {
            writeln!(file, "{line}").map_err(write_err)?;
        }
        file.as_file().sync_all().map_err(write_err)?;
        file.persist(&self.path)
            .map_err(|err| write_err(err.error))?;

        tracing::debug!(path = %self.path.display(), digests = lines.len(), "hash store saved");
        self.dirty = false;
        Ok(())
    }
}

fn parse(line: &str) -> Option<Digest> {
    let bytes = hex::decode(line).ok()?;
    bytes.try_into().ok()
}
