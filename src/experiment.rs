//! Persisted scores keyed by genome identity.
//!
//! A genome with identity `h` is stored at `<root>/<h[0..2]>/<h[2..]>/score.txt`
//! as a plain-text score, so repeated runs over the same dataset can skip
//! evaluating genomes they have already seen.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Experiment store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("experiment store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed score {text:?} at {path}")]
    Parse { path: PathBuf, text: String },
    #[error("identity {0:?} is too short to address")]
    BadIdentity(String),
}

/// Directory-backed identity → score map with an in-memory cache.
#[derive(Debug, Clone)]
pub struct ExperimentStore {
    root: PathBuf,
    cache: HashMap<String, f32>,
}

impl ExperimentStore {
    /// Open (creating if needed) the store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root,
            cache: HashMap::new(),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Score file for `identity`.
    pub fn path_for(&self, identity: &str) -> Result<PathBuf, StoreError> {
        if identity.len() < 3 || !identity.is_ascii() {
            return Err(StoreError::BadIdentity(identity.to_string()));
        }
        let (prefix, rest) = identity.split_at(2);
        Ok(self.root.join(prefix).join(rest).join("score.txt"))
    }

    /// Previously recorded score for `identity`.
    pub fn lookup(&mut self, identity: &str) -> Result<Option<f32>, StoreError> {
        if let Some(&score) = self.cache.get(identity) {
            return Ok(Some(score));
        }
        let path = self.path_for(identity)?;
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        let score: f32 = text.trim().parse().map_err(|_| StoreError::Parse {
            path: path.clone(),
            text: text.clone(),
        })?;
        self.cache.insert(identity.to_string(), score);
        Ok(Some(score))
    }

    /// Whether `identity` has a recorded score.
    pub fn contains(&mut self, identity: &str) -> Result<bool, StoreError> {
        Ok(self.lookup(identity)?.is_some())
    }

    /// Record `score` for `identity`, replacing any earlier record.
    pub fn record(&mut self, identity: &str, score: f32) -> Result<(), StoreError> {
        let path = self.path_for(identity)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        fs::write(&path, format!("{score}\n")).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        self.cache.insert(identity.to_string(), score);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_lookup() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = ExperimentStore::open(tmp.path()).unwrap();
        assert_eq!(store.lookup("abcdef").unwrap(), None);

        store.record("abcdef", -0.25).unwrap();
        assert!(tmp.path().join("ab").join("cdef").join("score.txt").exists());

        let mut reopened = ExperimentStore::open(tmp.path()).unwrap();
        assert_eq!(reopened.lookup("abcdef").unwrap(), Some(-0.25));
        assert!(reopened.contains("abcdef").unwrap());
    }

    #[test]
    fn test_negative_infinity_survives() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = ExperimentStore::open(tmp.path()).unwrap();
        store.record("ff00ff", f32::NEG_INFINITY).unwrap();
        let mut reopened = ExperimentStore::open(tmp.path()).unwrap();
        assert_eq!(reopened.lookup("ff00ff").unwrap(), Some(f32::NEG_INFINITY));
    }

    #[test]
    fn test_malformed_and_short() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = ExperimentStore::open(tmp.path()).unwrap();
        assert!(matches!(
            store.lookup("ab"),
            Err(StoreError::BadIdentity(_))
        ));

        let path = store.path_for("123456").unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not a number").unwrap();
        assert!(matches!(
            store.lookup("123456"),
            Err(StoreError::Parse { .. })
        ));
    }
}
