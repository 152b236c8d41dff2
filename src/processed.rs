//! Persisted set of post ids that already became chapters.
//!
//! Stored as a JSON array of ids. Loaded once at startup and rewritten after
//! every processed post so an interrupted run resumes where it stopped.

use crate::model::Post;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessedSetError {
    #[error("Cannot read processed-post list {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Processed-post list {path} is not a JSON array of ids: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cannot write processed-post list {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug)]
pub struct ProcessedSet {
    path: PathBuf,
    /// Insertion order, as written to disk.
    ids: Vec<String>,
    index: HashSet<String>,
}

impl ProcessedSet {
    /// Load the set from `path`. A missing file is an empty set.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ProcessedSetError> {
        let path = path.into();
        let ids: Vec<String> = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| ProcessedSetError::Parse {
                path: path.clone(),
                source: e,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(ProcessedSetError::Read { path, source: e }),
        };
        let mut set = Self {
            path,
            ids: Vec::with_capacity(ids.len()),
            index: HashSet::with_capacity(ids.len()),
        };
        for id in ids {
            if set.index.insert(id.clone()) {
                set.ids.push(id);
            }
        }
        Ok(set)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Keep only posts whose id is not yet recorded.
    pub fn retain_new(&self, posts: Vec<Post>) -> Vec<Post> {
        posts
            .into_iter()
            .filter(|p| {
                let new = !self.contains(&p.id);
                if !new {
                    tracing::debug!(post_id = %p.id, "already processed; skipping");
                }
                new
            })
            .collect()
    }

    /// Record `id` and persist the whole set. Returns false (and writes nothing)
    /// when the id was already present.
    pub fn record(&mut self, id: &str) -> Result<bool, ProcessedSetError> {
        if !self.index.insert(id.to_string()) {
            return Ok(false);
        }
        self.ids.push(id.to_string());
        self.save()?;
        Ok(true)
    }

    fn save(&self) -> Result<(), ProcessedSetError> {
        let write_err = |e| ProcessedSetError::Write {
            path: self.path.clone(),
            source: e,
        };
        let json = serde_json::to_vec_pretty(&self.ids)
            .map_err(|e| write_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(write_err)?;
        std::fs::rename(&tmp, &self.path).map_err(write_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(id: &str) -> Post {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "created_time": "2024-01-01T00:00:00+0000"
        }))
        .unwrap()
    }

    #[test]
    fn missing_file_is_empty_set() {
        let tmp = tempfile::tempdir().unwrap();
        let set = ProcessedSet::load(tmp.path().join("processed_posts.json")).unwrap();
        assert!(set.is_empty());
        assert!(!set.contains("1"));
    }

    #[test]
    fn record_persists_and_reloads() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("processed_posts.json");
        let mut set = ProcessedSet::load(&path).unwrap();
        assert!(set.record("1").unwrap());
        assert!(set.record("2").unwrap());

        let on_disk: Vec<String> = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk, vec!["1", "2"]);

        let reloaded = ProcessedSet::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains("1") && reloaded.contains("2"));
    }

    #[test]
    fn recording_known_id_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("processed_posts.json");
        let mut set = ProcessedSet::load(&path).unwrap();
        set.record("1").unwrap();
        assert!(!set.record("1").unwrap());
        let on_disk: Vec<String> = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk, vec!["1"]);
    }

    #[test]
    fn retain_new_drops_recorded_posts() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("processed_posts.json");
        std::fs::write(&path, r#"["2"]"#).unwrap();
        let set = ProcessedSet::load(&path).unwrap();
        let kept = set.retain_new(vec![post("1"), post("2"), post("3")]);
        let ids: Vec<&str> = kept.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[test]
    fn duplicate_ids_on_disk_collapse() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("processed_posts.json");
        std::fs::write(&path, r#"["1","1","2"]"#).unwrap();
        let set = ProcessedSet::load(&path).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("processed_posts.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            ProcessedSet::load(&path),
            Err(ProcessedSetError::Parse { .. })
        ));
    }
}
