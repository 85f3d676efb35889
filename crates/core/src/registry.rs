use crate::error::SearchError;
use crate::models::RegistryEntry;
use chrono::Utc;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Created,
    AlreadyExists,
}

/// Durable video_id → derived-artifact-location mapping.
///
/// Any persistence backend satisfying this interface substitutes; tests use
/// it for doubles the same way search stores do in the query path.
pub trait Registry: Send + Sync {
    fn exists(&self, video_id: &str) -> Result<bool, SearchError>;
    fn register(&self, entry: RegistryEntry) -> Result<RegisterOutcome, SearchError>;
    fn resolve(&self, video_id: &str) -> Result<RegistryEntry, SearchError>;
    fn list(&self) -> Result<Vec<String>, SearchError>;
}

/// Snapshot-file registry.
///
/// Every successful `register` writes the full state to a brand-new
/// `registry_<timestamp>.json`; the lexicographically latest file is the
/// authority on load. Files are never rewritten in place, so a crashed write
/// can at worst leave a newer file unreadable, and the loader then falls back
/// to the empty registry with a warning instead of failing startup.
pub struct SnapshotRegistry {
    dir: PathBuf,
    // Guards exists-then-register; the cached map is replaced wholesale,
    // never mutated in place.
    cache: Mutex<Option<BTreeMap<String, RegistryEntry>>>,
}

impl SnapshotRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(None),
        }
    }

    fn latest_snapshot_file(&self) -> Option<PathBuf> {
        let entries = fs::read_dir(&self.dir).ok()?;
        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with("registry_") && name.ends_with(".json"))
            })
            .max()
    }

    fn load_from_disk(&self) -> BTreeMap<String, RegistryEntry> {
        let Some(latest) = self.latest_snapshot_file() else {
            return BTreeMap::new();
        };

        match fs::read(&latest)
            .map_err(SearchError::Io)
            .and_then(|body| Ok(serde_json::from_slice(&body)?))
        {
            Ok(parsed) => {
                info!(snapshot = %latest.display(), "loaded registry snapshot");
                parsed
            }
            Err(error) => {
                warn!(
                    snapshot = %latest.display(),
                    %error,
                    "registry snapshot corrupt; starting from empty registry"
                );
                BTreeMap::new()
            }
        }
    }

    fn with_state<T>(
        &self,
        action: impl FnOnce(&mut Option<BTreeMap<String, RegistryEntry>>) -> T,
    ) -> Result<T, SearchError> {
        let mut guard = self
            .cache
            .lock()
            .map_err(|_| SearchError::Request("registry lock poisoned".to_string()))?;
        if guard.is_none() {
            *guard = Some(self.load_from_disk());
        }
        Ok(action(&mut guard))
    }

    fn write_snapshot(&self, state: &BTreeMap<String, RegistryEntry>) -> Result<(), SearchError> {
        fs::create_dir_all(&self.dir)?;
        let timestamp = Utc::now().format("%Y%m%dT%H%M%S%6f");
        let path = self.dir.join(format!("registry_{timestamp}.json"));
        let body = serde_json::to_vec_pretty(state)?;
        fs::write(&path, body)?;
        info!(snapshot = %path.display(), entries = state.len(), "wrote registry snapshot");
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Registry for SnapshotRegistry {
    fn exists(&self, video_id: &str) -> Result<bool, SearchError> {
        self.with_state(|state| {
            state
                .as_ref()
                .is_some_and(|map| map.contains_key(video_id))
        })
    }

    fn register(&self, entry: RegistryEntry) -> Result<RegisterOutcome, SearchError> {
        // The whole check-then-act runs under one lock so two concurrent
        // ingestions cannot both pass the exists check or clobber each
        // other's snapshot.
        let mut guard = self
            .cache
            .lock()
            .map_err(|_| SearchError::Request("registry lock poisoned".to_string()))?;
        if guard.is_none() {
            *guard = Some(self.load_from_disk());
        }
        let current = guard.get_or_insert_with(BTreeMap::new);

        if current.contains_key(&entry.video_name) {
            return Ok(RegisterOutcome::AlreadyExists);
        }

        let mut next = current.clone();
        next.insert(entry.video_name.clone(), entry);

        // Snapshot first; the cache only advances to state that is durable.
        self.write_snapshot(&next)?;
        *guard = Some(next);
        Ok(RegisterOutcome::Created)
    }

    fn resolve(&self, video_id: &str) -> Result<RegistryEntry, SearchError> {
        self.with_state(|state| {
            state
                .as_ref()
                .and_then(|map| map.get(video_id).cloned())
        })?
        .ok_or_else(|| SearchError::RegistryNotFound(video_id.to_string()))
    }

    fn list(&self) -> Result<Vec<String>, SearchError> {
        self.with_state(|state| {
            state
                .as_ref()
                .map(|map| map.keys().cloned().collect())
                .unwrap_or_default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(video_name: &str) -> RegistryEntry {
        RegistryEntry {
            video_name: video_name.to_string(),
            video_cache: format!("cache_{video_name}"),
            video_table: format!("cache_{video_name}/video.json"),
            frames_view: format!("cache_{video_name}/frames.json"),
            audio_chunks_view: format!("cache_{video_name}/audio_chunks.json"),
        }
    }

    #[test]
    fn register_then_resolve_round_trips() {
        let dir = tempdir().unwrap();
        let registry = SnapshotRegistry::new(dir.path());

        assert!(!registry.exists("match").unwrap());
        assert_eq!(
            registry.register(entry("match")).unwrap(),
            RegisterOutcome::Created
        );
        assert!(registry.exists("match").unwrap());
        assert_eq!(registry.resolve("match").unwrap(), entry("match"));
    }

    #[test]
    fn second_register_is_a_recognized_no_op() {
        let dir = tempdir().unwrap();
        let registry = SnapshotRegistry::new(dir.path());

        registry.register(entry("match")).unwrap();
        assert_eq!(
            registry.register(entry("match")).unwrap(),
            RegisterOutcome::AlreadyExists
        );
        assert_eq!(registry.list().unwrap(), vec!["match".to_string()]);

        // Exactly one snapshot per successful write.
        let snapshots = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(snapshots, 1);
    }

    #[test]
    fn state_survives_process_restart_via_snapshot() {
        let dir = tempdir().unwrap();

        {
            let registry = SnapshotRegistry::new(dir.path());
            registry.register(entry("first")).unwrap();
            registry.register(entry("second")).unwrap();
        }

        // Fresh instance simulates a restart: lazily reloads the latest file.
        let registry = SnapshotRegistry::new(dir.path());
        assert_eq!(registry.resolve("first").unwrap(), entry("first"));
        assert_eq!(
            registry.list().unwrap(),
            vec!["first".to_string(), "second".to_string()]
        );
    }

    #[test]
    fn snapshots_are_new_files_and_latest_wins() {
        let dir = tempdir().unwrap();
        let registry = SnapshotRegistry::new(dir.path());

        registry.register(entry("first")).unwrap();
        registry.register(entry("second")).unwrap();

        let snapshots = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(snapshots, 2);

        let reloaded = SnapshotRegistry::new(dir.path());
        assert_eq!(reloaded.list().unwrap().len(), 2);
    }

    #[test]
    fn corrupt_latest_snapshot_falls_back_to_empty_registry() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("registry_99999999T999999999999.json"), b"{not json")
            .unwrap();

        let registry = SnapshotRegistry::new(dir.path());
        assert_eq!(registry.list().unwrap(), Vec::<String>::new());
        assert!(matches!(
            registry.resolve("anything").unwrap_err(),
            SearchError::RegistryNotFound(_)
        ));
    }

    #[test]
    fn missing_snapshot_dir_is_an_empty_registry() {
        let dir = tempdir().unwrap();
        let registry = SnapshotRegistry::new(dir.path().join("never_created"));
        assert!(!registry.exists("match").unwrap());
        assert!(registry.list().unwrap().is_empty());
    }

    #[test]
    fn unknown_video_resolves_to_registry_not_found() {
        let dir = tempdir().unwrap();
        let registry = SnapshotRegistry::new(dir.path());
        let error = registry.resolve("ghost").unwrap_err();
        assert!(matches!(error, SearchError::RegistryNotFound(id) if id == "ghost"));
    }
}
