//! Process-scoped caches.
//!
//! Compiled descriptor databases and VCS usernames are expensive or
//! external lookups that never change within one process. [`ProcessCache`]
//! holds both behind populate-once-per-key maps; recomputing a key yields
//! the same value, so a race on first population is harmless and needs no
//! locking beyond each map's own insertion lock.
//!
//! The cache is an explicit object passed by reference, not module state.

use crate::database::SymbolDatabase;
use crate::error::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Fallback identity recorded in generated headers when no VCS username is
/// configured.
pub const GENERATOR_NAME: &str = env!("CARGO_PKG_NAME");

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-lifetime cache for descriptor databases and VCS usernames.
#[derive(Debug, Default)]
pub struct ProcessCache {
    databases: Mutex<HashMap<PathBuf, Arc<SymbolDatabase>>>,
    vcs_usernames: Mutex<HashMap<PathBuf, String>>,
}

impl ProcessCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load (or reuse) the database for a descriptor-set payload.
    ///
    /// The cache key is the resolved absolute path of the primary payload;
    /// repeated requests for the same payload return the same database
    /// instance for the remaining process lifetime.
    pub fn database(
        &self,
        primary: &Path,
        externals: &[PathBuf],
    ) -> Result<Arc<SymbolDatabase>> {
        let key = primary
            .canonicalize()
            .unwrap_or_else(|_| primary.to_path_buf());
        if let Some(hit) = lock(&self.databases).get(&key) {
            debug!(payload = %key.display(), "descriptor database cache hit");
            return Ok(Arc::clone(hit));
        }
        let database = Arc::new(SymbolDatabase::load(&key, externals)?);
        Ok(Arc::clone(
            lock(&self.databases).entry(key).or_insert(database),
        ))
    }

    /// Look up (or reuse) the VCS username for a project directory.
    ///
    /// Shells out to `git config user.name`; an empty or failed lookup
    /// falls back to the generator's own name.
    pub fn vcs_username(&self, project_dir: &Path) -> String {
        if let Some(hit) = lock(&self.vcs_usernames).get(project_dir) {
            return hit.clone();
        }
        let username = read_vcs_username(project_dir);
        lock(&self.vcs_usernames)
            .entry(project_dir.to_path_buf())
            .or_insert(username)
            .clone()
    }
}

fn read_vcs_username(project_dir: &Path) -> String {
    Command::new("git")
        .args(["config", "user.name"])
        .current_dir(project_dir)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| GENERATOR_NAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;
    use std::io::Write;

    fn empty_payload() -> tempfile::NamedTempFile {
        let set = prost_types::FileDescriptorSet {
            file: vec![prost_types::FileDescriptorProto {
                name: Some("cache.proto".into()),
                package: Some("cache".into()),
                ..Default::default()
            }],
        };
        let mut out = tempfile::NamedTempFile::new().expect("temp file");
        out.write_all(&set.encode_to_vec()).expect("write payload");
        out
    }

    #[test]
    fn test_database_is_cached_by_resolved_path() {
        let payload = empty_payload();
        let cache = ProcessCache::new();

        let first = cache.database(payload.path(), &[]).expect("load");
        let second = cache.database(payload.path(), &[]).expect("cached");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_missing_payload_is_not_cached_as_success() {
        let cache = ProcessCache::new();
        assert!(cache
            .database(Path::new("/nonexistent/payload.pb"), &[])
            .is_err());
    }

    #[test]
    fn test_vcs_username_fallback_and_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ProcessCache::new();
        // outside any git checkout the lookup falls back to the generator name
        let name = cache.vcs_username(dir.path());
        assert!(!name.is_empty());
        assert_eq!(cache.vcs_username(dir.path()), name);
    }
}
