//! Environment-variable backend.
//!
//! There's no real hierarchy in `std::env::vars()`, so the env backend
//! reconstructs one by convention: `APP_DB_HOST=x` becomes key
//! `/app/db/host` (lowercased, underscores become path separators). Every
//! resource key the template declares is matched as a prefix against that
//! reconstructed path.

use std::collections::BTreeMap;
use std::time::Duration;

use confd_types::{BackendKind, ConfdError, KvSnapshot};

use crate::{Backend, WatchOutcome, WatchUnsupported};

pub struct EnvBackend;

impl EnvBackend {
    pub fn new() -> Self {
        EnvBackend
    }

    fn env_key_to_path(name: &str) -> String {
        format!("/{}", name.to_lowercase().replace('_', "/"))
    }

    /// Inverse of [`Self::env_key_to_path`]: `/app/db/host` becomes
    /// `APP_DB_HOST`. Lossy for paths containing uppercase segments or `_`,
    /// since those already collide going forward; only round-trips for the
    /// lowercase, underscore-free paths `env_key_to_path` itself produces.
    fn path_to_env_key(path: &str) -> String {
        path.trim_start_matches('/').to_uppercase().replace('/', "_")
    }
}

impl Default for EnvBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for EnvBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Env
    }

    fn get_values(&self, keys: &[String]) -> Result<KvSnapshot, ConfdError> {
        let mut values = BTreeMap::new();
        for (name, value) in std::env::vars() {
            let path = Self::env_key_to_path(&name);
            if keys.is_empty() || keys.iter().any(|k| path == *k || path.starts_with(&format!("{k}/"))) {
                values.insert(path, value);
            }
        }
        Ok(KvSnapshot { values })
    }

    fn watch_prefix(
        &self,
        _prefix: &str,
        _wait_index: Option<u64>,
        _timeout: Duration,
    ) -> Result<Result<WatchOutcome, WatchUnsupported>, ConfdError> {
        Ok(Err(WatchUnsupported))
    }

    fn health_check(&self) -> Result<(), ConfdError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    #[allow(unsafe_code)]
    fn env_var_maps_to_hierarchical_key() {
        // SAFETY: test runs serialized to avoid races on process env.
        unsafe {
            std::env::set_var("CONFD_TEST_APP_DB_HOST", "db.internal");
        }
        let backend = EnvBackend::new();
        let snap = backend
            .get_values(&["/confd/test/app".to_string()])
            .unwrap();
        assert_eq!(
            snap.values.get("/confd/test/app/db/host"),
            Some(&"db.internal".to_string())
        );
        unsafe {
            std::env::remove_var("CONFD_TEST_APP_DB_HOST");
        }
    }

    #[test]
    fn path_to_env_key_round_trips_through_env_key_to_path() {
        let path = "/app/db/host";
        let name = EnvBackend::path_to_env_key(path);
        assert_eq!(name, "APP_DB_HOST");
        assert_eq!(EnvBackend::env_key_to_path(&name), path);
    }

    #[test]
    #[serial]
    #[allow(unsafe_code)]
    fn empty_keys_returns_everything() {
        // SAFETY: test runs serialized to avoid races on process env.
        unsafe {
            std::env::set_var("CONFD_TEST_EMPTY_PROBE", "1");
        }
        let backend = EnvBackend::new();
        let snap = backend.get_values(&[]).unwrap();
        assert!(snap.values.contains_key("/confd/test/empty/probe"));
        unsafe {
            std::env::remove_var("CONFD_TEST_EMPTY_PROBE");
        }
    }
}
