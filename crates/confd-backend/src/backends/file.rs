//! YAML/JSON file backend.
//!
//! Each configured file is parsed as a document tree and flattened into
//! `/`-separated key paths — `{"app": {"db": {"host": "x"}}}` becomes key
//! `/app/db/host` with string value `"x"`. Multiple files are merged, later
//! files overriding earlier ones on key collision.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use confd_types::{BackendConfig, BackendKind, ConfdError, KvSnapshot};

use crate::{Backend, WatchOutcome, WatchUnsupported};

pub struct FileBackend {
    paths: Vec<std::path::PathBuf>,
}

impl FileBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, ConfdError> {
        if config.file_paths.is_empty() {
            return Err(ConfdError::Config(
                "file backend requires at least one file_paths entry".to_string(),
            ));
        }
        Ok(Self { paths: config.file_paths.clone() })
    }

    fn load_one(path: &Path) -> Result<BTreeMap<String, String>, ConfdError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfdError::Fetch(format!("{}: {e}", path.display())))?;

        let value: serde_yaml::Value = if path.extension().and_then(|e| e.to_str()) == Some("json")
        {
            let json: serde_json::Value = serde_json::from_str(&content)
                .map_err(|e| ConfdError::Format(format!("{}: {e}", path.display())))?;
            serde_yaml::to_value(json)
                .map_err(|e| ConfdError::Format(format!("{}: {e}", path.display())))?
        } else {
            serde_yaml::from_str(&content)
                .map_err(|e| ConfdError::Format(format!("{}: {e}", path.display())))?
        };

        let mut out = BTreeMap::new();
        flatten(&value, String::new(), &mut out);
        Ok(out)
    }
}

fn flatten(value: &serde_yaml::Value, prefix: String, out: &mut BTreeMap<String, String>) {
    match value {
        serde_yaml::Value::Mapping(map) => {
            for (k, v) in map {
                let key = k.as_str().unwrap_or_default();
                let path = if prefix.is_empty() {
                    format!("/{key}")
                } else {
                    format!("{prefix}/{key}")
                };
                flatten(v, path, out);
            }
        }
        serde_yaml::Value::Sequence(seq) => {
            for (i, v) in seq.iter().enumerate() {
                flatten(v, format!("{prefix}/{i}"), out);
            }
        }
        serde_yaml::Value::Null => {}
        other => {
            let rendered = match other {
                serde_yaml::Value::String(s) => s.clone(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                serde_yaml::Value::Number(n) => n.to_string(),
                _ => String::new(),
            };
            out.insert(prefix, rendered);
        }
    }
}

impl Backend for FileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    fn get_values(&self, keys: &[String]) -> Result<KvSnapshot, ConfdError> {
        let mut values = BTreeMap::new();
        for path in &self.paths {
            values.extend(Self::load_one(path)?);
        }
        if !keys.is_empty() {
            values.retain(|k, _| keys.iter().any(|p| k == p || k.starts_with(&format!("{p}/"))));
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
        for path in &self.paths {
            if !path.exists() {
                return Err(ConfdError::Connect(format!(
                    "file backend source missing: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn flattens_nested_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vars.yml");
        std::fs::write(&path, "app:\n  db:\n    host: db.internal\n    port: 5432\n").unwrap();

        let config = BackendConfig {
            kind: Some(BackendKind::File),
            file_paths: vec![path],
            ..Default::default()
        };
        let backend = FileBackend::new(&config).unwrap();
        let snap = backend.get_values(&[]).unwrap();
        assert_eq!(snap.values.get("/app/db/host"), Some(&"db.internal".to_string()));
        assert_eq!(snap.values.get("/app/db/port"), Some(&"5432".to_string()));
    }

    #[test]
    fn later_file_overrides_earlier_on_collision() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.yml");
        let b = dir.path().join("b.yml");
        std::fs::write(&a, "app:\n  name: first\n").unwrap();
        std::fs::write(&b, "app:\n  name: second\n").unwrap();

        let config = BackendConfig {
            kind: Some(BackendKind::File),
            file_paths: vec![a, b],
            ..Default::default()
        };
        let backend = FileBackend::new(&config).unwrap();
        let snap = backend.get_values(&[]).unwrap();
        assert_eq!(snap.values.get("/app/name"), Some(&"second".to_string()));
    }

    #[test]
    fn requires_at_least_one_path() {
        let config = BackendConfig { kind: Some(BackendKind::File), ..Default::default() };
        assert!(FileBackend::new(&config).is_err());
    }

    #[test]
    fn health_check_fails_on_missing_file() {
        let config = BackendConfig {
            kind: Some(BackendKind::File),
            file_paths: vec![std::path::PathBuf::from("/nonexistent/vars.yml")],
            ..Default::default()
        };
        let backend = FileBackend::new(&config).unwrap();
        assert!(backend.health_check().is_err());
    }
}
