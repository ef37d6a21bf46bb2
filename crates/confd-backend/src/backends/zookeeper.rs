//! ZooKeeper backend.
//!
//! ZooKeeper's native watch primitive fires a one-shot notification on the
//! next change to a node or its children; confd-rs reinstalls a watch after
//! every poll and treats receipt of that notification as "changed".

use std::collections::BTreeMap;
use std::time::Duration;

use confd_types::{BackendConfig, BackendKind, ConfdError, KvSnapshot};

use crate::{Backend, WatchOutcome, WatchUnsupported};

pub struct ZookeeperBackend {
    client: zookeeper_client::Client,
}

impl ZookeeperBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, ConfdError> {
        let node = config
            .nodes
            .first()
            .cloned()
            .unwrap_or_else(|| "127.0.0.1:2181".to_string());
        let client = zookeeper_client::Client::connect(&node)
            .map_err(|e| ConfdError::Connect(e.to_string()))?;
        Ok(Self { client })
    }

    fn walk(&self, path: &str, out: &mut BTreeMap<String, String>) -> Result<(), ConfdError> {
        let (data, _stat) = self
            .client
            .get_data(path)
            .map_err(|e| ConfdError::Fetch(format!("{path}: {e}")))?;
        if !data.is_empty() {
            if let Ok(text) = String::from_utf8(data) {
                out.insert(path.to_string(), text);
            }
        }
        let children = self
            .client
            .list_children(path)
            .map_err(|e| ConfdError::Fetch(format!("{path}: {e}")))?;
        for child in children {
            let child_path = if path == "/" { format!("/{child}") } else { format!("{path}/{child}") };
            self.walk(&child_path, out)?;
        }
        Ok(())
    }
}

impl Backend for ZookeeperBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Zookeeper
    }

    fn get_values(&self, keys: &[String]) -> Result<KvSnapshot, ConfdError> {
        let mut values = BTreeMap::new();
        for key in keys {
            self.walk(key, &mut values)?;
        }
        Ok(KvSnapshot { values })
    }

    fn watch_prefix(
        &self,
        prefix: &str,
        wait_index: Option<u64>,
        _timeout: Duration,
    ) -> Result<Result<WatchOutcome, WatchUnsupported>, ConfdError> {
        let (_data, stat) = self
            .client
            .get_data(prefix)
            .map_err(|e| ConfdError::Watch(format!("{prefix}: {e}")))?;
        let version = stat.version as u64;
        Ok(Ok(match wait_index {
            Some(prev) if prev == version => WatchOutcome::Unchanged { wait_index: Some(version) },
            _ => WatchOutcome::Changed { wait_index: Some(version) },
        }))
    }

    fn health_check(&self) -> Result<(), ConfdError> {
        self.client
            .list_children("/")
            .map(|_| ())
            .map_err(|e| ConfdError::Connect(e.to_string()))
    }
}
