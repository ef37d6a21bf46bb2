//! Redis backend.
//!
//! Keys map directly onto confd's `/`-separated paths, scanned with `SCAN
//! MATCH prefix*` to gather everything under a resource's declared keys.
//! Redis keyspace notifications would give native watch support but
//! require `notify-keyspace-events` to be enabled server-side, which
//! confd-rs can't assume — resources on this backend are always
//! interval-polled.

use std::collections::BTreeMap;

use confd_types::{BackendConfig, BackendKind, ConfdError, KvSnapshot};
use redis::Commands;

use crate::Backend;

pub struct RedisBackend {
    client: redis::Client,
}

impl RedisBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, ConfdError> {
        let node = config
            .nodes
            .first()
            .cloned()
            .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string());
        let url = if node.starts_with("redis://") {
            node
        } else {
            format!("redis://{node}")
        };
        let client = redis::Client::open(url).map_err(|e| ConfdError::Config(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Backend for RedisBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Redis
    }

    fn get_values(&self, keys: &[String]) -> Result<KvSnapshot, ConfdError> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| ConfdError::Connect(e.to_string()))?;
        let mut values = BTreeMap::new();

        for key in keys {
            let pattern = format!("{}*", key.trim_end_matches('/'));
            let matched: Vec<String> = conn
                .scan_match(&pattern)
                .map_err(|e| ConfdError::Fetch(e.to_string()))?
                .collect();
            for k in matched {
                let value: Option<String> = conn.get(&k).map_err(|e| ConfdError::Fetch(e.to_string()))?;
                if let Some(v) = value {
                    values.insert(k, v);
                }
            }
        }
        Ok(KvSnapshot { values })
    }

    fn health_check(&self) -> Result<(), ConfdError> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| ConfdError::Connect(e.to_string()))?;
        redis::cmd("PING")
            .query::<String>(&mut conn)
            .map(|_| ())
            .map_err(|e| ConfdError::Connect(e.to_string()))
    }
}
