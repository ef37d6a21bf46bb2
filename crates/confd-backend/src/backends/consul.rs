//! Consul backend, via the `/v1/kv` HTTP API.
//!
//! Consul's KV API natively supports long-poll via `?index=N&wait=10s`, so
//! `watch_prefix` uses it directly rather than approximating with plain
//! polling the way the etcd adapter does.

use std::collections::BTreeMap;
use std::time::Duration;

use confd_types::{BackendConfig, BackendKind, ConfdError, KvSnapshot};
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::{Backend, WatchOutcome, WatchUnsupported};

const USER_AGENT: &str = concat!("confd-rs/", env!("CARGO_PKG_VERSION"));

pub struct ConsulBackend {
    client: Client,
    endpoint: String,
    auth_token: Option<String>,
}

#[derive(Deserialize)]
struct KvEntry {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value")]
    value: Option<String>,
    #[serde(rename = "ModifyIndex")]
    modify_index: u64,
}

impl ConsulBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, ConfdError> {
        let node = config
            .nodes
            .first()
            .cloned()
            .unwrap_or_else(|| "127.0.0.1:8500".to_string());
        let scheme = config.scheme.clone().unwrap_or_else(|| "http".to_string());
        let endpoint = if node.starts_with("http") {
            node
        } else {
            format!("{scheme}://{node}")
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ConfdError::Connect(e.to_string()))?;
        Ok(Self { client, endpoint, auth_token: config.auth_token.clone() })
    }

    fn request(&self, path: &str) -> reqwest::blocking::RequestBuilder {
        let mut req = self.client.get(format!("{}{}", self.endpoint, path));
        if let Some(token) = &self.auth_token {
            req = req.header("X-Consul-Token", token);
        }
        req
    }

    fn fetch_prefix(
        &self,
        prefix: &str,
        index: Option<u64>,
        wait: Option<&str>,
    ) -> Result<(Vec<KvEntry>, u64, bool), ConfdError> {
        let mut path = format!("/v1/kv{prefix}?recurse=true");
        if let Some(idx) = index {
            path.push_str(&format!("&index={idx}"));
        }
        if let Some(w) = wait {
            path.push_str(&format!("&wait={w}"));
        }

        let response = self
            .request(&path)
            .send()
            .map_err(|e| ConfdError::Fetch(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok((Vec::new(), index.unwrap_or(0), false));
        }
        if !response.status().is_success() {
            return Err(ConfdError::Fetch(format!(
                "consul kv request failed: {}",
                response.status()
            )));
        }

        let consul_index = response
            .headers()
            .get("X-Consul-Index")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        let entries: Vec<KvEntry> = response.json().map_err(|e| ConfdError::Fetch(e.to_string()))?;
        Ok((entries, consul_index, true))
    }
}

impl Backend for ConsulBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Consul
    }

    fn get_values(&self, keys: &[String]) -> Result<KvSnapshot, ConfdError> {
        let mut values = BTreeMap::new();
        for key in keys {
            let (entries, _index, _found) = self.fetch_prefix(key, None, None)?;
            for entry in entries {
                let Some(encoded) = entry.value else { continue };
                let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &encoded)
                    .map_err(|e| ConfdError::Fetch(e.to_string()))?;
                let decoded = String::from_utf8(decoded).map_err(|e| ConfdError::Fetch(e.to_string()))?;
                values.insert(format!("/{}", entry.key.trim_start_matches('/')), decoded);
            }
        }
        Ok(KvSnapshot { values })
    }

    fn watch_prefix(
        &self,
        prefix: &str,
        wait_index: Option<u64>,
        timeout: Duration,
    ) -> Result<Result<WatchOutcome, WatchUnsupported>, ConfdError> {
        // First call for a resource: report index 1 as "changed" without
        // contacting Consul, so the caller's first fetch always happens
        // through `get_values` rather than being short-circuited here.
        let Some(prev) = wait_index else {
            return Ok(Ok(WatchOutcome::Changed { wait_index: Some(1) }));
        };

        let wait = format!("{}s", timeout.as_secs().max(1));
        let (_entries, index, _found) = self.fetch_prefix(prefix, wait_index, Some(&wait))?;
        Ok(Ok(if prev == index {
            WatchOutcome::Unchanged { wait_index: Some(index) }
        } else {
            WatchOutcome::Changed { wait_index: Some(index) }
        }))
    }

    fn health_check(&self) -> Result<(), ConfdError> {
        let response = self
            .request("/v1/status/leader")
            .send()
            .map_err(|e| ConfdError::Connect(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ConfdError::Connect(format!(
                "consul health check failed: {}",
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_prefix_with_no_wait_index_skips_the_backend() {
        // Point at a port nothing is listening on: if `watch_prefix` tried
        // to contact Consul for `wait_index = None` this would fail.
        let config = BackendConfig { nodes: vec!["127.0.0.1:1".to_string()], ..Default::default() };
        let backend = ConsulBackend::new(&config).unwrap();
        let outcome = backend.watch_prefix("/app", None, Duration::from_secs(1)).unwrap().unwrap();
        assert!(matches!(outcome, WatchOutcome::Changed { wait_index: Some(1) }));
    }
}
