//! EC2 Instance Metadata Service (IMDSv2) backend.
//!
//! Every request is preceded by a token fetch (`PUT /latest/api/token`),
//! per the IMDSv2 session-token requirement; the token is cached for its
//! advertised TTL and refreshed lazily.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use confd_types::{BackendConfig, BackendKind, ConfdError, KvSnapshot};
use reqwest::blocking::Client;

use crate::Backend;

const IMDS_ENDPOINT: &str = "http://169.254.169.254";
const TOKEN_TTL_SECS: &str = "21600";

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct ImdsBackend {
    client: Client,
    token: Mutex<Option<CachedToken>>,
}

impl ImdsBackend {
    pub fn new(_config: &BackendConfig) -> Result<Self, ConfdError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| ConfdError::Connect(e.to_string()))?;
        Ok(Self { client, token: Mutex::new(None) })
    }

    fn token(&self) -> Result<String, ConfdError> {
        let mut guard = self.token.lock().expect("imds token mutex poisoned");
        if let Some(cached) = guard.as_ref() {
            if cached.expires_at > Instant::now() {
                return Ok(cached.value.clone());
            }
        }
        let response = self
            .client
            .put(format!("{IMDS_ENDPOINT}/latest/api/token"))
            .header("X-aws-ec2-metadata-token-ttl-seconds", TOKEN_TTL_SECS)
            .send()
            .map_err(|e| ConfdError::Connect(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ConfdError::Connect(format!(
                "imds token request failed: {}",
                response.status()
            )));
        }
        let value = response.text().map_err(|e| ConfdError::Connect(e.to_string()))?;
        *guard = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(21_000),
        });
        Ok(value)
    }

    fn get(&self, path: &str) -> Result<Option<String>, ConfdError> {
        let token = self.token()?;
        let response = self
            .client
            .get(format!("{IMDS_ENDPOINT}{path}"))
            .header("X-aws-ec2-metadata-token", token)
            .send()
            .map_err(|e| ConfdError::Fetch(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ConfdError::Fetch(format!(
                "imds request {path} failed: {}",
                response.status()
            )));
        }
        Ok(Some(response.text().map_err(|e| ConfdError::Fetch(e.to_string()))?))
    }
}

impl Backend for ImdsBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Imds
    }

    fn get_values(&self, keys: &[String]) -> Result<KvSnapshot, ConfdError> {
        let mut values = BTreeMap::new();
        for key in keys {
            let path = format!("/latest/meta-data{}", key);
            if let Some(value) = self.get(&path)? {
                values.insert(key.clone(), value.trim().to_string());
            }
        }
        Ok(KvSnapshot { values })
    }

    fn health_check(&self) -> Result<(), ConfdError> {
        self.get("/latest/meta-data/").map(|_| ())
    }
}
