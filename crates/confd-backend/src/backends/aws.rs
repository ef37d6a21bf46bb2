//! AWS DynamoDB/SSM/ACM/Secrets Manager backends.
//!
//! The AWS SDK for Rust is async-only; every other backend adapter in this
//! crate is a plain blocking call, so each of these wraps its SDK calls in
//! a small single-threaded Tokio runtime built once per adapter and driven
//! with `block_on`. This keeps the `Backend` trait itself synchronous,
//! matching the scheduler's one-thread-per-resource model.

use std::collections::BTreeMap;

use confd_types::{BackendConfig, BackendKind, ConfdError, KvSnapshot};
use tokio::runtime::Runtime;

use crate::Backend;

fn runtime() -> Result<Runtime, ConfdError> {
    Runtime::new().map_err(|e| ConfdError::Config(format!("failed to start AWS SDK runtime: {e}")))
}

async fn load_aws_config(region: Option<&str>) -> aws_config::SdkConfig {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(region) = region {
        loader = loader.region(aws_config::Region::new(region.to_string()));
    }
    loader.load().await
}

pub struct DynamoDbBackend {
    runtime: Runtime,
    client: aws_sdk_dynamodb::Client,
    table: String,
}

impl DynamoDbBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, ConfdError> {
        let runtime = runtime()?;
        let table = config
            .table
            .clone()
            .ok_or_else(|| ConfdError::Config("dynamodb backend requires `table`".to_string()))?;
        let sdk_config = runtime.block_on(load_aws_config(config.region.as_deref()));
        let client = aws_sdk_dynamodb::Client::new(&sdk_config);
        Ok(Self { runtime, client, table })
    }
}

impl DynamoDbBackend {
    /// Scans the table for every item whose `key` attribute begins with
    /// `prefix`, paging through `LastEvaluatedKey` until exhausted. `get_item`
    /// only ever resolves a single exact key, so this is the only way to
    /// support hierarchical (prefix) resource keys against DynamoDB.
    fn scan_prefix(&self, prefix: &str, values: &mut BTreeMap<String, String>) -> Result<(), ConfdError> {
        let mut exclusive_start_key = None;
        loop {
            let mut request = self
                .client
                .scan()
                .table_name(&self.table)
                .filter_expression("begins_with(#k, :prefix)")
                .expression_attribute_names("#k", "key")
                .expression_attribute_values(":prefix", aws_sdk_dynamodb::types::AttributeValue::S(prefix.to_string()));
            if let Some(start) = exclusive_start_key.take() {
                request = request.set_exclusive_start_key(Some(start));
            }
            let output = self.runtime.block_on(request.send()).map_err(|e| ConfdError::Fetch(e.to_string()))?;
            for item in output.items() {
                if let (Some(aws_sdk_dynamodb::types::AttributeValue::S(key)), Some(aws_sdk_dynamodb::types::AttributeValue::S(value))) =
                    (item.get("key"), item.get("value"))
                {
                    values.insert(key.clone(), value.clone());
                }
            }
            match output.last_evaluated_key {
                Some(key) if !key.is_empty() => exclusive_start_key = Some(key),
                _ => break,
            }
        }
        Ok(())
    }
}

impl Backend for DynamoDbBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Dynamodb
    }

    fn get_values(&self, keys: &[String]) -> Result<KvSnapshot, ConfdError> {
        let mut values = BTreeMap::new();
        for key in keys {
            let item = self.runtime.block_on(
                self.client
                    .get_item()
                    .table_name(&self.table)
                    .key("key", aws_sdk_dynamodb::types::AttributeValue::S(key.clone()))
                    .send(),
            );
            let output = item.map_err(|e| ConfdError::Fetch(e.to_string()))?;
            match output.item {
                Some(item) => {
                    if let Some(aws_sdk_dynamodb::types::AttributeValue::S(value)) = item.get("value") {
                        values.insert(key.clone(), value.clone());
                    }
                }
                // No item under the exact key: treat it as a prefix and scan
                // for every item whose key begins with it, the way the other
                // backends fall back to prefix semantics.
                None => self.scan_prefix(key, &mut values)?,
            }
        }
        Ok(KvSnapshot { values })
    }

    fn health_check(&self) -> Result<(), ConfdError> {
        self.runtime
            .block_on(self.client.describe_table().table_name(&self.table).send())
            .map(|_| ())
            .map_err(|e| ConfdError::Connect(e.to_string()))
    }
}

pub struct SsmBackend {
    runtime: Runtime,
    client: aws_sdk_ssm::Client,
}

impl SsmBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, ConfdError> {
        let runtime = runtime()?;
        let sdk_config = runtime.block_on(load_aws_config(config.region.as_deref()));
        let client = aws_sdk_ssm::Client::new(&sdk_config);
        Ok(Self { runtime, client })
    }
}

impl Backend for SsmBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Ssm
    }

    fn get_values(&self, keys: &[String]) -> Result<KvSnapshot, ConfdError> {
        let mut values = BTreeMap::new();
        for key in keys {
            let result = self.runtime.block_on(
                self.client
                    .get_parameters_by_path()
                    .path(key)
                    .recursive(true)
                    .with_decryption(true)
                    .send(),
            );
            let output = result.map_err(|e| ConfdError::Fetch(e.to_string()))?;
            for param in output.parameters() {
                if let (Some(name), Some(value)) = (param.name(), param.value()) {
                    values.insert(name.to_string(), value.to_string());
                }
            }
        }
        Ok(KvSnapshot { values })
    }

    fn health_check(&self) -> Result<(), ConfdError> {
        self.runtime
            .block_on(self.client.describe_parameters().send())
            .map(|_| ())
            .map_err(|e| ConfdError::Connect(e.to_string()))
    }
}

pub struct AcmBackend {
    runtime: Runtime,
    client: aws_sdk_acm::Client,
}

impl AcmBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, ConfdError> {
        let runtime = runtime()?;
        let sdk_config = runtime.block_on(load_aws_config(config.region.as_deref()));
        let client = aws_sdk_acm::Client::new(&sdk_config);
        Ok(Self { runtime, client })
    }
}

impl Backend for AcmBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Acm
    }

    /// Keys are certificate ARNs; confd-rs exposes the PEM certificate
    /// chain under `<key>/certificate` and `<key>/certificate_chain`.
    fn get_values(&self, keys: &[String]) -> Result<KvSnapshot, ConfdError> {
        let mut values = BTreeMap::new();
        for key in keys {
            let result = self
                .runtime
                .block_on(self.client.get_certificate().certificate_arn(key).send());
            // ACM allows a 404-equivalent (ResourceNotFoundException) to prove
            // connectivity without treating it as a fetch failure.
            match result {
                Ok(output) => {
                    if let Some(cert) = output.certificate() {
                        values.insert(format!("{key}/certificate"), cert.to_string());
                    }
                    if let Some(chain) = output.certificate_chain() {
                        values.insert(format!("{key}/certificate_chain"), chain.to_string());
                    }
                }
                Err(e) => return Err(ConfdError::Fetch(e.to_string())),
            }
        }
        Ok(KvSnapshot { values })
    }

    fn health_check(&self) -> Result<(), ConfdError> {
        self.runtime
            .block_on(self.client.list_certificates().send())
            .map(|_| ())
            .map_err(|e| ConfdError::Connect(e.to_string()))
    }
}

pub struct SecretsManagerBackend {
    runtime: Runtime,
    client: aws_sdk_secretsmanager::Client,
    version_stage: String,
}

impl SecretsManagerBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, ConfdError> {
        let runtime = runtime()?;
        let sdk_config = runtime.block_on(load_aws_config(config.region.as_deref()));
        let client = aws_sdk_secretsmanager::Client::new(&sdk_config);
        let version_stage = config
            .secretsmanager_version_stage
            .clone()
            .unwrap_or_else(|| "AWSCURRENT".to_string());
        Ok(Self { runtime, client, version_stage })
    }
}

/// A secret's JSON value is flattened to `<key>/<field>` entries so templates
/// can address individual fields the same way they address plain strings; a
/// secret that isn't a JSON object is stored verbatim under `key`.
fn flatten_secret(key: &str, secret_string: &str, values: &mut BTreeMap<String, String>) {
    match serde_json::from_str::<serde_json::Value>(secret_string) {
        Ok(serde_json::Value::Object(map)) => {
            for (field, value) in map {
                let flat = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                values.insert(format!("{key}/{field}"), flat);
            }
        }
        _ => {
            values.insert(key.to_string(), secret_string.to_string());
        }
    }
}

impl Backend for SecretsManagerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::SecretsManager
    }

    fn get_values(&self, keys: &[String]) -> Result<KvSnapshot, ConfdError> {
        let mut values = BTreeMap::new();
        for key in keys {
            let result = self.runtime.block_on(
                self.client
                    .get_secret_value()
                    .secret_id(key)
                    .version_stage(&self.version_stage)
                    .send(),
            );
            let output = result.map_err(|e| ConfdError::Fetch(e.to_string()))?;
            if let Some(value) = output.secret_string() {
                flatten_secret(key, value, &mut values);
            }
        }
        Ok(KvSnapshot { values })
    }

    fn health_check(&self) -> Result<(), ConfdError> {
        self.runtime
            .block_on(self.client.list_secrets().max_results(1).send())
            .map(|_| ())
            .map_err(|e| ConfdError::Connect(e.to_string()))
    }
}

#[cfg(test)]
mod secrets_manager_tests {
    use super::flatten_secret;
    use std::collections::BTreeMap;

    #[test]
    fn flattens_json_object_secrets_to_nested_keys() {
        let mut values = BTreeMap::new();
        flatten_secret("/app/db", r#"{"host":"db.internal","port":5432}"#, &mut values);
        assert_eq!(values.get("/app/db/host"), Some(&"db.internal".to_string()));
        assert_eq!(values.get("/app/db/port"), Some(&"5432".to_string()));
    }

    #[test]
    fn stores_non_object_secrets_verbatim() {
        let mut values = BTreeMap::new();
        flatten_secret("/app/token", "plain-secret-value", &mut values);
        assert_eq!(values.get("/app/token"), Some(&"plain-secret-value".to_string()));
    }
}
