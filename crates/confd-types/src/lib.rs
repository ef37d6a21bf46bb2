//! Core data model for confd-rs.
//!
//! This crate has no I/O and no backend knowledge — it defines the shapes
//! that flow between the backend adapters, the snapshot, the renderer, the
//! commit pipeline, and the scheduler. Keeping it free of those dependencies
//! means every other crate in the workspace can depend on it without pulling
//! in unrelated concerns.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which backend a [`BackendConfig`] talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    Etcd,
    Consul,
    Vault,
    Redis,
    Zookeeper,
    Dynamodb,
    Ssm,
    Acm,
    SecretsManager,
    Imds,
    Env,
    File,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BackendKind::Etcd => "etcd",
            BackendKind::Consul => "consul",
            BackendKind::Vault => "vault",
            BackendKind::Redis => "redis",
            BackendKind::Zookeeper => "zookeeper",
            BackendKind::Dynamodb => "dynamodb",
            BackendKind::Ssm => "ssm",
            BackendKind::Acm => "acm",
            BackendKind::SecretsManager => "secretsmanager",
            BackendKind::Imds => "imds",
            BackendKind::Env => "env",
            BackendKind::File => "file",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for BackendKind {
    type Err = ConfdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "etcd" => BackendKind::Etcd,
            "consul" => BackendKind::Consul,
            "vault" => BackendKind::Vault,
            "redis" => BackendKind::Redis,
            "zookeeper" | "zk" => BackendKind::Zookeeper,
            "dynamodb" | "dynamo" => BackendKind::Dynamodb,
            "ssm" => BackendKind::Ssm,
            "acm" => BackendKind::Acm,
            "secretsmanager" | "secrets-manager" => BackendKind::SecretsManager,
            "imds" => BackendKind::Imds,
            "env" => BackendKind::Env,
            "file" => BackendKind::File,
            other => {
                return Err(ConfdError::Config(format!("unknown backend kind: {other}")));
            }
        })
    }
}

/// Connection/auth parameters for a backend, as loaded from CLI flags, TOML,
/// or environment variables. Fields not relevant to a given [`BackendKind`]
/// are simply left `None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    pub kind: Option<BackendKind>,
    #[serde(default)]
    pub nodes: Vec<String>,
    pub scheme: Option<String>,
    pub auth_token: Option<String>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub client_ca_keys: Option<PathBuf>,
    pub basic_auth: Option<(String, String)>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// `srv_domain`/`srv_record` for SRV-based node discovery.
    pub srv_domain: Option<String>,
    pub srv_record: Option<String>,
    /// File backend: directory or file path holding the YAML/JSON document(s).
    pub file_paths: Vec<PathBuf>,
    /// AWS region, used by dynamodb/ssm/acm/secretsmanager/imds adapters.
    pub region: Option<String>,
    pub table: Option<String>,
    /// Retry policy for connect/fetch/watch calls against this backend.
    /// `None` fields fall back to `confd-retry`'s default policy.
    pub retry_max_attempts: Option<u32>,
    #[serde(default, with = "confd_duration::as_duration_opt")]
    pub retry_base_delay: Option<std::time::Duration>,
    #[serde(default, with = "confd_duration::as_duration_opt")]
    pub retry_max_delay: Option<std::time::Duration>,
    /// Secrets Manager: which version of a secret to fetch (`AWSCURRENT`,
    /// `AWSPREVIOUS`, or a custom staging label). Defaults to `AWSCURRENT`.
    pub secretsmanager_version_stage: Option<String>,
}

/// One `[template-resource]` entry: a template source, a destination, the
/// keys it watches, and everything needed to stage, verify, and install a
/// render of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateResource {
    /// Unique name, derived from the resource's TOML file stem.
    pub name: String,
    pub src: PathBuf,
    pub dest: PathBuf,
    #[serde(default)]
    pub keys: Vec<String>,
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub check_cmd: Option<String>,
    pub reload_cmd: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub reload_on_no_change: bool,
    /// Post-render well-formedness check; `None` skips validation entirely.
    #[serde(default)]
    pub output_format: Option<OutputFormat>,
}

/// Structured format a render is validated against once the template has
/// executed, before the commit pipeline stages it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Yaml,
    Toml,
    Xml,
}

impl std::str::FromStr for OutputFormat {
    type Err = ConfdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "yaml" | "yml" => OutputFormat::Yaml,
            "toml" => OutputFormat::Toml,
            "xml" => OutputFormat::Xml,
            other => {
                return Err(ConfdError::Config(format!("unknown output format: {other}")));
            }
        })
    }
}

/// A point-in-time hash of the key/value pairs a resource read on its most
/// recent successful fetch. Compared against the previous fingerprint to
/// decide whether a render is even worth attempting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFingerprint(pub String);

impl KeyFingerprint {
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let sorted: BTreeMap<&str, &str> = pairs.into_iter().collect();
        let mut hasher_input = String::new();
        for (k, v) in &sorted {
            hasher_input.push_str(k);
            hasher_input.push('\0');
            hasher_input.push_str(v);
            hasher_input.push('\n');
        }
        KeyFingerprint(sha256_hex(hasher_input.as_bytes()))
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// A fully materialized key/value snapshot for one resource, as gathered by
/// a backend adapter. Keys are absolute (prefix already applied/stripped).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KvSnapshot {
    pub values: BTreeMap<String, String>,
}

/// Policy controlling how a resource's watch loop responds to errors:
/// `fail-fast` aborts the resource thread (and, depending on supervisor
/// config, the whole process); `best-effort` logs and keeps retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureMode {
    #[default]
    BestEffort,
    FailFast,
}

/// The kinds of error confd-rs surfaces, matching the stages of the
/// render/commit pipeline. Matched directly where the supervisor needs to
/// apply failure-mode policy per kind.
#[derive(Debug, thiserror::Error)]
pub enum ConfdError {
    #[error("config error: {0}")]
    Config(String),
    #[error("connect error: {0}")]
    Connect(String),
    #[error("fetch error: {0}")]
    Fetch(String),
    #[error("watch error: {0}")]
    Watch(String),
    #[error("render error: {0}")]
    Render(String),
    #[error("format error: {0}")]
    Format(String),
    #[error("check command failed: {0}")]
    Check(String),
    #[error("apply error: {0}")]
    Apply(String),
    #[error("reload command failed: {0}")]
    Reload(String),
    #[error("shutdown error: {0}")]
    Shutdown(String),
}

impl ConfdError {
    /// Whether this error kind is considered transient and worth retrying
    /// under the backend's retry policy (connect/fetch/watch), as opposed
    /// to one that requires operator intervention (config/render/format).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConfdError::Connect(_) | ConfdError::Fetch(_) | ConfdError::Watch(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_round_trips_through_display_and_fromstr() {
        for kind in [
            BackendKind::Etcd,
            BackendKind::Consul,
            BackendKind::Vault,
            BackendKind::Redis,
            BackendKind::Zookeeper,
            BackendKind::Dynamodb,
            BackendKind::Ssm,
            BackendKind::Acm,
            BackendKind::SecretsManager,
            BackendKind::Imds,
            BackendKind::Env,
            BackendKind::File,
        ] {
            let s = kind.to_string();
            let parsed: BackendKind = s.parse().expect("parse");
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn backend_kind_from_str_rejects_unknown() {
        assert_eq!(BackendKind::Etcd.to_string(), "etcd");
        assert!("bogus".parse::<BackendKind>().is_err());
    }

    #[test]
    fn fingerprint_is_order_independent() {
        let a = KeyFingerprint::from_pairs([("a", "1"), ("b", "2")]);
        let b = KeyFingerprint::from_pairs([("b", "2"), ("a", "1")]);
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_changes_with_value() {
        let a = KeyFingerprint::from_pairs([("a", "1")]);
        let b = KeyFingerprint::from_pairs([("a", "2")]);
        assert_ne!(a, b);
    }

    #[test]
    fn retryable_error_kinds() {
        assert!(ConfdError::Connect("x".into()).is_retryable());
        assert!(ConfdError::Fetch("x".into()).is_retryable());
        assert!(ConfdError::Watch("x".into()).is_retryable());
        assert!(!ConfdError::Config("x".into()).is_retryable());
        assert!(!ConfdError::Render("x".into()).is_retryable());
    }
}
