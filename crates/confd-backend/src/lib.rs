//! Pluggable remote key/value backend adapters for confd-rs.
//!
//! This crate is the direct analogue of the teacher workspace's
//! `StorageBackend` trait + feature-gated submodule + factory-function
//! pattern: one trait (`Backend`), one tagged enum (`confd_types::BackendKind`),
//! one struct per backend kind, and a `build_backend` factory matching on
//! the kind with `#[cfg(feature = "...")]` / `#[cfg(not(feature = "..."))]`
//! arms — the disabled arm bails with a clear "requires the '...' feature"
//! message instead of failing to compile silently.
//!
//! Backends that support long-poll watch (etcd, consul, vault, zookeeper)
//! implement [`Backend::watch_prefix`]; everything else returns
//! [`WatchUnsupported`] and the scheduler falls back to polling on its
//! configured interval, per the per-backend semantics table.

use std::time::Duration;

use confd_types::{BackendConfig, BackendKind, ConfdError, KvSnapshot};

pub mod backends;

/// Outcome of a long-poll watch call: either nothing changed before the
/// deadline (caller should re-poll with the same `wait_index`), or the
/// prefix changed and the caller should re-fetch via `get_values`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    Unchanged { wait_index: Option<u64> },
    Changed { wait_index: Option<u64> },
}

/// Returned by `watch_prefix` on backends with no native long-poll/watch
/// API. The scheduler treats this the same as a resource configured for
/// interval mode: fetch on a timer and hash-compare.
#[derive(Debug, Clone, Copy)]
pub struct WatchUnsupported;

impl std::fmt::Display for WatchUnsupported {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "backend does not support watch; use interval mode")
    }
}

/// Common contract every backend adapter implements. Mirrors the shape of
/// the teacher's `StorageBackend` trait: a handful of narrow, blocking
/// methods, `Send + Sync` so the scheduler can share one adapter instance
/// across per-resource threads behind an `Arc`.
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Fetch every key under each of `keys` (each may be a leaf key or a
    /// directory prefix — backends recurse prefixes themselves) and return
    /// the merged snapshot with prefix already stripped/rewritten.
    fn get_values(&self, keys: &[String]) -> Result<KvSnapshot, ConfdError>;

    /// Long-poll for a change under `prefix`, blocking up to `timeout`.
    /// Returns `Ok(Err(WatchUnsupported))` rather than an error for
    /// backends with no native watch support, so callers can distinguish
    /// "nothing changed" from "this backend can't do this at all".
    fn watch_prefix(
        &self,
        prefix: &str,
        wait_index: Option<u64>,
        timeout: Duration,
    ) -> Result<Result<WatchOutcome, WatchUnsupported>, ConfdError> {
        let _ = (prefix, wait_index, timeout);
        Ok(Err(WatchUnsupported))
    }

    /// Cheap connectivity probe used by the `/health` HTTP endpoint and by
    /// `confd check-config`/`confd validate`.
    fn health_check(&self) -> Result<(), ConfdError>;
}

/// Build a boxed [`Backend`] for the configured [`BackendKind`]. Each arm
/// with its Cargo feature disabled bails with a clear message instead of
/// being unreachable.
pub fn build_backend(config: &BackendConfig) -> Result<Box<dyn Backend>, ConfdError> {
    let kind = config
        .kind
        .ok_or_else(|| ConfdError::Config("no backend kind configured".to_string()))?;

    match kind {
        BackendKind::Env => Ok(Box::new(backends::env::EnvBackend::new())),
        BackendKind::File => Ok(Box::new(backends::file::FileBackend::new(config)?)),

        #[cfg(feature = "etcd")]
        BackendKind::Etcd => Ok(Box::new(backends::etcd::EtcdBackend::new(config)?)),
        #[cfg(not(feature = "etcd"))]
        BackendKind::Etcd => Err(ConfdError::Config(
            "backend 'etcd' requires the 'etcd' feature flag".to_string(),
        )),

        #[cfg(feature = "consul")]
        BackendKind::Consul => Ok(Box::new(backends::consul::ConsulBackend::new(config)?)),
        #[cfg(not(feature = "consul"))]
        BackendKind::Consul => Err(ConfdError::Config(
            "backend 'consul' requires the 'consul' feature flag".to_string(),
        )),

        #[cfg(feature = "vault")]
        BackendKind::Vault => Ok(Box::new(backends::vault::VaultBackend::new(config)?)),
        #[cfg(not(feature = "vault"))]
        BackendKind::Vault => Err(ConfdError::Config(
            "backend 'vault' requires the 'vault' feature flag".to_string(),
        )),

        #[cfg(feature = "redis-backend")]
        BackendKind::Redis => Ok(Box::new(backends::redis_backend::RedisBackend::new(config)?)),
        #[cfg(not(feature = "redis-backend"))]
        BackendKind::Redis => Err(ConfdError::Config(
            "backend 'redis' requires the 'redis-backend' feature flag".to_string(),
        )),

        #[cfg(feature = "zk")]
        BackendKind::Zookeeper => Ok(Box::new(backends::zookeeper::ZookeeperBackend::new(config)?)),
        #[cfg(not(feature = "zk"))]
        BackendKind::Zookeeper => Err(ConfdError::Config(
            "backend 'zookeeper' requires the 'zk' feature flag".to_string(),
        )),

        #[cfg(feature = "dynamodb")]
        BackendKind::Dynamodb => Ok(Box::new(backends::aws::DynamoDbBackend::new(config)?)),
        #[cfg(not(feature = "dynamodb"))]
        BackendKind::Dynamodb => Err(ConfdError::Config(
            "backend 'dynamodb' requires the 'dynamodb' feature flag".to_string(),
        )),

        #[cfg(feature = "aws-ssm")]
        BackendKind::Ssm => Ok(Box::new(backends::aws::SsmBackend::new(config)?)),
        #[cfg(not(feature = "aws-ssm"))]
        BackendKind::Ssm => Err(ConfdError::Config(
            "backend 'ssm' requires the 'aws-ssm' feature flag".to_string(),
        )),

        #[cfg(feature = "aws-acm")]
        BackendKind::Acm => Ok(Box::new(backends::aws::AcmBackend::new(config)?)),
        #[cfg(not(feature = "aws-acm"))]
        BackendKind::Acm => Err(ConfdError::Config(
            "backend 'acm' requires the 'aws-acm' feature flag".to_string(),
        )),

        #[cfg(feature = "aws-secretsmanager")]
        BackendKind::SecretsManager => {
            Ok(Box::new(backends::aws::SecretsManagerBackend::new(config)?))
        }
        #[cfg(not(feature = "aws-secretsmanager"))]
        BackendKind::SecretsManager => Err(ConfdError::Config(
            "backend 'secretsmanager' requires the 'aws-secretsmanager' feature flag".to_string(),
        )),

        #[cfg(feature = "imds")]
        BackendKind::Imds => Ok(Box::new(backends::imds::ImdsBackend::new(config)?)),
        #[cfg(not(feature = "imds"))]
        BackendKind::Imds => Err(ConfdError::Config(
            "backend 'imds' requires the 'imds' feature flag".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_backend_requires_kind() {
        let config = BackendConfig::default();
        let err = build_backend(&config).unwrap_err();
        assert!(matches!(err, ConfdError::Config(_)));
    }

    #[test]
    fn env_backend_always_available() {
        let config = BackendConfig {
            kind: Some(BackendKind::Env),
            ..Default::default()
        };
        let backend = build_backend(&config).expect("env backend builds");
        assert_eq!(backend.kind(), BackendKind::Env);
    }
}
