pub mod env;
pub mod file;

#[cfg(feature = "etcd")]
pub mod etcd;
#[cfg(feature = "consul")]
pub mod consul;
#[cfg(feature = "vault")]
pub mod vault;
#[cfg(feature = "redis-backend")]
pub mod redis_backend;
#[cfg(feature = "zk")]
pub mod zookeeper;
#[cfg(any(
    feature = "dynamodb",
    feature = "aws-ssm",
    feature = "aws-acm",
    feature = "aws-secretsmanager"
))]
pub mod aws;
#[cfg(feature = "imds")]
pub mod imds;
