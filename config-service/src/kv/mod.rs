//! Adapter over a hierarchical key-value backend.
//!
//! Keys are `/`-separated paths. Values are opaque bytes; this layer never
//! interprets them. Backend failures are returned as-is, there is no retry.

mod consul;
mod memory;

pub use consul::ConsulKv;
pub use memory::MemoryKv;

use crate::config::KvBackendType;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum KvError {
    #[error("kv transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("kv backend returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("invalid kv value encoding: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("invalid kv key: {0}")]
    InvalidKey(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: Bytes,
}

#[async_trait]
pub trait KvClient: Send + Sync {
    /// Returns `None` if the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, KvError>;

    /// Creates or overwrites `key`.
    async fn put(&self, key: &str, value: Bytes) -> Result<(), KvError>;

    /// Writes `key` only if it does not exist yet. Returns `true` if this call
    /// created it.
    async fn put_if_absent(&self, key: &str, value: Bytes) -> Result<bool, KvError>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// All pairs whose key starts with `prefix`, in backend order.
    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>, KvError>;

    /// Deletes every key starting with `prefix`.
    async fn delete_tree(&self, prefix: &str) -> Result<(), KvError>;
}

pub fn from_config(backend: &KvBackendType) -> Result<Arc<dyn KvClient>, KvError> {
    match backend {
        KvBackendType::Consul {
            address,
            token,
            datacenter,
            timeout_secs,
        } => {
            tracing::info!(%address, "using consul kv backend");
            Ok(Arc::new(ConsulKv::new(
                address.clone(),
                token.clone(),
                datacenter.clone(),
                *timeout_secs,
            )?))
        }
        KvBackendType::Memory => {
            tracing::warn!("using in-memory kv backend, data is lost on restart");
            Ok(Arc::new(MemoryKv::new()))
        }
    }
}
