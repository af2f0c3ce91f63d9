//! Key layout and idempotency protocol on top of a [`KvClient`].
//!
//! ```text
//! configurations/{id}/{version}        standalone configuration
//! groups/{group_id}/{version}/{id}     group member
//! idempotency/{token}                  empty marker, existence only
//! ```

use crate::kv::{KvClient, KvError};
use crate::types::Configuration;
use bytes::Bytes;
use std::sync::Arc;

const CONFIGURATIONS: &str = "configurations";
const GROUPS: &str = "groups";
const IDEMPOTENCY: &str = "idempotency";

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("configuration not found")]
    NotFound,

    #[error("invalid {field} {value:?}: must be a single non-empty path segment other than '.' or '..'")]
    InvalidKey { field: &'static str, value: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Kv(#[from] KvError),
}

/// Identifiers become path segments of the key. Dot segments are collapsed by
/// HTTP backends and an empty one changes the prefix a listing covers.
fn segment<'a>(field: &'static str, value: &'a str) -> Result<&'a str, StoreError> {
    if value.is_empty() || value == "." || value == ".." || value.contains('/') {
        return Err(StoreError::InvalidKey {
            field,
            value: value.to_string(),
        });
    }
    Ok(value)
}

pub fn configuration_key(id: &str, version: &str) -> Result<String, StoreError> {
    // An unversioned configuration lives at the trailing empty segment
    let version = match version {
        "" => version,
        _ => segment("version", version)?,
    };
    Ok(format!("{CONFIGURATIONS}/{}/{version}", segment("id", id)?))
}

/// Prefix shared by every member of a group. Ends with `/` so that version
/// `1` does not list the members of version `10`.
pub fn group_prefix(group_id: &str, version: &str) -> Result<String, StoreError> {
    Ok(format!(
        "{GROUPS}/{}/{}/",
        segment("group_id", group_id)?,
        segment("version", version)?
    ))
}

pub fn group_member_key(group_id: &str, version: &str, id: &str) -> Result<String, StoreError> {
    Ok(format!(
        "{}{}",
        group_prefix(group_id, version)?,
        segment("id", id)?
    ))
}

pub fn idempotency_key(token: &str) -> String {
    // Tokens are opaque: escape them into a single segment, one key per token
    let escaped = match token {
        "." => "%2E".to_string(),
        ".." => "%2E%2E".to_string(),
        _ => token.replace('%', "%25").replace('/', "%2F"),
    };
    format!("{IDEMPOTENCY}/{escaped}")
}

#[derive(Clone)]
pub struct ConfigStore {
    kv: Arc<dyn KvClient>,
}

impl ConfigStore {
    pub fn new(kv: Arc<dyn KvClient>) -> Self {
        Self { kv }
    }

    #[tracing::instrument(skip_all, fields(id = %config.id, version = %config.version), err)]
    pub async fn add_configuration(&self, config: &Configuration) -> Result<(), StoreError> {
        let key = configuration_key(&config.id, &config.version)?;
        let data = serde_json::to_vec(config)?;
        self.kv.put(&key, Bytes::from(data)).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn get_configuration(
        &self,
        id: &str,
        version: &str,
    ) -> Result<Configuration, StoreError> {
        let key = configuration_key(id, version)?;
        let data = self.kv.get(&key).await?.ok_or(StoreError::NotFound)?;
        Ok(serde_json::from_slice(&data)?)
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn delete_configuration(&self, id: &str, version: &str) -> Result<(), StoreError> {
        let key = configuration_key(id, version)?;
        self.kv.delete(&key).await?;
        Ok(())
    }

    /// Writes one member of the group named by `config.group_id`.
    #[tracing::instrument(
        skip_all,
        fields(group_id = %config.group_id, version = %config.version, id = %config.id),
        err
    )]
    pub async fn add_configuration_group(&self, config: &Configuration) -> Result<(), StoreError> {
        let key = group_member_key(&config.group_id, &config.version, &config.id)?;
        let data = serde_json::to_vec(config)?;
        self.kv.put(&key, Bytes::from(data)).await?;
        Ok(())
    }

    /// Members in backend listing order. Callers must not rely on the order.
    #[tracing::instrument(skip(self), err)]
    pub async fn get_configuration_group(
        &self,
        group_id: &str,
        version: &str,
    ) -> Result<Vec<Configuration>, StoreError> {
        let prefix = group_prefix(group_id, version)?;
        let pairs = self.kv.list(&prefix).await?;

        pairs
            .iter()
            .map(|pair| serde_json::from_slice(&pair.value).map_err(StoreError::from))
            .collect()
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn delete_configuration_group(
        &self,
        group_id: &str,
        version: &str,
    ) -> Result<(), StoreError> {
        let prefix = group_prefix(group_id, version)?;
        self.kv.delete_tree(&prefix).await?;
        Ok(())
    }

    /// Moves each new configuration into the group and writes it. Returns the
    /// members that existed before followed by the ones written here.
    ///
    /// Not transactional: if a write fails, members written before it stay.
    #[tracing::instrument(skip(self, new_configs), fields(count = new_configs.len()), err)]
    pub async fn extend_configuration_group(
        &self,
        group_id: &str,
        version: &str,
        new_configs: Vec<Configuration>,
    ) -> Result<Vec<Configuration>, StoreError> {
        let mut group = self.get_configuration_group(group_id, version).await?;
        group.reserve(new_configs.len());

        for mut config in new_configs {
            config.group_id = group_id.to_string();
            config.version = version.to_string();
            config.ensure_id();

            self.add_configuration_group(&config).await?;
            group.push(config);
        }

        Ok(group)
    }

    /// Members whose `labels` equal `labels` exactly.
    #[tracing::instrument(skip(self), err)]
    pub async fn get_configuration_group_by_labels(
        &self,
        group_id: &str,
        version: &str,
        labels: &str,
    ) -> Result<Vec<Configuration>, StoreError> {
        let mut group = self.get_configuration_group(group_id, version).await?;
        group.retain(|config| config.labels == labels);
        Ok(group)
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn check_idempotency_key(&self, token: &str) -> Result<bool, StoreError> {
        Ok(self.kv.get(&idempotency_key(token)).await?.is_some())
    }

    /// Records `token` as processed. Returns `false` if it was already
    /// recorded, which callers treat as a replay.
    #[tracing::instrument(skip(self), err)]
    pub async fn save_idempotency_key(&self, token: &str) -> Result<bool, StoreError> {
        Ok(self
            .kv
            .put_if_absent(&idempotency_key(token), Bytes::new())
            .await?)
    }

    /// Forgets `token` after the write it guarded failed.
    #[tracing::instrument(skip(self), err)]
    pub async fn release_idempotency_key(&self, token: &str) -> Result<(), StoreError> {
        self.kv.delete(&idempotency_key(token)).await?;
        Ok(())
    }
}
