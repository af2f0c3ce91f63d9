use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// A single configuration unit.
///
/// `(id, version)` addresses a standalone configuration, `(group_id, version)`
/// a group and `(group_id, version, id)` a member of that group.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub entries: HashMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub group_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub version: String,
    /// Opaque label string, matched by exact equality.
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub idempotency_key: String,
}

impl Configuration {
    /// Assigns a random v4 UUID when no id was supplied.
    pub fn ensure_id(&mut self) {
        if self.id.is_empty() {
            self.id = uuid::Uuid::new_v4().to_string();
        }
    }
}

// Records written by other clients may carry explicit nulls for absent fields.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
